//! Application state for the API server.

use std::sync::Arc;

use riskguard_core::{CheckConfig, ContentChecker, RuleEngine, SensitiveWordStore};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Decision pipeline; also owns the word store and rule engine.
    pub checker: Arc<ContentChecker>,
}

impl AppState {
    /// Creates application state around a configured checker.
    pub fn new(checker: Arc<ContentChecker>) -> Self {
        Self { checker }
    }

    /// Creates state with local detectors, an empty rule set and the given words.
    pub fn with_words(words: &[&str]) -> Self {
        let store = Arc::new(SensitiveWordStore::new(Vec::new()));
        store.set_word_list(words.iter().map(|w| w.to_string()).collect());
        let checker = ContentChecker::new(
            CheckConfig::default(),
            store,
            Arc::new(RuleEngine::empty()),
        );
        Self::new(Arc::new(checker))
    }
}
