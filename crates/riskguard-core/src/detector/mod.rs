//! Risk signal detectors.
//!
//! Every detector implements [`Detector`] and is registered in a
//! [`DetectorRegistry`], which fixes the order the orchestrator runs them in.
//!
//! - [`SensitiveWordDetector`]: substring scan against the live word list
//! - [`SpamDetector`]: URL density, phone, currency and keyword checks
//! - [`HarassmentDetector`]: keywords plus repeat/targeting context checks
//! - [`SemanticDetector`]: heuristic cascade with conversational analysis
//! - [`remote`]: HTTP-backed providers wrapped in a fallback latch

mod harassment;
pub mod remote;
mod semantic;
mod sensitive_word;
mod spam;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DetectorError;
use crate::model::{CheckContext, RiskItem};

pub use harassment::HarassmentDetector;
pub use semantic::SemanticDetector;
pub use sensitive_word::{SensitiveWordDetector, WordChecker};
pub use spam::SpamDetector;

/// Trait for pluggable risk detectors.
///
/// Implementations must not mutate the context. An `Err` never aborts the
/// pipeline: the orchestrator logs it and the detector contributes nothing
/// for that call.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Inspects the context and returns zero or more risk items.
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError>;

    /// Returns the name of this detector for logging.
    fn name(&self) -> &'static str;

    /// Returns `Some(true)` while a remote detector is latched into fallback.
    ///
    /// Local detectors return `None`.
    fn fallback_mode(&self) -> Option<bool> {
        None
    }
}

/// Ordered collection of detectors.
///
/// Detectors run in registration order.
#[derive(Clone, Default)]
pub struct DetectorRegistry {
    detectors: Vec<Arc<dyn Detector>>,
}

impl DetectorRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the local detectors in their standard order:
    /// sensitive words, spam, harassment, semantic.
    pub fn with_local_detectors(words: Arc<dyn WordChecker>, semantic_threshold: f32) -> Self {
        let mut registry = Self::new();
        registry.register(SensitiveWordDetector::new(words));
        registry.register(SpamDetector::new());
        registry.register(HarassmentDetector::new());
        registry.register(SemanticDetector::new(semantic_threshold));
        registry
    }

    /// Appends a detector.
    pub fn register<D: Detector + 'static>(&mut self, detector: D) -> &mut Self {
        self.detectors.push(Arc::new(detector));
        self
    }

    /// Appends a shared detector.
    pub fn register_shared(&mut self, detector: Arc<dyn Detector>) -> &mut Self {
        self.detectors.push(detector);
        self
    }

    /// Iterates detectors in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn Detector>> {
        self.detectors.iter()
    }

    /// Returns detector names in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.detectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.detectors.is_empty()
    }
}

impl std::fmt::Debug for DetectorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DetectorRegistry")
            .field("detectors", &self.names())
            .finish()
    }
}
