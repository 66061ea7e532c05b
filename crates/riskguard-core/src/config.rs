//! Pipeline configuration.
//!
//! All fields default so a partial JSON document deserializes cleanly.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default reject threshold.
pub const DEFAULT_RISK_SCORE_THRESHOLD: f32 = 70.0;

/// Default result cache TTL in seconds.
pub const DEFAULT_CACHE_TTL_SECS: u64 = 300;

/// Default maximum batch size.
pub const DEFAULT_BATCH_MAX_SIZE: usize = 100;

/// Configuration for the decision pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckConfig {
    /// Reject threshold `T`; review and warning bands are 0.7T and 0.5T.
    pub risk_score_threshold: f32,
    /// TTL for cached non-reject verdicts, in seconds.
    pub cache_ttl_secs: u64,
    /// Batches longer than this are truncated.
    pub batch_max_size: usize,
    /// Most recent context items kept per check (0 = unlimited).
    pub context_history_size: usize,
    /// Confidence gate for the semantic detector's keyword classification.
    pub semantic_threshold: f32,
    /// Word-list files, newline delimited.
    pub sensitive_word_paths: Vec<PathBuf>,
    /// Word-list refresh interval in seconds (0 = never).
    pub sensitive_words_update_interval_secs: u64,
    /// Rule definition file.
    pub rule_file: Option<PathBuf>,
    /// Rule reload interval in seconds (0 = never).
    pub rule_update_interval_secs: u64,
}

impl Default for CheckConfig {
    fn default() -> Self {
        Self {
            risk_score_threshold: DEFAULT_RISK_SCORE_THRESHOLD,
            cache_ttl_secs: DEFAULT_CACHE_TTL_SECS,
            batch_max_size: DEFAULT_BATCH_MAX_SIZE,
            context_history_size: 20,
            semantic_threshold: 0.3,
            sensitive_word_paths: vec![PathBuf::from("config/sensitive_words.txt")],
            sensitive_words_update_interval_secs: 300,
            rule_file: None,
            rule_update_interval_secs: 0,
        }
    }
}

impl CheckConfig {
    /// Returns the cache TTL.
    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Returns the word refresh interval, if periodic refresh is enabled.
    pub fn word_refresh_interval(&self) -> Option<Duration> {
        non_zero_secs(self.sensitive_words_update_interval_secs)
    }

    /// Returns the rule reload interval, if periodic reload is enabled.
    pub fn rule_reload_interval(&self) -> Option<Duration> {
        non_zero_secs(self.rule_update_interval_secs)
    }

    /// Sets the reject threshold.
    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.risk_score_threshold = threshold;
        self
    }

    /// Sets the maximum batch size.
    pub fn with_batch_max_size(mut self, size: usize) -> Self {
        self.batch_max_size = size;
        self
    }
}

/// Configuration for one remote signal provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteServiceConfig {
    pub enabled: bool,
    /// Analysis endpoint or API base URL, depending on the provider.
    pub url: String,
    pub api_key: Option<String>,
    /// Model name for LLM-backed providers.
    pub model: Option<String>,
    /// Risk threshold (0-1) for LLM-backed providers.
    pub threshold: f32,
    /// Connectivity probe timeout in milliseconds.
    pub probe_timeout_ms: u64,
    /// Analysis call timeout in milliseconds.
    pub request_timeout_ms: u64,
    /// Base interval for recovery probes while latched (0 = never recover).
    pub recovery_interval_secs: u64,
}

impl Default for RemoteServiceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            api_key: None,
            model: None,
            threshold: 0.5,
            probe_timeout_ms: 5_000,
            request_timeout_ms: 30_000,
            recovery_interval_secs: 0,
        }
    }
}

impl RemoteServiceConfig {
    /// Creates an enabled config pointing at `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            enabled: true,
            url: url.into(),
            ..Default::default()
        }
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Returns the recovery probe interval, if recovery is enabled.
    pub fn recovery_interval(&self) -> Option<Duration> {
        non_zero_secs(self.recovery_interval_secs)
    }
}

/// Configuration for all remote signal providers.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSignalsConfig {
    pub ai_service: RemoteServiceConfig,
    pub cloud_nlp: RemoteServiceConfig,
    pub local_llm: RemoteServiceConfig,
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
