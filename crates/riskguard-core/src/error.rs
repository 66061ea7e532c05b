//! Error types for the decision pipeline.

use thiserror::Error;

/// Errors surfaced to callers of the decision API.
///
/// Only input validation reaches the caller; detector, rule engine and cache
/// failures degrade the verdict instead.
#[derive(Debug, Error)]
pub enum CheckError {
    /// The content to check was empty.
    #[error("content is empty")]
    EmptyContent,

    /// A batch call carried no items.
    #[error("batch is empty")]
    EmptyBatch,

    /// A batch task panicked or was cancelled.
    #[error("batch task failed: {0}")]
    TaskFailed(String),

    /// Rule loading failed.
    #[error("rule error: {0}")]
    Rules(#[from] RuleError),
}

/// Errors from loading or evaluating rule sets.
#[derive(Debug, Error)]
pub enum RuleError {
    /// The rule file could not be read.
    #[error("failed to read rule file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The rule document is not valid JSON.
    #[error("failed to parse rule document: {0}")]
    Parse(#[from] serde_json::Error),

    /// Two rules share an id.
    #[error("duplicate rule id: {0}")]
    DuplicateRule(String),

    /// No rule set has been loaded yet.
    #[error("rule engine not initialized")]
    NotInitialized,

    /// Reload was requested but no rule file is configured.
    #[error("no rule file configured")]
    NoSource,

    /// A rule's config could not be compiled.
    #[error("invalid config for rule {rule}: {message}")]
    InvalidConfig { rule: String, message: String },
}

/// Errors from remote signal providers.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response.
    #[error("service returned status {status}: {message}")]
    Status { status: u16, message: String },

    /// The service answered but reported failure.
    #[error("service error: {0}")]
    Service(String),

    /// The response body did not match the expected schema.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// The provider was misconfigured.
    #[error("configuration error: {0}")]
    Config(String),
}

/// Errors from cache backends. Never surfaced past the result cache.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend is not reachable.
    #[error("cache backend unavailable: {0}")]
    Unavailable(String),

    /// Stored value could not be (de)serialized.
    #[error("cache serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Backend-specific failure.
    #[error("cache backend error: {0}")]
    Backend(String),
}

/// Result type for decision API operations.
pub type Result<T> = std::result::Result<T, CheckError>;

/// Errors reported by a detector for one call.
///
/// The orchestrator logs these and treats the detector as silent.
#[derive(Debug, Error)]
pub enum DetectorError {
    /// A remote provider call failed.
    #[error("remote signal failed: {0}")]
    Remote(#[from] RemoteError),

    /// Any other detector-local failure.
    #[error("{0}")]
    Failed(String),
}
