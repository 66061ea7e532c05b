//! Core data model for content checks.
//!
//! The numeric values of [`ResultType`] and [`RiskType`] are part of the wire
//! contract and must never be renumbered.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Verdict band for a checked piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum ResultType {
    /// Content is acceptable.
    #[default]
    Pass = 0,
    /// Content must be routed to a human reviewer.
    Review = 1,
    /// Content is rejected.
    Reject = 2,
    /// Content is accepted with a warning.
    Warning = 3,
}

impl ResultType {
    /// Returns all verdict bands.
    pub fn all() -> &'static [ResultType] {
        &[
            ResultType::Pass,
            ResultType::Review,
            ResultType::Reject,
            ResultType::Warning,
        ]
    }

    /// Returns a human-readable name for this verdict.
    pub fn name(&self) -> &'static str {
        match self {
            ResultType::Pass => "Pass",
            ResultType::Review => "Review",
            ResultType::Reject => "Reject",
            ResultType::Warning => "Warning",
        }
    }
}

impl From<ResultType> for i32 {
    fn from(value: ResultType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for ResultType {
    type Error = UnknownVariant;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ResultType::Pass),
            1 => Ok(ResultType::Review),
            2 => Ok(ResultType::Reject),
            3 => Ok(ResultType::Warning),
            other => Err(UnknownVariant("ResultType", other)),
        }
    }
}

/// Category of a detected risk signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum RiskType {
    #[default]
    Unknown = 0,
    SensitiveWord = 1,
    Spam = 2,
    Harassment = 3,
    HateSpeech = 4,
    Violence = 5,
    Adult = 6,
    ContextViolation = 7,
    SuspiciousBehavior = 8,
}

impl RiskType {
    /// Returns all risk types in wire order.
    pub fn all() -> &'static [RiskType] {
        &[
            RiskType::Unknown,
            RiskType::SensitiveWord,
            RiskType::Spam,
            RiskType::Harassment,
            RiskType::HateSpeech,
            RiskType::Violence,
            RiskType::Adult,
            RiskType::ContextViolation,
            RiskType::SuspiciousBehavior,
        ]
    }

    /// Returns the snake_case label used by remote providers and rule configs.
    pub fn label(&self) -> &'static str {
        match self {
            RiskType::Unknown => "unknown",
            RiskType::SensitiveWord => "sensitive_word",
            RiskType::Spam => "spam",
            RiskType::Harassment => "harassment",
            RiskType::HateSpeech => "hate_speech",
            RiskType::Violence => "violence",
            RiskType::Adult => "adult",
            RiskType::ContextViolation => "context_violation",
            RiskType::SuspiciousBehavior => "suspicious_behavior",
        }
    }

    /// Maps a remote provider label onto a risk type.
    ///
    /// Unrecognized labels map to [`RiskType::Unknown`].
    pub fn from_label(label: &str) -> Self {
        RiskType::all()
            .iter()
            .copied()
            .find(|t| t.label() == label)
            .unwrap_or(RiskType::Unknown)
    }

    /// Maps a rule-config category onto a risk type.
    pub fn from_category(category: &str) -> Self {
        match category {
            "sensitive" => RiskType::SensitiveWord,
            "spam" => RiskType::Spam,
            "harassment" => RiskType::Harassment,
            "hate_speech" => RiskType::HateSpeech,
            "violence" => RiskType::Violence,
            "adult" => RiskType::Adult,
            _ => RiskType::Unknown,
        }
    }
}

impl From<RiskType> for i32 {
    fn from(value: RiskType) -> Self {
        value as i32
    }
}

impl TryFrom<i32> for RiskType {
    type Error = UnknownVariant;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        RiskType::all()
            .iter()
            .copied()
            .find(|t| *t as i32 == value)
            .ok_or(UnknownVariant("RiskType", value))
    }
}

/// Error for a numeric enum value outside the wire contract.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownVariant(&'static str, i32);

impl fmt::Display for UnknownVariant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown {} value: {}", self.0, self.1)
    }
}

impl std::error::Error for UnknownVariant {}

/// One prior conversational turn.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextItem {
    pub content: String,
    /// Author of the turn.
    pub user_id: String,
    /// Unix timestamp (seconds).
    pub timestamp: i64,
    pub content_id: String,
}

impl ContextItem {
    /// Creates a context item stamped with the current time.
    pub fn new(
        content: impl Into<String>,
        user_id: impl Into<String>,
        content_id: impl Into<String>,
    ) -> Self {
        Self {
            content: content.into(),
            user_id: user_id.into(),
            timestamp: chrono::Utc::now().timestamp(),
            content_id: content_id.into(),
        }
    }
}

/// One evaluation unit handed to every detector.
///
/// Detectors only ever receive a shared reference.
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    pub content: String,
    pub user_id: String,
    pub scene: String,
    /// Prior turns, oldest first.
    pub context_items: Vec<ContextItem>,
    pub extra_data: HashMap<String, String>,
}

impl CheckContext {
    /// Creates a context for a standalone piece of content.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Sets the author.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    /// Sets the scene tag.
    pub fn with_scene(mut self, scene: impl Into<String>) -> Self {
        self.scene = scene.into();
        self
    }

    /// Sets the conversational history.
    pub fn with_context(mut self, items: Vec<ContextItem>) -> Self {
        self.context_items = items;
        self
    }

    /// Sets the free-form extra data.
    pub fn with_extra(mut self, extra: HashMap<String, String>) -> Self {
        self.extra_data = extra;
        self
    }

    /// Returns true if there is conversational history.
    pub fn has_context(&self) -> bool {
        !self.context_items.is_empty()
    }
}

/// A single check request, as used by batch and stream calls.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckRequest {
    pub content: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub scene: String,
    #[serde(default)]
    pub request_id: String,
    #[serde(default)]
    pub extra_data: HashMap<String, String>,
}

impl CheckRequest {
    /// Creates a request with only content set.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            ..Default::default()
        }
    }

    /// Sets the author.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// One scored, typed finding.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskItem {
    #[serde(rename = "type")]
    pub risk_type: RiskType,
    /// Score, conventionally 0-100.
    pub score: f32,
    pub description: String,
    #[serde(default)]
    pub details: HashMap<String, String>,
}

impl RiskItem {
    /// Creates a risk item without details.
    pub fn new(risk_type: RiskType, score: f32, description: impl Into<String>) -> Self {
        Self {
            risk_type,
            score,
            description: description.into(),
            details: HashMap::new(),
        }
    }

    /// Adds one detail entry.
    pub fn with_detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }
}

/// Final verdict for one unit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckResult {
    pub result: ResultType,
    pub risk_score: f32,
    pub risks: Vec<RiskItem>,
    pub request_id: String,
    pub suggestion: String,
    /// Elapsed time in milliseconds; zero for cache hits.
    pub cost_time: u64,
    #[serde(default)]
    pub extra: HashMap<String, String>,
}

impl CheckResult {
    /// Placeholder verdict for a batch slot whose evaluation failed.
    pub fn failed_placeholder(request_id: impl Into<String>, error: &str) -> Self {
        let mut extra = HashMap::new();
        extra.insert("error".to_string(), error.to_string());
        Self {
            result: ResultType::Pass,
            risk_score: 0.0,
            risks: Vec::new(),
            request_id: request_id.into(),
            suggestion: String::new(),
            cost_time: 0,
            extra,
        }
    }

    /// Returns the highest scoring risk, if any.
    pub fn highest_risk(&self) -> Option<&RiskItem> {
        self.risks
            .iter()
            .max_by(|a, b| a.score.total_cmp(&b.score))
    }
}

/// Error recorded for one batch slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItemError {
    pub index: usize,
    pub message: String,
}

/// Verdicts for a batch, index-aligned with the (truncated) input.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchCheckResult {
    pub batch_id: String,
    pub results: Vec<CheckResult>,
    /// Total elapsed time in milliseconds.
    pub total_cost_time: u64,
    /// Every per-slot failure, in index order.
    #[serde(default)]
    pub errors: Vec<BatchItemError>,
}

/// Namespace prefix for cache keys.
pub const CACHE_KEY_PREFIX: &str = "content_check:";

/// Stable hex digest of a content string.
pub fn hash_content(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// Cache key for a content string.
pub fn cache_key(content: &str) -> String {
    format!("{}{}", CACHE_KEY_PREFIX, hash_content(content))
}
