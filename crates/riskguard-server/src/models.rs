//! API request and response models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use riskguard_core::rule_engine::ActionInfo;
use riskguard_core::{
    BatchItemError, CheckRequest, CheckResult, ContextItem, DetectorStatus, Rule, RuleSet,
};
use serde::{Deserialize, Serialize};

/// Request body for POST /api/v1/check.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct CheckBody {
    pub content: String,
    pub user_id: String,
    pub scene: String,
    pub extra_data: HashMap<String, String>,
}

impl From<CheckBody> for CheckRequest {
    fn from(body: CheckBody) -> Self {
        CheckRequest {
            content: body.content,
            user_id: body.user_id,
            scene: body.scene,
            request_id: String::new(),
            extra_data: body.extra_data,
        }
    }
}

/// One context turn as sent by clients. Every field is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ContextItemBody {
    pub content: String,
    pub user_id: String,
    pub timestamp: i64,
    pub content_id: String,
}

impl From<ContextItemBody> for ContextItem {
    fn from(body: ContextItemBody) -> Self {
        ContextItem {
            content: body.content,
            user_id: body.user_id,
            timestamp: body.timestamp,
            content_id: body.content_id,
        }
    }
}

/// Request body for POST /api/v1/check_with_context.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContextCheckBody {
    #[serde(flatten)]
    pub check: CheckBody,
    #[serde(default)]
    pub context_items: Vec<ContextItemBody>,
}

/// Response body for single checks.
#[derive(Debug, Serialize)]
pub struct CheckResponse {
    pub success: bool,
    #[serde(flatten)]
    pub result: CheckResult,
}

impl From<CheckResult> for CheckResponse {
    fn from(result: CheckResult) -> Self {
        Self {
            success: true,
            result,
        }
    }
}

/// Request body for POST /api/v1/batch_check.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BatchCheckBody {
    pub items: Vec<CheckBody>,
    /// Generated from the current time when absent.
    pub batch_id: Option<String>,
}

/// Response body for POST /api/v1/batch_check.
#[derive(Debug, Serialize)]
pub struct BatchCheckResponse {
    pub success: bool,
    pub batch_id: String,
    pub results: Vec<CheckResult>,
    pub total_cost_time: u64,
    pub errors: Vec<BatchItemError>,
    /// Last per-item error, if any item failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Response body for GET /api/v1/health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub service: &'static str,
    /// RFC 3339 timestamp.
    pub time: String,
    pub version: &'static str,
    pub detectors: Vec<DetectorStatus>,
    pub rules_version: Option<u64>,
    pub word_count: usize,
}

/// Response body for GET /api/v1/rules.
#[derive(Debug, Serialize)]
pub struct RulesResponse {
    pub success: bool,
    pub version: u64,
    pub loaded_at: DateTime<Utc>,
    pub rules: Vec<Rule>,
    pub actions: HashMap<String, ActionInfo>,
    pub categories: HashMap<String, String>,
}

impl From<&RuleSet> for RulesResponse {
    fn from(set: &RuleSet) -> Self {
        Self {
            success: true,
            version: set.version,
            loaded_at: set.loaded_at,
            rules: set.rules.clone(),
            actions: set.actions.clone(),
            categories: set.categories.clone(),
        }
    }
}

/// Response body for POST /api/v1/rules/reload.
#[derive(Debug, Serialize)]
pub struct ReloadRulesResponse {
    pub success: bool,
    pub version: u64,
    pub rule_count: usize,
}

/// Request body for POST and DELETE /api/v1/words.
#[derive(Debug, Deserialize)]
pub struct WordBody {
    pub word: String,
}

/// Response body for word list operations.
#[derive(Debug, Serialize)]
pub struct WordsResponse {
    pub success: bool,
    pub count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub words: Option<Vec<String>>,
    /// Whether a DELETE found the word.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub removed: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskguard_core::ResultType;

    #[test]
    fn check_body_fields_are_optional() {
        let body: CheckBody = serde_json::from_str(r#"{"content": "hi"}"#).unwrap();
        let request = CheckRequest::from(body);
        assert_eq!(request.content, "hi");
        assert!(request.user_id.is_empty());
    }

    #[test]
    fn context_body_flattens_check_fields() {
        let body: ContextCheckBody = serde_json::from_str(
            r#"{"content": "hi", "user_id": "a", "context_items": [{"content": "yo", "user_id": "b"}]}"#,
        )
        .unwrap();
        assert_eq!(body.check.user_id, "a");
        assert_eq!(body.context_items.len(), 1);
        assert_eq!(body.context_items[0].timestamp, 0);
    }

    #[test]
    fn check_response_is_flat() {
        let response = CheckResponse::from(CheckResult {
            result: ResultType::Review,
            request_id: "req_1".into(),
            ..Default::default()
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["result"], 1);
        assert_eq!(json["request_id"], "req_1");
    }
}
