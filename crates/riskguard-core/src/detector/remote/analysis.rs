//! Structured analysis returned by LLM-backed providers.

use std::collections::HashMap;

use serde::Deserialize;

use super::contains_rejection;
use crate::error::RemoteError;
use crate::model::{CheckContext, RiskItem, RiskType};

/// Instructions sent as the system message to LLM-backed providers.
pub(crate) const ANALYSIS_PROMPT: &str = "\
You are a content safety analyst. Decide whether the user's text contains unsafe \
content such as insults, harassment, threats or hate speech.
Reply with a single JSON object with these fields:
- is_toxic: true or false
- categories: scores between 0 and 1 for any of \"insult\", \"threat\", \"harassment\", \
\"hate_speech\", \"self_harm\", \"sexual\", \"violence\"
- explanation: a short justification
- intent: one of \"harmful\", \"neutral\", \"friendly\"
- sentiment: one of \"negative\", \"neutral\", \"positive\"
- risk_score: overall risk between 0 and 1
Output only the JSON object.";

const HARASSMENT_WEIGHT: f32 = 100.0;
const INTENT_WEIGHT: f32 = 80.0;
const CONTEXT_WEIGHT: f32 = 90.0;

/// Model verdict for one piece of content.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LlmAnalysis {
    pub is_toxic: bool,
    pub categories: HashMap<String, f32>,
    pub explanation: String,
    pub intent: String,
    pub sentiment: String,
    pub risk_score: f32,
}

impl LlmAnalysis {
    /// Parses a model reply, accepting a bare object or one inside a ```json fence.
    pub fn parse(reply: &str) -> Result<Self, RemoteError> {
        let body = match reply.split_once("```json") {
            Some((_, rest)) => rest.split("```").next().unwrap_or(rest).trim(),
            None => reply.trim(),
        };

        serde_json::from_str(body)
            .map_err(|e| RemoteError::InvalidResponse(format!("{}: {}", e, body)))
    }

    /// Translates the analysis into risk items.
    pub fn into_risks(self, threshold: f32, ctx: &CheckContext) -> Vec<RiskItem> {
        let mut risks = Vec::new();
        let risk = self.risk_score;

        if self.is_toxic && risk > threshold {
            let mut item = RiskItem::new(RiskType::Harassment, risk * HARASSMENT_WEIGHT, self.explanation);
            for (category, score) in &self.categories {
                if *score > threshold {
                    item.details.insert(category.clone(), format!("{:.2}", score));
                }
            }
            risks.push(item);
        }

        if !self.intent.is_empty() && self.intent != "neutral" && risk > threshold {
            let risk_type = match self.intent.as_str() {
                "harmful" => RiskType::Harassment,
                _ => RiskType::Unknown,
            };
            risks.push(
                RiskItem::new(
                    risk_type,
                    risk * INTENT_WEIGHT,
                    format!("{} intent detected", self.intent),
                )
                .with_detail("intent", self.intent.clone()),
            );
        }

        if ctx
            .context_items
            .iter()
            .any(|item| contains_rejection(&item.content))
        {
            risks.push(RiskItem::new(
                RiskType::ContextViolation,
                risk * CONTEXT_WEIGHT,
                "risky behaviour in conversational context",
            ));
        }

        risks
    }
}

/// Builds the user message: optional context block followed by the text.
pub(crate) fn user_input(ctx: &CheckContext) -> String {
    if ctx.context_items.is_empty() {
        return format!("Text to analyze:\n{}", ctx.content);
    }

    let history: Vec<&str> = ctx
        .context_items
        .iter()
        .map(|item| item.content.as_str())
        .collect();
    format!(
        "Context:\n{}\n\nText to analyze:\n{}",
        history.join("\n"),
        ctx.content
    )
}
