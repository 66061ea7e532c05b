//! Harassment detector: keyword match plus two conversational checks.

use async_trait::async_trait;

use super::Detector;
use crate::error::DetectorError;
use crate::model::{CheckContext, RiskItem, RiskType};

const HARASSMENT_KEYWORDS: &[&str] = &[
    "骚扰", "威胁", "欺凌", "攻击", "人身攻击", "侮辱", "歧视", "性骚扰", "跟踪", "恐吓", "霸凌",
    "黑料", "隐私", "私人信息", "废物",
];

const KEYWORD_SCORE: f32 = 70.0;
const REPEAT_SCORE: f32 = 65.0;
const TARGETING_SCORE: f32 = 60.0;

/// Messages from the same author (current one included) that count as repetition.
const REPEAT_MESSAGE_THRESHOLD: usize = 3;

/// Messages from one other participant that count as a targeted exchange.
const TARGET_MESSAGE_THRESHOLD: usize = 2;

/// Flags abusive keywords, repeated messaging and fixation on one participant.
///
/// The three checks are independent; each can emit one item.
#[derive(Debug, Default)]
pub struct HarassmentDetector;

impl HarassmentDetector {
    pub fn new() -> Self {
        Self
    }

    fn keyword_hit(content: &str) -> Option<&'static str> {
        let lower = content.to_lowercase();
        HARASSMENT_KEYWORDS
            .iter()
            .copied()
            .find(|k| lower.contains(k))
    }

    /// Prior messages by the author plus the current one.
    fn same_author_count(ctx: &CheckContext) -> usize {
        ctx.context_items
            .iter()
            .filter(|item| item.user_id == ctx.user_id)
            .count()
            + 1
    }

    /// First other participant, in context order, reaching the threshold.
    fn targeted_user(ctx: &CheckContext) -> Option<&str> {
        if ctx.context_items.len() < TARGET_MESSAGE_THRESHOLD {
            return None;
        }

        let mut counts: Vec<(&str, usize)> = Vec::new();
        for item in ctx.context_items.iter().filter(|i| i.user_id != ctx.user_id) {
            match counts.iter_mut().find(|(user, _)| *user == item.user_id) {
                Some((_, count)) => *count += 1,
                None => counts.push((item.user_id.as_str(), 1)),
            }
        }

        counts
            .into_iter()
            .find(|(_, count)| *count >= TARGET_MESSAGE_THRESHOLD)
            .map(|(user, _)| user)
    }
}

#[async_trait]
impl Detector for HarassmentDetector {
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError> {
        if ctx.content.is_empty() {
            return Ok(Vec::new());
        }

        let mut risks = Vec::new();

        if let Some(keyword) = Self::keyword_hit(&ctx.content) {
            risks.push(
                RiskItem::new(
                    RiskType::Harassment,
                    KEYWORD_SCORE,
                    "content contains harassment keywords",
                )
                .with_detail("keyword", keyword),
            );
        }

        if ctx.has_context() {
            let repeat_count = Self::same_author_count(ctx);
            if repeat_count >= REPEAT_MESSAGE_THRESHOLD {
                risks.push(
                    RiskItem::new(
                        RiskType::Harassment,
                        REPEAT_SCORE,
                        "repeated messages from the same author",
                    )
                    .with_detail("repeat_count", repeat_count.to_string()),
                );
            }

            if let Some(target) = Self::targeted_user(ctx) {
                risks.push(
                    RiskItem::new(
                        RiskType::Harassment,
                        TARGETING_SCORE,
                        "frequent messages directed at one participant",
                    )
                    .with_detail("target_user", target),
                );
            }
        }

        Ok(risks)
    }

    fn name(&self) -> &'static str {
        "harassment"
    }
}
