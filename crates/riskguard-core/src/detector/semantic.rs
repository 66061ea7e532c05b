//! Heuristic semantic detector.
//!
//! Runs an ordered cascade over the content and its conversation:
//!
//! 1. direct insult / threat / hostile-command patterns (short-circuits)
//! 2. family terms used after the other side pushed back (short-circuits)
//! 3. weighted keyword classification, gated by a confidence threshold
//! 4. conversational imbalance and negative-response analysis

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::Detector;
use crate::error::DetectorError;
use crate::model::{CheckContext, ContextItem, RiskItem, RiskType};

static RESPECTFUL_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(您好|请问|麻烦|谢谢|感谢|劳驾|打扰了|不好意思)").expect("valid respectful regex")
});

static GREETING_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(早上好|上午好|中午好|下午好|晚上好|晚安|早安|嗨|喂|你好)")
        .expect("valid greeting regex")
});

static FAMILY_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(你妈妈|你爸爸|你爷爷|你奶奶|你哥哥|你姐姐)(怎么样|好吗|还好吗|身体好吗)")
        .expect("valid family regex")
});

static INSULT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(滚蛋|傻逼|废物|混蛋|白痴|笨蛋|蠢货|智障|垃圾|贱人|去死)")
        .expect("valid insult regex")
});

static COMMAND_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(必须|一定要|给我|立刻|马上|快点)(.{0,15})(否则|不然|不许|不准|要不然)")
        .expect("valid command regex")
});

static THREAT_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(小心|当心|后果|威胁|找你|等着|报复)").expect("valid threat regex")
});

const FAMILY_TERMS: &[&str] = &["你妈", "你爸", "你爷"];
const REJECTION_TERMS: &[&str] = &["不要", "别", "停止", "讨厌"];
const NEGATIVE_TERMS: &[&str] = &["别", "不要", "停止", "烦"];

const INSULT_SCORE: f32 = 85.0;
const THREAT_SCORE: f32 = 75.0;
const HOSTILE_COMMAND_SCORE: f32 = 80.0;
const FAMILY_AFTER_REJECTION_SCORE: f32 = 75.0;
const IMBALANCE_SCORE: f32 = 60.0;
const CONTINUED_OFFENSE_SCORE: f32 = 70.0;
const IGNORED_PUSHBACK_SCORE: f32 = 65.0;

/// Confidence added per matched keyword.
const KEYWORD_WEIGHT: f32 = 0.2;

/// Minimum confidence before a text is classified at all.
const MIN_CLASSIFICATION_CONFIDENCE: f32 = 0.3;

/// Text categories recognised by keyword classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Category {
    Insult,
    Command,
    Threat,
    Spam,
}

impl Category {
    /// Evaluation order; earlier categories win ties.
    const ALL: [Category; 4] = [
        Category::Insult,
        Category::Command,
        Category::Threat,
        Category::Spam,
    ];

    fn keywords(self) -> &'static [&'static str] {
        match self {
            Category::Insult => &[
                "废物", "垃圾", "蠢货", "白痴", "傻逼", "混蛋", "笨蛋", "去死", "滚蛋",
            ],
            Category::Command => &["必须", "一定", "马上", "立刻", "给我", "快点"],
            Category::Threat => &["小心", "当心", "威胁", "后果", "找你", "报复"],
            Category::Spam => &["优惠", "打折", "促销", "免费", "赚钱", "发财", "中奖", "红包"],
        }
    }

    fn risk_type(self) -> RiskType {
        match self {
            Category::Insult | Category::Command | Category::Threat => RiskType::Harassment,
            Category::Spam => RiskType::Spam,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Category::Insult => "insulting",
            Category::Command => "commanding",
            Category::Threat => "threatening",
            Category::Spam => "spam",
        }
    }
}

#[derive(Debug, Clone)]
struct Classification {
    category: Category,
    confidence: f32,
    matched: Vec<&'static str>,
}

fn contains_any(text: &str, terms: &[&str]) -> bool {
    terms.iter().any(|t| text.contains(t))
}

/// Pattern and heuristic classifier with conversational analysis.
#[derive(Debug, Clone)]
pub struct SemanticDetector {
    threshold: f32,
}

impl SemanticDetector {
    /// Creates a detector; `threshold` gates keyword classification (0-1).
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    fn pattern_match(content: &str) -> Option<RiskItem> {
        if INSULT_PATTERN.is_match(content) {
            return Some(RiskItem::new(
                RiskType::Harassment,
                INSULT_SCORE,
                "direct insulting language",
            ));
        }

        if THREAT_PATTERN.is_match(content) {
            return Some(RiskItem::new(
                RiskType::Harassment,
                THREAT_SCORE,
                "potentially threatening language",
            ));
        }

        if COMMAND_PATTERN.is_match(content)
            && content.contains("你妈")
            && !FAMILY_PATTERN.is_match(content)
            && !GREETING_PATTERN.is_match(content)
        {
            return Some(RiskItem::new(
                RiskType::Harassment,
                HOSTILE_COMMAND_SCORE,
                "hostile command referencing family members",
            ));
        }

        None
    }

    fn family_after_rejection(content: &str, context: &[ContextItem]) -> Option<RiskItem> {
        if !contains_any(content, FAMILY_TERMS) {
            return None;
        }

        // Polite family references are fine regardless of context
        if FAMILY_PATTERN.is_match(content)
            || RESPECTFUL_PATTERN.is_match(content)
            || GREETING_PATTERN.is_match(content)
        {
            return None;
        }

        context
            .iter()
            .any(|item| contains_any(&item.content, REJECTION_TERMS))
            .then(|| {
                RiskItem::new(
                    RiskType::Harassment,
                    FAMILY_AFTER_REJECTION_SCORE,
                    "family reference after the other side objected",
                )
            })
    }

    fn classify(text: &str) -> Option<Classification> {
        let mut best: Option<Classification> = None;

        for category in Category::ALL {
            let matched: Vec<&'static str> = category
                .keywords()
                .iter()
                .copied()
                .filter(|k| text.contains(k))
                .collect();
            let confidence = matched.len() as f32 * KEYWORD_WEIGHT;

            if confidence > best.as_ref().map_or(0.0, |b| b.confidence) {
                best = Some(Classification {
                    category,
                    confidence,
                    matched,
                });
            }
        }

        best.filter(|c| c.confidence >= MIN_CLASSIFICATION_CONFIDENCE)
    }

    fn classification_risk(&self, content: &str) -> Option<RiskItem> {
        let class = Self::classify(content)?;
        if class.confidence <= self.threshold {
            return None;
        }

        let shown: Vec<&str> = class.matched.iter().take(3).copied().collect();
        Some(
            RiskItem::new(
                class.category.risk_type(),
                class.confidence * 100.0,
                format!(
                    "{} content detected, keywords: {}",
                    class.category.label(),
                    shown.join(", ")
                ),
            )
            .with_detail("category", class.category.label()),
        )
    }

    fn conversation_risks(ctx: &CheckContext) -> Vec<RiskItem> {
        let items = &ctx.context_items;
        let mut risks = Vec::new();
        if items.len() < 2 {
            return risks;
        }

        let sent = items.iter().filter(|i| i.user_id == ctx.user_id).count();

        // Other participants in order of first appearance
        let mut others: Vec<&str> = Vec::new();
        for item in items.iter().filter(|i| i.user_id != ctx.user_id) {
            if !others.contains(&item.user_id.as_str()) {
                others.push(item.user_id.as_str());
            }
        }

        for other in others {
            let replies = items.iter().filter(|i| i.user_id == other).count();
            if sent > replies * 2 && sent > 2 {
                let ratio = sent as f64 / replies.max(1) as f64;
                risks.push(
                    RiskItem::new(
                        RiskType::Harassment,
                        IMBALANCE_SCORE,
                        "one-sided conversation, possible harassment",
                    )
                    .with_detail("message_ratio", format!("{:.1}", ratio))
                    .with_detail("target_user", other),
                );
                break;
            }
        }

        let mut negative_responses = 0usize;
        let mut continued_offense = false;
        for (i, item) in items.iter().enumerate() {
            if item.user_id == ctx.user_id || !contains_any(&item.content, NEGATIVE_TERMS) {
                continue;
            }
            negative_responses += 1;

            if continued_offense {
                continue;
            }
            let Some(next) = items.get(i + 1).filter(|n| n.user_id == ctx.user_id) else {
                continue;
            };
            if let Some(class) = Self::classify(&next.content) {
                if matches!(class.category, Category::Command | Category::Insult) {
                    continued_offense = true;
                    risks.push(
                        RiskItem::new(
                            RiskType::ContextViolation,
                            CONTINUED_OFFENSE_SCORE,
                            format!(
                                "kept sending {} content after the other side objected",
                                class.category.label()
                            ),
                        )
                        .with_detail("category", class.category.label()),
                    );
                }
            }
        }

        if negative_responses >= 2 {
            risks.push(
                RiskItem::new(
                    RiskType::SuspiciousBehavior,
                    IGNORED_PUSHBACK_SCORE,
                    "kept messaging after repeated negative responses",
                )
                .with_detail("negative_responses", negative_responses.to_string()),
            );
        }

        risks
    }
}

#[async_trait]
impl Detector for SemanticDetector {
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError> {
        let content = ctx.content.as_str();
        if content.is_empty() {
            return Ok(Vec::new());
        }

        if let Some(risk) = Self::pattern_match(content) {
            return Ok(vec![risk]);
        }

        if let Some(risk) = Self::family_after_rejection(content, &ctx.context_items) {
            return Ok(vec![risk]);
        }

        let mut risks: Vec<RiskItem> = self.classification_risk(content).into_iter().collect();

        if ctx.has_context() {
            risks.extend(Self::conversation_risks(ctx));
        }

        Ok(risks)
    }

    fn name(&self) -> &'static str {
        "semantic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(user: &str, content: &str) -> ContextItem {
        ContextItem::new(content, user, "")
    }

    async fn detect(ctx: CheckContext) -> Vec<RiskItem> {
        SemanticDetector::new(0.3).detect(&ctx).await.unwrap()
    }

    // ==================== Pattern Tests ====================

    #[tokio::test]
    async fn insult_short_circuits() {
        let ctx = CheckContext::new("你就是个白痴")
            .with_user("a")
            .with_context(vec![item("b", "别说了"), item("b", "不要这样")]);
        let risks = detect(ctx).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, INSULT_SCORE);
    }

    #[tokio::test]
    async fn threat_detected() {
        let risks = detect(CheckContext::new("你等着瞧")).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, THREAT_SCORE);
    }

    #[tokio::test]
    async fn hostile_command_with_family_term() {
        let risks = detect(CheckContext::new("马上把钱给你妈送去，否则别回来")).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, HOSTILE_COMMAND_SCORE);
    }

    // ==================== Family Term Tests ====================

    #[tokio::test]
    async fn family_term_after_rejection_flagged() {
        let ctx = CheckContext::new("你妈知道吗")
            .with_user("a")
            .with_context(vec![item("b", "请停止联系我")]);
        let risks = detect(ctx).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, FAMILY_AFTER_REJECTION_SCORE);
    }

    #[tokio::test]
    async fn polite_family_question_passes() {
        let ctx = CheckContext::new("你妈妈身体好吗")
            .with_user("a")
            .with_context(vec![item("b", "不要问了")]);
        assert!(detect(ctx).await.is_empty());
    }

    #[tokio::test]
    async fn family_term_without_rejection_passes() {
        assert!(detect(CheckContext::new("你妈在家吗")).await.is_empty());
    }

    // ==================== Classification Tests ====================

    #[test]
    fn classify_needs_two_keywords() {
        assert!(SemanticDetector::classify("今天有优惠").is_none());
        let class = SemanticDetector::classify("优惠促销").unwrap();
        assert_eq!(class.category, Category::Spam);
        assert!((class.confidence - 0.4).abs() < 1e-6);
    }

    #[test]
    fn classify_ties_keep_earlier_category() {
        let class = SemanticDetector::classify("必须马上 免费中奖").unwrap();
        assert_eq!(class.category, Category::Command);
    }

    #[tokio::test]
    async fn classification_gate_applies() {
        let risks = detect(CheckContext::new("优惠促销红包")).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].risk_type, RiskType::Spam);
        assert!((risks[0].score - 60.0).abs() < 1e-3);

        let strict = SemanticDetector::new(0.9)
            .detect(&CheckContext::new("优惠促销红包"))
            .await
            .unwrap();
        assert!(strict.is_empty());
    }

    // ==================== Conversation Tests ====================

    #[tokio::test]
    async fn one_sided_conversation_flagged() {
        let ctx = CheckContext::new("在吗")
            .with_user("a")
            .with_context(vec![
                item("a", "hi"),
                item("a", "hello"),
                item("b", "ok"),
                item("a", "reply?"),
            ]);
        let risks = detect(ctx).await;
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, IMBALANCE_SCORE);
        assert_eq!(risks[0].details["target_user"], "b");
        assert_eq!(risks[0].details["message_ratio"], "3.0");
    }

    #[tokio::test]
    async fn offense_after_pushback_and_repeated_pushback() {
        let ctx = CheckContext::new("在吗")
            .with_user("a")
            .with_context(vec![
                item("b", "别烦我"),
                item("a", "你必须马上回复"),
                item("b", "不要再发了"),
            ]);
        let risks = detect(ctx).await;
        let types: Vec<RiskType> = risks.iter().map(|r| r.risk_type).collect();
        assert_eq!(
            types,
            vec![RiskType::ContextViolation, RiskType::SuspiciousBehavior]
        );
        assert_eq!(risks[0].score, CONTINUED_OFFENSE_SCORE);
        assert_eq!(risks[1].details["negative_responses"], "2");
    }

    #[tokio::test]
    async fn neutral_content_passes() {
        assert!(detect(CheckContext::new("周末去爬山")).await.is_empty());
    }
}
