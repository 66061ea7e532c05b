//! Regex and keyword based spam detector.
//!
//! Each check runs independently and emits its own risk item, so one message
//! can produce several spam items. The orchestrator collapses them by type.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;

use super::Detector;
use crate::error::DetectorError;
use crate::model::{CheckContext, RiskItem, RiskType};

static URL_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"https?://\S+").expect("valid url regex"));

static PHONE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"\d{3}[-.\s]??\d{3}[-.\s]??\d{4}|\(\d{3}\)\s*\d{3}[-.\s]??\d{4}|\d{3}[-.\s]??\d{4}",
    )
    .expect("valid phone regex")
});

static MONEY_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[$¥€£]\d+").expect("valid money regex"));

static SPAM_KEYWORDS_EN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(click here|buy now|free|discount|offer|promotion|win|earn|money|cheap)")
        .expect("valid spam keyword regex")
});

/// Localized spam keywords, matched as plain substrings.
const SPAM_KEYWORDS_ZH: &[&str] = &[
    "退款", "贷款", "免费", "优惠", "促销", "中奖", "赚钱", "兼职", "发财", "暴富", "官方认证",
];

const URL_DENSITY_SCORE: f32 = 60.0;
const PHONE_SCORE: f32 = 50.0;
const MONEY_SCORE: f32 = 40.0;
const KEYWORD_ZH_SCORE: f32 = 65.0;
const KEYWORD_EN_SCORE: f32 = 55.0;

/// Detects promotional and contact-harvesting spam.
#[derive(Debug, Default)]
pub struct SpamDetector;

impl SpamDetector {
    pub fn new() -> Self {
        Self
    }

    fn scan(&self, content: &str) -> Vec<RiskItem> {
        let mut risks = Vec::new();
        let content_lower = content.to_lowercase();

        // More than one URL per hundred bytes of content
        let url_count = URL_PATTERN.find_iter(content).count();
        if url_count > 0 && url_count as f32 > content.len() as f32 / 100.0 {
            risks.push(
                RiskItem::new(RiskType::Spam, URL_DENSITY_SCORE, "content contains too many links")
                    .with_detail("url_count", url_count.to_string()),
            );
        }

        let phone_count = PHONE_PATTERN.find_iter(content).count();
        if phone_count > 0 {
            risks.push(
                RiskItem::new(RiskType::Spam, PHONE_SCORE, "content contains phone numbers")
                    .with_detail("phone_count", phone_count.to_string()),
            );
        }

        let money_count = MONEY_PATTERN.find_iter(content).count();
        if money_count > 0 {
            risks.push(
                RiskItem::new(RiskType::Spam, MONEY_SCORE, "content contains monetary amounts")
                    .with_detail("money_count", money_count.to_string()),
            );
        }

        if let Some(keyword) = SPAM_KEYWORDS_ZH
            .iter()
            .find(|k| content_lower.contains(*k))
        {
            risks.push(
                RiskItem::new(RiskType::Spam, KEYWORD_ZH_SCORE, "content contains spam keywords")
                    .with_detail("keyword", *keyword),
            );
        }

        if let Some(m) = SPAM_KEYWORDS_EN.find(&content_lower) {
            risks.push(
                RiskItem::new(RiskType::Spam, KEYWORD_EN_SCORE, "content contains spam keywords")
                    .with_detail("keyword", m.as_str()),
            );
        }

        risks
    }
}

#[async_trait]
impl Detector for SpamDetector {
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError> {
        if ctx.content.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self.scan(&ctx.content))
    }

    fn name(&self) -> &'static str {
        "spam"
    }
}
