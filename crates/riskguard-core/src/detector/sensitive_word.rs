//! Sensitive word detector backed by the live word store.

use std::sync::Arc;

use async_trait::async_trait;

use super::Detector;
use crate::error::DetectorError;
use crate::model::{CheckContext, RiskItem, RiskType};

/// Score for a sensitive word hit.
pub const SENSITIVE_WORD_SCORE: f32 = 80.0;

/// Membership check over a banned-substring list.
pub trait WordChecker: Send + Sync {
    /// Returns the first banned word contained in `content`, if any.
    fn contains_word(&self, content: &str) -> Option<String>;
}

/// Flags content containing any word from the word store.
///
/// Emits at most one risk item per call.
pub struct SensitiveWordDetector {
    words: Arc<dyn WordChecker>,
}

impl SensitiveWordDetector {
    pub fn new(words: Arc<dyn WordChecker>) -> Self {
        Self { words }
    }
}

#[async_trait]
impl Detector for SensitiveWordDetector {
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError> {
        if ctx.content.is_empty() {
            return Ok(Vec::new());
        }

        Ok(self
            .words
            .contains_word(&ctx.content)
            .map(|word| {
                RiskItem::new(
                    RiskType::SensitiveWord,
                    SENSITIVE_WORD_SCORE,
                    format!("content contains sensitive word: {}", word),
                )
                .with_detail("word", word)
            })
            .into_iter()
            .collect())
    }

    fn name(&self) -> &'static str {
        "sensitive_word"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::word_store::SensitiveWordStore;

    fn detector(words: &[&str]) -> SensitiveWordDetector {
        let store = SensitiveWordStore::new(Vec::new());
        store.set_word_list(words.iter().map(|w| w.to_string()).collect());
        SensitiveWordDetector::new(Arc::new(store))
    }

    #[tokio::test]
    async fn flags_single_match() {
        let risks = detector(&["赌博"])
            .detect(&CheckContext::new("来一起赌博吧"))
            .await
            .unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].risk_type, RiskType::SensitiveWord);
        assert_eq!(risks[0].score, 80.0);
        assert_eq!(risks[0].details.get("word").map(String::as_str), Some("赌博"));
    }

    #[tokio::test]
    async fn at_most_one_item_with_many_matches() {
        let risks = detector(&["alpha", "beta", "gamma"])
            .detect(&CheckContext::new("alpha beta gamma"))
            .await
            .unwrap();
        assert_eq!(risks.len(), 1);
    }

    #[tokio::test]
    async fn clean_content_passes() {
        let risks = detector(&["赌博"])
            .detect(&CheckContext::new("今天天气不错"))
            .await
            .unwrap();
        assert!(risks.is_empty());
    }

    #[tokio::test]
    async fn empty_content_passes() {
        let risks = detector(&["x"]).detect(&CheckContext::new("")).await.unwrap();
        assert!(risks.is_empty());
    }
}
