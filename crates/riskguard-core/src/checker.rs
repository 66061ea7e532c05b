//! The single-item decision pipeline.
//!
//! ## Pipeline
//!
//! 1. Consult the result cache (standalone checks only)
//! 2. Run every detector in registration order, merging findings by type
//! 3. Evaluate the rule engine; on failure continue with detector findings
//! 4. An explicit rule verdict wins, otherwise band the highest score
//!    against the reject threshold
//! 5. Cache the verdict unless it is a reject

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::cache::ResultCache;
use crate::config::CheckConfig;
use crate::detector::{Detector, DetectorRegistry};
use crate::error::{CheckError, Result};
use crate::model::{CheckContext, CheckRequest, CheckResult, ContextItem, ResultType, RiskItem};
use crate::rule_engine::RuleEngine;
use crate::word_store::SensitiveWordStore;

/// Extra-data key carrying the summed detector score.
pub const TOTAL_SCORE_KEY: &str = "total_score";

/// Fallback state of one registered detector.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct DetectorStatus {
    pub name: &'static str,
    /// `None` for local detectors.
    pub fallback: Option<bool>,
}

/// Merges `item` into `risks`, keeping one item per risk type.
///
/// A strictly higher score overwrites the existing item's score and
/// description; its details stay.
pub fn merge_risk(risks: &mut Vec<RiskItem>, item: RiskItem) {
    match risks.iter_mut().find(|r| r.risk_type == item.risk_type) {
        Some(existing) if item.score > existing.score => {
            existing.score = item.score;
            existing.description = item.description;
        }
        Some(_) => {}
        None => risks.push(item),
    }
}

/// Maps a score onto a verdict band for reject threshold `threshold`.
pub fn classify_score(score: f32, threshold: f32) -> ResultType {
    if score >= threshold {
        ResultType::Reject
    } else if score >= threshold * 0.7 {
        ResultType::Review
    } else if score >= threshold * 0.5 {
        ResultType::Warning
    } else {
        ResultType::Pass
    }
}

fn suggestion_for(result: ResultType, risks: &[RiskItem]) -> String {
    match result {
        ResultType::Reject => match risks.first() {
            Some(risk) => format!("Content violates policy: {}", risk.description),
            None => "Content rejected, please revise and resubmit".to_string(),
        },
        ResultType::Review => "Content requires manual review".to_string(),
        ResultType::Warning => "Content carries risk, consider revising".to_string(),
        ResultType::Pass => "Content approved".to_string(),
    }
}

/// Composes detectors, rule engine and cache into one verdict per request.
pub struct ContentChecker {
    config: CheckConfig,
    detectors: DetectorRegistry,
    rules: Arc<RuleEngine>,
    words: Arc<SensitiveWordStore>,
    cache: ResultCache,
    sequence: AtomicU64,
}

impl ContentChecker {
    /// Creates a checker with the local detectors and no cache.
    pub fn new(config: CheckConfig, words: Arc<SensitiveWordStore>, rules: Arc<RuleEngine>) -> Self {
        let detectors =
            DetectorRegistry::with_local_detectors(words.clone(), config.semantic_threshold);
        Self {
            config,
            detectors,
            rules,
            words,
            cache: ResultCache::disabled(),
            sequence: AtomicU64::new(0),
        }
    }

    /// Sets the result cache.
    pub fn with_cache(mut self, cache: ResultCache) -> Self {
        self.cache = cache;
        self
    }

    /// Replaces the detector registry.
    pub fn with_detectors(mut self, detectors: DetectorRegistry) -> Self {
        self.detectors = detectors;
        self
    }

    /// Appends a detector after the existing ones.
    pub fn register_detector(&mut self, detector: Arc<dyn Detector>) {
        self.detectors.register_shared(detector);
    }

    pub fn config(&self) -> &CheckConfig {
        &self.config
    }

    pub fn rules(&self) -> &Arc<RuleEngine> {
        &self.rules
    }

    pub fn words(&self) -> &Arc<SensitiveWordStore> {
        &self.words
    }

    pub fn detectors(&self) -> &DetectorRegistry {
        &self.detectors
    }

    /// Fallback state of every detector, in registration order.
    pub fn detector_status(&self) -> Vec<DetectorStatus> {
        self.detectors
            .iter()
            .map(|d| DetectorStatus {
                name: d.name(),
                fallback: d.fallback_mode(),
            })
            .collect()
    }

    fn request_id(&self, prefix: &str, user_id: &str) -> String {
        let nanos = chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default();
        let seq = self.sequence.fetch_add(1, Ordering::Relaxed);
        format!("{}_{}_{}_{}", prefix, nanos, seq, user_id)
    }

    /// Checks standalone content, using the result cache.
    pub async fn check_content(&self, request: CheckRequest) -> Result<CheckResult> {
        if request.content.is_empty() {
            return Err(CheckError::EmptyContent);
        }

        let request_id = self.request_id("req", &request.user_id);

        if let Some(mut cached) = self.cache.get(&request.content).await {
            cached.request_id = request_id;
            cached.cost_time = 0;
            return Ok(cached);
        }

        let started = Instant::now();
        let ctx = CheckContext::new(request.content)
            .with_user(request.user_id)
            .with_scene(request.scene)
            .with_extra(request.extra_data);

        let mut result = self.evaluate(&ctx).await;
        result.request_id = request_id;
        result.cost_time = started.elapsed().as_millis() as u64;

        self.cache.put(&ctx.content, &result).await;
        Ok(result)
    }

    /// Checks content together with its conversation. Never cached.
    ///
    /// Only the most recent `context_history_size` items are considered.
    pub async fn check_content_with_context(
        &self,
        request: CheckRequest,
        mut context_items: Vec<ContextItem>,
    ) -> Result<CheckResult> {
        if request.content.is_empty() {
            return Err(CheckError::EmptyContent);
        }

        let limit = self.config.context_history_size;
        if limit > 0 && context_items.len() > limit {
            context_items.drain(..context_items.len() - limit);
        }

        let request_id = self.request_id("req_ctx", &request.user_id);
        let started = Instant::now();
        let ctx = CheckContext::new(request.content)
            .with_user(request.user_id)
            .with_scene(request.scene)
            .with_context(context_items)
            .with_extra(request.extra_data);

        let mut result = self.evaluate(&ctx).await;
        result.request_id = request_id;
        result.cost_time = started.elapsed().as_millis() as u64;
        Ok(result)
    }

    /// Runs detectors and rules for one context. Never fails.
    pub async fn evaluate(&self, ctx: &CheckContext) -> CheckResult {
        let mut risks: Vec<RiskItem> = Vec::new();
        let mut total_score = 0.0f32;

        for detector in self.detectors.iter() {
            match detector.detect(ctx).await {
                Ok(found) => {
                    for item in found {
                        total_score += item.score;
                        merge_risk(&mut risks, item);
                    }
                }
                Err(e) => {
                    warn!(detector = detector.name(), error = %e, "Detector failed");
                }
            }
        }

        let mut extra = HashMap::new();
        extra.insert(TOTAL_SCORE_KEY.to_string(), format!("{:.2}", total_score));

        match self.rules.evaluate(ctx, &risks) {
            Ok(evaluation) => {
                for item in evaluation.risks {
                    merge_risk(&mut risks, item);
                }
                if evaluation.explicit {
                    debug!(
                        rule = evaluation.rule_id.as_deref().unwrap_or_default(),
                        result = evaluation.result.name(),
                        "Rule engine decided verdict"
                    );
                    return CheckResult {
                        result: evaluation.result,
                        risk_score: evaluation.score,
                        risks,
                        suggestion: evaluation.suggestion,
                        extra,
                        ..Default::default()
                    };
                }
            }
            Err(e) => {
                error!(error = %e, "Rule engine evaluation failed, using detector results only");
            }
        }

        let max_score = risks.iter().map(|r| r.score).fold(0.0f32, f32::max);
        let result = classify_score(max_score, self.config.risk_score_threshold);

        CheckResult {
            result,
            risk_score: max_score,
            suggestion: suggestion_for(result, &risks),
            risks,
            extra,
            ..Default::default()
        }
    }

    /// Checks every request from `requests`, sending exactly one reply each,
    /// in order, until the input closes or the reply side goes away.
    ///
    /// Returns the number of replies sent.
    pub async fn stream_check(
        &self,
        mut requests: mpsc::Receiver<CheckRequest>,
        replies: mpsc::Sender<Result<CheckResult>>,
    ) -> usize {
        let mut sent = 0;
        while let Some(request) = requests.recv().await {
            let reply = self.check_content(request).await;
            if let Err(e) = &reply {
                debug!(error = %e, "Stream request failed");
            }
            if replies.send(reply).await.is_err() {
                break;
            }
            sent += 1;
        }
        sent
    }
}

impl std::fmt::Debug for ContentChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentChecker")
            .field("detectors", &self.detectors)
            .field("cache", &self.cache)
            .field("threshold", &self.config.risk_score_threshold)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryCacheBackend;
    use crate::error::DetectorError;
    use crate::model::RiskType;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    /// Detector returning a fixed list and counting calls.
    struct FixedDetector {
        risks: Vec<RiskItem>,
        calls: Arc<AtomicUsize>,
    }

    impl FixedDetector {
        fn new(risks: Vec<RiskItem>) -> Self {
            Self {
                risks,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl Detector for FixedDetector {
        async fn detect(&self, _ctx: &CheckContext) -> std::result::Result<Vec<RiskItem>, DetectorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.risks.clone())
        }

        fn name(&self) -> &'static str {
            "fixed"
        }
    }

    fn fixed(risks: Vec<RiskItem>) -> Arc<dyn Detector> {
        Arc::new(FixedDetector::new(risks))
    }

    struct BrokenDetector;

    #[async_trait]
    impl Detector for BrokenDetector {
        async fn detect(&self, _ctx: &CheckContext) -> std::result::Result<Vec<RiskItem>, DetectorError> {
            Err(DetectorError::Failed("boom".into()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn checker_with(detectors: Vec<Arc<dyn Detector>>, rules: RuleEngine) -> ContentChecker {
        let mut registry = DetectorRegistry::new();
        for d in detectors {
            registry.register_shared(d);
        }
        ContentChecker::new(
            CheckConfig::default(),
            Arc::new(SensitiveWordStore::default()),
            Arc::new(rules),
        )
        .with_detectors(registry)
    }

    fn local_checker(words: &[&str]) -> ContentChecker {
        let store = Arc::new(SensitiveWordStore::default());
        store.set_word_list(words.iter().map(|w| w.to_string()).collect());
        ContentChecker::new(CheckConfig::default(), store, Arc::new(RuleEngine::empty()))
    }

    // ==================== Banding Tests ====================

    #[test]
    fn score_bands() {
        assert_eq!(classify_score(70.0, 70.0), ResultType::Reject);
        assert_eq!(classify_score(49.0, 70.0), ResultType::Review);
        assert_eq!(classify_score(35.0, 70.0), ResultType::Warning);
        assert_eq!(classify_score(34.9, 70.0), ResultType::Pass);
        assert_eq!(classify_score(0.0, 70.0), ResultType::Pass);
    }

    #[test]
    fn score_bands_at_default_threshold() {
        let bands: Vec<ResultType> = [70.0, 50.0, 35.0, 10.0]
            .iter()
            .map(|&score| classify_score(score, 70.0))
            .collect();
        assert_eq!(
            bands,
            vec![
                ResultType::Reject,
                ResultType::Review,
                ResultType::Warning,
                ResultType::Pass
            ]
        );
    }

    #[test]
    fn score_band_edges() {
        assert_eq!(classify_score(69.99, 70.0), ResultType::Review);
        assert_eq!(classify_score(100.0, 70.0), ResultType::Reject);
        assert_eq!(classify_score(55.0, 70.0), ResultType::Review);
        assert_eq!(classify_score(45.0, 70.0), ResultType::Warning);
        assert_eq!(classify_score(30.0, 60.0), ResultType::Warning);
        assert_eq!(classify_score(29.9, 60.0), ResultType::Pass);
    }

    #[test]
    fn merge_keeps_higher_score_per_type() {
        let mut risks = Vec::new();
        merge_risk(&mut risks, RiskItem::new(RiskType::Spam, 50.0, "low"));
        merge_risk(&mut risks, RiskItem::new(RiskType::Spam, 65.0, "high"));
        merge_risk(&mut risks, RiskItem::new(RiskType::Spam, 40.0, "lower"));
        merge_risk(&mut risks, RiskItem::new(RiskType::Adult, 10.0, "other"));
        assert_eq!(risks.len(), 2);
        assert_eq!(risks[0].score, 65.0);
        assert_eq!(risks[0].description, "high");
    }

    #[test]
    fn merge_overwrites_score_and_description_only() {
        let mut risks =
            vec![RiskItem::new(RiskType::Spam, 50.0, "url density").with_detail("url_count", "3")];
        merge_risk(
            &mut risks,
            RiskItem::new(RiskType::Spam, 75.0, "spam rule").with_detail("rule_id", "spam_detection"),
        );
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, 75.0);
        assert_eq!(risks[0].description, "spam rule");
        assert_eq!(risks[0].details["url_count"], "3");
        assert!(risks[0].details.get("rule_id").is_none());
    }

    // ==================== Pipeline Tests ====================

    #[tokio::test]
    async fn empty_content_rejected() {
        let checker = local_checker(&[]);
        assert!(matches!(
            checker.check_content(CheckRequest::new("")).await,
            Err(CheckError::EmptyContent)
        ));
        assert!(matches!(
            checker
                .check_content_with_context(CheckRequest::new(""), Vec::new())
                .await,
            Err(CheckError::EmptyContent)
        ));
    }

    #[tokio::test]
    async fn sensitive_word_rejects() {
        let checker = local_checker(&["赌博"]);
        let result = checker
            .check_content(CheckRequest::new("一起去赌博").with_user("u1"))
            .await
            .unwrap();
        assert_eq!(result.result, ResultType::Reject);
        assert_eq!(result.risk_score, 80.0);
        assert!(result.request_id.starts_with("req_"));
        assert!(result.request_id.ends_with("_u1"));
        assert!(result.suggestion.contains("sensitive word"));
    }

    #[tokio::test]
    async fn clean_content_passes_with_total_score() {
        let checker = local_checker(&["赌博"]);
        let result = checker
            .check_content(CheckRequest::new("周末去爬山"))
            .await
            .unwrap();
        assert_eq!(result.result, ResultType::Pass);
        assert!(result.risks.is_empty());
        assert_eq!(result.extra[TOTAL_SCORE_KEY], "0.00");
        assert_eq!(result.suggestion, "Content approved");
    }

    #[tokio::test]
    async fn duplicate_types_collapsed() {
        let checker = checker_with(
            vec![
                fixed(vec![
                    RiskItem::new(RiskType::Spam, 40.0, "a"),
                    RiskItem::new(RiskType::Spam, 55.0, "b"),
                ]),
                Arc::new(BrokenDetector) as Arc<dyn Detector>,
            ],
            RuleEngine::empty(),
        );
        let result = checker.check_content(CheckRequest::new("x")).await.unwrap();
        assert_eq!(result.risks.len(), 1);
        assert_eq!(result.risk_score, 55.0);
        assert_eq!(result.result, ResultType::Review);
        assert_eq!(result.extra[TOTAL_SCORE_KEY], "95.00");
    }

    #[tokio::test]
    async fn rule_engine_failure_falls_back_to_detectors() {
        let checker = checker_with(
            vec![fixed(vec![RiskItem::new(RiskType::Violence, 75.0, "violent")])],
            RuleEngine::new(),
        );
        let result = checker.check_content(CheckRequest::new("x")).await.unwrap();
        assert_eq!(result.result, ResultType::Reject);
        assert_eq!(result.suggestion, "Content violates policy: violent");
    }

    #[tokio::test]
    async fn explicit_rule_verdict_wins() {
        let rules = RuleEngine::new();
        rules
            .load_str(
                r#"{"rules": [{"id": "spam_detection", "name": "Ads", "description": "ad link",
                    "enabled": true, "priority": 1, "action": "mark", "score": 20,
                    "config": {"patterns": ["promo"]}}]}"#,
            )
            .unwrap();
        let checker = checker_with(
            vec![fixed(vec![RiskItem::new(RiskType::Violence, 60.0, "violent")])],
            rules,
        );

        let result = checker.check_content(CheckRequest::new("promo")).await.unwrap();
        assert_eq!(result.result, ResultType::Warning);
        assert_eq!(result.risk_score, 20.0);
        assert_eq!(result.risks.len(), 2);
    }

    // ==================== Cache Tests ====================

    #[tokio::test]
    async fn cache_hit_skips_detectors() {
        let detector = Arc::new(FixedDetector::new(vec![RiskItem::new(
            RiskType::Spam,
            40.0,
            "ad",
        )]));
        let calls = Arc::clone(&detector.calls);
        let checker = checker_with(vec![detector as Arc<dyn Detector>], RuleEngine::empty()).with_cache(
            ResultCache::new(Arc::new(MemoryCacheBackend::new()), Duration::from_secs(60)),
        );

        let first = checker
            .check_content(CheckRequest::new("same").with_user("a"))
            .await
            .unwrap();
        let second = checker
            .check_content(CheckRequest::new("same").with_user("b"))
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(second.cost_time, 0);
        assert_eq!(second.result, first.result);
        assert_ne!(second.request_id, first.request_id);
        assert!(second.request_id.ends_with("_b"));
    }

    #[tokio::test]
    async fn reject_never_cached() {
        let detector = Arc::new(FixedDetector::new(vec![RiskItem::new(
            RiskType::Spam,
            95.0,
            "ad",
        )]));
        let calls = Arc::clone(&detector.calls);
        let checker = checker_with(vec![detector as Arc<dyn Detector>], RuleEngine::empty()).with_cache(
            ResultCache::new(Arc::new(MemoryCacheBackend::new()), Duration::from_secs(60)),
        );

        for _ in 0..2 {
            let result = checker.check_content(CheckRequest::new("bad")).await.unwrap();
            assert_eq!(result.result, ResultType::Reject);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn contextual_checks_bypass_cache() {
        let detector = Arc::new(FixedDetector::new(Vec::new()));
        let calls = Arc::clone(&detector.calls);
        let checker = checker_with(vec![detector as Arc<dyn Detector>], RuleEngine::empty()).with_cache(
            ResultCache::new(Arc::new(MemoryCacheBackend::new()), Duration::from_secs(60)),
        );

        checker.check_content(CheckRequest::new("hi")).await.unwrap();
        let result = checker
            .check_content_with_context(CheckRequest::new("hi"), Vec::new())
            .await
            .unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(result.request_id.starts_with("req_ctx_"));
    }

    // ==================== Context Tests ====================

    #[tokio::test]
    async fn context_window_truncated_to_most_recent() {
        let mut config = CheckConfig::default();
        config.context_history_size = 2;
        let checker = ContentChecker::new(
            config,
            Arc::new(SensitiveWordStore::default()),
            Arc::new(RuleEngine::empty()),
        );

        // The two older messages from "a" would trip the repeat check
        let context = vec![
            ContextItem::new("1", "a", ""),
            ContextItem::new("2", "a", ""),
            ContextItem::new("3", "b", ""),
            ContextItem::new("4", "b", ""),
        ];
        let result = checker
            .check_content_with_context(CheckRequest::new("hello").with_user("a"), context)
            .await
            .unwrap();
        let targeting = result
            .risks
            .iter()
            .find(|r| r.risk_type == RiskType::Harassment)
            .unwrap();
        assert_eq!(targeting.details["target_user"], "b");
        assert!(result.risks.iter().all(|r| r.details.get("repeat_count").is_none()));
    }

    // ==================== Stream Tests ====================

    #[tokio::test]
    async fn stream_replies_once_per_request_in_order() {
        let checker = local_checker(&["赌博"]);
        let (req_tx, req_rx) = mpsc::channel(8);
        let (reply_tx, mut reply_rx) = mpsc::channel(8);

        req_tx.send(CheckRequest::new("赌博")).await.unwrap();
        req_tx.send(CheckRequest::new("")).await.unwrap();
        req_tx.send(CheckRequest::new("你好")).await.unwrap();
        drop(req_tx);

        assert_eq!(checker.stream_check(req_rx, reply_tx).await, 3);

        let first = reply_rx.recv().await.unwrap().unwrap();
        assert_eq!(first.result, ResultType::Reject);
        assert!(matches!(
            reply_rx.recv().await.unwrap(),
            Err(CheckError::EmptyContent)
        ));
        assert_eq!(reply_rx.recv().await.unwrap().unwrap().result, ResultType::Pass);
        assert!(reply_rx.recv().await.is_none());
    }

    #[test]
    fn status_lists_detectors() {
        let checker = local_checker(&[]);
        let status = checker.detector_status();
        assert_eq!(status.len(), 4);
        assert!(status.iter().all(|s| s.fallback.is_none()));
    }
}
