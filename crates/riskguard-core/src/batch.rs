//! Concurrent batch checks.
//!
//! Every item runs the single-item pipeline in its own task. Results are
//! reported over a completion channel and reassembled in input order, so
//! the output is index-aligned with the (possibly truncated) input no matter
//! how tasks finish.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::checker::ContentChecker;
use crate::error::{CheckError, Result};
use crate::model::{BatchCheckResult, BatchItemError, CheckRequest, CheckResult};

/// Outcome of a batch call.
#[derive(Debug)]
pub struct BatchReport {
    /// Verdicts for every processed item, in input order.
    pub result: BatchCheckResult,
    /// The last per-item error to complete, if any.
    pub last_error: Option<CheckError>,
}

impl BatchReport {
    /// Returns true if every item was evaluated.
    pub fn is_complete(&self) -> bool {
        self.result.errors.is_empty()
    }
}

/// Placeholder request id for a failed batch slot.
pub fn placeholder_id(batch_id: &str, index: usize) -> String {
    format!("batch_{}_idx_{}", batch_id, index)
}

struct Collector {
    batch_id: String,
    slots: Vec<Option<CheckResult>>,
    errors: Vec<BatchItemError>,
    last_error: Option<CheckError>,
}

impl Collector {
    fn new(batch_id: String, len: usize) -> Self {
        Self {
            batch_id,
            slots: vec![None; len],
            errors: Vec::new(),
            last_error: None,
        }
    }

    fn record(&mut self, index: usize, outcome: Result<CheckResult>) {
        match outcome {
            Ok(result) => self.slots[index] = Some(result),
            Err(e) => self.fail(index, e),
        }
    }

    fn fail(&mut self, index: usize, error: CheckError) {
        let message = error.to_string();
        debug!(index, error = %message, "Batch item failed");
        self.slots[index] = Some(CheckResult::failed_placeholder(
            placeholder_id(&self.batch_id, index),
            &message,
        ));
        self.errors.push(BatchItemError { index, message });
        self.last_error = Some(error);
    }

    fn finish(mut self, total_cost_time: u64) -> BatchReport {
        self.errors.sort_by_key(|e| e.index);
        let batch_id = self.batch_id;
        let results = self
            .slots
            .into_iter()
            .enumerate()
            .map(|(index, slot)| {
                slot.unwrap_or_else(|| {
                    CheckResult::failed_placeholder(placeholder_id(&batch_id, index), "no result")
                })
            })
            .collect();

        BatchReport {
            result: BatchCheckResult {
                batch_id,
                results,
                total_cost_time,
                errors: self.errors,
            },
            last_error: self.last_error,
        }
    }
}

impl ContentChecker {
    /// Checks every item concurrently.
    ///
    /// Input longer than `batch_max_size` is truncated to its first items.
    /// Failed items become Pass placeholders carrying `extra["error"]`; the
    /// call itself only fails for an empty batch.
    pub async fn batch_check(
        self: &Arc<Self>,
        mut items: Vec<CheckRequest>,
        batch_id: impl Into<String>,
    ) -> Result<BatchReport> {
        if items.is_empty() {
            return Err(CheckError::EmptyBatch);
        }

        let batch_id = batch_id.into();
        let max = self.config().batch_max_size;
        if max > 0 && items.len() > max {
            warn!(
                batch_id = %batch_id,
                requested = items.len(),
                max,
                "Batch too large, truncating"
            );
            items.truncate(max);
        }

        let started = Instant::now();
        let mut collector = Collector::new(batch_id, items.len());
        let (tx, mut rx) = mpsc::unbounded_channel::<(usize, Result<CheckResult>)>();

        let mut handles = Vec::with_capacity(items.len());
        for (index, request) in items.into_iter().enumerate() {
            let checker = Arc::clone(self);
            let tx = tx.clone();
            let handle = tokio::spawn(async move {
                let outcome = checker.check_content(request).await;
                let _ = tx.send((index, outcome));
            });
            handles.push((index, handle));
        }
        drop(tx);

        // Closes once every task has reported or died
        while let Some((index, outcome)) = rx.recv().await {
            collector.record(index, outcome);
        }

        for (index, handle) in handles {
            if let Err(e) = handle.await {
                collector.fail(index, CheckError::TaskFailed(e.to_string()));
            }
        }

        let report = collector.finish(started.elapsed().as_millis() as u64);
        debug!(
            batch_id = %report.result.batch_id,
            items = report.result.results.len(),
            failed = report.result.errors.len(),
            "Batch complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CheckConfig;
    use crate::detector::{Detector, DetectorRegistry};
    use crate::error::DetectorError;
    use crate::model::{CheckContext, ResultType, RiskItem, RiskType};
    use crate::rule_engine::RuleEngine;
    use crate::word_store::SensitiveWordStore;
    use async_trait::async_trait;
    use std::time::Duration;

    /// Scores content by its numeric value and sleeps inversely to it, so
    /// later items tend to finish first.
    struct SlowDetector;

    #[async_trait]
    impl Detector for SlowDetector {
        async fn detect(&self, ctx: &CheckContext) -> std::result::Result<Vec<RiskItem>, DetectorError> {
            if ctx.content == "panic" {
                panic!("detector blew up");
            }
            let value: u64 = ctx.content.parse().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(50u64.saturating_sub(value * 5))).await;
            Ok(vec![RiskItem::new(RiskType::Spam, value as f32, "scored")])
        }

        fn name(&self) -> &'static str {
            "slow"
        }
    }

    fn checker(max: usize) -> Arc<ContentChecker> {
        let mut registry = DetectorRegistry::new();
        registry.register(SlowDetector);
        Arc::new(
            ContentChecker::new(
                CheckConfig::default().with_batch_max_size(max),
                Arc::new(SensitiveWordStore::default()),
                Arc::new(RuleEngine::empty()),
            )
            .with_detectors(registry),
        )
    }

    fn requests(contents: &[&str]) -> Vec<CheckRequest> {
        contents.iter().map(|c| CheckRequest::new(*c)).collect()
    }

    // ==================== Batch Tests ====================

    #[tokio::test]
    async fn empty_batch_rejected() {
        let result = checker(10).batch_check(Vec::new(), "b").await;
        assert!(matches!(result, Err(CheckError::EmptyBatch)));
    }

    #[tokio::test]
    async fn output_order_matches_input() {
        let report = checker(10)
            .batch_check(requests(&["1", "2", "3", "4", "5", "6"]), "b1")
            .await
            .unwrap();
        let scores: Vec<f32> = report.result.results.iter().map(|r| r.risk_score).collect();
        assert_eq!(scores, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(report.result.batch_id, "b1");
        assert!(report.is_complete());
        assert!(report.last_error.is_none());
    }

    #[tokio::test]
    async fn oversized_batch_truncated() {
        let report = checker(2)
            .batch_check(requests(&["1", "2", "3"]), "b")
            .await
            .unwrap();
        assert_eq!(report.result.results.len(), 2);
        assert_eq!(report.result.results[1].risk_score, 2.0);
    }

    #[tokio::test]
    async fn failed_items_become_placeholders() {
        let report = checker(10)
            .batch_check(requests(&["1", "", "3", "panic"]), "b2")
            .await
            .unwrap();
        let results = &report.result.results;
        assert_eq!(results.len(), 4);

        assert_eq!(results[1].result, ResultType::Pass);
        assert_eq!(results[1].request_id, "batch_b2_idx_1");
        assert_eq!(results[1].extra["error"], "content is empty");

        assert_eq!(results[3].request_id, "batch_b2_idx_3");
        assert!(results[3].extra["error"].starts_with("batch task failed"));

        assert_eq!(results[0].risk_score, 1.0);
        assert_eq!(results[2].risk_score, 3.0);

        let indices: Vec<usize> = report.result.errors.iter().map(|e| e.index).collect();
        assert_eq!(indices, vec![1, 3]);
        assert!(report.last_error.is_some());
    }
}
