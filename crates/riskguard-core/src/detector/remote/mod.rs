//! HTTP-backed risk signals with a fallback latch.
//!
//! A [`SignalProvider`] knows how to talk to one kind of endpoint. The
//! [`RemoteSignalDetector`] wraps a provider and owns the latch:
//!
//! - the endpoint is probed once at construction; a failed probe starts the
//!   detector in fallback mode
//! - a failed analysis call latches fallback mode
//! - while latched, `detect` runs local heuristics and never touches the network
//! - an optional recovery task re-probes with exponential backoff and clears
//!   the latch once the endpoint answers again

mod ai_service;
mod analysis;
mod cloud_nlp;
mod local_llm;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{Detector, DetectorRegistry};
use crate::background::BackgroundTasks;
use crate::config::{RemoteServiceConfig, RemoteSignalsConfig};
use crate::error::{DetectorError, RemoteError};
use crate::model::{CheckContext, RiskItem, RiskType};

pub use ai_service::AiServiceProvider;
pub use analysis::LlmAnalysis;
pub use cloud_nlp::CloudNlpProvider;
pub use local_llm::LocalLlmProvider;

/// Upper bound on the recovery backoff, as a multiple of the base interval.
const MAX_BACKOFF_FACTOR: u32 = 16;

const FALLBACK_HARMFUL_WORDS: &[&str] = &[
    "傻逼", "混蛋", "垃圾", "白痴", "废物", "贱人", "去死", "杀了你", "打死你", "灭了你", "弄死你",
];

const FALLBACK_THREAT_WORDS: &[&str] = &["小心", "当心", "威胁", "后果", "找你", "报复"];

const REJECTION_WORDS: &[&str] = &[
    "不要", "别", "停止", "别再", "不想", "拒绝", "别来", "讨厌", "烦人", "骚扰", "别发",
];

const FALLBACK_HARMFUL_SCORE: f32 = 80.0;
const FALLBACK_THREAT_SCORE: f32 = 75.0;
const FALLBACK_REJECTION_SCORE: f32 = 70.0;

/// One remote analysis endpoint.
#[async_trait]
pub trait SignalProvider: Send + Sync + 'static {
    /// Cheap connectivity check.
    async fn probe(&self) -> Result<(), RemoteError>;

    /// Full analysis of one context.
    async fn analyze(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, RemoteError>;

    /// Provider name, used as the detector name.
    fn name(&self) -> &'static str;
}

/// Returns true if `text` pushes back on the conversation.
pub(crate) fn contains_rejection(text: &str) -> bool {
    REJECTION_WORDS.iter().any(|w| text.contains(w))
}

/// Network-free heuristics used while latched.
pub fn fallback_detect(ctx: &CheckContext) -> Vec<RiskItem> {
    let content = ctx.content.as_str();
    let mut risks = Vec::new();

    if let Some(word) = FALLBACK_HARMFUL_WORDS.iter().find(|w| content.contains(*w)) {
        risks.push(
            RiskItem::new(
                RiskType::Harassment,
                FALLBACK_HARMFUL_SCORE,
                format!("harmful word detected: {}", word),
            )
            .with_detail("word", *word),
        );
    }

    if FALLBACK_THREAT_WORDS.iter().any(|w| content.contains(w)) {
        risks.push(RiskItem::new(
            RiskType::Harassment,
            FALLBACK_THREAT_SCORE,
            "potentially threatening language",
        ));
    }

    let rejected = ctx
        .context_items
        .iter()
        .any(|item| item.user_id != ctx.user_id && contains_rejection(&item.content));
    if rejected {
        risks.push(RiskItem::new(
            RiskType::ContextViolation,
            FALLBACK_REJECTION_SCORE,
            "kept messaging after the other side refused",
        ));
    }

    risks
}

/// Detector wrapping a [`SignalProvider`] with a fallback latch.
pub struct RemoteSignalDetector<P> {
    provider: Arc<P>,
    fallback: Arc<AtomicBool>,
    recovery_interval: Option<Duration>,
}

impl<P: SignalProvider> RemoteSignalDetector<P> {
    /// Probes the provider and builds the detector, latched if the probe fails.
    pub async fn connect(provider: P, recovery_interval: Option<Duration>) -> Self {
        let detector = Self {
            provider: Arc::new(provider),
            fallback: Arc::new(AtomicBool::new(false)),
            recovery_interval,
        };

        match detector.provider.probe().await {
            Ok(()) => info!(provider = detector.provider.name(), "Remote signal connected"),
            Err(e) => detector.latch(&e),
        }

        detector
    }

    /// Returns true while latched into fallback mode.
    pub fn in_fallback(&self) -> bool {
        self.fallback.load(Ordering::Acquire)
    }

    fn latch(&self, reason: &RemoteError) {
        if self
            .fallback
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            warn!(
                provider = self.provider.name(),
                error = %reason,
                "Remote signal unavailable, switching to fallback mode"
            );
        }
    }

    /// Spawns the recovery task if a recovery interval is configured.
    ///
    /// The task stops when `shutdown` fires or its sender is dropped.
    pub fn spawn_recovery(&self, mut shutdown: broadcast::Receiver<()>) -> Option<JoinHandle<()>> {
        let base = self.recovery_interval?;
        let provider = Arc::clone(&self.provider);
        let fallback = Arc::clone(&self.fallback);
        let max_delay = base.saturating_mul(MAX_BACKOFF_FACTOR);

        Some(tokio::spawn(async move {
            let mut delay = base;
            loop {
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.recv() => break,
                }

                if !fallback.load(Ordering::Acquire) {
                    delay = base;
                    continue;
                }

                match provider.probe().await {
                    Ok(()) => {
                        fallback.store(false, Ordering::Release);
                        delay = base;
                        info!(provider = provider.name(), "Remote signal recovered");
                    }
                    Err(e) => {
                        delay = next_backoff(delay, max_delay);
                        debug!(
                            provider = provider.name(),
                            error = %e,
                            next_probe_secs = delay.as_secs(),
                            "Recovery probe failed"
                        );
                    }
                }
            }
        }))
    }
}

fn next_backoff(delay: Duration, max_delay: Duration) -> Duration {
    delay.saturating_mul(2).min(max_delay)
}

#[async_trait]
impl<P: SignalProvider> Detector for RemoteSignalDetector<P> {
    async fn detect(&self, ctx: &CheckContext) -> Result<Vec<RiskItem>, DetectorError> {
        if ctx.content.is_empty() {
            return Ok(Vec::new());
        }

        if self.in_fallback() {
            return Ok(fallback_detect(ctx));
        }

        match self.provider.analyze(ctx).await {
            Ok(risks) => Ok(risks),
            Err(e) => {
                self.latch(&e);
                Ok(fallback_detect(ctx))
            }
        }
    }

    fn name(&self) -> &'static str {
        self.provider.name()
    }

    fn fallback_mode(&self) -> Option<bool> {
        Some(self.in_fallback())
    }
}

/// Connects one provider and registers it, starting recovery if configured.
async fn attach<P: SignalProvider>(
    provider: P,
    config: &RemoteServiceConfig,
    registry: &mut DetectorRegistry,
    tasks: &BackgroundTasks,
) {
    let detector = RemoteSignalDetector::connect(provider, config.recovery_interval()).await;
    if let Some(handle) = detector.spawn_recovery(tasks.subscribe()) {
        tasks.track(handle);
    }
    registry.register(detector);
}

/// Registers every enabled remote provider after the local detectors.
///
/// Registration order is AI service, cloud NLP, local LLM. A provider that
/// cannot be constructed is skipped with an error; one whose probe fails is
/// registered latched into fallback.
///
/// Returns the number of providers registered.
pub async fn connect_enabled(
    config: &RemoteSignalsConfig,
    registry: &mut DetectorRegistry,
    tasks: &BackgroundTasks,
) -> usize {
    let before = registry.len();

    if config.ai_service.enabled {
        match AiServiceProvider::new(&config.ai_service) {
            Ok(p) => attach(p, &config.ai_service, registry, tasks).await,
            Err(e) => error!(provider = "ai_service", error = %e, "Failed to create provider"),
        }
    }
    if config.cloud_nlp.enabled {
        match CloudNlpProvider::new(&config.cloud_nlp) {
            Ok(p) => attach(p, &config.cloud_nlp, registry, tasks).await,
            Err(e) => error!(provider = "cloud_nlp", error = %e, "Failed to create provider"),
        }
    }
    if config.local_llm.enabled {
        match LocalLlmProvider::new(&config.local_llm) {
            Ok(p) => attach(p, &config.local_llm, registry, tasks).await,
            Err(e) => error!(provider = "local_llm", error = %e, "Failed to create provider"),
        }
    }

    registry.len() - before
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ContextItem;
    use std::sync::atomic::AtomicUsize;

    /// Provider with scripted outcomes that counts network calls.
    struct MockProvider {
        probe_ok: Arc<AtomicBool>,
        analyze_ok: bool,
        probes: Arc<AtomicUsize>,
        analyses: Arc<AtomicUsize>,
    }

    impl MockProvider {
        fn new(probe_ok: bool, analyze_ok: bool) -> Self {
            Self {
                probe_ok: Arc::new(AtomicBool::new(probe_ok)),
                analyze_ok,
                probes: Arc::new(AtomicUsize::new(0)),
                analyses: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl SignalProvider for MockProvider {
        async fn probe(&self) -> Result<(), RemoteError> {
            self.probes.fetch_add(1, Ordering::SeqCst);
            if self.probe_ok.load(Ordering::SeqCst) {
                Ok(())
            } else {
                Err(RemoteError::Service("down".into()))
            }
        }

        async fn analyze(&self, _ctx: &CheckContext) -> Result<Vec<RiskItem>, RemoteError> {
            self.analyses.fetch_add(1, Ordering::SeqCst);
            if self.analyze_ok {
                Ok(vec![RiskItem::new(RiskType::Violence, 90.0, "remote")])
            } else {
                Err(RemoteError::Status {
                    status: 500,
                    message: "boom".into(),
                })
            }
        }

        fn name(&self) -> &'static str {
            "mock"
        }
    }

    // ==================== Latch Tests ====================

    #[tokio::test]
    async fn failed_probe_starts_in_fallback_without_network_calls() {
        let provider = MockProvider::new(false, true);
        let analyses = Arc::clone(&provider.analyses);
        let detector = RemoteSignalDetector::connect(provider, None).await;

        assert!(detector.in_fallback());
        assert_eq!(detector.fallback_mode(), Some(true));

        let risks = detector
            .detect(&CheckContext::new("你个废物"))
            .await
            .unwrap();
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].score, FALLBACK_HARMFUL_SCORE);
        assert_eq!(analyses.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn healthy_provider_results_pass_through() {
        let detector = RemoteSignalDetector::connect(MockProvider::new(true, true), None).await;
        assert!(!detector.in_fallback());
        let risks = detector.detect(&CheckContext::new("text")).await.unwrap();
        assert_eq!(risks[0].risk_type, RiskType::Violence);
    }

    #[tokio::test]
    async fn runtime_failure_latches_permanently() {
        let provider = MockProvider::new(true, false);
        let analyses = Arc::clone(&provider.analyses);
        let detector = RemoteSignalDetector::connect(provider, None).await;

        let first = detector.detect(&CheckContext::new("小心点")).await.unwrap();
        assert!(detector.in_fallback());
        assert_eq!(first[0].score, FALLBACK_THREAT_SCORE);

        detector.detect(&CheckContext::new("again")).await.unwrap();
        detector.detect(&CheckContext::new("and again")).await.unwrap();
        assert_eq!(analyses.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn recovery_disabled_without_interval() {
        let detector = RemoteSignalDetector::connect(MockProvider::new(false, true), None).await;
        let (_tx, rx) = broadcast::channel(1);
        assert!(detector.spawn_recovery(rx).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_clears_latch_once_probe_succeeds() {
        let provider = MockProvider::new(false, true);
        let probe_ok = Arc::clone(&provider.probe_ok);
        let probes = Arc::clone(&provider.probes);
        let detector =
            RemoteSignalDetector::connect(provider, Some(Duration::from_secs(1))).await;
        assert!(detector.in_fallback());

        let (tx, rx) = broadcast::channel(1);
        let handle = detector.spawn_recovery(rx).unwrap();

        // Probes at t=1s (fails, backoff to 2s) and t=3s (fails, backoff to 4s)
        tokio::time::sleep(Duration::from_millis(3_500)).await;
        assert!(detector.in_fallback());
        assert_eq!(probes.load(Ordering::SeqCst), 3);

        probe_ok.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert!(!detector.in_fallback());

        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    #[test]
    fn backoff_doubles_up_to_cap() {
        let base = Duration::from_secs(1);
        let cap = base.saturating_mul(MAX_BACKOFF_FACTOR);
        assert_eq!(next_backoff(base, cap), Duration::from_secs(2));
        assert_eq!(next_backoff(Duration::from_secs(12), cap), Duration::from_secs(16));
    }

    #[test]
    fn backoff_saturates_on_huge_intervals() {
        let cap = Duration::MAX.saturating_mul(MAX_BACKOFF_FACTOR);
        assert_eq!(cap, Duration::MAX);
        assert_eq!(next_backoff(Duration::MAX / 2 + Duration::from_secs(1), cap), Duration::MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn recovery_with_huge_interval_spawns_and_stops() {
        let detector =
            RemoteSignalDetector::connect(MockProvider::new(false, true), Some(Duration::MAX)).await;
        let (tx, rx) = broadcast::channel(1);
        let handle = detector.spawn_recovery(rx).unwrap();
        tx.send(()).unwrap();
        handle.await.unwrap();
    }

    // ==================== Fallback Heuristic Tests ====================

    #[test]
    fn fallback_flags_rejection_from_other_participant() {
        let ctx = CheckContext::new("在吗")
            .with_user("a")
            .with_context(vec![ContextItem::new("别来烦我", "b", "")]);
        let risks = fallback_detect(&ctx);
        assert_eq!(risks.len(), 1);
        assert_eq!(risks[0].risk_type, RiskType::ContextViolation);
    }

    #[test]
    fn fallback_ignores_own_rejection_words() {
        let ctx = CheckContext::new("在吗")
            .with_user("a")
            .with_context(vec![ContextItem::new("不要走", "a", "")]);
        assert!(fallback_detect(&ctx).is_empty());
    }

    // ==================== Wiring Tests ====================

    #[tokio::test]
    async fn connect_enabled_skips_disabled_and_misconfigured() {
        let mut config = RemoteSignalsConfig::default();
        // Cloud NLP without an API key cannot be constructed
        config.cloud_nlp.enabled = true;
        // Nothing listens on port 9; the probe fails and the detector latches
        config.local_llm = RemoteServiceConfig::new("http://127.0.0.1:9");
        config.local_llm.probe_timeout_ms = 200;

        let mut registry = DetectorRegistry::new();
        let tasks = BackgroundTasks::new();
        let added = connect_enabled(&config, &mut registry, &tasks).await;

        assert_eq!(added, 1);
        assert_eq!(registry.names(), vec!["local_llm"]);
        let detector = registry.iter().next().unwrap();
        assert_eq!(detector.fallback_mode(), Some(true));
        assert!(tasks.is_empty());
    }
}
