//! RiskGuard Core - Content risk decision pipeline.
//!
//! This crate turns a piece of user content, optionally with its
//! conversation, into one verdict. It handles:
//!
//! - Detectors (sensitive words, spam, harassment, semantic heuristics)
//! - Remote signal providers with a fallback latch
//! - A hot-reloadable, priority-ordered rule engine
//! - Threshold banding into Pass / Warning / Review / Reject
//! - A safety-biased result cache (rejects are never cached)
//! - Concurrent, order-preserving batch checks
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use riskguard_core::{CheckConfig, CheckRequest, ContentChecker, RuleEngine, SensitiveWordStore};
//!
//! # async fn run() -> riskguard_core::Result<()> {
//! let words = Arc::new(SensitiveWordStore::load(vec!["config/sensitive_words.txt".into()]));
//! let checker = ContentChecker::new(CheckConfig::default(), words, Arc::new(RuleEngine::empty()));
//!
//! let verdict = checker.check_content(CheckRequest::new("hello").with_user("u1")).await?;
//! println!("{:?} ({})", verdict.result, verdict.risk_score);
//! # Ok(())
//! # }
//! ```

pub mod background;
pub mod batch;
pub mod cache;
pub mod checker;
pub mod config;
pub mod detector;
pub mod error;
pub mod model;
pub mod rule_engine;
pub mod word_store;

pub use background::BackgroundTasks;
pub use batch::BatchReport;
pub use cache::{CacheBackend, MemoryCacheBackend, ResultCache};
pub use checker::{classify_score, ContentChecker, DetectorStatus};
pub use config::{CheckConfig, RemoteServiceConfig, RemoteSignalsConfig};
pub use detector::{Detector, DetectorRegistry};
pub use error::{CacheError, CheckError, DetectorError, RemoteError, Result, RuleError};
pub use model::{
    BatchCheckResult, BatchItemError, CheckContext, CheckRequest, CheckResult, ContextItem,
    ResultType, RiskItem, RiskType,
};
pub use rule_engine::{Rule, RuleDocument, RuleEngine, RuleEvaluation, RuleSet};
pub use word_store::SensitiveWordStore;
