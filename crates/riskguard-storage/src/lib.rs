//! RiskGuard Storage - SQLite-backed cache store.
//!
//! Provides [`SqliteCacheBackend`], a persistent key/value store with
//! per-entry TTL that plugs into the core result cache.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use riskguard_core::ResultCache;
//! use riskguard_storage::SqliteCacheBackend;
//!
//! let backend = SqliteCacheBackend::with_path("data/cache.db").unwrap();
//! let cache = ResultCache::new(Arc::new(backend), Duration::from_secs(300));
//! ```

mod cache_store;
pub mod error;
mod pool;
pub mod repository;
mod schema;

pub use cache_store::SqliteCacheBackend;
pub use error::{Result, StorageError};
pub use pool::ConnectionPool;
pub use schema::SCHEMA_VERSION;
