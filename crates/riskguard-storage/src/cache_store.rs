//! SQLite implementation of the result cache backend.

use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use riskguard_core::{CacheBackend, CacheError};
use tracing::{debug, info};

use crate::error::Result;
use crate::pool::ConnectionPool;
use crate::repository::CacheRepo;

/// Persistent key/value store with per-entry TTL.
///
/// Expired entries are invisible to reads and removed by
/// [`purge_expired`](Self::purge_expired).
#[derive(Clone)]
pub struct SqliteCacheBackend {
    pool: ConnectionPool,
}

impl SqliteCacheBackend {
    /// Opens the store at `path`, creating parent directories as needed.
    pub fn with_path(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        info!(path = %path.display(), "Opening cache store");
        let pool = ConnectionPool::open(&path)?;
        Ok(Self { pool })
    }

    /// Creates an in-memory store.
    pub fn in_memory() -> Result<Self> {
        Ok(Self {
            pool: ConnectionPool::in_memory()?,
        })
    }

    /// Returns the unexpired value under `key`.
    pub fn fetch(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let conn = self.pool.get()?;
        CacheRepo::get(&conn, key, now_millis())
    }

    /// Stores `value` under `key` for `ttl`.
    pub fn store(&self, key: &str, value: &[u8], ttl: Duration) -> Result<()> {
        let ttl_ms = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now_millis().saturating_add(ttl_ms);
        let conn = self.pool.get()?;
        CacheRepo::set(&conn, key, value, expires_at)
    }

    /// Removes an entry. Returns true if it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.pool.get()?;
        CacheRepo::delete(&conn, key)
    }

    /// Removes every expired entry. Returns the number removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        let purged = CacheRepo::purge_expired(&conn, now_millis())?;
        if purged > 0 {
            debug!(purged, "Purged expired cache entries");
        }
        Ok(purged)
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> Result<usize> {
        let conn = self.pool.get()?;
        Ok(CacheRepo::count(&conn)? as usize)
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

impl CacheBackend for SqliteCacheBackend {
    fn get(&self, key: &str) -> std::result::Result<Option<Vec<u8>>, CacheError> {
        Ok(self.fetch(key)?)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> std::result::Result<(), CacheError> {
        Ok(self.store(key, &value, ttl)?)
    }

    fn is_blocking(&self) -> bool {
        true
    }
}

impl std::fmt::Debug for SqliteCacheBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteCacheBackend").finish_non_exhaustive()
    }
}

fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use riskguard_core::{CheckResult, ResultCache, ResultType};
    use std::sync::Arc;

    // ==================== Backend Tests ====================

    #[test]
    fn stores_until_ttl() {
        let store = SqliteCacheBackend::in_memory().unwrap();
        store.store("k", b"value", Duration::from_secs(60)).unwrap();
        assert_eq!(store.fetch("k").unwrap(), Some(b"value".to_vec()));

        store.store("gone", b"x", Duration::ZERO).unwrap();
        assert_eq!(store.fetch("gone").unwrap(), None);
        assert_eq!(store.len().unwrap(), 2);

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len().unwrap(), 1);
    }

    #[test]
    fn remove_entry() {
        let store = SqliteCacheBackend::in_memory().unwrap();
        store.store("k", b"v", Duration::from_secs(60)).unwrap();
        assert!(store.remove("k").unwrap());
        assert!(store.is_empty().unwrap());
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("cache.db");

        SqliteCacheBackend::with_path(&path)
            .unwrap()
            .store("k", b"v", Duration::from_secs(60))
            .unwrap();

        let reopened = SqliteCacheBackend::with_path(&path).unwrap();
        assert_eq!(reopened.fetch("k").unwrap(), Some(b"v".to_vec()));
    }

    // ==================== Result Cache Tests ====================

    #[tokio::test]
    async fn backs_result_cache() {
        let backend = Arc::new(SqliteCacheBackend::in_memory().unwrap());
        let cache = ResultCache::new(backend.clone(), Duration::from_secs(60));

        let warning = CheckResult {
            result: ResultType::Warning,
            risk_score: 40.0,
            ..Default::default()
        };
        cache.put("hello", &warning).await;
        assert_eq!(cache.get("hello").await, Some(warning));

        let reject = CheckResult {
            result: ResultType::Reject,
            ..Default::default()
        };
        cache.put("bad", &reject).await;
        assert_eq!(backend.len().unwrap(), 1);
        assert!(backend.is_blocking());
    }
}
