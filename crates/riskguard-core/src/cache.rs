//! Verdict cache keyed by content hash.
//!
//! Backend failures never reach the caller: a failed read is a miss and a
//! failed write is dropped. Reject verdicts are never stored.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;

use crate::error::CacheError;
use crate::model::{cache_key, CheckResult, ResultType};

/// Byte-blob key/value store with per-entry TTL.
pub trait CacheBackend: Send + Sync {
    /// Returns the stored bytes, or `None` if absent or expired.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;

    /// Stores bytes under `key` for `ttl`.
    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError>;

    /// Whether calls block on I/O. Blocking backends are driven from the
    /// tokio blocking pool.
    fn is_blocking(&self) -> bool {
        false
    }
}

/// In-process backend.
///
/// Expired entries are dropped when read and by [`purge_expired`](Self::purge_expired).
#[derive(Debug, Default)]
pub struct MemoryCacheBackend {
    entries: Mutex<HashMap<String, (Vec<u8>, Instant)>>,
}

impl MemoryCacheBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries, expired ones included.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Drops every expired entry. Returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, (_, expires)| *expires > now);
        before - entries.len()
    }
}

/// Far-future stand-in for TTLs too large to add to `now`.
const MAX_TTL: Duration = Duration::from_secs(100 * 365 * 24 * 60 * 60);

fn expiry(now: Instant, ttl: Duration) -> Instant {
    now.checked_add(ttl)
        .or_else(|| now.checked_add(MAX_TTL))
        .unwrap_or(now)
}

impl CacheBackend for MemoryCacheBackend {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((value, expires)) if *expires > Instant::now() => return Ok(Some(value.clone())),
            Some(_) => {}
            None => return Ok(None),
        }
        entries.remove(key);
        Ok(None)
    }

    fn set(&self, key: &str, value: Vec<u8>, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .insert(key.to_string(), (value, expiry(Instant::now(), ttl)));
        Ok(())
    }
}

/// Safety-biased verdict cache over an optional backend.
#[derive(Clone)]
pub struct ResultCache {
    backend: Option<Arc<dyn CacheBackend>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(backend: Arc<dyn CacheBackend>, ttl: Duration) -> Self {
        Self {
            backend: Some(backend),
            ttl,
        }
    }

    /// A cache that never hits and never stores.
    pub fn disabled() -> Self {
        Self {
            backend: None,
            ttl: Duration::ZERO,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.backend.is_some()
    }

    /// Looks up the verdict for `content`.
    pub async fn get(&self, content: &str) -> Option<CheckResult> {
        let backend = self.backend.as_ref()?;
        let key = cache_key(content);

        let bytes = match read(backend, key.clone()).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                debug!(key = %key, error = %e, "Cache read failed, treating as miss");
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(result) => {
                debug!(key = %key, "Cache hit");
                Some(result)
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Cached entry unreadable, treating as miss");
                None
            }
        }
    }

    /// Stores the verdict for `content` unless it is a reject.
    pub async fn put(&self, content: &str, result: &CheckResult) {
        let Some(backend) = self.backend.as_ref() else {
            return;
        };
        if result.result == ResultType::Reject {
            return;
        }

        let key = cache_key(content);
        let outcome = match serde_json::to_vec(result) {
            Ok(bytes) => write(backend, key.clone(), bytes, self.ttl).await,
            Err(e) => Err(CacheError::from(e)),
        };
        if let Err(e) = outcome {
            debug!(key = %key, error = %e, "Cache write failed");
        }
    }
}

async fn read(backend: &Arc<dyn CacheBackend>, key: String) -> Result<Option<Vec<u8>>, CacheError> {
    if !backend.is_blocking() {
        return backend.get(&key);
    }
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || backend.get(&key))
        .await
        .unwrap_or_else(|e| Err(CacheError::Unavailable(e.to_string())))
}

async fn write(
    backend: &Arc<dyn CacheBackend>,
    key: String,
    value: Vec<u8>,
    ttl: Duration,
) -> Result<(), CacheError> {
    if !backend.is_blocking() {
        return backend.set(&key, value, ttl);
    }
    let backend = Arc::clone(backend);
    tokio::task::spawn_blocking(move || backend.set(&key, value, ttl))
        .await
        .unwrap_or_else(|e| Err(CacheError::Unavailable(e.to_string())))
}

impl std::fmt::Debug for ResultCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultCache")
            .field("enabled", &self.is_enabled())
            .field("ttl", &self.ttl)
            .finish()
    }
}
