//! Counter backends: atomic increment-with-expiry primitives.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};

use rusqlite::params;

use super::RateLimitError;
use crate::store::CreditStore;

/// Atomic per-window counter.
///
/// `increment` adds one to the counter for `(limiter, key, window_start_ms)`
/// and returns the new count. A counter may be forgotten once
/// `expires_at_ms` has passed.
pub trait CounterBackend: Send + Sync {
    /// Increments and returns the counter for one window.
    ///
    /// # Errors
    ///
    /// Returns an error if the counter cannot be stored.
    fn increment(
        &self,
        limiter: &str,
        key: &str,
        window_start_ms: i64,
        expires_at_ms: i64,
    ) -> Result<u64, RateLimitError>;
}

/// Settings for [`MemoryCounterBackend`].
#[derive(Debug, Clone, Copy)]
pub struct MemoryBackendConfig {
    /// Run cleanup every N increments.
    pub cleanup_interval: u64,

    /// Hard cap on tracked `(limiter, key)` pairs.
    ///
    /// When full, a new key triggers a cleanup; if still full the increment
    /// fails with [`RateLimitError::TooManyKeys`].
    pub max_tracked_keys: usize,
}

impl Default for MemoryBackendConfig {
    fn default() -> Self {
        Self {
            cleanup_interval: 100,
            max_tracked_keys: 10_000,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Window {
    start_ms: i64,
    count: u64,
    expires_at_ms: i64,
}

/// Process-local backend.
///
/// Each process has its own counters, so limits apply per instance. Use
/// [`SqliteCounterBackend`] to share counters across instances.
#[derive(Debug)]
pub struct MemoryCounterBackend {
    config: MemoryBackendConfig,
    state: RwLock<HashMap<(String, String), Window>>,
    request_count: AtomicU64,
}

impl Default for MemoryCounterBackend {
    fn default() -> Self {
        Self::new(MemoryBackendConfig::default())
    }
}

impl MemoryCounterBackend {
    /// Creates an empty backend.
    #[must_use]
    pub fn new(config: MemoryBackendConfig) -> Self {
        Self {
            config,
            state: RwLock::new(HashMap::new()),
            request_count: AtomicU64::new(0),
        }
    }

    /// Drops counters that expired at or before `now_ms`.
    pub fn cleanup(&self, now_ms: i64) {
        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let before = state.len();
        state.retain(|_, w| w.expires_at_ms > now_ms);
        let removed = before - state.len();
        if removed > 0 {
            tracing::debug!(removed, remaining = state.len(), "rate limit counters cleaned up");
        }
    }

    /// Number of tracked `(limiter, key)` pairs.
    #[must_use]
    pub fn tracked_keys(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .len()
    }
}

impl CounterBackend for MemoryCounterBackend {
    fn increment(
        &self,
        limiter: &str,
        key: &str,
        window_start_ms: i64,
        expires_at_ms: i64,
    ) -> Result<u64, RateLimitError> {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.config.cleanup_interval.max(1) == 0 {
            self.cleanup(window_start_ms);
        }

        let id = (limiter.to_string(), key.to_string());
        let is_tracked = self
            .state
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains_key(&id);
        if !is_tracked && self.tracked_keys() >= self.config.max_tracked_keys {
            tracing::debug!(
                max_tracked_keys = self.config.max_tracked_keys,
                "max tracked keys reached, forcing cleanup"
            );
            self.cleanup(window_start_ms);
        }

        let mut state = self
            .state
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // Re-check under the write lock: other threads may have added keys.
        if !state.contains_key(&id) && state.len() >= self.config.max_tracked_keys {
            return Err(RateLimitError::TooManyKeys {
                max: self.config.max_tracked_keys,
            });
        }

        let window = state.entry(id).or_insert(Window {
            start_ms: window_start_ms,
            count: 0,
            expires_at_ms,
        });
        if window.start_ms != window_start_ms {
            *window = Window {
                start_ms: window_start_ms,
                count: 0,
                expires_at_ms,
            };
        }
        window.count += 1;
        Ok(window.count)
    }
}

/// Backend sharing counters through the credit database.
///
/// Every increment is one upsert, so any number of processes on the same
/// file see one counter per window.
#[derive(Debug, Clone)]
pub struct SqliteCounterBackend {
    store: CreditStore,
    purge_interval: u64,
    request_count: std::sync::Arc<AtomicU64>,
}

impl SqliteCounterBackend {
    /// Creates a backend on `store`, purging expired rows every 500
    /// increments.
    #[must_use]
    pub fn new(store: CreditStore) -> Self {
        Self {
            store,
            purge_interval: 500,
            request_count: std::sync::Arc::new(AtomicU64::new(0)),
        }
    }

    /// Deletes counters that expired at or before `now_ms`. Returns the
    /// number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails.
    pub fn purge_expired(&self, now_ms: i64) -> Result<usize, RateLimitError> {
        let removed = self.store.write(|tx| {
            tx.execute(
                "DELETE FROM rate_limit_counters WHERE expires_at_ms <= ?1",
                params![now_ms],
            )
        })?;
        if removed > 0 {
            tracing::debug!(removed, "expired rate limit counters purged");
        }
        Ok(removed)
    }
}

impl CounterBackend for SqliteCounterBackend {
    fn increment(
        &self,
        limiter: &str,
        key: &str,
        window_start_ms: i64,
        expires_at_ms: i64,
    ) -> Result<u64, RateLimitError> {
        let count = self.request_count.fetch_add(1, Ordering::Relaxed);
        if count > 0 && count % self.purge_interval == 0 {
            self.purge_expired(window_start_ms)?;
        }

        let value: i64 = self.store.write(|tx| {
            tx.query_row(
                "INSERT INTO rate_limit_counters
                 (limiter, client_key, window_start_ms, count, expires_at_ms)
                 VALUES (?1, ?2, ?3, 1, ?4)
                 ON CONFLICT(limiter, client_key, window_start_ms)
                 DO UPDATE SET count = count + 1
                 RETURNING count",
                params![limiter, key, window_start_ms, expires_at_ms],
                |row| row.get(0),
            )
        })?;
        Ok(u64::try_from(value).unwrap_or(0))
    }
}
