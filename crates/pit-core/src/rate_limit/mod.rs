//! Fixed-window request throttling.
//!
//! Windows are aligned to multiples of `window_ms` since the Unix epoch, so
//! every instance agrees on where a window starts. A client can therefore
//! send up to `2 * max_requests` in a short span straddling a boundary; this
//! is accepted in exchange for a single counter per window.
//!
//! Counting is delegated to a [`CounterBackend`]: the in-memory backend for
//! a single process, or the `SQLite` backend when several instances share
//! the credit database.
//!
//! Rate limiting is best-effort throttling. Ledger correctness never
//! depends on it; the store's conditional updates and unique keys are the
//! authoritative guard.

mod backend;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use backend::{CounterBackend, MemoryBackendConfig, MemoryCounterBackend, SqliteCounterBackend};

/// Header set by the trusted edge proxy; its first entry is the client.
pub const EDGE_FORWARDED_HEADER: &str = "x-vercel-forwarded-for";

/// Standard forwarded-for header; only its rightmost entry is trusted.
pub const FORWARDED_FOR_HEADER: &str = "x-forwarded-for";

/// Single-address header set by some proxies.
pub const REAL_IP_HEADER: &str = "x-real-ip";

/// Identifier used when no client address is available.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Rate limiting errors.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum RateLimitError {
    /// The limiter configuration cannot be enforced.
    #[error("invalid rate limit '{name}': {reason}")]
    InvalidConfig {
        /// Limiter name.
        name: String,
        /// What is wrong with it.
        reason: &'static str,
    },

    /// The in-memory backend is tracking its maximum number of keys.
    #[error("rate limiter is tracking the maximum of {max} keys")]
    TooManyKeys {
        /// Configured cap.
        max: usize,
    },

    /// Counter storage failed.
    #[error("rate limit store error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One named limiter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Unique limiter name (`bout`, `reactions`, ...).
    pub name: String,

    /// Requests allowed per window.
    pub max_requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,
}

impl RateLimitConfig {
    /// Creates a limiter configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, max_requests: u32, window_ms: u64) -> Self {
        Self {
            name: name.into(),
            max_requests,
            window_ms,
        }
    }
}

/// Outcome of [`RateLimiter::check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RateLimitDecision {
    /// Whether the request may proceed.
    pub success: bool,
    /// Requests left in the current window.
    pub remaining: u32,
    /// End of the current window (Unix ms).
    pub reset_at_ms: i64,
}

/// Start of the window containing `now_ms`.
#[must_use]
pub fn window_start(now_ms: i64, window_ms: i64) -> i64 {
    now_ms - now_ms.rem_euclid(window_ms.max(1))
}

/// Fixed-window limiter over a counter backend.
#[derive(Clone)]
pub struct RateLimiter {
    backend: Arc<dyn CounterBackend>,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter").finish_non_exhaustive()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl RateLimiter {
    /// Creates a limiter over `backend`.
    #[must_use]
    pub fn new(backend: Arc<dyn CounterBackend>) -> Self {
        Self { backend }
    }

    /// Creates a limiter with a default in-memory backend.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryCounterBackend::default()))
    }

    /// Counts one request from `key` against `config` at `now_ms`.
    ///
    /// A backend at its key cap denies the request rather than failing.
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for a zero limit or window, and `Database`
    /// if the shared counter cannot be written.
    pub fn check(
        &self,
        config: &RateLimitConfig,
        key: &str,
        now_ms: i64,
    ) -> Result<RateLimitDecision, RateLimitError> {
        if config.max_requests == 0 {
            return Err(RateLimitError::InvalidConfig {
                name: config.name.clone(),
                reason: "max_requests must be positive",
            });
        }
        let window_ms = i64::try_from(config.window_ms)
            .ok()
            .filter(|w| *w > 0)
            .ok_or_else(|| RateLimitError::InvalidConfig {
                name: config.name.clone(),
                reason: "window_ms must be positive and fit in i64",
            })?;

        let start = window_start(now_ms, window_ms);
        let reset_at_ms = start.saturating_add(window_ms);

        let count = match self
            .backend
            .increment(&config.name, key, start, reset_at_ms)
        {
            Ok(count) => count,
            Err(RateLimitError::TooManyKeys { max }) => {
                tracing::warn!(
                    limiter = %config.name,
                    key,
                    max_tracked_keys = max,
                    "rejecting new key: max tracked keys reached"
                );
                return Ok(RateLimitDecision {
                    success: false,
                    remaining: 0,
                    reset_at_ms,
                });
            },
            Err(e) => return Err(e),
        };

        let max = u64::from(config.max_requests);
        let success = count <= max;
        if !success {
            tracing::warn!(
                limiter = %config.name,
                key,
                requests = count,
                max,
                "rate limit exceeded"
            );
        }
        Ok(RateLimitDecision {
            success,
            remaining: u32::try_from(max.saturating_sub(count)).unwrap_or(0),
            reset_at_ms,
        })
    }
}

/// Picks the client address to rate limit on.
///
/// `header` looks up a request header by lowercase name. The trusted edge
/// header wins; otherwise the rightmost `x-forwarded-for` entry (the one
/// appended by our proxy, not the client) is used, then `x-real-ip`.
#[must_use]
pub fn client_identifier<'a>(header: impl Fn(&str) -> Option<&'a str>) -> String {
    let non_empty = |value: &str| {
        let value = value.trim();
        (!value.is_empty()).then(|| value.to_string())
    };

    header(EDGE_FORWARDED_HEADER)
        .and_then(|v| v.split(',').next().and_then(non_empty))
        .or_else(|| {
            header(FORWARDED_FOR_HEADER).and_then(|v| v.rsplit(',').next().and_then(non_empty))
        })
        .or_else(|| header(REAL_IP_HEADER).and_then(non_empty))
        .unwrap_or_else(|| UNKNOWN_CLIENT.to_string())
}
