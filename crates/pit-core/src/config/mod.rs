//! Configuration parsing and management.
//!
//! A single TOML file configures the store location, the ledger's starting
//! balance, the intro pool, the daily free-bout pool, pricing and the named
//! rate limiters. Every section is optional; missing keys take the
//! production defaults.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::free_pool::FreePoolConfig;
use crate::intro_pool::IntroPoolConfig;
use crate::pricing::PricingConfig;
use crate::rate_limit::RateLimitConfig;

/// Top-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PitConfig {
    /// Database location and locking.
    #[serde(default)]
    pub store: StoreConfig,

    /// Ledger settings.
    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Intro/referral pool settings.
    #[serde(default)]
    pub intro_pool: IntroPoolConfig,

    /// Daily free-bout pool settings.
    #[serde(default)]
    pub free_pool: FreePoolConfig,

    /// Token pricing.
    #[serde(default)]
    pub pricing: PricingConfig,

    /// Named fixed-window rate limiters.
    #[serde(default = "default_rate_limits")]
    pub rate_limits: Vec<RateLimitConfig>,
}

impl PitConfig {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(ConfigError::Io)?;
        Self::from_toml(&content)
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML is invalid or a value is out of range.
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content).map_err(ConfigError::Parse)?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(ConfigError::Serialize)
    }

    /// Checks cross-field constraints serde cannot express.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] naming the first offending key.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.store.busy_timeout_ms == 0 {
            return Err(invalid("store.busy_timeout_ms must be positive"));
        }
        if self.ledger.starting_balance_micro < 0 {
            return Err(invalid("ledger.starting_balance_micro cannot be negative"));
        }
        if self.intro_pool.initial_micro < 0 {
            return Err(invalid("intro_pool.initial_micro cannot be negative"));
        }
        if self.intro_pool.half_life_days == 0 {
            return Err(invalid("intro_pool.half_life_days must be positive"));
        }
        if self.intro_pool.signup_bonus_micro < 0 || self.intro_pool.referral_bonus_micro < 0 {
            return Err(invalid("intro_pool bonuses cannot be negative"));
        }
        if self.free_pool.spend_cap_micro < 0 {
            return Err(invalid("free_pool.spend_cap_micro cannot be negative"));
        }
        self.pricing.validate().map_err(ConfigError::Validation)?;

        let mut seen = HashSet::new();
        for limiter in &self.rate_limits {
            if limiter.max_requests == 0 || limiter.window_ms == 0 {
                return Err(ConfigError::Validation(format!(
                    "rate limiter '{}' needs a positive max_requests and window_ms",
                    limiter.name
                )));
            }
            if !seen.insert(limiter.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "rate limiter '{}' is defined twice",
                    limiter.name
                )));
            }
        }
        Ok(())
    }

    /// Looks up a rate limiter by name.
    #[must_use]
    pub fn rate_limit(&self, name: &str) -> Option<&RateLimitConfig> {
        self.rate_limits.iter().find(|l| l.name == name)
    }
}

impl Default for PitConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            ledger: LedgerConfig::default(),
            intro_pool: IntroPoolConfig::default(),
            free_pool: FreePoolConfig::default(),
            pricing: PricingConfig::default(),
            rate_limits: default_rate_limits(),
        }
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Validation(msg.to_string())
}

/// Database settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StoreConfig {
    /// Path to the `SQLite` database file.
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// How long a writer waits for the database lock before reporting a
    /// conflict.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

impl StoreConfig {
    /// Busy timeout as a [`Duration`].
    #[must_use]
    pub const fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

/// Ledger settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Balance credited to an account when it is first created.
    #[serde(default = "default_starting_balance_micro")]
    pub starting_balance_micro: i64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            starting_balance_micro: default_starting_balance_micro(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("pit-credits.db")
}

const fn default_busy_timeout_ms() -> u64 {
    5_000
}

const fn default_starting_balance_micro() -> i64 {
    // 500 credits.
    50_000
}

fn default_rate_limits() -> Vec<RateLimitConfig> {
    vec![
        RateLimitConfig::new("bout", 5, 60_000),
        RateLimitConfig::new("reactions", 30, 60_000),
        RateLimitConfig::new("referral", 10, 3_600_000),
        RateLimitConfig::new("webhook", 120, 60_000),
    ]
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// I/O error reading configuration file.
    #[error("failed to read configuration file: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing error.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialization error.
    #[error("failed to serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Validation error.
    #[error("configuration validation failed: {0}")]
    Validation(String),
}
