//! `pitctl` subcommands.
//!
//! Every command opens the configured store, runs one operation and prints
//! either a short text summary or, with `--json`, the full result.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use pit_core::store::CreditStore;
use pit_core::{CreditLedger, PitConfig};
use serde::Serialize;

pub mod account;
pub mod bout;
pub mod hash;
pub mod pool;
pub mod referral;
pub mod webhook;

/// Options shared by every subcommand.
#[derive(Debug, Clone)]
pub struct GlobalOpts {
    /// Configuration file, if given.
    pub config: Option<PathBuf>,
    /// Database path override.
    pub db: Option<PathBuf>,
    /// Print JSON instead of text.
    pub json: bool,
}

/// Loaded configuration plus an open ledger.
pub struct Session {
    pub config: PitConfig,
    pub ledger: CreditLedger,
    pub json: bool,
}

impl Session {
    /// Loads the configuration and opens the store it names.
    pub fn open(opts: &GlobalOpts) -> Result<Self> {
        let mut config = load_config(opts.config.as_deref())?;
        if let Some(db) = &opts.db {
            config.store.path.clone_from(db);
        }
        let store = CreditStore::open_with_timeout(&config.store.path, config.store.busy_timeout())
            .with_context(|| {
                format!("failed to open credit store {}", config.store.path.display())
            })?;
        tracing::debug!(path = %config.store.path.display(), "credit store opened");
        let ledger = CreditLedger::new(store, config.ledger);
        Ok(Self {
            config,
            ledger,
            json: opts.json,
        })
    }

    /// Prints `value` as JSON, or `text` otherwise.
    pub fn emit<T: Serialize>(&self, value: &T, text: impl FnOnce() -> String) -> Result<()> {
        emit(self.json, value, text)
    }
}

/// Reads the configuration file, or the defaults when none is given.
pub fn load_config(path: Option<&Path>) -> Result<PitConfig> {
    match path {
        Some(path) => PitConfig::from_file(path)
            .with_context(|| format!("failed to load config {}", path.display())),
        None => Ok(PitConfig::default()),
    }
}

pub fn emit<T: Serialize>(json: bool, value: &T, text: impl FnOnce() -> String) -> Result<()> {
    if json {
        let out = serde_json::to_string_pretty(value).context("failed to serialize output")?;
        println!("{out}");
    } else {
        println!("{}", text());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_db_flag_overrides_config_path() {
        let dir = TempDir::new().unwrap();
        let db = dir.path().join("override.db");
        let session = Session::open(&GlobalOpts {
            config: None,
            db: Some(db.clone()),
            json: true,
        })
        .unwrap();
        assert_eq!(session.config.store.path, db);
        assert!(db.exists());
    }

    #[test]
    fn test_missing_config_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = load_config(Some(&dir.path().join("absent.toml"))).unwrap_err();
        assert!(err.to_string().contains("failed to load config"));
    }
}
