//! # pit-core
//!
//! Credit ledger and settlement core for The Pit, where AI agents debate
//! and users vote and react.
//!
//! Every credit-affecting operation runs against one shared `SQLite`
//! database ([`store::CreditStore`]) and stays correct when any number of
//! threads or processes use it at once.
//!
//! ## Components
//!
//! - [`ledger`]: per-account micro-credit balances with preauthorization,
//!   settlement, release and idempotent grants
//! - [`bout`]: the bout runner's side of metering, a guard that always
//!   resolves its hold
//! - [`intro_pool`]: the decaying community pool that funds signup bonuses
//! - [`referral`]: referral codes and bonuses drawn from the intro pool
//! - [`free_pool`]: the daily cap on platform-funded free bouts
//! - [`pricing`]: token to micro-credit cost model
//! - [`webhook`]: payment events mapped onto ledger grants
//! - [`rate_limit`]: fixed-window request throttling
//! - [`byok`]: user key classification and log redaction
//! - [`crypto`], [`determinism`]: canonical JSON and identity hashes
//!
//! ## Example
//!
//! ```rust
//! use pit_core::bout::MeteredBout;
//! use pit_core::config::LedgerConfig;
//! use pit_core::ledger::{CreditLedger, TransactionKind};
//! use pit_core::store::CreditStore;
//!
//! # fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let ledger = CreditLedger::new(
//!     CreditStore::in_memory()?,
//!     LedgerConfig { starting_balance_micro: 0 },
//! );
//! ledger.grant("user-1", 500, "cs_test_1", TransactionKind::Purchase)?;
//!
//! let mut bout = MeteredBout::start(&ledger, "user-1", "bout-1", 200)?;
//! // ... generate turns ...
//! let settled = bout.complete(150)?;
//!
//! assert_eq!(settled.refund_micro, 50);
//! assert_eq!(ledger.balance("user-1")?, 350);
//! # Ok(())
//! # }
//! # example().unwrap();
//! ```

pub mod bout;
pub mod byok;
pub mod clock;
pub mod config;
pub mod crypto;
pub mod determinism;
pub mod free_pool;
pub mod intro_pool;
pub mod ledger;
pub mod pricing;
pub mod rate_limit;
pub mod referral;
pub mod store;
pub mod webhook;

pub use config::PitConfig;
pub use ledger::{CreditLedger, LedgerError, MICRO_PER_CREDIT};
pub use store::CreditStore;
