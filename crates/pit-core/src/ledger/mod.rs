//! Per-account micro-credit ledger.
//!
//! Balances are integer micro-credits (`1 credit = 100 micro`). Each account
//! carries a denormalized running total next to an append-only transaction
//! log; the log is the source of truth for audits and idempotency.
//!
//! # Reservation lifecycle
//!
//! ```text
//!   preauthorize ──► held ──┬── settle ──► settled
//!                           └── release ─► released
//! ```
//!
//! Terminal states are final. The first of `settle`/`release` to commit
//! wins; the loser observes a terminal reservation and returns the recorded
//! outcome with `replayed = true`. A cancelled bout therefore always
//! resolves to exactly one of the two.
//!
//! # Idempotency
//!
//! Every transaction row is keyed by `(account_id, reference_id, kind)`.
//! Preauth, settle and refund rows use the bout id as the reference;
//! grants use the caller's external event id (payment webhook event,
//! `signup:<account>`, the referred account id).

mod credits;
mod error;
mod types;

#[cfg(test)]
mod tests;

pub use credits::{ACCOUNT_OPEN_REFERENCE, CreditLedger};
pub(crate) use credits::{apply_grant_in, balance_in, existing_delta_in, validate_grant};
pub use error::LedgerError;
pub use types::{
    AuditReport, GrantOutcome, LedgerTransaction, Preauthorization, ReleaseResult, Reservation,
    ReservationStatus, SettlementResult, TransactionKind,
};

/// Micro-credits per user-facing credit.
pub const MICRO_PER_CREDIT: i64 = 100;

/// Formats micro-credits as a credit amount with two decimals.
#[must_use]
pub fn format_credits(micro: i64) -> String {
    let sign = if micro < 0 { "-" } else { "" };
    let abs = micro.unsigned_abs();
    let per = MICRO_PER_CREDIT.unsigned_abs();
    format!("{sign}{}.{:02}", abs / per, abs % per)
}
