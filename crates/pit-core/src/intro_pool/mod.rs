//! Community intro-credit pool with exponential decay.
//!
//! The pool is a single row. Its spendable value decays with a fixed
//! half-life from the moment it was created, independently of claims:
//!
//! ```text
//! remaining(t) = max(0, floor(initial * 0.5^((t - started) / half_life)) - claimed)
//! ```
//!
//! [`decayed_at`] and [`remaining_at`] are pure projections over a
//! [`PoolSnapshot`] with no write authority; clients may use them to
//! extrapolate the value between syncs. All writes go through
//! [`IntroPool`], which recomputes `remaining` inside the write transaction
//! and advances `claimed_micro` with an update guarded on the value it
//! observed.
//!
//! Exhaustion is a normal terminal state: a claim against an empty pool
//! returns `claimed_micro = 0`, never an error.

#![allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::clock::MS_PER_DAY;
use crate::ledger::{
    CreditLedger, GrantOutcome, LedgerError, MICRO_PER_CREDIT, TransactionKind, apply_grant_in,
    existing_delta_in, validate_grant,
};

/// Attempts before a lost compare-and-update is reported as a conflict.
const MAX_CLAIM_ATTEMPTS: u32 = 3;

/// Reference prefix for signup bonuses.
pub const SIGNUP_REFERENCE_PREFIX: &str = "signup:";

/// Pool settings.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntroPoolConfig {
    /// Pool size at creation.
    #[serde(default = "default_initial_micro")]
    pub initial_micro: i64,

    /// Time for the undrawn value to halve.
    #[serde(default = "default_half_life_days")]
    pub half_life_days: u32,

    /// Credited to a new account on signup.
    #[serde(default = "default_signup_bonus_micro")]
    pub signup_bonus_micro: i64,

    /// Credited to a referrer per successful referral.
    #[serde(default = "default_referral_bonus_micro")]
    pub referral_bonus_micro: i64,
}

impl IntroPoolConfig {
    /// Half-life in milliseconds.
    #[must_use]
    pub const fn half_life_ms(&self) -> i64 {
        self.half_life_days as i64 * MS_PER_DAY
    }
}

impl Default for IntroPoolConfig {
    fn default() -> Self {
        Self {
            initial_micro: default_initial_micro(),
            half_life_days: default_half_life_days(),
            signup_bonus_micro: default_signup_bonus_micro(),
            referral_bonus_micro: default_referral_bonus_micro(),
        }
    }
}

const fn default_initial_micro() -> i64 {
    // 15,000 credits.
    1_500_000
}

const fn default_half_life_days() -> u32 {
    30
}

const fn default_signup_bonus_micro() -> i64 {
    10_000
}

const fn default_referral_bonus_micro() -> i64 {
    5_000
}

/// Errors from pool operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum PoolError {
    /// The request amount is not positive.
    #[error("invalid claim amount {0}")]
    InvalidAmount(i64),

    /// The pool row is missing; [`IntroPool::open`] was never run on this
    /// store.
    #[error("intro pool not initialized")]
    NotInitialized,

    /// Ledger or store failure, including retryable conflicts.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl PoolError {
    /// Returns `true` if the caller should retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Ledger(e) if e.is_retryable())
    }
}

impl From<rusqlite::Error> for PoolError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Ledger(err.into())
    }
}

/// Stored pool state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    /// Pool size at creation.
    pub initial_micro: i64,
    /// Half-life of the undrawn value.
    pub half_life_ms: i64,
    /// Cumulative amount distributed.
    pub claimed_micro: i64,
    /// Creation time (Unix ms).
    pub started_at_ms: i64,
}

/// Decayed pool value at `now_ms`, before subtracting claims.
///
/// Times before `started_at_ms` are treated as the start.
#[must_use]
pub fn decayed_at(snapshot: &PoolSnapshot, now_ms: i64) -> i64 {
    if snapshot.initial_micro <= 0 {
        return 0;
    }
    let elapsed = now_ms.saturating_sub(snapshot.started_at_ms).max(0) as f64;
    let half_life = snapshot.half_life_ms.max(1) as f64;
    let factor = 0.5_f64.powf(elapsed / half_life);
    (snapshot.initial_micro as f64 * factor).floor() as i64
}

/// Spendable pool value at `now_ms`, floored at zero.
#[must_use]
pub fn remaining_at(snapshot: &PoolSnapshot, now_ms: i64) -> i64 {
    decayed_at(snapshot, now_ms)
        .saturating_sub(snapshot.claimed_micro)
        .max(0)
}

/// Point-in-time view for display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStatus {
    /// The stored state the view was computed from.
    #[serde(flatten)]
    pub snapshot: PoolSnapshot,
    /// Decayed value before claims.
    pub decayed_micro: i64,
    /// Spendable value.
    pub remaining_micro: i64,
    /// Spendable value in whole credits.
    pub remaining_credits: i64,
    /// `true` once nothing is left.
    pub exhausted: bool,
    /// Time of the projection (Unix ms).
    pub as_of_ms: i64,
}

/// A request to draw from the pool into an account.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimRequest {
    /// Account to credit.
    pub account_id: String,
    /// Amount wanted; the claim is clamped to what remains.
    pub credits_micro: i64,
    /// Ledger kind of the resulting grant (`intro` or `referral`).
    pub kind: TransactionKind,
    /// Idempotency key shared with the ledger grant.
    pub reference_id: String,
    /// Extra metadata merged into the grant.
    pub metadata: Value,
}

/// Result of [`IntroPool::claim_intro_credits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClaimOutcome {
    /// Amount actually credited; zero when the pool is empty.
    pub claimed_micro: i64,
    /// Pool value left after the claim.
    pub remaining_micro: i64,
    /// `true` once nothing is left.
    pub exhausted: bool,
    /// `true` when the reference was already claimed and nothing was
    /// written.
    pub replayed: bool,
}

/// Result of [`IntroPool::consume_anonymous`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AnonymousDraw {
    /// Whether the full amount was drawn.
    pub consumed: bool,
    /// Pool value left.
    pub remaining_micro: i64,
    /// `true` once nothing is left.
    pub exhausted: bool,
}

/// Handle to the shared pool row.
#[derive(Debug, Clone)]
pub struct IntroPool {
    ledger: CreditLedger,
    config: IntroPoolConfig,
}

impl IntroPool {
    /// Creates the pool row on first use and returns a handle.
    ///
    /// An existing row is left untouched; the configured size and half-life
    /// only apply to a new pool.
    ///
    /// # Errors
    ///
    /// Returns an error if the row cannot be written.
    pub fn open(ledger: CreditLedger, config: IntroPoolConfig) -> Result<Self, PoolError> {
        let now = ledger.now_ms();
        let created = ledger.store().write(|tx| {
            tx.execute(
                "INSERT INTO intro_pool
                 (pool_id, initial_micro, half_life_ms, claimed_micro, started_at_ms, updated_at_ms)
                 VALUES (1, ?1, ?2, 0, ?3, ?3)
                 ON CONFLICT(pool_id) DO NOTHING",
                params![config.initial_micro, config.half_life_ms(), now],
            )
            .map(|n| n == 1)
        })?;
        if created {
            info!(
                initial_micro = config.initial_micro,
                half_life_days = config.half_life_days,
                "intro pool created"
            );
        }
        Ok(Self { ledger, config })
    }

    /// The pool settings.
    #[must_use]
    pub const fn config(&self) -> &IntroPoolConfig {
        &self.config
    }

    pub(crate) const fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }

    /// Reads the stored pool row.
    ///
    /// # Errors
    ///
    /// Returns `NotInitialized` if the row is missing.
    pub fn snapshot(&self) -> Result<PoolSnapshot, PoolError> {
        let conn = self.ledger.store().conn();
        load_snapshot(&conn)
    }

    /// Spendable value at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool row cannot be read.
    pub fn remaining(&self, now_ms: i64) -> Result<i64, PoolError> {
        Ok(remaining_at(&self.snapshot()?, now_ms))
    }

    /// Full display view at `now_ms`.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool row cannot be read.
    pub fn status(&self, now_ms: i64) -> Result<PoolStatus, PoolError> {
        let snapshot = self.snapshot()?;
        let remaining_micro = remaining_at(&snapshot, now_ms);
        Ok(PoolStatus {
            snapshot,
            decayed_micro: decayed_at(&snapshot, now_ms),
            remaining_micro,
            remaining_credits: remaining_micro / MICRO_PER_CREDIT,
            exhausted: remaining_micro <= 0,
            as_of_ms: now_ms,
        })
    }

    /// Draws up to `request.credits_micro` from the pool into an account.
    ///
    /// Runs as one write transaction: replay check on the grant's
    /// idempotency key, decay projection, clamp, guarded update of
    /// `claimed_micro`, ledger grant. A replayed reference returns the
    /// originally claimed amount and writes nothing.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `credits_micro <= 0`
    /// - `Ledger(InvalidKind)` for non-crediting kinds
    /// - `Ledger(Conflict)` if the guarded update kept losing
    pub fn claim_intro_credits(&self, request: &ClaimRequest) -> Result<ClaimOutcome, PoolError> {
        if request.credits_micro <= 0 {
            return Err(PoolError::InvalidAmount(request.credits_micro));
        }
        validate_grant(request.credits_micro, request.kind)?;
        let starting = self.ledger.config().starting_balance_micro;

        for attempt in 1..=MAX_CLAIM_ATTEMPTS {
            let now = self.ledger.now_ms();
            let outcome = self
                .ledger
                .store()
                .write(|tx| claim_in(tx, request, starting, now))?;

            if let Some(outcome) = outcome {
                log_claim(request, &outcome);
                return Ok(outcome);
            }
            debug!(attempt, "intro pool claim lost compare-and-update");
        }

        Err(
            LedgerError::Conflict("intro pool claim kept losing to concurrent claims".into())
                .into(),
        )
    }

    /// Claims the configured signup bonus for a new account.
    ///
    /// Keyed by `signup:<account_id>`, so each account receives it at most
    /// once.
    ///
    /// # Errors
    ///
    /// See [`claim_intro_credits`](Self::claim_intro_credits).
    pub fn claim_signup_bonus(&self, account_id: &str) -> Result<ClaimOutcome, PoolError> {
        if self.config.signup_bonus_micro <= 0 {
            return Ok(ClaimOutcome {
                claimed_micro: 0,
                remaining_micro: self.remaining(self.ledger.now_ms())?,
                exhausted: false,
                replayed: false,
            });
        }
        self.claim_intro_credits(&ClaimRequest {
            account_id: account_id.to_string(),
            credits_micro: self.config.signup_bonus_micro,
            kind: TransactionKind::Intro,
            reference_id: format!("{SIGNUP_REFERENCE_PREFIX}{account_id}"),
            metadata: Value::Null,
        })
    }

    /// Draws exactly `amount_micro` for an anonymous bout, or nothing.
    ///
    /// No account is credited; the draw pays for a bout run without one.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `amount_micro <= 0`.
    pub fn consume_anonymous(&self, amount_micro: i64) -> Result<AnonymousDraw, PoolError> {
        if amount_micro <= 0 {
            return Err(PoolError::InvalidAmount(amount_micro));
        }
        let now = self.ledger.now_ms();
        let draw = self.ledger.store().write(|tx| -> Result<_, PoolError> {
            let snapshot = load_snapshot(tx)?;
            let available = remaining_at(&snapshot, now);
            if available < amount_micro
                || !advance_claimed(tx, snapshot.claimed_micro, amount_micro, now)?
            {
                return Ok(AnonymousDraw {
                    consumed: false,
                    remaining_micro: available,
                    exhausted: available <= 0,
                });
            }
            let remaining_micro = available - amount_micro;
            Ok(AnonymousDraw {
                consumed: true,
                remaining_micro,
                exhausted: remaining_micro <= 0,
            })
        })?;

        if draw.consumed {
            debug!(
                amount_micro,
                remaining_micro = draw.remaining_micro,
                "anonymous draw"
            );
        }
        Ok(draw)
    }

    /// Returns an unused anonymous draw to the pool.
    ///
    /// `claimed_micro` never drops below zero.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` if `amount_micro <= 0`.
    pub fn refund(&self, amount_micro: i64) -> Result<(), PoolError> {
        if amount_micro <= 0 {
            return Err(PoolError::InvalidAmount(amount_micro));
        }
        let now = self.ledger.now_ms();
        self.ledger.store().write(|tx| -> Result<_, PoolError> {
            let updated = tx.execute(
                "UPDATE intro_pool
                 SET claimed_micro = MAX(0, claimed_micro - ?1), updated_at_ms = ?2
                 WHERE pool_id = 1",
                params![amount_micro, now],
            )?;
            if updated == 0 {
                return Err(PoolError::NotInitialized);
            }
            Ok(())
        })?;
        debug!(amount_micro, "intro pool refunded");
        Ok(())
    }
}

/// One claim attempt inside an open write transaction. `None` means the
/// guarded update lost to another writer.
pub(crate) fn claim_in(
    tx: &Connection,
    request: &ClaimRequest,
    starting_balance_micro: i64,
    now: i64,
) -> Result<Option<ClaimOutcome>, PoolError> {
    if let Some(delta) = existing_delta_in(
        tx,
        &request.account_id,
        &request.reference_id,
        request.kind,
    )? {
        let remaining_micro = remaining_at(&load_snapshot(tx)?, now);
        return Ok(Some(ClaimOutcome {
            claimed_micro: delta,
            remaining_micro,
            exhausted: remaining_micro <= 0,
            replayed: true,
        }));
    }

    let snapshot = load_snapshot(tx)?;
    let available = remaining_at(&snapshot, now);
    let claim = request.credits_micro.min(available);
    if claim <= 0 {
        return Ok(Some(ClaimOutcome {
            claimed_micro: 0,
            remaining_micro: 0,
            exhausted: true,
            replayed: false,
        }));
    }

    if !advance_claimed(tx, snapshot.claimed_micro, claim, now)? {
        return Ok(None);
    }
    let remaining_micro = available - claim;

    let mut metadata = Map::new();
    metadata.insert("intro_pool_claimed_micro".into(), claim.into());
    metadata.insert("intro_pool_remaining_micro".into(), remaining_micro.into());
    if let Value::Object(extra) = &request.metadata {
        for (key, value) in extra {
            metadata.insert(key.clone(), value.clone());
        }
    }

    let grant = apply_grant_in(
        tx,
        &request.account_id,
        claim,
        &request.reference_id,
        request.kind,
        &Value::Object(metadata),
        starting_balance_micro,
        now,
    )?;
    if grant == GrantOutcome::Duplicate {
        return Err(LedgerError::Conflict(format!(
            "grant {} appeared during pool claim",
            request.reference_id
        ))
        .into());
    }

    Ok(Some(ClaimOutcome {
        claimed_micro: claim,
        remaining_micro,
        exhausted: remaining_micro <= 0,
        replayed: false,
    }))
}

fn log_claim(request: &ClaimRequest, outcome: &ClaimOutcome) {
    if outcome.replayed {
        debug!(
            account_id = %request.account_id,
            reference_id = %request.reference_id,
            "intro pool claim replayed"
        );
    } else if outcome.claimed_micro > 0 {
        info!(
            account_id = %request.account_id,
            reference_id = %request.reference_id,
            kind = %request.kind,
            claimed_micro = outcome.claimed_micro,
            remaining_micro = outcome.remaining_micro,
            "intro credits claimed"
        );
    } else {
        warn!(
            account_id = %request.account_id,
            requested_micro = request.credits_micro,
            "intro pool exhausted"
        );
    }
}

pub(crate) fn load_snapshot(conn: &Connection) -> Result<PoolSnapshot, PoolError> {
    conn.query_row(
        "SELECT initial_micro, half_life_ms, claimed_micro, started_at_ms
         FROM intro_pool WHERE pool_id = 1",
        [],
        |row| {
            Ok(PoolSnapshot {
                initial_micro: row.get(0)?,
                half_life_ms: row.get(1)?,
                claimed_micro: row.get(2)?,
                started_at_ms: row.get(3)?,
            })
        },
    )
    .optional()?
    .ok_or(PoolError::NotInitialized)
}

/// Compare-and-update on `claimed_micro`. Returns `false` if another writer
/// moved it since `observed`.
fn advance_claimed(
    conn: &Connection,
    observed: i64,
    amount_micro: i64,
    now: i64,
) -> Result<bool, PoolError> {
    let updated = conn.execute(
        "UPDATE intro_pool
         SET claimed_micro = claimed_micro + ?1, updated_at_ms = ?2
         WHERE pool_id = 1 AND claimed_micro = ?3",
        params![amount_micro, now, observed],
    )?;
    Ok(updated == 1)
}
