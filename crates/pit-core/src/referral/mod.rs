//! Referral codes and one-time referral bonuses.
//!
//! Each account can own one 8-character referral code. When a new account
//! applies someone else's code, a `referrals` row links the two (one per
//! referred account, enforced by a unique key) and the referrer's bonus is
//! drawn from the intro pool. The link, the pool claim and the ledger grant
//! commit together; `credited` is set only when the claim was non-zero.

use rand::Rng;
use rand::distributions::Alphanumeric;
use rusqlite::{Connection, OptionalExtension, params};
use serde::Serialize;
use serde_json::json;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::intro_pool::{ClaimRequest, IntroPool, PoolError, claim_in};
use crate::ledger::{LedgerError, TransactionKind};
use crate::store::is_constraint_violation;

/// Length of generated referral codes.
pub const REFERRAL_CODE_LEN: usize = 8;

const MAX_CODE_ATTEMPTS: usize = 4;

/// Errors from referral operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ReferralError {
    /// Every generated code collided with an existing one.
    #[error("could not allocate a unique referral code after {0} attempts")]
    CodeSpaceExhausted(usize),

    /// The referral bonus claim failed.
    #[error(transparent)]
    Pool(#[from] PoolError),
}

impl ReferralError {
    /// Returns `true` if the caller should retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Pool(e) if e.is_retryable())
    }
}

impl From<rusqlite::Error> for ReferralError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Pool(err.into())
    }
}

impl From<LedgerError> for ReferralError {
    fn from(err: LedgerError) -> Self {
        Self::Pool(err.into())
    }
}

/// Result of [`Referrals::apply_referral_bonus`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ReferralOutcome {
    /// The referred account was already referred; nothing was written.
    Already {
        /// Referrer recorded on the existing link.
        referrer_id: String,
    },
    /// Unknown code or self-referral; nothing was written.
    Invalid,
    /// Link recorded and the referrer credited.
    Credited {
        /// The credited referrer.
        referrer_id: String,
        /// Bonus drawn from the pool.
        claimed_micro: i64,
    },
    /// Link recorded but the pool had nothing left.
    Empty {
        /// The referrer who went uncredited.
        referrer_id: String,
    },
}

/// Stored referral link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Referral {
    /// Account that owns the code.
    pub referrer_id: String,
    /// Account that applied it.
    pub referred_id: String,
    /// The code applied.
    pub code: String,
    /// Whether the referrer received a bonus.
    pub credited: bool,
    /// Creation time (Unix ms).
    pub created_at_ms: i64,
}

/// Referral operations over the intro pool.
#[derive(Debug, Clone)]
pub struct Referrals {
    pool: IntroPool,
}

impl Referrals {
    /// Creates a handle that pays bonuses from `pool`.
    #[must_use]
    pub const fn new(pool: IntroPool) -> Self {
        Self { pool }
    }

    /// Returns the account's referral code, creating one if needed.
    ///
    /// # Errors
    ///
    /// Returns `CodeSpaceExhausted` if every attempt collided.
    pub fn ensure_referral_code(&self, account_id: &str) -> Result<String, ReferralError> {
        let ledger = self.pool.ledger();
        let now = ledger.now_ms();
        ledger.store().write(|tx| -> Result<_, ReferralError> {
            if let Some(code) = code_for_account(tx, account_id)? {
                return Ok(code);
            }
            for _ in 0..MAX_CODE_ATTEMPTS {
                let code = generate_code();
                match tx.execute(
                    "INSERT INTO referral_codes (account_id, code, created_at_ms)
                     VALUES (?1, ?2, ?3)",
                    params![account_id, code, now],
                ) {
                    Ok(_) => {
                        debug!(account_id, "referral code allocated");
                        return Ok(code);
                    },
                    Err(e) if is_constraint_violation(&e) => {},
                    Err(e) => return Err(e.into()),
                }
            }
            Err(ReferralError::CodeSpaceExhausted(MAX_CODE_ATTEMPTS))
        })
    }

    /// Links `referred_id` to the owner of `code` and pays the referrer.
    ///
    /// The bonus grant is keyed by the referred account, so applying the
    /// same referral twice can never pay twice.
    ///
    /// # Errors
    ///
    /// Returns store or ledger errors. Self-referral, unknown codes and
    /// an empty pool are outcomes, not errors.
    pub fn apply_referral_bonus(
        &self,
        referred_id: &str,
        code: &str,
    ) -> Result<ReferralOutcome, ReferralError> {
        let ledger = self.pool.ledger();
        let now = ledger.now_ms();
        let starting = ledger.config().starting_balance_micro;
        let bonus = self.pool.config().referral_bonus_micro;

        let outcome = ledger.store().write(|tx| -> Result<_, ReferralError> {
            if let Some(existing) = referral_for(tx, referred_id)? {
                return Ok(ReferralOutcome::Already {
                    referrer_id: existing.referrer_id,
                });
            }

            let Some(referrer_id) = account_for_code(tx, code)? else {
                return Ok(ReferralOutcome::Invalid);
            };
            if referrer_id == referred_id {
                return Ok(ReferralOutcome::Invalid);
            }

            tx.execute(
                "INSERT INTO referrals (referrer_id, referred_id, code, credited, created_at_ms)
                 VALUES (?1, ?2, ?3, 0, ?4)",
                params![referrer_id, referred_id, code, now],
            )?;

            if bonus <= 0 {
                return Ok(ReferralOutcome::Empty { referrer_id });
            }
            let claim = claim_in(
                tx,
                &ClaimRequest {
                    account_id: referrer_id.clone(),
                    credits_micro: bonus,
                    kind: TransactionKind::Referral,
                    reference_id: referred_id.to_string(),
                    metadata: json!({ "referred_id": referred_id }),
                },
                starting,
                now,
            )?
            .ok_or_else(|| LedgerError::Conflict("intro pool moved during referral".into()))?;

            if claim.claimed_micro <= 0 {
                return Ok(ReferralOutcome::Empty { referrer_id });
            }
            tx.execute(
                "UPDATE referrals SET credited = 1 WHERE referred_id = ?1",
                params![referred_id],
            )?;
            Ok(ReferralOutcome::Credited {
                referrer_id,
                claimed_micro: claim.claimed_micro,
            })
        })?;

        match &outcome {
            ReferralOutcome::Credited {
                referrer_id,
                claimed_micro,
            } => info!(
                referrer_id = %referrer_id,
                referred_id,
                claimed_micro,
                "referral credited"
            ),
            ReferralOutcome::Empty { referrer_id } => warn!(
                referrer_id = %referrer_id,
                referred_id,
                "referral recorded but intro pool is empty"
            ),
            ReferralOutcome::Invalid => debug!(referred_id, "invalid referral code"),
            ReferralOutcome::Already { .. } => debug!(referred_id, "referral already applied"),
        }
        Ok(outcome)
    }

    /// The referral link for a referred account, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn referral(&self, referred_id: &str) -> Result<Option<Referral>, ReferralError> {
        let conn = self.pool.ledger().store().conn();
        referral_for(&conn, referred_id)
    }
}

fn generate_code() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(REFERRAL_CODE_LEN)
        .map(char::from)
        .collect()
}

fn code_for_account(conn: &Connection, account_id: &str) -> Result<Option<String>, ReferralError> {
    Ok(conn
        .query_row(
            "SELECT code FROM referral_codes WHERE account_id = ?1",
            params![account_id],
            |row| row.get(0),
        )
        .optional()?)
}

fn account_for_code(conn: &Connection, code: &str) -> Result<Option<String>, ReferralError> {
    Ok(conn
        .query_row(
            "SELECT account_id FROM referral_codes WHERE code = ?1",
            params![code],
            |row| row.get(0),
        )
        .optional()?)
}

fn referral_for(conn: &Connection, referred_id: &str) -> Result<Option<Referral>, ReferralError> {
    Ok(conn
        .query_row(
            "SELECT referrer_id, referred_id, code, credited, created_at_ms
             FROM referrals WHERE referred_id = ?1",
            params![referred_id],
            |row| {
                Ok(Referral {
                    referrer_id: row.get(0)?,
                    referred_id: row.get(1)?,
                    code: row.get(2)?,
                    credited: row.get::<_, i64>(3)? != 0,
                    created_at_ms: row.get(4)?,
                })
            },
        )
        .optional()?)
}
