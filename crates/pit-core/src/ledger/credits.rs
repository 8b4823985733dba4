//! The credit ledger: holds, settlement, refunds and grants.
//!
//! Every public mutation is exactly one `BEGIN IMMEDIATE` transaction on the
//! shared store. Inside it, balance decreases go through a single
//! conditional `UPDATE .. WHERE balance_micro >= ?` and every transaction row
//! goes through the `(account_id, reference_id, kind)` unique key, so
//! concurrent callers on separate connections can neither overdraw an
//! account nor apply the same external event twice.

use std::sync::Arc;

use rusqlite::{Connection, OptionalExtension, Row, params};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use super::error::LedgerError;
use super::types::{
    AuditReport, GrantOutcome, LedgerTransaction, Preauthorization, ReleaseResult, Reservation,
    ReservationStatus, SettlementResult, TransactionKind,
};
use crate::clock::{Clock, SystemClock};
use crate::config::LedgerConfig;
use crate::store::CreditStore;

/// Reference id of the grant written when an account opens with a starting
/// balance.
pub const ACCOUNT_OPEN_REFERENCE: &str = "account-open";

const RESERVATION_COLUMNS: &str = "reservation_id, account_id, bout_id, amount_micro, status,
     actual_cost_micro, charged_micro, refund_micro, created_at_ms, resolved_at_ms";

/// Per-account credit ledger over a [`CreditStore`].
///
/// # Example
///
/// ```rust
/// use pit_core::config::LedgerConfig;
/// use pit_core::ledger::{CreditLedger, TransactionKind};
/// use pit_core::store::CreditStore;
///
/// # fn example() -> Result<(), pit_core::ledger::LedgerError> {
/// let store = CreditStore::in_memory()?;
/// let ledger = CreditLedger::new(store, LedgerConfig::default());
///
/// ledger.grant("user-1", 500, "evt-1", TransactionKind::Purchase)?;
/// let hold = ledger.preauthorize("user-1", "bout-1", 200)?;
/// let settled = ledger.settle(&hold.reservation.id, 150)?;
/// assert_eq!(settled.refund_micro, 50);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct CreditLedger {
    store: CreditStore,
    config: LedgerConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for CreditLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreditLedger")
            .field("store", &self.store)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl CreditLedger {
    /// Creates a ledger using the system clock.
    #[must_use]
    pub fn new(store: CreditStore, config: LedgerConfig) -> Self {
        Self::with_clock(store, config, Arc::new(SystemClock))
    }

    /// Creates a ledger with an explicit clock.
    #[must_use]
    pub fn with_clock(store: CreditStore, config: LedgerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            config,
            clock,
        }
    }

    /// The underlying store.
    #[must_use]
    pub const fn store(&self) -> &CreditStore {
        &self.store
    }

    /// The ledger configuration.
    #[must_use]
    pub const fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub(crate) fn now_ms(&self) -> i64 {
        self.clock.now_ms()
    }

    pub(crate) fn clock(&self) -> Arc<dyn Clock> {
        Arc::clone(&self.clock)
    }

    /// Creates the account if it does not exist and returns its balance.
    ///
    /// # Errors
    ///
    /// Returns a database error or `Conflict` if the store is contended.
    pub fn ensure_account(&self, account_id: &str) -> Result<i64, LedgerError> {
        let now = self.clock.now_ms();
        self.store.write(|tx| -> Result<_, LedgerError> {
            ensure_account_in(tx, account_id, self.config.starting_balance_micro, now)?;
            balance_in(tx, account_id)
        })
    }

    /// Places a hold of `estimated_cost_micro` against the account for one
    /// bout.
    ///
    /// Retrying with the same `(account_id, bout_id)` while the hold is open
    /// returns the existing reservation with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `estimated_cost_micro <= 0`
    /// - `InsufficientBalance` if the conditional deduction matched no row
    /// - `AlreadyReserved` if the bout's reservation is already terminal
    /// - `Conflict` if the store stayed locked past the busy timeout
    pub fn preauthorize(
        &self,
        account_id: &str,
        bout_id: &str,
        estimated_cost_micro: i64,
    ) -> Result<Preauthorization, LedgerError> {
        if estimated_cost_micro <= 0 {
            return Err(LedgerError::InvalidAmount {
                amount: estimated_cost_micro,
                reason: "preauthorization must be positive",
            });
        }
        let now = self.clock.now_ms();

        let outcome = self.store.write(|tx| -> Result<_, LedgerError> {
            ensure_account_in(tx, account_id, self.config.starting_balance_micro, now)?;

            if let Some(existing) = reservation_for_bout_in(tx, account_id, bout_id)? {
                if existing.status.is_terminal() {
                    return Err(LedgerError::AlreadyReserved {
                        bout_id: bout_id.to_string(),
                        reservation_id: existing.id,
                        status: existing.status,
                    });
                }
                let balance_micro = balance_in(tx, account_id)?;
                return Ok(Preauthorization {
                    reservation: existing,
                    balance_micro,
                    replayed: true,
                });
            }

            // Check and deduct in one statement.
            let deducted: Option<i64> = tx
                .query_row(
                    "UPDATE accounts
                     SET balance_micro = balance_micro - ?1, updated_at_ms = ?2
                     WHERE account_id = ?3 AND balance_micro >= ?1
                     RETURNING balance_micro",
                    params![estimated_cost_micro, now, account_id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(balance_micro) = deducted else {
                return Err(LedgerError::InsufficientBalance {
                    available: balance_in(tx, account_id)?,
                    required: estimated_cost_micro,
                });
            };

            let reservation = Reservation {
                id: format!("RSV-{}", uuid::Uuid::new_v4()),
                account_id: account_id.to_string(),
                bout_id: bout_id.to_string(),
                amount_micro: estimated_cost_micro,
                status: ReservationStatus::Held,
                actual_cost_micro: None,
                charged_micro: None,
                refund_micro: None,
                created_at_ms: now,
                resolved_at_ms: None,
            };
            tx.execute(
                "INSERT INTO reservations
                 (reservation_id, account_id, bout_id, amount_micro, status, created_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    reservation.id,
                    reservation.account_id,
                    reservation.bout_id,
                    reservation.amount_micro,
                    reservation.status.as_str(),
                    reservation.created_at_ms,
                ],
            )?;

            let metadata = json!({ "reservation_id": reservation.id });
            if !insert_transaction_in(
                tx,
                account_id,
                -estimated_cost_micro,
                TransactionKind::Preauth,
                bout_id,
                &metadata,
                now,
            )? {
                return Err(LedgerError::Conflict(format!(
                    "preauth transaction for bout {bout_id} exists without a reservation"
                )));
            }

            Ok(Preauthorization {
                reservation,
                balance_micro,
                replayed: false,
            })
        })?;

        if outcome.replayed {
            debug!(
                account_id,
                bout_id,
                reservation_id = %outcome.reservation.id,
                "preauthorization replayed"
            );
        } else {
            info!(
                account_id,
                bout_id,
                reservation_id = %outcome.reservation.id,
                amount_micro = estimated_cost_micro,
                balance_micro = outcome.balance_micro,
                "credits preauthorized"
            );
        }
        Ok(outcome)
    }

    /// Finalizes a held reservation with the bout's actual cost.
    ///
    /// The charge is capped at the original hold; any overage is absorbed
    /// by the platform and reported in `overage_micro`. Calling this on a
    /// reservation that is already terminal writes nothing and returns the
    /// recorded outcome with `replayed = true`.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `actual_cost_micro < 0`
    /// - `NotFound` if the reservation does not exist
    /// - `Conflict` if the guarded status transition matched no row
    pub fn settle(
        &self,
        reservation_id: &str,
        actual_cost_micro: i64,
    ) -> Result<SettlementResult, LedgerError> {
        if actual_cost_micro < 0 {
            return Err(LedgerError::InvalidAmount {
                amount: actual_cost_micro,
                reason: "actual cost cannot be negative",
            });
        }
        let now = self.clock.now_ms();

        let result = self.store.write(|tx| -> Result<_, LedgerError> {
            let reservation = require_reservation_in(tx, reservation_id)?;
            match reservation.status {
                ReservationStatus::Held => {},
                ReservationStatus::Settled => {
                    let charged_micro = reservation.charged_micro.unwrap_or(0);
                    return Ok(SettlementResult {
                        reservation_id: reservation.id,
                        status: ReservationStatus::Settled,
                        charged_micro,
                        refund_micro: reservation.refund_micro.unwrap_or(0),
                        overage_micro: reservation
                            .actual_cost_micro
                            .map_or(0, |actual| (actual - charged_micro).max(0)),
                        balance_micro: balance_in(tx, &reservation.account_id)?,
                        replayed: true,
                    });
                },
                ReservationStatus::Released => {
                    return Ok(SettlementResult {
                        reservation_id: reservation.id,
                        status: ReservationStatus::Released,
                        charged_micro: 0,
                        refund_micro: reservation
                            .refund_micro
                            .unwrap_or(reservation.amount_micro),
                        overage_micro: 0,
                        balance_micro: balance_in(tx, &reservation.account_id)?,
                        replayed: true,
                    });
                },
            }

            let charged_micro = actual_cost_micro.min(reservation.amount_micro);
            let refund_micro = reservation.amount_micro - charged_micro;
            let overage_micro = actual_cost_micro - charged_micro;

            let updated = tx.execute(
                "UPDATE reservations
                 SET status = 'settled', actual_cost_micro = ?1, charged_micro = ?2,
                     refund_micro = ?3, resolved_at_ms = ?4
                 WHERE reservation_id = ?5 AND status = 'held'",
                params![
                    actual_cost_micro,
                    charged_micro,
                    refund_micro,
                    now,
                    reservation.id
                ],
            )?;
            if updated != 1 {
                return Err(LedgerError::Conflict(format!(
                    "reservation {} left the held state during settlement",
                    reservation.id
                )));
            }

            let metadata = json!({
                "reservation_id": reservation.id,
                "held_micro": reservation.amount_micro,
                "actual_cost_micro": actual_cost_micro,
                "charged_micro": charged_micro,
                "overage_micro": overage_micro,
            });
            insert_transaction_in(
                tx,
                &reservation.account_id,
                0,
                TransactionKind::Settle,
                &reservation.bout_id,
                &metadata,
                now,
            )?;

            let balance_micro = if refund_micro > 0 {
                refund_in(tx, &reservation, refund_micro, "settlement", now)?
            } else {
                balance_in(tx, &reservation.account_id)?
            };

            Ok(SettlementResult {
                reservation_id: reservation.id,
                status: ReservationStatus::Settled,
                charged_micro,
                refund_micro,
                overage_micro,
                balance_micro,
                replayed: false,
            })
        })?;

        if result.replayed {
            debug!(
                reservation_id,
                status = %result.status,
                "settlement replayed on terminal reservation"
            );
        } else {
            info!(
                reservation_id,
                charged_micro = result.charged_micro,
                refund_micro = result.refund_micro,
                balance_micro = result.balance_micro,
                "reservation settled"
            );
            if result.overage_micro > 0 {
                warn!(
                    reservation_id,
                    overage_micro = result.overage_micro,
                    "actual cost exceeded hold; overage absorbed"
                );
            }
        }
        Ok(result)
    }

    /// Returns the full hold of an unresolved reservation.
    ///
    /// Idempotent: a terminal reservation is left alone and reported with
    /// `replayed = true`.
    ///
    /// # Errors
    ///
    /// - `NotFound` if the reservation does not exist
    /// - `Conflict` if the guarded status transition matched no row
    pub fn release(&self, reservation_id: &str) -> Result<ReleaseResult, LedgerError> {
        let now = self.clock.now_ms();

        let result = self.store.write(|tx| -> Result<_, LedgerError> {
            let reservation = require_reservation_in(tx, reservation_id)?;
            if reservation.status.is_terminal() {
                return Ok(ReleaseResult {
                    reservation_id: reservation.id,
                    status: reservation.status,
                    refund_micro: reservation.refund_micro.unwrap_or(0),
                    balance_micro: balance_in(tx, &reservation.account_id)?,
                    replayed: true,
                });
            }

            let updated = tx.execute(
                "UPDATE reservations
                 SET status = 'released', actual_cost_micro = 0, charged_micro = 0,
                     refund_micro = amount_micro, resolved_at_ms = ?1
                 WHERE reservation_id = ?2 AND status = 'held'",
                params![now, reservation.id],
            )?;
            if updated != 1 {
                return Err(LedgerError::Conflict(format!(
                    "reservation {} left the held state during release",
                    reservation.id
                )));
            }

            let balance_micro =
                refund_in(tx, &reservation, reservation.amount_micro, "release", now)?;
            Ok(ReleaseResult {
                reservation_id: reservation.id,
                status: ReservationStatus::Released,
                refund_micro: reservation.amount_micro,
                balance_micro,
                replayed: false,
            })
        })?;

        if !result.replayed {
            info!(
                reservation_id,
                refund_micro = result.refund_micro,
                balance_micro = result.balance_micro,
                "reservation released"
            );
        }
        Ok(result)
    }

    /// Credits an account once per `(account_id, reference_id, kind)`.
    ///
    /// A repeated call with the same key returns [`GrantOutcome::Duplicate`]
    /// and leaves the balance untouched. This is the replay guard for
    /// payment webhooks.
    ///
    /// # Errors
    ///
    /// - `InvalidAmount` if `amount_micro <= 0`
    /// - `InvalidKind` for preauth, settle and refund
    pub fn grant(
        &self,
        account_id: &str,
        amount_micro: i64,
        reference_id: &str,
        kind: TransactionKind,
    ) -> Result<GrantOutcome, LedgerError> {
        self.grant_with_metadata(account_id, amount_micro, reference_id, kind, &Value::Null)
    }

    /// [`grant`](Self::grant) with metadata stored on the transaction.
    ///
    /// # Errors
    ///
    /// See [`grant`](Self::grant).
    pub fn grant_with_metadata(
        &self,
        account_id: &str,
        amount_micro: i64,
        reference_id: &str,
        kind: TransactionKind,
        metadata: &Value,
    ) -> Result<GrantOutcome, LedgerError> {
        validate_grant(amount_micro, kind)?;
        let now = self.clock.now_ms();
        let starting = self.config.starting_balance_micro;

        let outcome = self.store.write(|tx| -> Result<_, LedgerError> {
            apply_grant_in(
                tx,
                account_id,
                amount_micro,
                reference_id,
                kind,
                metadata,
                starting,
                now,
            )
        })?;

        match outcome {
            GrantOutcome::Applied { balance_micro } => info!(
                account_id,
                reference_id,
                kind = %kind,
                amount_micro,
                balance_micro,
                "credits granted"
            ),
            GrantOutcome::Duplicate => debug!(
                account_id,
                reference_id,
                kind = %kind,
                "duplicate grant ignored"
            ),
        }
        Ok(outcome)
    }

    /// Current balance of an existing account.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if the account has never been created.
    pub fn balance(&self, account_id: &str) -> Result<i64, LedgerError> {
        let conn = self.store.conn();
        balance_in(&conn, account_id)
    }

    /// Most recent transactions for an account, newest first.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row cannot be decoded.
    pub fn transactions(
        &self,
        account_id: &str,
        limit: u32,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let conn = self.store.conn();
        let mut stmt = conn.prepare(
            "SELECT txn_id, account_id, delta_micro, kind, reference_id, metadata, created_at_ms
             FROM credit_transactions
             WHERE account_id = ?1
             ORDER BY txn_id DESC
             LIMIT ?2",
        )?;
        let rows = stmt
            .query_map(params![account_id, limit], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, i64>(6)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter()
            .map(
                |(id, account_id, delta_micro, kind, reference_id, metadata, created_at_ms)| {
                    Ok(LedgerTransaction {
                        id,
                        account_id,
                        delta_micro,
                        kind: kind.parse().map_err(LedgerError::Corrupt)?,
                        reference_id,
                        metadata,
                        created_at_ms,
                    })
                },
            )
            .collect()
    }

    /// Looks up a reservation by id.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no reservation has that id.
    pub fn reservation(&self, reservation_id: &str) -> Result<Reservation, LedgerError> {
        let conn = self.store.conn();
        require_reservation_in(&conn, reservation_id)
    }

    /// Looks up the reservation for a bout, if one was ever taken.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn reservation_for_bout(
        &self,
        account_id: &str,
        bout_id: &str,
    ) -> Result<Option<Reservation>, LedgerError> {
        let conn = self.store.conn();
        reservation_for_bout_in(&conn, account_id, bout_id)
    }

    /// Compares the running balance with the sum of the transaction log.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown accounts.
    pub fn audit(&self, account_id: &str) -> Result<AuditReport, LedgerError> {
        let conn = self.store.conn();
        let balance_micro = balance_in(&conn, account_id)?;
        let (ledger_sum_micro, transaction_count): (i64, i64) = conn.query_row(
            "SELECT COALESCE(SUM(delta_micro), 0), COUNT(*)
             FROM credit_transactions WHERE account_id = ?1",
            params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        let held_micro: i64 = conn.query_row(
            "SELECT COALESCE(SUM(amount_micro), 0)
             FROM reservations WHERE account_id = ?1 AND status = 'held'",
            params![account_id],
            |row| row.get(0),
        )?;

        let report = AuditReport {
            balance_micro,
            ledger_sum_micro,
            transaction_count,
            held_micro,
        };
        if !report.is_consistent() {
            warn!(
                account_id,
                balance_micro, ledger_sum_micro, "ledger audit mismatch"
            );
        }
        Ok(report)
    }
}

pub(crate) const fn validate_grant(
    amount_micro: i64,
    kind: TransactionKind,
) -> Result<(), LedgerError> {
    if amount_micro <= 0 {
        return Err(LedgerError::InvalidAmount {
            amount: amount_micro,
            reason: "grant must be positive",
        });
    }
    if !kind.is_crediting() {
        return Err(LedgerError::InvalidKind {
            kind,
            operation: "grant",
        });
    }
    Ok(())
}

/// Creates the account row if missing. Returns `true` if it was created.
pub(crate) fn ensure_account_in(
    conn: &Connection,
    account_id: &str,
    starting_balance_micro: i64,
    now: i64,
) -> Result<bool, LedgerError> {
    let created = conn.execute(
        "INSERT INTO accounts (account_id, balance_micro, created_at_ms, updated_at_ms)
         VALUES (?1, ?2, ?3, ?3)
         ON CONFLICT(account_id) DO NOTHING",
        params![account_id, starting_balance_micro, now],
    )? == 1;

    if created && starting_balance_micro > 0 {
        insert_transaction_in(
            conn,
            account_id,
            starting_balance_micro,
            TransactionKind::Grant,
            ACCOUNT_OPEN_REFERENCE,
            &json!({ "reason": "starting_balance" }),
            now,
        )?;
    }
    if created {
        debug!(account_id, starting_balance_micro, "credit account opened");
    }
    Ok(created)
}

/// Inserts a transaction row. Returns `false` if the
/// `(account_id, reference_id, kind)` key already exists.
pub(crate) fn insert_transaction_in(
    conn: &Connection,
    account_id: &str,
    delta_micro: i64,
    kind: TransactionKind,
    reference_id: &str,
    metadata: &Value,
    now: i64,
) -> Result<bool, LedgerError> {
    let metadata = if metadata.is_null() {
        "{}".to_string()
    } else {
        serde_json::to_string(metadata)?
    };
    let inserted = conn.execute(
        "INSERT INTO credit_transactions
         (account_id, delta_micro, kind, reference_id, metadata, created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(account_id, reference_id, kind) DO NOTHING",
        params![
            account_id,
            delta_micro,
            kind.as_str(),
            reference_id,
            metadata,
            now
        ],
    )?;
    Ok(inserted == 1)
}

/// Delta of an existing transaction, used to answer replays.
pub(crate) fn existing_delta_in(
    conn: &Connection,
    account_id: &str,
    reference_id: &str,
    kind: TransactionKind,
) -> Result<Option<i64>, LedgerError> {
    Ok(conn
        .query_row(
            "SELECT delta_micro FROM credit_transactions
             WHERE account_id = ?1 AND reference_id = ?2 AND kind = ?3",
            params![account_id, reference_id, kind.as_str()],
            |row| row.get(0),
        )
        .optional()?)
}

/// Adds `amount_micro` to the running balance and returns the new total.
///
/// A credit that would overflow `i64` is `InvalidAmount`; `SQLite` would
/// otherwise promote the sum to REAL.
pub(crate) fn credit_balance_in(
    conn: &Connection,
    account_id: &str,
    amount_micro: i64,
    now: i64,
) -> Result<i64, LedgerError> {
    let current = balance_in(conn, account_id)?;
    let balance_micro =
        current
            .checked_add(amount_micro)
            .ok_or(LedgerError::InvalidAmount {
                amount: amount_micro,
                reason: "credit would overflow the balance",
            })?;
    conn.execute(
        "UPDATE accounts SET balance_micro = ?1, updated_at_ms = ?2 WHERE account_id = ?3",
        params![balance_micro, now, account_id],
    )?;
    Ok(balance_micro)
}

/// Ensures the account, records a crediting transaction and applies it.
/// Must run inside a write transaction.
#[allow(clippy::too_many_arguments)]
pub(crate) fn apply_grant_in(
    conn: &Connection,
    account_id: &str,
    amount_micro: i64,
    reference_id: &str,
    kind: TransactionKind,
    metadata: &Value,
    starting_balance_micro: i64,
    now: i64,
) -> Result<GrantOutcome, LedgerError> {
    ensure_account_in(conn, account_id, starting_balance_micro, now)?;
    if !insert_transaction_in(
        conn,
        account_id,
        amount_micro,
        kind,
        reference_id,
        metadata,
        now,
    )? {
        return Ok(GrantOutcome::Duplicate);
    }
    let balance_micro = credit_balance_in(conn, account_id, amount_micro, now)?;
    Ok(GrantOutcome::Applied { balance_micro })
}

fn refund_in(
    conn: &Connection,
    reservation: &Reservation,
    refund_micro: i64,
    reason: &str,
    now: i64,
) -> Result<i64, LedgerError> {
    let metadata = json!({ "reservation_id": reservation.id, "reason": reason });
    if !insert_transaction_in(
        conn,
        &reservation.account_id,
        refund_micro,
        TransactionKind::Refund,
        &reservation.bout_id,
        &metadata,
        now,
    )? {
        return Err(LedgerError::Conflict(format!(
            "refund for bout {} already recorded",
            reservation.bout_id
        )));
    }
    credit_balance_in(conn, &reservation.account_id, refund_micro, now)
}

pub(crate) fn balance_in(conn: &Connection, account_id: &str) -> Result<i64, LedgerError> {
    conn.query_row(
        "SELECT balance_micro FROM accounts WHERE account_id = ?1",
        params![account_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| LedgerError::NotFound {
        entity: "account",
        id: account_id.to_string(),
    })
}

fn reservation_from_row(row: &Row<'_>) -> rusqlite::Result<(Reservation, String)> {
    let status: String = row.get(4)?;
    Ok((
        Reservation {
            id: row.get(0)?,
            account_id: row.get(1)?,
            bout_id: row.get(2)?,
            amount_micro: row.get(3)?,
            // Placeholder until the status string is validated below.
            status: ReservationStatus::Held,
            actual_cost_micro: row.get(5)?,
            charged_micro: row.get(6)?,
            refund_micro: row.get(7)?,
            created_at_ms: row.get(8)?,
            resolved_at_ms: row.get(9)?,
        },
        status,
    ))
}

fn finish_reservation(
    raw: Option<(Reservation, String)>,
) -> Result<Option<Reservation>, LedgerError> {
    raw.map(|(mut reservation, status)| {
        reservation.status = status.parse().map_err(LedgerError::Corrupt)?;
        Ok(reservation)
    })
    .transpose()
}

fn reservation_in(
    conn: &Connection,
    reservation_id: &str,
) -> Result<Option<Reservation>, LedgerError> {
    let raw = conn
        .query_row(
            &format!("SELECT {RESERVATION_COLUMNS} FROM reservations WHERE reservation_id = ?1"),
            params![reservation_id],
            reservation_from_row,
        )
        .optional()?;
    finish_reservation(raw)
}

fn require_reservation_in(
    conn: &Connection,
    reservation_id: &str,
) -> Result<Reservation, LedgerError> {
    reservation_in(conn, reservation_id)?.ok_or_else(|| LedgerError::NotFound {
        entity: "reservation",
        id: reservation_id.to_string(),
    })
}

fn reservation_for_bout_in(
    conn: &Connection,
    account_id: &str,
    bout_id: &str,
) -> Result<Option<Reservation>, LedgerError> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {RESERVATION_COLUMNS} FROM reservations
                 WHERE account_id = ?1 AND bout_id = ?2"
            ),
            params![account_id, bout_id],
            reservation_from_row,
        )
        .optional()?;
    finish_reservation(raw)
}
