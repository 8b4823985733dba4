//! Global daily cap on free-tier bouts.
//!
//! One row per UTC date tracks how many free bouts ran and how much they
//! cost the platform. A bout may start only while both the count and the
//! spend stay within the day's caps; the check and the increment are a
//! single conditional `UPDATE`, so concurrent starts never overshoot.
//!
//! Caps are copied into the row when the day is first touched. Changing the
//! configuration takes effect from the next day.

use std::sync::Arc;

use chrono::{DateTime, NaiveDate};
use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::clock::Clock;
use crate::ledger::{CreditLedger, LedgerError};
use crate::store::CreditStore;

/// Pool settings, the `[free_pool]` section of the configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct FreePoolConfig {
    /// Free bouts allowed per UTC day.
    #[serde(default = "default_max_daily")]
    pub max_daily: u32,

    /// Platform spend allowed per UTC day.
    #[serde(default = "default_spend_cap_micro")]
    pub spend_cap_micro: i64,
}

impl Default for FreePoolConfig {
    fn default() -> Self {
        Self {
            max_daily: default_max_daily(),
            spend_cap_micro: default_spend_cap_micro(),
        }
    }
}

const fn default_max_daily() -> u32 {
    500
}

const fn default_spend_cap_micro() -> i64 {
    // 20 GBP at the default credit value.
    200_000
}

/// One day of the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreePoolStatus {
    /// UTC date.
    pub date: NaiveDate,
    /// Free bouts started.
    pub used: u32,
    /// Daily bout cap.
    pub max: u32,
    /// Bouts left today.
    pub remaining: u32,
    /// Spend recorded so far.
    pub spend_micro: i64,
    /// Daily spend cap.
    pub spend_cap_micro: i64,
    /// `true` when no further free bout can start today.
    pub exhausted: bool,
}

/// Result of [`FreeBoutPool::consume`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FreeBoutDraw {
    /// Whether the bout may run.
    pub consumed: bool,
    /// The day after the attempt.
    pub status: FreePoolStatus,
}

/// Handle to the daily pool rows.
#[derive(Clone)]
pub struct FreeBoutPool {
    store: CreditStore,
    config: FreePoolConfig,
    clock: Arc<dyn Clock>,
}

impl std::fmt::Debug for FreeBoutPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FreeBoutPool")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FreeBoutPool {
    /// Creates a handle sharing the ledger's store and clock.
    #[must_use]
    pub fn new(ledger: &CreditLedger, config: FreePoolConfig) -> Self {
        Self {
            store: ledger.store().clone(),
            config,
            clock: ledger.clock(),
        }
    }

    /// The pool settings.
    #[must_use]
    pub const fn config(&self) -> &FreePoolConfig {
        &self.config
    }

    /// Today's UTC date according to the pool's clock.
    #[must_use]
    pub fn today(&self) -> NaiveDate {
        utc_date(self.clock.now_ms())
    }

    /// Status for `date`. A day nobody touched reports the configured caps
    /// and nothing used; reading never creates the row.
    ///
    /// # Errors
    ///
    /// Returns a database error if the row cannot be read.
    pub fn status(&self, date: NaiveDate) -> Result<FreePoolStatus, LedgerError> {
        let conn = self.store.conn();
        Ok(load_day(&conn, date)?.unwrap_or_else(|| self.empty_day(date)))
    }

    /// Starts one free bout on `date` expected to cost `spend_micro`.
    ///
    /// Succeeds only if `used < max_daily` and the spend stays within the
    /// cap; otherwise nothing is written and `consumed` is `false`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidAmount` for a negative spend, or `Conflict` if the
    /// store is contended.
    pub fn consume(&self, date: NaiveDate, spend_micro: i64) -> Result<FreeBoutDraw, LedgerError> {
        if spend_micro < 0 {
            return Err(LedgerError::InvalidAmount {
                amount: spend_micro,
                reason: "free bout spend cannot be negative",
            });
        }
        let now = self.clock.now_ms();
        let day = date.to_string();

        let draw = self.store.write(|tx| -> Result<_, LedgerError> {
            tx.execute(
                "INSERT INTO free_bout_pool
                 (pool_date, used, max_daily, spend_micro, spend_cap_micro, updated_at_ms)
                 VALUES (?1, 0, ?2, 0, ?3, ?4)
                 ON CONFLICT(pool_date) DO NOTHING",
                params![day, self.config.max_daily, self.config.spend_cap_micro, now],
            )?;
            let consumed = tx.execute(
                "UPDATE free_bout_pool
                 SET used = used + 1, spend_micro = spend_micro + ?2, updated_at_ms = ?3
                 WHERE pool_date = ?1
                   AND used < max_daily
                   AND spend_micro + ?2 <= spend_cap_micro",
                params![day, spend_micro, now],
            )? == 1;
            let status = load_day(tx, date)?.unwrap_or_else(|| self.empty_day(date));
            Ok(FreeBoutDraw { consumed, status })
        })?;

        if draw.consumed {
            debug!(
                date = %date,
                used = draw.status.used,
                spend_micro = draw.status.spend_micro,
                "free bout consumed"
            );
        } else {
            info!(
                date = %date,
                used = draw.status.used,
                spend_micro = draw.status.spend_micro,
                requested_spend_micro = spend_micro,
                "free bout pool exhausted"
            );
        }
        Ok(draw)
    }

    /// [`consume`](Self::consume) on today's date.
    ///
    /// # Errors
    ///
    /// See [`consume`](Self::consume).
    pub fn consume_today(&self, spend_micro: i64) -> Result<FreeBoutDraw, LedgerError> {
        self.consume(self.today(), spend_micro)
    }

    /// Adjusts the recorded spend for `date` once a bout's real cost is
    /// known. A negative delta returns an overestimate; the spend never
    /// drops below zero. A positive delta may push the day past its cap.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` if no bout was consumed on `date`.
    pub fn settle_spend(&self, date: NaiveDate, delta_micro: i64) -> Result<(), LedgerError> {
        if delta_micro == 0 {
            return Ok(());
        }
        let now = self.clock.now_ms();
        let day = date.to_string();
        self.store.write(|tx| -> Result<_, LedgerError> {
            let updated = tx.execute(
                "UPDATE free_bout_pool
                 SET spend_micro = MAX(0, spend_micro + ?2), updated_at_ms = ?3
                 WHERE pool_date = ?1",
                params![day, delta_micro, now],
            )?;
            if updated == 0 {
                return Err(LedgerError::NotFound {
                    entity: "free pool day",
                    id: day.clone(),
                });
            }
            Ok(())
        })?;
        debug!(date = %date, delta_micro, "free pool spend settled");
        Ok(())
    }

    fn empty_day(&self, date: NaiveDate) -> FreePoolStatus {
        status_from(
            date,
            0,
            self.config.max_daily,
            0,
            self.config.spend_cap_micro,
        )
    }
}

/// UTC calendar date of a Unix-millisecond timestamp.
#[must_use]
pub fn utc_date(now_ms: i64) -> NaiveDate {
    DateTime::from_timestamp_millis(now_ms)
        .map(|t| t.date_naive())
        .unwrap_or_default()
}

fn status_from(
    date: NaiveDate,
    used: u32,
    max: u32,
    spend_micro: i64,
    spend_cap_micro: i64,
) -> FreePoolStatus {
    let remaining = max.saturating_sub(used);
    FreePoolStatus {
        date,
        used,
        max,
        remaining,
        spend_micro,
        spend_cap_micro,
        exhausted: remaining == 0 || spend_micro >= spend_cap_micro,
    }
}

fn load_day(conn: &Connection, date: NaiveDate) -> Result<Option<FreePoolStatus>, LedgerError> {
    let row = conn
        .query_row(
            "SELECT used, max_daily, spend_micro, spend_cap_micro
             FROM free_bout_pool WHERE pool_date = ?1",
            params![date.to_string()],
            |row| {
                Ok((
                    row.get::<_, u32>(0)?,
                    row.get::<_, u32>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )
        .optional()?;
    Ok(row.map(|(used, max, spend, cap)| status_from(date, used, max, spend, cap)))
}
