//! Bout metering: hold credits before generation, settle after.
//!
//! ```text
//!   start ──► preauthorize (hold estimate)
//!     │
//!     │   generation runs here, outside any transaction
//!     ▼
//!   complete(actual) ──► settle        fail() ──► release
//!                 └─ drop without either ──► release (best effort)
//! ```
//!
//! A [`MeteredBout`] resolves its reservation exactly once. The ledger's
//! terminal-state guard makes a late or repeated resolution a replayed
//! no-op, so a cancellation racing a completion cannot double-refund.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::ledger::{CreditLedger, LedgerError, ReleaseResult, Reservation, SettlementResult};
use crate::pricing::{PricingConfig, PricingError, TokenUsage};

/// Errors from metered bouts.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum BoutError {
    /// The bout's model cannot be priced.
    #[error(transparent)]
    Pricing(#[from] PricingError),

    /// The ledger rejected the hold or its resolution.
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

/// What a bout will run, used to size the hold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoutPlan {
    /// Number of turns.
    pub turns: u32,
    /// Model id, or `byok`.
    pub model_id: String,
    /// Override of the configured completion tokens per turn.
    #[serde(default)]
    pub output_tokens_per_turn: Option<u32>,
}

impl BoutPlan {
    /// Estimated cost in micro-credits.
    ///
    /// # Errors
    ///
    /// Returns [`PricingError::UnknownModel`] for unpriced models.
    pub fn estimate_micro(&self, pricing: &PricingConfig) -> Result<i64, PricingError> {
        pricing.estimate_bout_cost_micro(self.turns, &self.model_id, self.output_tokens_per_turn)
    }
}

/// A preauthorized bout that releases its hold unless resolved.
#[derive(Debug)]
pub struct MeteredBout {
    ledger: CreditLedger,
    reservation: Reservation,
    replayed: bool,
    resolved: bool,
}

impl MeteredBout {
    /// Holds `estimated_cost_micro` from `account_id` for `bout_id`.
    ///
    /// Restarting a bout whose hold is still open reuses that hold.
    ///
    /// # Errors
    ///
    /// Propagates the ledger's preauthorization errors, notably
    /// `InsufficientBalance` and `AlreadyReserved`.
    pub fn start(
        ledger: &CreditLedger,
        account_id: &str,
        bout_id: &str,
        estimated_cost_micro: i64,
    ) -> Result<Self, LedgerError> {
        let preauth = ledger.preauthorize(account_id, bout_id, estimated_cost_micro)?;
        debug!(
            account_id,
            bout_id,
            reservation_id = %preauth.reservation.id,
            amount_micro = preauth.reservation.amount_micro,
            replayed = preauth.replayed,
            "bout metering started"
        );
        Ok(Self {
            ledger: ledger.clone(),
            reservation: preauth.reservation,
            replayed: preauth.replayed,
            resolved: false,
        })
    }

    /// Prices `plan` and holds the estimate.
    ///
    /// # Errors
    ///
    /// Returns `Pricing` for an unpriced model, otherwise as
    /// [`start`](Self::start).
    pub fn start_planned(
        ledger: &CreditLedger,
        pricing: &PricingConfig,
        account_id: &str,
        bout_id: &str,
        plan: &BoutPlan,
    ) -> Result<Self, BoutError> {
        let estimate = plan.estimate_micro(pricing)?;
        Ok(Self::start(ledger, account_id, bout_id, estimate)?)
    }

    /// The held reservation.
    #[must_use]
    pub const fn reservation(&self) -> &Reservation {
        &self.reservation
    }

    /// `true` when `start` picked up an existing hold.
    #[must_use]
    pub const fn replayed(&self) -> bool {
        self.replayed
    }

    /// `true` once settled or released.
    #[must_use]
    pub const fn is_resolved(&self) -> bool {
        self.resolved
    }

    /// Settles at `actual_cost_micro`. The guard stays unresolved on error,
    /// so the call may be retried; dropping it then releases the hold.
    ///
    /// # Errors
    ///
    /// Propagates settlement errors.
    pub fn complete(&mut self, actual_cost_micro: i64) -> Result<SettlementResult, LedgerError> {
        let result = self.ledger.settle(&self.reservation.id, actual_cost_micro)?;
        self.resolved = true;
        Ok(result)
    }

    /// Prices the measured `usage` and settles.
    ///
    /// # Errors
    ///
    /// Returns `Pricing` for an unpriced model, otherwise as
    /// [`complete`](Self::complete).
    pub fn complete_with_usage(
        &mut self,
        pricing: &PricingConfig,
        usage: TokenUsage,
        model_id: &str,
    ) -> Result<SettlementResult, BoutError> {
        let actual = pricing.compute_cost_micro(usage, model_id)?;
        Ok(self.complete(actual)?)
    }

    /// Releases the full hold after a failed generation.
    ///
    /// # Errors
    ///
    /// Propagates release errors.
    pub fn fail(&mut self) -> Result<ReleaseResult, LedgerError> {
        let result = self.ledger.release(&self.reservation.id)?;
        self.resolved = true;
        Ok(result)
    }
}

impl Drop for MeteredBout {
    fn drop(&mut self) {
        if self.resolved {
            return;
        }
        match self.ledger.release(&self.reservation.id) {
            Ok(result) => warn!(
                reservation_id = %self.reservation.id,
                bout_id = %self.reservation.bout_id,
                refund_micro = result.refund_micro,
                "unresolved bout released"
            ),
            Err(e) => warn!(
                reservation_id = %self.reservation.id,
                bout_id = %self.reservation.bout_id,
                error = %e,
                "failed to release unresolved bout"
            ),
        }
    }
}
