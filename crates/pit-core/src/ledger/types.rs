//! Ledger record types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What a ledger transaction records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    /// Pessimistic hold taken when a bout starts.
    Preauth,
    /// Consumption of a hold when a bout completes.
    Settle,
    /// Return of unused held credits.
    Refund,
    /// Admin or account-opening grant.
    Grant,
    /// One-off credit pack purchase.
    Purchase,
    /// Recurring subscription allowance.
    Subscription,
    /// Referral bonus paid from the intro pool.
    Referral,
    /// Intro bonus paid from the intro pool.
    Intro,
}

impl TransactionKind {
    /// All kinds, in storage order.
    pub const ALL: [Self; 8] = [
        Self::Preauth,
        Self::Settle,
        Self::Refund,
        Self::Grant,
        Self::Purchase,
        Self::Subscription,
        Self::Referral,
        Self::Intro,
    ];

    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Preauth => "preauth",
            Self::Settle => "settle",
            Self::Refund => "refund",
            Self::Grant => "grant",
            Self::Purchase => "purchase",
            Self::Subscription => "subscription",
            Self::Referral => "referral",
            Self::Intro => "intro",
        }
    }

    /// Kinds that [`CreditLedger::grant`](super::CreditLedger::grant) accepts.
    ///
    /// Preauth, settle and refund are written only by the reservation
    /// lifecycle.
    #[must_use]
    pub const fn is_crediting(self) -> bool {
        matches!(
            self,
            Self::Grant | Self::Purchase | Self::Subscription | Self::Referral | Self::Intro
        )
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown transaction kind '{s}'"))
    }
}

/// Lifecycle state of a reservation.
///
/// `Settled` and `Released` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReservationStatus {
    /// Credits are held against the balance.
    Held,
    /// Final cost deducted, any difference refunded.
    Settled,
    /// Full amount returned.
    Released,
}

impl ReservationStatus {
    /// Stored string form.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Held => "held",
            Self::Settled => "settled",
            Self::Released => "released",
        }
    }

    /// Whether no further transition is possible.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Held)
    }
}

impl fmt::Display for ReservationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReservationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "held" => Ok(Self::Held),
            "settled" => Ok(Self::Settled),
            "released" => Ok(Self::Released),
            other => Err(format!("unknown reservation status '{other}'")),
        }
    }
}

/// A hold against an account for one in-flight bout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reservation {
    /// Reservation identifier (`RSV-<uuid>`).
    pub id: String,
    /// Account the hold is against.
    pub account_id: String,
    /// Bout the hold pays for.
    pub bout_id: String,
    /// Held amount (the estimated maximum cost).
    pub amount_micro: i64,
    /// Current lifecycle state.
    pub status: ReservationStatus,
    /// Actual cost reported at settlement.
    pub actual_cost_micro: Option<i64>,
    /// Amount kept by the platform at settlement.
    pub charged_micro: Option<i64>,
    /// Amount returned to the account at settlement or release.
    pub refund_micro: Option<i64>,
    /// Creation time (Unix ms).
    pub created_at_ms: i64,
    /// Time the reservation reached a terminal state (Unix ms).
    pub resolved_at_ms: Option<i64>,
}

/// One immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    /// Monotonic row id.
    pub id: i64,
    /// Account the delta applies to.
    pub account_id: String,
    /// Signed change to the balance.
    pub delta_micro: i64,
    /// What the entry records.
    pub kind: TransactionKind,
    /// Idempotency key (bout id, webhook event id, referral key).
    pub reference_id: String,
    /// Canonical JSON metadata.
    pub metadata: String,
    /// Creation time (Unix ms).
    pub created_at_ms: i64,
}

/// Result of [`CreditLedger::preauthorize`](super::CreditLedger::preauthorize).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Preauthorization {
    /// The held reservation.
    pub reservation: Reservation,
    /// Balance after the hold.
    pub balance_micro: i64,
    /// `true` when an existing hold for the same bout was returned.
    pub replayed: bool,
}

/// Result of [`CreditLedger::settle`](super::CreditLedger::settle).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SettlementResult {
    /// The settled reservation.
    pub reservation_id: String,
    /// Final status (`Released` if a release won the race).
    pub status: ReservationStatus,
    /// Amount kept, at most the original hold.
    pub charged_micro: i64,
    /// Amount returned to the account.
    pub refund_micro: i64,
    /// Cost above the hold that was absorbed by the platform.
    pub overage_micro: i64,
    /// Balance after settlement.
    pub balance_micro: i64,
    /// `true` when the reservation was already terminal and nothing was
    /// written.
    pub replayed: bool,
}

/// Result of [`CreditLedger::release`](super::CreditLedger::release).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseResult {
    /// The released reservation.
    pub reservation_id: String,
    /// Final status (`Settled` if a settlement won the race).
    pub status: ReservationStatus,
    /// Amount returned by this call or by the winning call.
    pub refund_micro: i64,
    /// Balance after release.
    pub balance_micro: i64,
    /// `true` when the reservation was already terminal.
    pub replayed: bool,
}

/// Result of [`CreditLedger::grant`](super::CreditLedger::grant).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrantOutcome {
    /// The grant was recorded and the balance credited.
    Applied {
        /// Balance after the grant.
        balance_micro: i64,
    },
    /// A transaction with the same reference and kind already exists.
    Duplicate,
}

impl GrantOutcome {
    /// Whether this call changed the balance.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// Consistency check between the running balance and the transaction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AuditReport {
    /// Denormalized running total.
    pub balance_micro: i64,
    /// Sum of every transaction delta.
    pub ledger_sum_micro: i64,
    /// Number of transactions.
    pub transaction_count: i64,
    /// Sum of amounts currently held by open reservations.
    pub held_micro: i64,
}

impl AuditReport {
    /// Whether the running total matches the log.
    #[must_use]
    pub const fn is_consistent(&self) -> bool {
        self.balance_micro == self.ledger_sum_micro
    }
}
