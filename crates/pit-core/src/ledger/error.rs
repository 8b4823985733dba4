//! Error types for the credit ledger.

use thiserror::Error;

use super::types::{ReservationStatus, TransactionKind};
use crate::store::{StoreError, is_busy};

/// Errors that can occur during ledger operations.
///
/// Every variant is raised before the enclosing transaction commits, so an
/// error always means the stored state is unchanged.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum LedgerError {
    /// The account cannot cover the requested hold.
    #[error("insufficient balance: {available} available, {required} required")]
    InsufficientBalance {
        /// Balance at the moment of the check.
        available: i64,
        /// Amount the hold needed.
        required: i64,
    },

    /// A reservation for this bout already reached a terminal state.
    #[error("bout {bout_id} already has a {status} reservation {reservation_id}")]
    AlreadyReserved {
        /// The bout the reservation belongs to.
        bout_id: String,
        /// The existing reservation.
        reservation_id: String,
        /// Its terminal status.
        status: ReservationStatus,
    },

    /// Unknown account or reservation.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// What was looked up (`account`, `reservation`).
        entity: &'static str,
        /// The identifier that was not found.
        id: String,
    },

    /// A concurrent writer held the store for longer than the busy timeout
    /// or a guarded update matched no row. Retry the whole operation.
    #[error("concurrent update conflict: {0}")]
    Conflict(String),

    /// An amount violates the operation's constraints.
    #[error("invalid amount {amount}: {reason}")]
    InvalidAmount {
        /// The rejected amount.
        amount: i64,
        /// Which constraint failed.
        reason: &'static str,
    },

    /// The transaction kind cannot be used with this operation.
    #[error("transaction kind '{kind}' cannot be used for {operation}")]
    InvalidKind {
        /// The rejected kind.
        kind: TransactionKind,
        /// The operation it was passed to.
        operation: &'static str,
    },

    /// A reference id cannot be derived or stored.
    #[error("invalid reference: {0}")]
    InvalidReference(String),

    /// A stored value could not be decoded.
    #[error("corrupt ledger row: {0}")]
    Corrupt(String),

    /// Metadata could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Database error from `SQLite`.
    #[error("database error: {0}")]
    Database(rusqlite::Error),

    /// I/O error while opening the store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LedgerError {
    /// Returns `true` if the caller should retry the whole operation.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    /// HTTP-equivalent status for the user-facing surface.
    ///
    /// - `InsufficientBalance`: 402
    /// - `AlreadyReserved`: 409
    /// - `NotFound`: 404
    /// - `Conflict`: 503 (retry)
    /// - `InvalidAmount`/`InvalidKind`/`InvalidReference`: 400
    /// - everything else: 500
    #[must_use]
    pub const fn status_code(&self) -> u16 {
        match self {
            Self::InsufficientBalance { .. } => 402,
            Self::AlreadyReserved { .. } => 409,
            Self::NotFound { .. } => 404,
            Self::Conflict(_) => 503,
            Self::InvalidAmount { .. } | Self::InvalidKind { .. } | Self::InvalidReference(_) => {
                400
            },
            Self::Corrupt(_) | Self::Serialization(_) | Self::Database(_) | Self::Io(_) => 500,
        }
    }
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        if is_busy(&err) {
            Self::Conflict(err.to_string())
        } else {
            Self::Database(err)
        }
    }
}

impl From<StoreError> for LedgerError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Database(e) => e.into(),
            StoreError::Io(e) => Self::Io(e),
        }
    }
}
