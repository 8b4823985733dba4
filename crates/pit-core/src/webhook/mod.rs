//! Verified payment events mapped onto ledger grants.
//!
//! Signature checking and provider payload parsing happen upstream; this
//! module receives a provider-agnostic [`CreditGrantEvent`]. Each event is
//! applied through [`CreditLedger::grant_with_metadata`] under a reference
//! id derived from `(provider, event_id)`, so a redelivered event is a
//! `Duplicate` and never credits twice.
//!
//! Events that carry no account or no positive amount are acknowledged and
//! ignored: the provider must not keep retrying them.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use crate::crypto::ContentHasher;
use crate::ledger::{CreditLedger, GrantOutcome, LedgerError, MICRO_PER_CREDIT, TransactionKind};

/// Domain of webhook reference ids.
pub const WEBHOOK_REFERENCE_DOMAIN: &str = "webhook";

/// What the payment paid for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CreditEventKind {
    /// One-off credit pack.
    Purchase,
    /// Recurring subscription allowance.
    Subscription,
}

impl From<CreditEventKind> for TransactionKind {
    fn from(kind: CreditEventKind) -> Self {
        match kind {
            CreditEventKind::Purchase => Self::Purchase,
            CreditEventKind::Subscription => Self::Subscription,
        }
    }
}

/// A verified payment event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreditGrantEvent {
    /// Payment provider, e.g. `stripe`.
    pub provider: String,
    /// Provider's event or session id.
    pub event_id: String,
    /// Account to credit, taken from the checkout metadata.
    #[serde(default)]
    pub account_id: Option<String>,
    /// Whole credits bought.
    #[serde(default)]
    pub credits: i64,
    /// Purchase or subscription.
    pub kind: CreditEventKind,
    /// Extra fields recorded with the grant.
    #[serde(default)]
    pub metadata: Value,
}

impl CreditGrantEvent {
    /// Ledger reference id for the event.
    ///
    /// # Errors
    ///
    /// Returns `InvalidReference` if the ids are not NFC normalized.
    pub fn reference_id(&self) -> Result<String, LedgerError> {
        ContentHasher::idempotency_key(WEBHOOK_REFERENCE_DOMAIN, &[&self.provider, &self.event_id])
            .map_err(|e| LedgerError::InvalidReference(e.to_string()))
    }
}

/// Result of [`WebhookGrants::apply`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WebhookOutcome {
    /// The account was credited.
    Applied {
        /// Credited account.
        account_id: String,
        /// Amount credited.
        amount_micro: i64,
        /// Ledger reference id.
        reference_id: String,
    },
    /// The event was applied before; nothing changed.
    Duplicate {
        /// Ledger reference id.
        reference_id: String,
    },
    /// The event carries nothing to grant.
    Ignored {
        /// Why.
        reason: String,
    },
}

/// Applies payment events to the ledger.
#[derive(Debug, Clone)]
pub struct WebhookGrants {
    ledger: CreditLedger,
}

impl WebhookGrants {
    /// Creates a handler over `ledger`.
    #[must_use]
    pub const fn new(ledger: CreditLedger) -> Self {
        Self { ledger }
    }

    /// Applies one event.
    ///
    /// # Errors
    ///
    /// Returns an error only for store failures; callers should answer the
    /// provider with a retryable status in that case.
    pub fn apply(&self, event: &CreditGrantEvent) -> Result<WebhookOutcome, LedgerError> {
        let Some(account_id) = event.account_id.as_deref().filter(|a| !a.is_empty()) else {
            warn!(
                provider = %event.provider,
                event_id = %event.event_id,
                "webhook event has no account"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: "missing account".into(),
            });
        };
        let Some(amount_micro) = event
            .credits
            .checked_mul(MICRO_PER_CREDIT)
            .filter(|amount| *amount > 0)
        else {
            warn!(
                provider = %event.provider,
                event_id = %event.event_id,
                credits = event.credits,
                "webhook event has no positive credit amount"
            );
            return Ok(WebhookOutcome::Ignored {
                reason: format!("invalid credit amount {}", event.credits),
            });
        };

        let reference_id = event.reference_id()?;
        let mut metadata = match &event.metadata {
            Value::Object(extra) => extra.clone(),
            _ => Map::new(),
        };
        metadata.insert("provider".into(), event.provider.clone().into());
        metadata.insert("event_id".into(), event.event_id.clone().into());
        metadata.insert("credits".into(), event.credits.into());

        let outcome = self.ledger.grant_with_metadata(
            account_id,
            amount_micro,
            &reference_id,
            event.kind.into(),
            &Value::Object(metadata),
        )?;

        Ok(match outcome {
            GrantOutcome::Applied { .. } => {
                info!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    account_id,
                    amount_micro,
                    "webhook grant applied"
                );
                WebhookOutcome::Applied {
                    account_id: account_id.to_string(),
                    amount_micro,
                    reference_id,
                }
            },
            GrantOutcome::Duplicate => {
                debug!(
                    provider = %event.provider,
                    event_id = %event.event_id,
                    "webhook event already applied"
                );
                WebhookOutcome::Duplicate { reference_id }
            },
        })
    }
}
