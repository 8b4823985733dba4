//! Replaying verified payment events from JSON files.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use pit_core::ledger::format_credits;
use pit_core::webhook::{CreditGrantEvent, WebhookGrants, WebhookOutcome};

use super::{GlobalOpts, Session};

/// Arguments for `pitctl webhook`.
#[derive(Debug, Args)]
pub struct WebhookArgs {
    /// JSON file holding one event or an array of events.
    pub file: PathBuf,
}

/// Applies every event in the file, in order.
pub fn run_webhook(args: &WebhookArgs, opts: &GlobalOpts) -> Result<()> {
    let content = std::fs::read_to_string(&args.file)
        .with_context(|| format!("failed to read {}", args.file.display()))?;
    let events = parse_events(&content)
        .with_context(|| format!("failed to parse events in {}", args.file.display()))?;

    let session = Session::open(opts)?;
    let grants = WebhookGrants::new(session.ledger.clone());
    let mut outcomes = Vec::with_capacity(events.len());
    for event in &events {
        let outcome = grants.apply(event).with_context(|| {
            format!("failed to apply {} event {}", event.provider, event.event_id)
        })?;
        outcomes.push(outcome);
    }

    session.emit(&outcomes, || {
        events
            .iter()
            .zip(&outcomes)
            .map(|(event, outcome)| match outcome {
                WebhookOutcome::Applied {
                    account_id,
                    amount_micro,
                    ..
                } => format!(
                    "{}: credited {} with {}",
                    event.event_id,
                    account_id,
                    format_credits(*amount_micro)
                ),
                WebhookOutcome::Duplicate { .. } => format!("{}: already applied", event.event_id),
                WebhookOutcome::Ignored { reason } => {
                    format!("{}: ignored ({reason})", event.event_id)
                },
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

/// Accepts a single event object or an array of them.
fn parse_events(content: &str) -> serde_json::Result<Vec<CreditGrantEvent>> {
    let value: serde_json::Value = serde_json::from_str(content)?;
    if value.is_array() {
        serde_json::from_value(value)
    } else {
        serde_json::from_value(value).map(|event| vec![event])
    }
}
