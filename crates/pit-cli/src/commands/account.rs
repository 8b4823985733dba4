//! Account commands: balance, grants, history and audits.

use anyhow::{Context, Result};
use clap::{Args, Subcommand, ValueEnum};
use pit_core::ledger::{TransactionKind, format_credits};
use serde_json::{Value, json};

use super::{GlobalOpts, Session};

/// Account command group.
#[derive(Debug, Args)]
pub struct AccountCommand {
    #[command(subcommand)]
    pub subcommand: AccountSubcommand,
}

/// Account subcommands.
#[derive(Debug, Subcommand)]
pub enum AccountSubcommand {
    /// Show an account's balance, creating the account if needed.
    Balance {
        /// Account id.
        account_id: String,
    },

    /// Credit an account once per reference id.
    Grant(GrantArgs),

    /// List recent ledger entries, newest first.
    Transactions {
        /// Account id.
        account_id: String,

        /// Maximum entries to show.
        #[arg(short = 'n', long, default_value = "20")]
        limit: u32,
    },

    /// Check that the balance plus open holds equals the ledger sum.
    Audit {
        /// Account id.
        account_id: String,
    },
}

/// Grant kinds accepted on the command line.
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum GrantKindArg {
    /// Manual operator grant.
    #[default]
    Grant,
    /// Credit pack purchase.
    Purchase,
    /// Subscription allowance.
    Subscription,
}

impl From<GrantKindArg> for TransactionKind {
    fn from(arg: GrantKindArg) -> Self {
        match arg {
            GrantKindArg::Grant => Self::Grant,
            GrantKindArg::Purchase => Self::Purchase,
            GrantKindArg::Subscription => Self::Subscription,
        }
    }
}

/// Arguments for `pitctl account grant`.
#[derive(Debug, Args)]
pub struct GrantArgs {
    /// Account id.
    pub account_id: String,

    /// Amount in micro-credits.
    #[arg(long)]
    pub micro: i64,

    /// Idempotency key; repeating it credits nothing.
    #[arg(long)]
    pub reference: String,

    /// Ledger entry kind.
    #[arg(long, value_enum, default_value = "grant")]
    pub kind: GrantKindArg,

    /// Free-form note stored in the entry's metadata.
    #[arg(long)]
    pub note: Option<String>,
}

/// Runs an account subcommand.
pub fn run_account(cmd: &AccountCommand, opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts)?;
    match &cmd.subcommand {
        AccountSubcommand::Balance { account_id } => balance(&session, account_id),
        AccountSubcommand::Grant(args) => grant(&session, args),
        AccountSubcommand::Transactions { account_id, limit } => {
            transactions(&session, account_id, *limit)
        },
        AccountSubcommand::Audit { account_id } => audit(&session, account_id),
    }
}

fn balance(session: &Session, account_id: &str) -> Result<()> {
    let balance_micro = session
        .ledger
        .ensure_account(account_id)
        .with_context(|| format!("failed to read balance of {account_id}"))?;
    session.emit(
        &json!({ "account_id": account_id, "balance_micro": balance_micro }),
        || format!("{account_id}: {} credits", format_credits(balance_micro)),
    )
}

fn grant(session: &Session, args: &GrantArgs) -> Result<()> {
    let metadata = args
        .note
        .as_ref()
        .map_or(Value::Null, |note| json!({ "note": note }));
    let outcome = session
        .ledger
        .grant_with_metadata(
            &args.account_id,
            args.micro,
            &args.reference,
            args.kind.into(),
            &metadata,
        )
        .with_context(|| format!("failed to grant to {}", args.account_id))?;
    let applied = outcome.is_applied();
    session.emit(
        &json!({
            "account_id": args.account_id,
            "reference_id": args.reference,
            "applied": applied,
        }),
        || {
            if applied {
                format!(
                    "granted {} credits to {}",
                    format_credits(args.micro),
                    args.account_id
                )
            } else {
                format!("reference {} already applied; nothing credited", args.reference)
            }
        },
    )
}

fn transactions(session: &Session, account_id: &str, limit: u32) -> Result<()> {
    let entries = session
        .ledger
        .transactions(account_id, limit)
        .with_context(|| format!("failed to list transactions of {account_id}"))?;
    session.emit(&entries, || {
        if entries.is_empty() {
            return format!("{account_id}: no transactions");
        }
        entries
            .iter()
            .map(|t| {
                format!(
                    "{:>8}  {:<12} {:>12}  {}",
                    t.id,
                    t.kind.as_str(),
                    format_credits(t.delta_micro),
                    t.reference_id
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    })
}

fn audit(session: &Session, account_id: &str) -> Result<()> {
    let report = session
        .ledger
        .audit(account_id)
        .with_context(|| format!("failed to audit {account_id}"))?;
    session.emit(&report, || {
        format!(
            "{account_id}: balance {} + held {} vs ledger {} over {} entries: {}",
            format_credits(report.balance_micro),
            format_credits(report.held_micro),
            format_credits(report.ledger_sum_micro),
            report.transaction_count,
            if report.is_consistent() {
                "consistent"
            } else {
                "MISMATCH"
            }
        )
    })?;
    if !report.is_consistent() {
        anyhow::bail!("ledger mismatch for {account_id}");
    }
    Ok(())
}
