//! Intro pool and daily free-bout pool commands.

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Args, Subcommand};
use pit_core::clock::{Clock, SystemClock};
use pit_core::free_pool::FreeBoutPool;
use pit_core::intro_pool::IntroPool;
use pit_core::ledger::format_credits;

use super::{GlobalOpts, Session};

/// Intro pool command group.
#[derive(Debug, Args)]
pub struct PoolCommand {
    #[command(subcommand)]
    pub subcommand: PoolSubcommand,
}

/// Intro pool subcommands.
#[derive(Debug, Subcommand)]
pub enum PoolSubcommand {
    /// Show the decayed pool value.
    Status {
        /// Project to this Unix-millisecond time instead of now.
        #[arg(long)]
        at_ms: Option<i64>,
    },

    /// Pay the signup bonus to a new account, once.
    ClaimSignup {
        /// Account id.
        account_id: String,
    },
}

/// Free-bout pool command group.
#[derive(Debug, Args)]
pub struct FreePoolCommand {
    #[command(subcommand)]
    pub subcommand: FreePoolSubcommand,
}

/// Free-bout pool subcommands.
#[derive(Debug, Subcommand)]
pub enum FreePoolSubcommand {
    /// Show usage for a UTC day.
    Status {
        /// Day as `YYYY-MM-DD`; today when omitted.
        #[arg(long)]
        date: Option<NaiveDate>,
    },

    /// Start one free bout today.
    Consume {
        /// Expected spend in micro-credits.
        #[arg(long, default_value = "0")]
        spend_micro: i64,
    },
}

/// Runs an intro pool subcommand.
pub fn run_pool(cmd: &PoolCommand, opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts)?;
    let pool = IntroPool::open(session.ledger.clone(), session.config.intro_pool)
        .context("failed to open intro pool")?;
    match &cmd.subcommand {
        PoolSubcommand::Status { at_ms } => {
            let now = at_ms.unwrap_or_else(|| SystemClock.now_ms());
            let status = pool.status(now).context("failed to read intro pool")?;
            session.emit(&status, || {
                format!(
                    "intro pool: {} of {} credits left ({} claimed){}",
                    format_credits(status.remaining_micro),
                    format_credits(status.decayed_micro),
                    format_credits(status.snapshot.claimed_micro),
                    if status.exhausted { ", exhausted" } else { "" }
                )
            })
        },
        PoolSubcommand::ClaimSignup { account_id } => {
            let outcome = pool
                .claim_signup_bonus(account_id)
                .with_context(|| format!("failed to claim signup bonus for {account_id}"))?;
            session.emit(&outcome, || {
                if outcome.replayed {
                    format!("{account_id} already received the signup bonus")
                } else {
                    format!(
                        "{account_id} received {} credits; {} left in pool",
                        format_credits(outcome.claimed_micro),
                        format_credits(outcome.remaining_micro)
                    )
                }
            })
        },
    }
}

/// Runs a free-bout pool subcommand.
pub fn run_free_pool(cmd: &FreePoolCommand, opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts)?;
    let pool = FreeBoutPool::new(&session.ledger, session.config.free_pool);
    let (status, consumed) = match &cmd.subcommand {
        FreePoolSubcommand::Status { date } => {
            let date = date.unwrap_or_else(|| pool.today());
            let status = pool
                .status(date)
                .with_context(|| format!("failed to read free pool for {date}"))?;
            (status, None)
        },
        FreePoolSubcommand::Consume { spend_micro } => {
            let draw = pool
                .consume_today(*spend_micro)
                .context("failed to consume free bout")?;
            (draw.status, Some(draw.consumed))
        },
    };
    session.emit(&status, || {
        let mut line = format!(
            "{}: {}/{} free bouts, spend {} of {}",
            status.date,
            status.used,
            status.max,
            format_credits(status.spend_micro),
            format_credits(status.spend_cap_micro)
        );
        match consumed {
            Some(true) => line.insert_str(0, "consumed; "),
            Some(false) => line.insert_str(0, "refused; "),
            None => {},
        }
        line
    })
}
