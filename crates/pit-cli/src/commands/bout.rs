//! Bout metering commands.
//!
//! These drive the same preauthorize/settle/release calls the bout runner
//! makes, for operators resolving stuck holds or pricing a bout by hand.

use anyhow::{Context, Result, bail};
use clap::{Args, Subcommand};
use pit_core::bout::BoutPlan;
use pit_core::ledger::format_credits;
use pit_core::pricing::TokenUsage;
use serde_json::json;

use super::{GlobalOpts, Session, emit, load_config};

/// Bout command group.
#[derive(Debug, Args)]
pub struct BoutCommand {
    #[command(subcommand)]
    pub subcommand: BoutSubcommand,
}

/// Bout subcommands.
#[derive(Debug, Subcommand)]
pub enum BoutSubcommand {
    /// Price a bout without touching the ledger.
    Estimate(PlanArgs),

    /// Hold credits for a bout.
    Preauth {
        /// Account to charge.
        account_id: String,

        /// Bout id.
        bout_id: String,

        /// Hold this many micro-credits instead of pricing a plan.
        #[arg(long, conflicts_with_all = ["turns", "model"])]
        micro: Option<i64>,

        #[command(flatten)]
        plan: OptionalPlanArgs,
    },

    /// Settle a reservation at its actual cost.
    Settle {
        /// Reservation id.
        reservation_id: String,

        /// Actual cost in micro-credits.
        #[arg(long, conflicts_with_all = ["input_tokens", "output_tokens", "model"])]
        micro: Option<i64>,

        /// Prompt tokens used.
        #[arg(long, requires = "model")]
        input_tokens: Option<u64>,

        /// Completion tokens used.
        #[arg(long, requires = "model")]
        output_tokens: Option<u64>,

        /// Model the bout ran on.
        #[arg(long)]
        model: Option<String>,
    },

    /// Return a reservation's full hold.
    Release {
        /// Reservation id.
        reservation_id: String,
    },

    /// Show a reservation.
    Show {
        /// Reservation id.
        reservation_id: String,
    },
}

/// A bout plan given on the command line.
#[derive(Debug, Args)]
pub struct PlanArgs {
    /// Number of turns.
    #[arg(long)]
    pub turns: u32,

    /// Model id, or `byok`.
    #[arg(long)]
    pub model: String,

    /// Completion tokens per turn.
    #[arg(long)]
    pub output_tokens_per_turn: Option<u32>,
}

/// A bout plan that may be omitted.
#[derive(Debug, Args)]
pub struct OptionalPlanArgs {
    /// Number of turns.
    #[arg(long, requires = "model")]
    pub turns: Option<u32>,

    /// Model id, or `byok`.
    #[arg(long, requires = "turns")]
    pub model: Option<String>,

    /// Completion tokens per turn.
    #[arg(long)]
    pub output_tokens_per_turn: Option<u32>,
}

impl OptionalPlanArgs {
    fn plan(&self) -> Option<BoutPlan> {
        Some(BoutPlan {
            turns: self.turns?,
            model_id: self.model.clone()?,
            output_tokens_per_turn: self.output_tokens_per_turn,
        })
    }
}

/// Runs a bout subcommand.
pub fn run_bout(cmd: &BoutCommand, opts: &GlobalOpts) -> Result<()> {
    match &cmd.subcommand {
        BoutSubcommand::Estimate(args) => estimate(opts, args),
        BoutSubcommand::Preauth {
            account_id,
            bout_id,
            micro,
            plan,
        } => {
            let session = Session::open(opts)?;
            let amount = match (micro, plan.plan()) {
                (Some(micro), _) => *micro,
                (None, Some(plan)) => plan
                    .estimate_micro(&session.config.pricing)
                    .context("failed to price bout")?,
                (None, None) => bail!("give either --micro or --turns with --model"),
            };
            preauth(&session, account_id, bout_id, amount)
        },
        BoutSubcommand::Settle {
            reservation_id,
            micro,
            input_tokens,
            output_tokens,
            model,
        } => {
            let session = Session::open(opts)?;
            let actual = match (micro, model) {
                (Some(micro), _) => *micro,
                (None, Some(model)) => {
                    let usage =
                        TokenUsage::new(input_tokens.unwrap_or(0), output_tokens.unwrap_or(0));
                    session
                        .config
                        .pricing
                        .compute_cost_micro(usage, model)
                        .context("failed to price usage")?
                },
                (None, None) => bail!("give either --micro or token counts with --model"),
            };
            settle(&session, reservation_id, actual)
        },
        BoutSubcommand::Release { reservation_id } => {
            release(&Session::open(opts)?, reservation_id)
        },
        BoutSubcommand::Show { reservation_id } => {
            let session = Session::open(opts)?;
            let reservation = session
                .ledger
                .reservation(reservation_id)
                .with_context(|| format!("failed to load reservation {reservation_id}"))?;
            session.emit(&reservation, || {
                format!(
                    "{} {} for bout {} of {}: {} held",
                    reservation.id,
                    reservation.status,
                    reservation.bout_id,
                    reservation.account_id,
                    format_credits(reservation.amount_micro)
                )
            })
        },
    }
}

fn estimate(opts: &GlobalOpts, args: &PlanArgs) -> Result<()> {
    let config = load_config(opts.config.as_deref())?;
    let plan = BoutPlan {
        turns: args.turns,
        model_id: args.model.clone(),
        output_tokens_per_turn: args.output_tokens_per_turn,
    };
    let usage = config
        .pricing
        .estimate_bout_tokens(plan.turns, plan.output_tokens_per_turn);
    let micro = plan
        .estimate_micro(&config.pricing)
        .context("failed to price bout")?;
    emit(
        opts.json,
        &json!({
            "plan": plan,
            "input_tokens": usage.input_tokens,
            "output_tokens": usage.output_tokens,
            "estimate_micro": micro,
        }),
        || {
            format!(
                "{} turns on {}: ~{} tokens, {} credits",
                plan.turns,
                plan.model_id,
                usage.total(),
                format_credits(micro)
            )
        },
    )
}

fn preauth(session: &Session, account_id: &str, bout_id: &str, amount: i64) -> Result<()> {
    let preauth = session
        .ledger
        .preauthorize(account_id, bout_id, amount)
        .with_context(|| format!("failed to preauthorize bout {bout_id}"))?;
    session.emit(
        &json!({
            "reservation": preauth.reservation,
            "balance_micro": preauth.balance_micro,
            "replayed": preauth.replayed,
        }),
        || {
            format!(
                "{}held {} credits as {}; balance {}",
                if preauth.replayed { "already " } else { "" },
                format_credits(preauth.reservation.amount_micro),
                preauth.reservation.id,
                format_credits(preauth.balance_micro)
            )
        },
    )
}

fn settle(session: &Session, reservation_id: &str, actual: i64) -> Result<()> {
    let result = session
        .ledger
        .settle(reservation_id, actual)
        .with_context(|| format!("failed to settle {reservation_id}"))?;
    session.emit(&result, || {
        let mut line = format!(
            "{reservation_id} {}: charged {}, refunded {}, balance {}",
            result.status,
            format_credits(result.charged_micro),
            format_credits(result.refund_micro),
            format_credits(result.balance_micro)
        );
        if result.overage_micro > 0 {
            line.push_str(&format!(
                " (overage {} absorbed)",
                format_credits(result.overage_micro)
            ));
        }
        if result.replayed {
            line.push_str(" (no change)");
        }
        line
    })
}

fn release(session: &Session, reservation_id: &str) -> Result<()> {
    let result = session
        .ledger
        .release(reservation_id)
        .with_context(|| format!("failed to release {reservation_id}"))?;
    session.emit(&result, || {
        format!(
            "{reservation_id} {}: refunded {}, balance {}{}",
            result.status,
            format_credits(result.refund_micro),
            format_credits(result.balance_micro),
            if result.replayed { " (no change)" } else { "" }
        )
    })
}
