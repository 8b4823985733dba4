//! Referral commands.

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pit_core::intro_pool::IntroPool;
use pit_core::ledger::format_credits;
use pit_core::referral::{ReferralOutcome, Referrals};
use serde_json::json;

use super::{GlobalOpts, Session};

/// Referral command group.
#[derive(Debug, Args)]
pub struct ReferralCommand {
    #[command(subcommand)]
    pub subcommand: ReferralSubcommand,
}

/// Referral subcommands.
#[derive(Debug, Subcommand)]
pub enum ReferralSubcommand {
    /// Print an account's referral code, creating it if needed.
    Code {
        /// Account id.
        account_id: String,
    },

    /// Link a new account to a referral code and pay the referrer.
    Apply {
        /// The referred account.
        referred_id: String,

        /// Referral code.
        code: String,
    },

    /// Show who referred an account.
    Show {
        /// The referred account.
        referred_id: String,
    },
}

/// Runs a referral subcommand.
pub fn run_referral(cmd: &ReferralCommand, opts: &GlobalOpts) -> Result<()> {
    let session = Session::open(opts)?;
    let pool = IntroPool::open(session.ledger.clone(), session.config.intro_pool)
        .context("failed to open intro pool")?;
    let referrals = Referrals::new(pool);

    match &cmd.subcommand {
        ReferralSubcommand::Code { account_id } => {
            let code = referrals
                .ensure_referral_code(account_id)
                .with_context(|| format!("failed to create referral code for {account_id}"))?;
            session.emit(&json!({ "account_id": account_id, "code": code }), || code.clone())
        },
        ReferralSubcommand::Apply { referred_id, code } => {
            let outcome = referrals
                .apply_referral_bonus(referred_id, code)
                .with_context(|| format!("failed to apply referral for {referred_id}"))?;
            session.emit(&outcome, || match &outcome {
                ReferralOutcome::Credited {
                    referrer_id,
                    claimed_micro,
                } => format!(
                    "{referrer_id} credited {} credits for referring {referred_id}",
                    format_credits(*claimed_micro)
                ),
                ReferralOutcome::Empty { referrer_id } => {
                    format!("referral recorded; intro pool empty, {referrer_id} not credited")
                },
                ReferralOutcome::Already { referrer_id } => {
                    format!("{referred_id} was already referred by {referrer_id}")
                },
                ReferralOutcome::Invalid => format!("code {code} is not valid for {referred_id}"),
            })
        },
        ReferralSubcommand::Show { referred_id } => {
            let referral = referrals
                .referral(referred_id)
                .with_context(|| format!("failed to load referral for {referred_id}"))?;
            session.emit(&referral, || {
                referral.as_ref().map_or_else(
                    || format!("{referred_id} has no referrer"),
                    |r| {
                        format!(
                            "{referred_id} referred by {} with {}{}",
                            r.referrer_id,
                            r.code,
                            if r.credited { "" } else { " (not credited)" }
                        )
                    },
                )
            })
        },
    }
}
