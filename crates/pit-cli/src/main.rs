//! pitctl - operator CLI for The Pit credit ledger
//!
//! Reads and mutates the same `SQLite` store the web app uses. Every
//! mutation goes through `pit-core`, so the CLI is as safe to run against a
//! live database as another app instance.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

mod commands;

use commands::GlobalOpts;

/// pitctl - operator CLI for The Pit credit ledger
#[derive(Parser, Debug)]
#[command(name = "pitctl")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, env = "PIT_CONFIG")]
    config: Option<PathBuf>,

    /// Database path, overriding `[store] path`
    #[arg(long, env = "PIT_DB")]
    db: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Account balances, grants, history and audits
    Account(commands::account::AccountCommand),

    /// Bout preauthorization, settlement and release
    Bout(commands::bout::BoutCommand),

    /// The decaying intro pool
    Pool(commands::pool::PoolCommand),

    /// The daily free-bout pool
    FreePool(commands::pool::FreePoolCommand),

    /// Referral codes and bonuses
    Referral(commands::referral::ReferralCommand),

    /// Apply verified payment events from a JSON file
    Webhook(commands::webhook::WebhookArgs),

    /// Agent identity hashes and BYOK key checks
    Hash(commands::hash::HashCommand),

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_new(&cli.log_level).unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();

    let opts = GlobalOpts {
        config: cli.config,
        db: cli.db,
        json: cli.json,
    };

    match cli.command {
        Commands::Account(cmd) => commands::account::run_account(&cmd, &opts),
        Commands::Bout(cmd) => commands::bout::run_bout(&cmd, &opts),
        Commands::Pool(cmd) => commands::pool::run_pool(&cmd, &opts),
        Commands::FreePool(cmd) => commands::pool::run_free_pool(&cmd, &opts),
        Commands::Referral(cmd) => commands::referral::run_referral(&cmd, &opts),
        Commands::Webhook(args) => commands::webhook::run_webhook(&args, &opts),
        Commands::Hash(cmd) => commands::hash::run_hash(&cmd, opts.json),
        Commands::Config => {
            let config = commands::load_config(opts.config.as_deref())?;
            print!("{}", config.to_toml()?);
            Ok(())
        },
    }
}
