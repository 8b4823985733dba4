//! Identity hashes and key checks for agents.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use pit_core::byok::{classify_key, redact};
use pit_core::crypto::{AgentManifest, hash_agent_prompt};
use serde_json::json;

use super::emit;

/// Hash command group.
#[derive(Debug, Args)]
pub struct HashCommand {
    #[command(subcommand)]
    pub subcommand: HashSubcommand,
}

/// Hash subcommands.
#[derive(Debug, Subcommand)]
pub enum HashSubcommand {
    /// Print the prompt and manifest hashes of an agent manifest JSON file.
    Manifest {
        /// Manifest file.
        file: PathBuf,
    },

    /// Print the hash of a system prompt.
    Prompt {
        /// Prompt text.
        text: String,
    },

    /// Report which provider a BYOK key belongs to, without printing it.
    Key {
        /// The key.
        key: String,
    },
}

/// Runs a hash subcommand. Needs no store.
pub fn run_hash(cmd: &HashCommand, json_output: bool) -> Result<()> {
    match &cmd.subcommand {
        HashSubcommand::Manifest { file } => {
            let content = std::fs::read_to_string(file)
                .with_context(|| format!("failed to read {}", file.display()))?;
            let manifest: AgentManifest = serde_json::from_str(&content)
                .with_context(|| format!("invalid agent manifest in {}", file.display()))?;
            let prompt_hash = manifest.prompt_hash().context("failed to hash prompt")?;
            let manifest_hash = manifest.manifest_hash().context("failed to hash manifest")?;
            emit(
                json_output,
                &json!({
                    "agent_id": manifest.agent_id,
                    "prompt_hash": prompt_hash,
                    "manifest_hash": manifest_hash,
                }),
                || format!("prompt   {prompt_hash}\nmanifest {manifest_hash}"),
            )
        },
        HashSubcommand::Prompt { text } => {
            let hash = hash_agent_prompt(text).context("failed to hash prompt")?;
            emit(json_output, &json!({ "prompt_hash": hash }), || hash.clone())
        },
        HashSubcommand::Key { key } => {
            let provider = classify_key(key);
            emit(
                json_output,
                &json!({ "provider": provider.map(|p| p.as_str()), "redacted": redact(key) }),
                || {
                    provider.map_or_else(
                        || format!("{}: unrecognized key", redact(key)),
                        |p| format!("{}: {p}", redact(key)),
                    )
                },
            )
        },
    }
}
