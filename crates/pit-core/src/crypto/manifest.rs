//! Agent identity: the manifest record and its two hashes.
//!
//! - `prompt_hash` covers `{"systemPrompt": ...}` only, so two agents sharing
//!   a prompt share the hash.
//! - `manifest_hash` covers every manifest field, absent optionals included
//!   as `null`.

use serde::{Deserialize, Serialize};

use super::hash::sha256_canonical;
use crate::determinism::CanonicalJsonError;

/// Access tier of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentTier {
    /// Built-in agent available to everyone.
    Free,
    /// Built-in agent for paying users.
    Premium,
    /// User-authored agent.
    Custom,
}

/// Target length of each turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseLength {
    /// Short turns.
    Short,
    /// Default length.
    #[default]
    Standard,
    /// Long turns.
    Long,
}

/// Output formatting of each turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseFormat {
    /// Plain text.
    #[default]
    Plain,
    /// Plain text with paragraph spacing.
    Spaced,
    /// Markdown.
    Markdown,
    /// JSON object per turn.
    Json,
}

/// Everything that identifies an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentManifest {
    /// Stable agent id.
    pub agent_id: String,
    /// Display name.
    pub name: String,
    /// System prompt.
    pub system_prompt: String,
    /// Preset this agent was built from.
    #[serde(default)]
    pub preset_id: Option<String>,
    /// Access tier.
    pub tier: AgentTier,
    /// Model override.
    #[serde(default)]
    pub model: Option<String>,
    /// Turn length.
    #[serde(default)]
    pub response_length: ResponseLength,
    /// Turn format.
    #[serde(default)]
    pub response_format: ResponseFormat,
    /// Creation time, ISO 8601.
    pub created_at: String,
    /// Agent this one was cloned from.
    #[serde(default)]
    pub parent_id: Option<String>,
    /// Owning user.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl AgentManifest {
    /// `0x`-prefixed SHA-256 of the canonical manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if a string field is not NFC normalized.
    pub fn manifest_hash(&self) -> Result<String, CanonicalJsonError> {
        hash_agent_manifest(self)
    }

    /// `0x`-prefixed SHA-256 of the canonical prompt record.
    ///
    /// # Errors
    ///
    /// Returns an error if the prompt is not NFC normalized.
    pub fn prompt_hash(&self) -> Result<String, CanonicalJsonError> {
        hash_agent_prompt(&self.system_prompt)
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PromptRecord<'a> {
    system_prompt: &'a str,
}

/// Hashes a full manifest.
///
/// # Errors
///
/// Returns an error if a string field is not NFC normalized.
pub fn hash_agent_manifest(manifest: &AgentManifest) -> Result<String, CanonicalJsonError> {
    sha256_canonical(manifest)
}

/// Hashes a system prompt.
///
/// # Errors
///
/// Returns an error if the prompt is not NFC normalized.
pub fn hash_agent_prompt(system_prompt: &str) -> Result<String, CanonicalJsonError> {
    sha256_canonical(&PromptRecord { system_prompt })
}
