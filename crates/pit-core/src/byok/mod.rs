//! Bring-your-own-key support.
//!
//! A user key is classified by prefix into exactly one [`ByokProvider`].
//! Keys travel between the stash endpoint and the bout runner in a short
//! lived cookie, encoded by [`ByokCredential::encode_cookie`].
//!
//! Keys never reach logs: [`ByokCredential`] redacts its key in `Debug`,
//! and [`SecretRedactor`] scrubs free-form lines.

mod redact;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use redact::{REDACTED, SecretRedactor, redact};

/// Name of the stash cookie.
pub const BYOK_COOKIE_NAME: &str = "pit_byok";

/// Lifetime of the stash cookie.
pub const BYOK_MAX_AGE_SECONDS: u32 = 60;

const COOKIE_SEPARATOR: &str = ":||:";

/// Errors raised while decoding a stashed key.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ByokError {
    /// The cookie names a provider this build does not know.
    #[error("unknown BYOK provider '{0}'")]
    UnknownProvider(String),

    /// The cookie carries no key.
    #[error("BYOK cookie carries an empty key")]
    EmptyKey,
}

/// Provider a user key belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ByokProvider {
    /// Direct Anthropic API key.
    Anthropic,
    /// `OpenRouter` key.
    OpenRouter,
}

impl ByokProvider {
    /// Every provider, in classification order.
    pub const ALL: [Self; 2] = [Self::Anthropic, Self::OpenRouter];

    /// Key prefix that identifies the provider.
    #[must_use]
    pub const fn key_prefix(self) -> &'static str {
        match self {
            Self::Anthropic => "sk-ant-",
            Self::OpenRouter => "sk-or-v1-",
        }
    }

    /// Wire name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenRouter => "openrouter",
        }
    }
}

impl fmt::Display for ByokProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ByokProvider {
    type Err = ByokError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|p| p.as_str() == s)
            .ok_or_else(|| ByokError::UnknownProvider(s.to_string()))
    }
}

/// Classifies a key by prefix. `None` for unrecognized keys.
#[must_use]
pub fn classify_key(key: &str) -> Option<ByokProvider> {
    let key = key.trim();
    ByokProvider::ALL
        .into_iter()
        .find(|p| key.starts_with(p.key_prefix()))
}

/// `true` when [`classify_key`] recognizes the key.
#[must_use]
pub fn is_valid_byok_key(key: &str) -> bool {
    classify_key(key).is_some()
}

/// Provider a key is routed to. Unrecognized keys go to Anthropic, which
/// rejects invalid ones itself.
#[must_use]
pub fn route_key(key: &str) -> ByokProvider {
    classify_key(key).unwrap_or(ByokProvider::Anthropic)
}

/// A stashed user key with its provider and optional model choice.
#[derive(Clone, PartialEq, Eq)]
pub struct ByokCredential {
    /// Provider the key belongs to.
    pub provider: ByokProvider,
    /// Model chosen by the user, if any.
    pub model_id: Option<String>,
    /// The raw key.
    pub key: String,
}

impl fmt::Debug for ByokCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByokCredential")
            .field("provider", &self.provider)
            .field("model_id", &self.model_id)
            .field("key", &REDACTED)
            .finish()
    }
}

impl ByokCredential {
    /// Creates a credential, routing the key by prefix.
    #[must_use]
    pub fn new(key: impl Into<String>, model_id: Option<String>) -> Self {
        let key = key.into().trim().to_string();
        Self {
            provider: route_key(&key),
            model_id,
            key,
        }
    }

    /// Cookie value: `provider:||:model:||:key`, empty model when unset.
    #[must_use]
    pub fn encode_cookie(&self) -> String {
        format!(
            "{}{COOKIE_SEPARATOR}{}{COOKIE_SEPARATOR}{}",
            self.provider,
            self.model_id.as_deref().unwrap_or_default(),
            self.key
        )
    }

    /// Parses a cookie value. A value without separators is a bare
    /// Anthropic key from before providers were encoded.
    ///
    /// # Errors
    ///
    /// Returns `UnknownProvider` for an unknown provider name and
    /// `EmptyKey` when no key is present.
    pub fn decode_cookie(value: &str) -> Result<Self, ByokError> {
        let parts: Vec<&str> = value.split(COOKIE_SEPARATOR).collect();
        let credential = match parts.as_slice() {
            [provider, model, key] => Self {
                provider: provider.parse()?,
                model_id: (!model.is_empty()).then(|| (*model).to_string()),
                key: (*key).to_string(),
            },
            _ => Self {
                provider: ByokProvider::Anthropic,
                model_id: None,
                key: value.to_string(),
            },
        };
        if credential.key.is_empty() {
            return Err(ByokError::EmptyKey);
        }
        Ok(credential)
    }
}
