//! Hashing of structured records.
//!
//! - **SHA-256 identity hashes**: `0x`-prefixed hex over canonical JSON, used
//!   for agent manifests and prompts. These are published values and must
//!   stay byte-stable.
//! - **Blake3 content keys**: internal content addressing and fixed-length
//!   idempotency keys for ledger reference ids.
//!
//! ```
//! use pit_core::crypto::hash_agent_prompt;
//!
//! let hash = hash_agent_prompt("Be helpful.").unwrap();
//! assert!(hash.starts_with("0x"));
//! assert_eq!(hash.len(), 66);
//! ```

mod hash;
mod manifest;

pub use hash::{
    ContentHasher, HASH_PREFIX, HASH_SIZE, Hash, sha256, sha256_canonical, sha256_hex,
};
pub use manifest::{
    AgentManifest, AgentTier, ResponseFormat, ResponseLength, hash_agent_manifest,
    hash_agent_prompt,
};
