//! Deterministic serialization.
//!
//! Anything that is hashed for identity or used as an idempotency key is
//! first rendered as canonical JSON, so the same logical record always
//! produces the same bytes regardless of field order.

mod canonical_json;

pub use canonical_json::{
    CanonicalJsonError, MAX_DEPTH, canonicalize_json, canonicalize_value, to_canonical_string,
};
