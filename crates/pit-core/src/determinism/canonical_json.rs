//! Canonical JSON following RFC 8785 (JCS) with strict input rules.
//!
//! - Numbers must be integers in the signed 64-bit range.
//! - Objects must not repeat a key.
//! - Strings and keys must already be Unicode NFC.
//! - Nesting deeper than [`MAX_DEPTH`] is rejected.
//!
//! Output has keys sorted by byte order, no insignificant whitespace and
//! the minimal string escaping JCS requires.
//!
//! ```
//! use pit_core::determinism::canonicalize_json;
//!
//! let canonical = canonicalize_json(r#"{ "b": 1, "a": [true, null] }"#).unwrap();
//! assert_eq!(canonical, r#"{"a":[true,null],"b":1}"#);
//! ```

use std::collections::BTreeSet;
use std::fmt::{self, Write as _};

use serde::Serialize;
use serde::de::{self, Deserialize, Deserializer, MapAccess, SeqAccess, Visitor};
use serde_json::{Map, Number, Value};
use thiserror::Error;
use unicode_normalization::UnicodeNormalization;

/// Maximum nesting depth.
pub const MAX_DEPTH: usize = 128;

const DUPLICATE_KEY_PREFIX: &str = "duplicate key: ";

/// Errors raised while canonicalizing.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum CanonicalJsonError {
    /// A number with a fractional part or exponent.
    #[error("float not allowed: canonical JSON requires integers")]
    FloatNotAllowed,

    /// An integer above `i64::MAX`.
    #[error("number out of range: {value}")]
    NumberOutOfRange {
        /// The offending number.
        value: String,
    },

    /// The same key appears twice in one object.
    #[error("duplicate key '{key}'")]
    DuplicateKey {
        /// The repeated key.
        key: String,
    },

    /// A string or key that is not NFC normalized.
    #[error("string at '{path}' is not NFC normalized")]
    NonNfcString {
        /// Location of the string.
        path: String,
    },

    /// Nesting deeper than [`MAX_DEPTH`].
    #[error("nesting exceeds {max_depth} levels")]
    MaxDepthExceeded {
        /// The limit.
        max_depth: usize,
    },

    /// Input is not JSON, or a value could not be serialized.
    #[error("JSON error: {message}")]
    Parse {
        /// Parser message.
        message: String,
    },
}

/// Canonicalizes a JSON document.
///
/// # Errors
///
/// Returns a [`CanonicalJsonError`] for invalid JSON, duplicate keys, or any
/// value outside the accepted profile.
pub fn canonicalize_json(input: &str) -> Result<String, CanonicalJsonError> {
    let mut deserializer = serde_json::Deserializer::from_str(input);
    let value = StrictValue::deserialize(&mut deserializer)
        .and_then(|v| deserializer.end().map(|()| v.0))
        .map_err(|e| {
            let msg = e.to_string();
            match msg.strip_prefix(DUPLICATE_KEY_PREFIX) {
                Some(rest) => CanonicalJsonError::DuplicateKey {
                    // serde_json appends " at line X column Y".
                    key: rest.split(" at line ").next().unwrap_or(rest).to_string(),
                },
                None => CanonicalJsonError::Parse { message: msg },
            }
        })?;
    canonicalize_value(&value)
}

/// Canonicalizes an in-memory JSON value.
///
/// # Errors
///
/// Returns a [`CanonicalJsonError`] for floats, out-of-range integers,
/// non-NFC strings or excessive depth.
pub fn canonicalize_value(value: &Value) -> Result<String, CanonicalJsonError> {
    validate(value, "$", 0)?;
    let mut out = String::new();
    emit(value, &mut out);
    Ok(out)
}

/// Serializes `value` with serde and canonicalizes the result.
///
/// # Errors
///
/// Returns `Parse` if serialization fails, otherwise as
/// [`canonicalize_value`].
pub fn to_canonical_string<T: Serialize + ?Sized>(value: &T) -> Result<String, CanonicalJsonError> {
    let value = serde_json::to_value(value).map_err(|e| CanonicalJsonError::Parse {
        message: e.to_string(),
    })?;
    canonicalize_value(&value)
}

/// JSON value that rejects repeated keys while parsing. Keys are compared
/// after unescaping, so `"a"` and `"a"` collide.
struct StrictValue(Value);

impl<'de> Deserialize<'de> for StrictValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct StrictVisitor;

        impl<'de> Visitor<'de> for StrictVisitor {
            type Value = Value;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a JSON value")
            }

            fn visit_bool<E>(self, v: bool) -> Result<Value, E> {
                Ok(Value::Bool(v))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Value, E> {
                Ok(Value::Number(v.into()))
            }

            fn visit_u64<E>(self, v: u64) -> Result<Value, E> {
                Ok(Value::Number(v.into()))
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<Value, E> {
                Number::from_f64(v)
                    .map(Value::Number)
                    .ok_or_else(|| E::custom("non-finite number"))
            }

            fn visit_str<E>(self, v: &str) -> Result<Value, E> {
                Ok(Value::String(v.to_owned()))
            }

            fn visit_string<E>(self, v: String) -> Result<Value, E> {
                Ok(Value::String(v))
            }

            fn visit_unit<E>(self) -> Result<Value, E> {
                Ok(Value::Null)
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
                let mut items = Vec::new();
                while let Some(StrictValue(item)) = seq.next_element()? {
                    items.push(item);
                }
                Ok(Value::Array(items))
            }

            fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
                let mut seen = BTreeSet::new();
                let mut object = Map::new();
                while let Some(key) = map.next_key::<String>()? {
                    if !seen.insert(key.clone()) {
                        return Err(de::Error::custom(format!("{DUPLICATE_KEY_PREFIX}{key}")));
                    }
                    let StrictValue(value) = map.next_value()?;
                    object.insert(key, value);
                }
                Ok(Value::Object(object))
            }
        }

        deserializer.deserialize_any(StrictVisitor).map(StrictValue)
    }
}

fn validate(value: &Value, path: &str, depth: usize) -> Result<(), CanonicalJsonError> {
    if depth > MAX_DEPTH {
        return Err(CanonicalJsonError::MaxDepthExceeded {
            max_depth: MAX_DEPTH,
        });
    }
    match value {
        Value::Null | Value::Bool(_) => Ok(()),
        Value::Number(n) => {
            if n.as_i64().is_some() {
                Ok(())
            } else if let Some(u) = n.as_u64() {
                Err(CanonicalJsonError::NumberOutOfRange {
                    value: u.to_string(),
                })
            } else {
                Err(CanonicalJsonError::FloatNotAllowed)
            }
        },
        Value::String(s) => require_nfc(s, path),
        Value::Array(items) => items
            .iter()
            .enumerate()
            .try_for_each(|(i, item)| validate(item, &format!("{path}[{i}]"), depth + 1)),
        Value::Object(object) => object.iter().try_for_each(|(key, item)| {
            let child = format!("{path}.{key}");
            require_nfc(key, &child)?;
            validate(item, &child, depth + 1)
        }),
    }
}

fn require_nfc(s: &str, path: &str) -> Result<(), CanonicalJsonError> {
    if s.nfc().eq(s.chars()) {
        Ok(())
    } else {
        Err(CanonicalJsonError::NonNfcString {
            path: path.to_string(),
        })
    }
}

fn emit(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => {
            let _ = write!(out, "{n}");
        },
        Value::String(s) => emit_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit(item, out);
            }
            out.push(']');
        },
        Value::Object(object) => {
            let mut keys: Vec<&String> = object.keys().collect();
            keys.sort_unstable();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                emit_string(key, out);
                out.push(':');
                emit(&object[key.as_str()], out);
            }
            out.push('}');
        },
    }
}

/// Escapes only `"`, `\` and U+0000..=U+001F, using the short forms where
/// JSON defines them.
fn emit_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\u{0008}' => out.push_str("\\b"),
            '\u{000C}' => out.push_str("\\f"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c < '\u{0020}' => {
                let _ = write!(out, "\\u{:04x}", u32::from(c));
            },
            c => out.push(c),
        }
    }
    out.push('"');
}
