//! Secret redaction for log lines that may carry user keys.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::Regex;

/// The replacement text for redacted secrets.
pub const REDACTED: &str = "[REDACTED]";

static SECRET_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        // Anthropic keys
        r"sk-ant-[A-Za-z0-9_-]+",
        // OpenRouter keys
        r"sk-or-v1-[A-Za-z0-9_-]+",
        // Stripe secret keys
        r"sk_(live|test)_[A-Za-z0-9]+",
        // Authorization headers
        r"(?i)bearer\s+[A-Za-z0-9_.=-]+",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("invalid secret pattern"))
    .collect()
});

/// Replaces provider keys and bearer tokens with `[REDACTED]`.
///
/// ```
/// use pit_core::byok::SecretRedactor;
///
/// let redactor = SecretRedactor::new();
/// let line = redactor.redact("byok key sk-ant-api03-abcdef rejected");
/// assert_eq!(line, "byok key [REDACTED] rejected");
/// ```
#[derive(Debug, Clone, Default)]
pub struct SecretRedactor {
    custom_patterns: Vec<Regex>,
}

impl SecretRedactor {
    /// Creates a redactor with the built-in patterns.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a pattern.
    ///
    /// # Errors
    ///
    /// Returns an error if `pattern` is not a valid regex.
    pub fn with_pattern(mut self, pattern: &str) -> Result<Self, regex::Error> {
        self.custom_patterns.push(Regex::new(pattern)?);
        Ok(self)
    }

    /// Redacts every match. Borrows the input when nothing matched.
    #[must_use]
    pub fn redact<'a>(&self, input: &'a str) -> Cow<'a, str> {
        let mut result = Cow::Borrowed(input);
        for pattern in SECRET_PATTERNS.iter().chain(&self.custom_patterns) {
            if pattern.is_match(&result) {
                result = Cow::Owned(pattern.replace_all(&result, REDACTED).into_owned());
            }
        }
        result
    }
}

/// Redacts with the built-in patterns.
#[must_use]
pub fn redact(input: &str) -> Cow<'_, str> {
    SecretRedactor::new().redact(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redacts_provider_keys() {
        assert_eq!(redact("k=sk-ant-api03-AbC_d-9"), "k=[REDACTED]");
        assert_eq!(redact("using sk-or-v1-0123abcd now"), "using [REDACTED] now");
        assert_eq!(
            redact("stripe sk_live_abc123 and sk_test_XYZ"),
            "stripe [REDACTED] and [REDACTED]"
        );
    }

    #[test]
    fn test_redacts_bearer_header() {
        assert_eq!(
            redact("Authorization: Bearer eyJhbGciOi.J9.x"),
            "Authorization: [REDACTED]"
        );
    }

    #[test]
    fn test_clean_input_is_borrowed() {
        assert!(matches!(redact("bout b1 settled"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_custom_pattern() {
        let redactor = SecretRedactor::new().with_pattern(r"whsec_[A-Za-z0-9]+").unwrap();
        assert_eq!(redactor.redact("secret whsec_abc"), "secret [REDACTED]");
        assert!(SecretRedactor::new().with_pattern("(").is_err());
    }
}
