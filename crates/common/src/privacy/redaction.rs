//! Key-based redaction of diagnostic context
//!
//! A context entry is sensitive when its key looks like it holds a password,
//! token, key, secret, credential, authorization header, account identifier
//! or card number. Sensitive entries are replaced by [`REDACTION_MARKER`]
//! wherever they appear, including inside nested objects and arrays.
//!
//! ```rust
//! use bulwark_common::privacy::{redact_value, REDACTION_MARKER};
//! use serde_json::json;
//!
//! let redacted = redact_value(&json!({
//!     "tenant": "acme",
//!     "auth": { "api_token": "abcd1234" },
//! }));
//!
//! assert_eq!(redacted["tenant"], "acme");
//! assert_eq!(redacted["auth"]["api_token"], REDACTION_MARKER);
//! ```

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::error::Context;

/// Replacement text for sensitive values.
pub const REDACTION_MARKER: &str = "[REDACTED]";

/// Secrets at or below this length are masked entirely.
const MASK_FULL_BELOW: usize = 12;

/// Number of leading characters kept visible by [`mask_secret`].
const MASK_VISIBLE_PREFIX: usize = 4;

static SENSITIVE_KEY_REGEX: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?i)(passw(or)?d|token|key|secret|credential|authorization|account[_\-.]?(.*[_\-.])?id|card[_\-.]?(.*[_\-.])?(number|num|no))",
    )
    .expect("SENSITIVE_KEY_REGEX should compile - this is a bug")
});

/// Whether values stored under `key` must be redacted.
pub fn is_sensitive_key(key: &str) -> bool {
    SENSITIVE_KEY_REGEX.is_match(key)
}

/// Return a copy of `value` with every sensitive entry replaced.
pub fn redact_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(redact_context(map)),
        Value::Array(items) => Value::Array(items.iter().map(redact_value).collect()),
        other => other.clone(),
    }
}

/// Return a copy of `context` with every sensitive entry replaced.
pub fn redact_context(context: &Context) -> Context {
    context
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(REDACTION_MARKER.to_string())
            } else {
                redact_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

/// Mask a secret for display.
///
/// Short secrets are replaced entirely. Longer ones keep a four character
/// prefix and report their length so operators can tell credentials apart
/// without seeing them.
pub fn mask_secret(secret: &str) -> String {
    let len = secret.chars().count();
    if len <= MASK_FULL_BELOW {
        return REDACTION_MARKER.to_string();
    }
    let prefix: String = secret.chars().take(MASK_VISIBLE_PREFIX).collect();
    format!("{prefix}…[{len} chars]")
}
