//! Privacy Module
//!
//! Redaction of sensitive values before they reach logs, events or error
//! responses. Sensitivity is decided by key name, so callers can attach
//! arbitrary diagnostic context without vetting every entry themselves.

pub mod redaction;

pub use redaction::{
    is_sensitive_key, mask_secret, redact_context, redact_value, REDACTION_MARKER,
};
