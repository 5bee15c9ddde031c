//! Structured event emission
//!
//! [`emit`] is the single side channel through which the resilience
//! components report what they are doing. Context is redacted before it is
//! handed to `tracing`, and the current correlation id is attached.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::correlation;
use crate::error::Context;
use crate::privacy::redact_context;

/// Severity of an emitted event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Diagnostic detail
    Debug,
    /// Normal operation
    Info,
    /// Degraded but handled
    Warn,
    /// Failed
    Error,
}

impl fmt::Display for EventLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// What was emitted, after redaction.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EventRecord {
    /// Wall-clock time of emission.
    pub timestamp: DateTime<Utc>,
    /// Event severity.
    pub level: EventLevel,
    /// Emitting component (e.g. `"circuit_breaker"`).
    pub component: String,
    /// Correlation id active on the emitting thread.
    pub correlation_id: Option<String>,
    /// Event message.
    pub message: String,
    /// Redacted context.
    pub context: Context,
}

/// Emit a structured event and return what was logged.
pub fn emit(level: EventLevel, component: &str, message: &str, context: &Context) -> EventRecord {
    let context = redact_context(context);
    let correlation_id = correlation::current().map(|id| id.to_string());
    let rendered = serde_json::to_string(&context).unwrap_or_default();
    let cid = correlation_id.as_deref().unwrap_or("-");

    match level {
        EventLevel::Debug => {
            debug!(component = component, correlation_id = cid, context = %rendered, "{message}");
        }
        EventLevel::Info => {
            info!(component = component, correlation_id = cid, context = %rendered, "{message}");
        }
        EventLevel::Warn => {
            warn!(component = component, correlation_id = cid, context = %rendered, "{message}");
        }
        EventLevel::Error => {
            error!(component = component, correlation_id = cid, context = %rendered, "{message}");
        }
    }

    EventRecord {
        timestamp: Utc::now(),
        level,
        component: component.to_string(),
        correlation_id,
        message: message.to_string(),
        context,
    }
}
