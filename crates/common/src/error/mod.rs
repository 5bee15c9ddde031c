//! Failure taxonomy for calls made to external dependencies
//!
//! Every failure the resilience layer reasons about is one of three kinds:
//!
//! | Kind | Type | Retry behaviour |
//! |------|------|-----------------|
//! | **Remote call** | [`RemoteCallFailure`] | Transient or permanent, decided by status code / transport fault |
//! | **Validation** | [`ValidationFailure`] | Never retried, always a caller-input defect |
//! | **Authentication** | [`AuthenticationFailure`] | Never retried by the executor; refreshed at the call site |
//!
//! The kinds are gathered into the closed [`Failure`] enum so that consumers
//! (the classifier and the response builder in particular) match on them
//! exhaustively instead of downcasting.
//!
//! ## Sensitive data
//!
//! [`AuthenticationFailure`] keeps its `auth_context` private. The only way to
//! read it back is [`AuthenticationFailure::redacted_auth_context`], and its
//! `Debug` output is redacted as well, so credentials handed to the failure
//! for diagnostics never leak into logs or responses.
//!
//! ## Examples
//!
//! ```rust
//! use bulwark_common::error::{Failure, FailureKind, RemoteCallFailure};
//!
//! let failure: Failure =
//!     RemoteCallFailure::new("ledger", "fetch_accounts", "service unavailable")
//!         .with_status(503)
//!         .into();
//!
//! assert_eq!(failure.kind(), FailureKind::RemoteCall);
//! assert_eq!(failure.service_name(), Some("ledger"));
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::privacy::redaction::redact_context;

/// Free-form diagnostic context attached to failures and log entries.
pub type Context = serde_json::Map<String, serde_json::Value>;

/// Result alias for operations guarded by the resilience layer.
pub type FailureResult<T> = Result<T, Failure>;

/// Transport-level problem that prevented any response from arriving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportFault {
    /// The connection could not be established or was dropped.
    Connection,
    /// The request did not complete before its deadline.
    Timeout,
}

impl fmt::Display for TransportFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection => write!(f, "connection"),
            Self::Timeout => write!(f, "timeout"),
        }
    }
}

/// A call to an external service failed.
///
/// `status_code` is only present when the service actually answered; failures
/// that never produced a response carry a [`TransportFault`] instead.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("{service_name}.{operation} failed: {message}")]
pub struct RemoteCallFailure {
    /// Stable name of the external dependency (circuit-breaker key).
    pub service_name: String,
    /// Operation that was attempted against the service.
    pub operation: String,
    /// Human-readable description.
    pub message: String,
    /// Transport status code, when a response was received.
    pub status_code: Option<u16>,
    /// Raw response body, when one was received.
    pub raw_response: Option<String>,
    /// Connectivity problem, when no response was received.
    pub transport: Option<TransportFault>,
    /// Additional diagnostic context.
    pub context: Context,
}

impl RemoteCallFailure {
    /// Create a remote-call failure without status or transport details.
    pub fn new<S, O, M>(service_name: S, operation: O, message: M) -> Self
    where
        S: Into<String>,
        O: Into<String>,
        M: Into<String>,
    {
        Self {
            service_name: service_name.into(),
            operation: operation.into(),
            message: message.into(),
            status_code: None,
            raw_response: None,
            transport: None,
            context: Context::new(),
        }
    }

    /// Create a failure for a connection that could not be established.
    pub fn connection<S, O, M>(service_name: S, operation: O, message: M) -> Self
    where
        S: Into<String>,
        O: Into<String>,
        M: Into<String>,
    {
        Self { transport: Some(TransportFault::Connection), ..Self::new(service_name, operation, message) }
    }

    /// Create a failure for a request that timed out.
    pub fn timeout<S, O, M>(service_name: S, operation: O, message: M) -> Self
    where
        S: Into<String>,
        O: Into<String>,
        M: Into<String>,
    {
        Self { transport: Some(TransportFault::Timeout), ..Self::new(service_name, operation, message) }
    }

    /// Attach the status code of the response that was received.
    ///
    /// A response means the transport worked, so any transport fault is
    /// cleared.
    #[must_use]
    pub fn with_status(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self.transport = None;
        self
    }

    /// Attach the raw response body.
    #[must_use]
    pub fn with_raw_response<R: Into<String>>(mut self, raw_response: R) -> Self {
        self.raw_response = Some(raw_response.into());
        self
    }

    /// Add a context entry.
    #[must_use]
    pub fn with_context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Caller-supplied data failed validation.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("invalid {data_kind}: {message}")]
pub struct ValidationFailure {
    /// Kind of data that was rejected (e.g. `"budget_row"`).
    pub data_kind: String,
    /// Human-readable description.
    pub message: String,
    /// Per-field error messages.
    pub field_errors: BTreeMap<String, String>,
    /// Additional diagnostic context.
    pub context: Context,
}

impl ValidationFailure {
    /// Create a validation failure with no field errors.
    pub fn new<D: Into<String>, M: Into<String>>(data_kind: D, message: M) -> Self {
        Self {
            data_kind: data_kind.into(),
            message: message.into(),
            field_errors: BTreeMap::new(),
            context: Context::new(),
        }
    }

    /// Record an error for a single field.
    #[must_use]
    pub fn with_field_error<F: Into<String>, M: Into<String>>(mut self, field: F, message: M) -> Self {
        self.field_errors.insert(field.into(), message.into());
        self
    }

    /// Add a context entry.
    #[must_use]
    pub fn with_context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Authentication against an external service failed.
#[derive(Clone, PartialEq, Error)]
#[error("authentication with {service_name} failed: {message}")]
pub struct AuthenticationFailure {
    /// Service the credential belongs to.
    pub service_name: String,
    /// Human-readable description.
    pub message: String,
    auth_context: Context,
}

impl AuthenticationFailure {
    /// Create an authentication failure.
    pub fn new<S: Into<String>, M: Into<String>>(service_name: S, message: M) -> Self {
        Self { service_name: service_name.into(), message: message.into(), auth_context: Context::new() }
    }

    /// Add an authentication context entry.
    ///
    /// Entries under sensitive keys are stored as given but only ever read
    /// back redacted.
    #[must_use]
    pub fn with_auth_context<K, V>(mut self, key: K, value: V) -> Self
    where
        K: Into<String>,
        V: Into<serde_json::Value>,
    {
        self.auth_context.insert(key.into(), value.into());
        self
    }

    /// The authentication context with sensitive entries replaced.
    pub fn redacted_auth_context(&self) -> Context {
        redact_context(&self.auth_context)
    }
}

impl fmt::Debug for AuthenticationFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthenticationFailure")
            .field("service_name", &self.service_name)
            .field("message", &self.message)
            .field("auth_context", &self.redacted_auth_context())
            .finish()
    }
}

/// Stable label for each failure kind, used in logs and responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// [`RemoteCallFailure`]
    RemoteCall,
    /// [`ValidationFailure`]
    Validation,
    /// [`AuthenticationFailure`]
    Authentication,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RemoteCall => write!(f, "remote_call"),
            Self::Validation => write!(f, "validation"),
            Self::Authentication => write!(f, "authentication"),
        }
    }
}

/// Error severity levels for monitoring and alerting
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorSeverity {
    /// Informational, typically for debugging
    Info,
    /// Degraded but operational
    Warning,
    /// Failure requiring attention
    Error,
    /// Immediate action required
    Critical,
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "INFO"),
            Self::Warning => write!(f, "WARN"),
            Self::Error => write!(f, "ERROR"),
            Self::Critical => write!(f, "CRITICAL"),
        }
    }
}

/// Any failure produced by a guarded call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Failure {
    /// The remote service failed or could not be reached.
    #[error(transparent)]
    RemoteCall(#[from] RemoteCallFailure),

    /// Caller input was rejected.
    #[error(transparent)]
    Validation(#[from] ValidationFailure),

    /// Credentials were missing, rejected, or could not be refreshed.
    #[error(transparent)]
    Authentication(#[from] AuthenticationFailure),
}

impl Failure {
    /// The kind label of this failure.
    pub fn kind(&self) -> FailureKind {
        match self {
            Self::RemoteCall(_) => FailureKind::RemoteCall,
            Self::Validation(_) => FailureKind::Validation,
            Self::Authentication(_) => FailureKind::Authentication,
        }
    }

    /// The human-readable message, without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Self::RemoteCall(f) => &f.message,
            Self::Validation(f) => &f.message,
            Self::Authentication(f) => &f.message,
        }
    }

    /// The external service involved, if any.
    pub fn service_name(&self) -> Option<&str> {
        match self {
            Self::RemoteCall(f) => Some(&f.service_name),
            Self::Authentication(f) => Some(&f.service_name),
            Self::Validation(_) => None,
        }
    }

    /// Severity for monitoring.
    ///
    /// Server-side and transport failures are warnings because they are
    /// expected to clear; everything else needs attention.
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::RemoteCall(f) => match (f.status_code, f.transport) {
                (Some(code), _) if code == 429 || code >= 500 => ErrorSeverity::Warning,
                (None, Some(_)) => ErrorSeverity::Warning,
                _ => ErrorSeverity::Error,
            },
            Self::Validation(_) => ErrorSeverity::Error,
            Self::Authentication(_) => ErrorSeverity::Error,
        }
    }
}
