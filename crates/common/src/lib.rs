//! Resilience primitives for calls to external dependencies.
//!
//! Workflow code that talks to remote services wraps each call so that
//! transient failures are retried with backoff, a dependency that keeps
//! failing is cut off by a per-service circuit breaker, credentials are
//! cached and refreshed before they expire, and every failure that reaches
//! the caller is a structured response with secrets redacted.
//!
//! # Feature Tiers
//!
//! Enable cargo features to opt into the tiers you need:
//! - `foundation`: failure taxonomy, redaction, configuration types
//! - `runtime`: clocks, observability, retry, circuit breakers, credential
//!   cache, error responses (default)
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use bulwark_common::config::ResilienceConfig;
//! use bulwark_common::error::{Failure, RemoteCallFailure};
//! use bulwark_common::resilience::{CircuitBreakerRegistry, ProtectedCall};
//!
//! let config = ResilienceConfig::default();
//! let registry = Arc::new(CircuitBreakerRegistry::new(&config));
//! let guard = ProtectedCall::new(&config, registry).unwrap();
//!
//! let rows = guard.call("ledger", "sync", "fetch_accounts", || {
//!     Ok::<_, Failure>(vec!["4000-cash", "4100-payroll"])
//! });
//! assert_eq!(rows.unwrap().len(), 2);
//!
//! let failed = guard.call("ledger", "sync", "fetch_accounts", || -> Result<(), Failure> {
//!     Err(RemoteCallFailure::new("ledger", "fetch_accounts", "not found").with_status(404).into())
//! });
//! assert!(!failed.unwrap_err().is_retriable());
//! ```

#![forbid(unsafe_code)]
#![warn(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::complexity, clippy::suspicious)]

// Foundation tier
// -----------------------------------------------------------------
#[cfg(feature = "foundation")]
pub mod config;
#[cfg(feature = "foundation")]
pub mod error;
#[cfg(feature = "foundation")]
pub mod privacy;

// Runtime tier
// --------------------------------------------------------------------
#[cfg(feature = "runtime")]
pub mod auth;
#[cfg(feature = "runtime")]
pub mod observability;
#[cfg(feature = "runtime")]
pub mod resilience;
#[cfg(feature = "runtime")]
pub mod time;

// Re-export commonly used types and traits for convenience
// ------------------------
#[cfg(feature = "runtime")]
pub use auth::{with_credential_refresh, CredentialCache, IssuedCredential, Secret};
#[cfg(feature = "foundation")]
pub use config::{
    CircuitSettings, ConfigError, CredentialSettings, ResilienceConfig, RetrySettings,
};
#[cfg(feature = "foundation")]
pub use error::{
    AuthenticationFailure, Context, ErrorSeverity, Failure, FailureKind, FailureResult,
    RemoteCallFailure, TransportFault, ValidationFailure,
};
#[cfg(feature = "runtime")]
pub use observability::{emit, CorrelationId, EventLevel};
#[cfg(feature = "runtime")]
pub use resilience::{
    CircuitBreakerRegistry, CircuitError, CircuitState, DependencyOutcome, ErrorResponse,
    ErrorResponseBuilder, ProtectedCall, RetriableClassifier, RetryExecutor, RetryPolicy,
};
#[cfg(feature = "runtime")]
pub use time::{Clock, MockClock, Sleeper, SystemClock, ThreadSleeper};
