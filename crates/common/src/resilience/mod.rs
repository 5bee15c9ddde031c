//! Resilience patterns for calls to external dependencies
//!
//! - **[`classifier`]**: decides whether a failure is transient
//! - **[`retry`]**: exponential backoff with jitter around a single call
//! - **[`circuit_breaker`]**: per-service circuits that stop calling a
//!   dependency that keeps failing
//! - **[`response`]**: redacted, structured error responses
//! - **[`guard`]**: all of the above composed around one call
//!
//! ## Composition
//!
//! [`ProtectedCall`] puts the retry loop outside the circuit breaker. Every
//! attempt consults the circuit, so a circuit that opens part-way through a
//! retry sequence stops the sequence at once instead of burning the
//! remaining attempts against a dependency known to be down.
//!
//! ```text
//! ProtectedCall::call
//!   └─► RetryExecutor          (transient failures only)
//!         └─► CircuitBreakerRegistry::execute   (per service)
//!               └─► operation
//!   └─► ErrorResponseBuilder   (on final failure)
//! ```

pub mod circuit_breaker;
pub mod classifier;
pub mod guard;
pub mod response;
pub mod retry;

pub use circuit_breaker::{
    CircuitBreakerRegistry, CircuitError, CircuitOverrides, CircuitResult, CircuitSnapshot,
    CircuitState,
};
pub use classifier::RetriableClassifier;
pub use guard::{DependencyOutcome, ProtectedCall};
pub use response::{ErrorResponse, ErrorResponseBuilder, FailureDetails};
pub use retry::{execute_with_retry, RetryExecutor, RetryPolicy, RetryPolicyBuilder};
