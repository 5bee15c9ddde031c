//! Observability primitives for the resilience layer
//!
//! - **[`correlation`]**: per-workflow correlation identifiers carried on
//!   the current thread and attached to a `workflow` tracing span
//! - **[`events`]**: structured, redacted event emission used by the retry
//!   executor, circuit breakers, credential cache and response builder
//!
//! Subscriber installation is the application's job; `bulwark-infra`
//! provides one.

pub mod correlation;
pub mod events;

pub use correlation::{current, scope, CorrelationId, CorrelationScope};
pub use events::{emit, EventLevel, EventRecord};
