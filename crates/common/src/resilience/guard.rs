//! Retry, circuit breaking and error responses composed around one call
//!
//! [`ProtectedCall`] is what workflow code uses to reach an external
//! dependency. The retry loop wraps the circuit breaker, so an attempt made
//! while the circuit is open is rejected without touching the dependency and
//! ends the retry sequence. Final failures come back as redacted
//! [`ErrorResponse`]s.
//!
//! [`ProtectedCall::call_or_degrade`] is for optional dependencies: when the
//! circuit was already open the call is skipped instead of failed, and the
//! workflow carries on without that data.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use crate::config::{ConfigError, ResilienceConfig};
use crate::error::{Context, Failure, RemoteCallFailure};
use crate::observability::{emit, EventLevel};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitError, CircuitState};
use crate::resilience::classifier::RetriableClassifier;
use crate::resilience::response::{ErrorResponse, ErrorResponseBuilder};
use crate::resilience::retry::{RetryExecutor, RetryPolicy};
use crate::time::{Clock, Sleeper, SystemClock, ThreadSleeper};

const COMPONENT: &str = "protected_call";

/// Result of [`ProtectedCall::call_or_degrade`].
#[derive(Debug, Clone, PartialEq)]
pub enum DependencyOutcome<T> {
    /// The call succeeded.
    Completed(T),
    /// The call was not made because the circuit was open.
    Skipped {
        /// Service whose circuit is open.
        service_name: String,
        /// Why the call was skipped.
        reason: String,
        /// Remaining cooldown.
        retry_after: Duration,
    },
    /// The call was made and failed.
    Failed(ErrorResponse),
}

impl<T> DependencyOutcome<T> {
    /// Whether the call succeeded.
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Whether the call was skipped.
    pub fn is_skipped(&self) -> bool {
        matches!(self, Self::Skipped { .. })
    }

    /// The value, if the call succeeded.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            _ => None,
        }
    }
}

/// Runs calls to external services through retry and circuit breaking.
#[derive(Debug)]
pub struct ProtectedCall<C: Clock = SystemClock, S: Sleeper = ThreadSleeper> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    retry: RetryExecutor<S>,
    classifier: RetriableClassifier,
    responses: ErrorResponseBuilder<C>,
}

impl ProtectedCall<SystemClock, ThreadSleeper> {
    /// Guard sleeping the calling thread between retries.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the retry settings are invalid.
    pub fn new(
        config: &ResilienceConfig,
        registry: Arc<CircuitBreakerRegistry<SystemClock>>,
    ) -> Result<Self, ConfigError> {
        Self::with_sleeper(config, registry, ThreadSleeper)
    }
}

impl<C: Clock, S: Sleeper> ProtectedCall<C, S> {
    /// Guard using a custom sleeper (useful for testing)
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the retry settings are invalid.
    pub fn with_sleeper(
        config: &ResilienceConfig,
        registry: Arc<CircuitBreakerRegistry<C>>,
        sleeper: S,
    ) -> Result<Self, ConfigError> {
        let policy = RetryPolicy::from_settings(&config.retry)?;
        let classifier = RetriableClassifier::from_config(config);
        Ok(Self {
            responses: ErrorResponseBuilder::new(Arc::clone(&registry), classifier.clone()),
            retry: RetryExecutor::with_sleeper(policy, sleeper).with_label(COMPONENT),
            registry,
            classifier,
        })
    }

    /// The shared circuit registry.
    pub fn registry(&self) -> &Arc<CircuitBreakerRegistry<C>> {
        &self.registry
    }

    /// The response builder, for failures raised outside a guarded call.
    pub fn responses(&self) -> &ErrorResponseBuilder<C> {
        &self.responses
    }

    /// Call `service_name`, retrying transient failures while its circuit
    /// allows.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorResponse`] describing the final failure.
    pub fn call<T, F>(
        &self,
        service_name: &str,
        component: &str,
        operation: &str,
        op: F,
    ) -> Result<T, ErrorResponse>
    where
        F: FnMut() -> Result<T, Failure>,
    {
        self.call_with_context(service_name, component, operation, &Context::new(), op)
    }

    /// Like [`call`](Self::call), attaching `context` to any error response.
    ///
    /// # Errors
    ///
    /// Returns an [`ErrorResponse`] describing the final failure.
    pub fn call_with_context<T, F>(
        &self,
        service_name: &str,
        component: &str,
        operation: &str,
        context: &Context,
        op: F,
    ) -> Result<T, ErrorResponse>
    where
        F: FnMut() -> Result<T, Failure>,
    {
        let (result, last_failure) = self.run(service_name, op);
        result.map_err(|error| {
            let failure = match (error, last_failure) {
                (CircuitError::Operation(failure), _) => failure,
                (CircuitError::Open { .. }, Some(failure)) => failure,
                (CircuitError::Open { service_name, retry_after }, None) => {
                    circuit_open_failure(&service_name, operation, retry_after)
                }
            };
            self.responses.build_response(&failure, component, operation, context)
        })
    }

    /// Call an optional dependency, skipping it while its circuit is open.
    pub fn call_or_degrade<T, F>(
        &self,
        service_name: &str,
        component: &str,
        operation: &str,
        op: F,
    ) -> DependencyOutcome<T>
    where
        F: FnMut() -> Result<T, Failure>,
    {
        let (result, last_failure) = self.run(service_name, op);
        let failure = match (result, last_failure) {
            (Ok(value), _) => return DependencyOutcome::Completed(value),
            (Err(CircuitError::Operation(failure)), _) => failure,
            (Err(CircuitError::Open { .. }), Some(failure)) => failure,
            (Err(CircuitError::Open { service_name, retry_after }), None) => {
                let mut event = Context::new();
                event.insert("service".into(), json!(service_name));
                event.insert("operation".into(), json!(operation));
                event.insert("retry_after_secs".into(), json!(retry_after.as_secs_f64()));
                emit(EventLevel::Warn, component, "dependency skipped, circuit open", &event);
                return DependencyOutcome::Skipped {
                    service_name,
                    reason: "circuit open".to_string(),
                    retry_after,
                };
            }
        };
        DependencyOutcome::Failed(self.responses.build_response(
            &failure,
            component,
            operation,
            &Context::new(),
        ))
    }

    /// Run `op` under retry and circuit breaking, also returning the last
    /// failure the operation itself produced.
    fn run<T, F>(
        &self,
        service_name: &str,
        mut op: F,
    ) -> (Result<T, CircuitError<Failure>>, Option<Failure>)
    where
        F: FnMut() -> Result<T, Failure>,
    {
        let classifier = &self.classifier;
        let mut last_failure = None;
        let result = self.retry.execute(
            || {
                let outcome = self.registry.execute(service_name, &mut op);
                if let Err(CircuitError::Operation(failure)) = &outcome {
                    last_failure = Some(failure.clone());
                }
                outcome
            },
            // A failure that opened the circuit ends the sequence.
            |error| match error {
                CircuitError::Operation(failure) => {
                    classifier.is_retriable(failure)
                        && self.registry.get_state(service_name) != CircuitState::Open
                }
                CircuitError::Open { .. } => false,
            },
        );
        (result, last_failure)
    }
}

fn circuit_open_failure(service_name: &str, operation: &str, retry_after: Duration) -> Failure {
    RemoteCallFailure::new(
        service_name,
        operation,
        format!("circuit open, retry after {:.1}s", retry_after.as_secs_f64()),
    )
    .with_context("retry_after_secs", retry_after.as_secs_f64())
    .into()
}
