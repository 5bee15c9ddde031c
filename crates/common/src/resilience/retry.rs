//! Retry with exponential backoff and jitter
//!
//! An operation is attempted once and then retried up to `max_retries`
//! times while its failures are classified as transient. The delay before
//! retry *k* (0-based) is `base_delay * backoff_factor^k`, optionally capped,
//! then spread by a uniformly random `±jitter_fraction` of itself and clamped
//! at zero. The last failure is returned unchanged once attempts run out;
//! non-transient failures are returned immediately.
//!
//! Sleeping goes through a [`Sleeper`] so tests can observe the exact delays
//! without waiting:
//!
//! ```rust
//! use std::time::Duration;
//!
//! use bulwark_common::resilience::retry::{RetryExecutor, RetryPolicy};
//! use bulwark_common::time::MockClock;
//!
//! let clock = MockClock::new();
//! let policy = RetryPolicy::builder()
//!     .max_retries(2)
//!     .base_delay(Duration::from_secs(1))
//!     .jitter_fraction(0.0)
//!     .build()
//!     .unwrap();
//! let executor = RetryExecutor::with_sleeper(policy, clock.clone());
//!
//! let mut calls = 0;
//! let result: Result<u32, String> = executor.execute(
//!     || {
//!         calls += 1;
//!         if calls < 3 { Err("busy".to_string()) } else { Ok(calls) }
//!     },
//!     |_| true,
//! );
//!
//! assert_eq!(result, Ok(3));
//! assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
//! ```

use std::fmt;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde_json::json;

use crate::config::{ConfigError, RetrySettings, BACKOFF_CEILING, MAX_MAX_RETRIES};
use crate::error::{Context, Failure};
use crate::observability::{emit, EventLevel};
use crate::resilience::classifier::RetriableClassifier;
use crate::time::{Sleeper, ThreadSleeper};

const COMPONENT: &str = "retry";

/// Backoff parameters for a retry sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_delay: Duration,
    /// Multiplier applied after each retry.
    pub backoff_factor: f64,
    /// Random spread as a fraction of each delay.
    pub jitter_fraction: f64,
    /// Cap on a single pre-jitter delay.
    pub max_delay: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings_unchecked(&RetrySettings::default())
    }
}

impl RetryPolicy {
    /// Create a policy builder starting from defaults
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Build a validated policy from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if the settings are out of range.
    pub fn from_settings(settings: &RetrySettings) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self::from_settings_unchecked(settings))
    }

    fn from_settings_unchecked(settings: &RetrySettings) -> Self {
        Self {
            max_retries: settings.max_retries,
            base_delay: settings.base_delay(),
            backoff_factor: settings.backoff_factor,
            jitter_fraction: settings.jitter_fraction,
            max_delay: settings.max_delay(),
        }
    }

    /// Validate the policy
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        RetrySettings {
            max_retries: self.max_retries,
            base_delay_ms: u64::try_from(self.base_delay.as_millis()).unwrap_or(u64::MAX),
            backoff_factor: self.backoff_factor,
            jitter_fraction: self.jitter_fraction,
            max_delay_ms: self.max_delay.map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
        }
        .validate()
    }

    /// Total attempts including the first.
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Pre-jitter delay before retry `retry_index` (0-based).
    pub fn backoff_delay(&self, retry_index: u32) -> Duration {
        let exponent = i32::try_from(retry_index).unwrap_or(i32::MAX);
        let secs = self.base_delay.as_secs_f64() * self.backoff_factor.max(0.0).powi(exponent);
        self.cap(secs)
    }

    /// Multiply `delay` by the backoff factor, saturating at the cap.
    fn next_delay(&self, delay: Duration) -> Duration {
        self.cap(delay.as_secs_f64() * self.backoff_factor.max(0.0))
    }

    fn cap(&self, secs: f64) -> Duration {
        let ceiling = self.max_delay.unwrap_or(BACKOFF_CEILING);
        if !secs.is_finite() || secs >= ceiling.as_secs_f64() {
            return ceiling;
        }
        // Round to whole nanoseconds so 0.1s * 2 is exactly 200ms.
        Duration::from_nanos((secs.max(0.0) * 1e9).round() as u64)
    }

    /// Spread `delay` by a random `±jitter_fraction` of itself, never below
    /// zero.
    pub fn apply_jitter(&self, delay: Duration) -> Duration {
        if !self.jitter_fraction.is_finite() || self.jitter_fraction <= 0.0 || delay.is_zero() {
            return delay;
        }
        let secs = delay.as_secs_f64();
        let spread = secs * self.jitter_fraction;
        let offset = rand::thread_rng().gen_range(-spread..=spread);
        Duration::from_secs_f64((secs + offset).max(0.0))
    }
}

/// Builder for [`RetryPolicy`] with fluent API
#[derive(Debug, Clone, Default)]
pub struct RetryPolicyBuilder {
    policy: RetryPolicy,
}

impl RetryPolicyBuilder {
    /// Start from the default policy
    pub fn new() -> Self {
        Self { policy: RetryPolicy::default() }
    }

    /// Retries after the first attempt
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.policy.max_retries = max_retries;
        self
    }

    /// Delay before the first retry
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.policy.base_delay = delay;
        self
    }

    /// Multiplier applied after each retry
    pub fn backoff_factor(mut self, factor: f64) -> Self {
        self.policy.backoff_factor = factor;
        self
    }

    /// Random spread as a fraction of each delay
    pub fn jitter_fraction(mut self, fraction: f64) -> Self {
        self.policy.jitter_fraction = fraction;
        self
    }

    /// Cap on a single delay
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.policy.max_delay = Some(delay);
        self
    }

    /// Validate and build
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if a parameter is out of range.
    pub fn build(self) -> Result<RetryPolicy, ConfigError> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}

/// Progress through one retry sequence.
#[derive(Debug, Clone, Copy)]
struct RetryAttempt {
    attempt_index: u32,
    current_delay: Duration,
}

impl RetryAttempt {
    fn first(policy: &RetryPolicy) -> Self {
        Self { attempt_index: 0, current_delay: policy.backoff_delay(0) }
    }

    fn advance(&mut self, policy: &RetryPolicy) {
        self.attempt_index += 1;
        self.current_delay = policy.next_delay(self.current_delay);
    }
}

/// What to do after a failed attempt.
enum Step {
    Retry(Duration),
    GiveUp,
}

/// Runs operations under a [`RetryPolicy`].
#[derive(Debug, Clone)]
pub struct RetryExecutor<S = ThreadSleeper> {
    policy: RetryPolicy,
    sleeper: S,
    label: String,
}

impl RetryExecutor<ThreadSleeper> {
    /// Executor that sleeps the calling thread between attempts.
    pub fn new(policy: RetryPolicy) -> Self {
        Self::with_sleeper(policy, ThreadSleeper)
    }
}

impl<S: Sleeper> RetryExecutor<S> {
    /// Executor using a custom sleeper.
    pub fn with_sleeper(policy: RetryPolicy, sleeper: S) -> Self {
        Self { policy, sleeper, label: "operation".to_string() }
    }

    /// Name the guarded operation in log events.
    #[must_use]
    pub fn with_label<L: Into<String>>(mut self, label: L) -> Self {
        self.label = label.into();
        self
    }

    /// The policy in use.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation`, retrying while `is_retriable` accepts its failures.
    ///
    /// # Errors
    ///
    /// Returns the first non-retriable failure, or the last failure once
    /// `max_retries` retries have been spent.
    pub fn execute<T, E, F, R>(&self, mut operation: F, is_retriable: R) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = RetryAttempt::first(&self.policy);
        loop {
            match operation() {
                Ok(value) => {
                    self.record_success(&attempt);
                    return Ok(value);
                }
                Err(error) => match self.next_step(&attempt, &error, &is_retriable) {
                    Step::Retry(delay) => {
                        self.sleeper.sleep(delay);
                        attempt.advance(&self.policy);
                    }
                    Step::GiveUp => return Err(error),
                },
            }
        }
    }

    /// Run `operation`, retrying failures the classifier deems transient.
    ///
    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub fn execute_classified<T, F>(
        &self,
        operation: F,
        classifier: &RetriableClassifier,
    ) -> Result<T, Failure>
    where
        F: FnMut() -> Result<T, Failure>,
    {
        self.execute(operation, |failure| classifier.is_retriable(failure))
    }

    /// Async variant of [`RetryExecutor::execute`]; waits with
    /// `tokio::time::sleep` instead of the sleeper.
    ///
    /// # Errors
    ///
    /// See [`RetryExecutor::execute`].
    pub async fn execute_async<T, E, F, Fut, R>(
        &self,
        mut operation: F,
        is_retriable: R,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut attempt = RetryAttempt::first(&self.policy);
        loop {
            match operation().await {
                Ok(value) => {
                    self.record_success(&attempt);
                    return Ok(value);
                }
                Err(error) => match self.next_step(&attempt, &error, &is_retriable) {
                    Step::Retry(delay) => {
                        tokio::time::sleep(delay).await;
                        attempt.advance(&self.policy);
                    }
                    Step::GiveUp => return Err(error),
                },
            }
        }
    }

    fn next_step<E, R>(&self, attempt: &RetryAttempt, error: &E, is_retriable: &R) -> Step
    where
        R: Fn(&E) -> bool,
        E: fmt::Display,
    {
        let mut context = self.event_context(attempt, error);

        if !is_retriable(error) {
            emit(EventLevel::Debug, COMPONENT, "failure is not retriable", &context);
            return Step::GiveUp;
        }

        if attempt.attempt_index >= self.policy.max_retries {
            emit(EventLevel::Warn, COMPONENT, "retry attempts exhausted", &context);
            return Step::GiveUp;
        }

        let delay = self.policy.apply_jitter(attempt.current_delay);
        context.insert("delay_ms".into(), json!(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)));
        emit(EventLevel::Info, COMPONENT, "retrying after transient failure", &context);
        Step::Retry(delay)
    }

    fn record_success(&self, attempt: &RetryAttempt) {
        if attempt.attempt_index > 0 {
            let mut context = Context::new();
            context.insert("operation".into(), json!(self.label));
            context.insert("attempts".into(), json!(attempt.attempt_index + 1));
            emit(EventLevel::Info, COMPONENT, "operation succeeded after retry", &context);
        }
    }

    fn event_context<E: fmt::Display>(&self, attempt: &RetryAttempt, error: &E) -> Context {
        let mut context = Context::new();
        context.insert("operation".into(), json!(self.label));
        context.insert("attempt".into(), json!(attempt.attempt_index + 1));
        context.insert("max_attempts".into(), json!(self.policy.max_attempts()));
        context.insert("error".into(), json!(error.to_string()));
        context
    }
}

/// Run `operation` with a one-off policy, sleeping the calling thread.
///
/// Parameters are used as given; a backoff factor below one shrinks delays
/// rather than failing. A jitter fraction outside `[0, 1]` is clamped and a
/// non-finite one disables jitter.
///
/// # Errors
///
/// See [`RetryExecutor::execute`].
pub fn execute_with_retry<T, E, F, R>(
    operation: F,
    is_retriable: R,
    max_retries: u32,
    base_delay: Duration,
    backoff_factor: f64,
    jitter_fraction: f64,
) -> Result<T, E>
where
    F: FnMut() -> Result<T, E>,
    R: Fn(&E) -> bool,
    E: fmt::Display,
{
    let policy = RetryPolicy {
        max_retries: max_retries.min(MAX_MAX_RETRIES),
        base_delay,
        backoff_factor,
        jitter_fraction: if jitter_fraction.is_finite() { jitter_fraction.clamp(0.0, 1.0) } else { 0.0 },
        max_delay: None,
    };
    RetryExecutor::new(policy).execute(operation, is_retriable)
}
