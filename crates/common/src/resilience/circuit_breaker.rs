//! Per-service circuit breakers
//!
//! The registry keeps one circuit per external service name, created lazily
//! in the CLOSED state. Each circuit moves through the usual states:
//!
//! - **CLOSED**: calls pass. Every failure increments the failure count and
//!   reaching the threshold opens the circuit; a success resets the count.
//! - **OPEN**: calls are rejected (or diverted to a fallback) until the
//!   recovery timeout has elapsed since the last failure. The first call after
//!   that moves the circuit to HALF_OPEN and goes through as the trial.
//! - **HALF_OPEN**: exactly one trial call is admitted. Success closes the
//!   circuit; failure reopens it immediately.
//!
//! Each circuit sits behind its own mutex and every check-then-transition
//! happens under one hold of it, so two threads can never both be admitted as
//! the half-open trial. A trial that never reports back (the caller panicked
//! or forgot to record) releases its lease after another recovery timeout.
//!
//! ```rust
//! use bulwark_common::config::{CircuitSettings, ResilienceConfig};
//! use bulwark_common::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
//!
//! let registry = CircuitBreakerRegistry::new(&ResilienceConfig::default());
//! registry.configure("ledger", CircuitSettings::new(2, 30));
//!
//! assert!(!registry.record_failure("ledger", "503", None));
//! assert!(registry.record_failure("ledger", "503", None));
//! assert_eq!(registry.get_state("ledger"), CircuitState::Open);
//! assert!(registry.is_open("ledger"));
//! assert_eq!(registry.get_state("mailer"), CircuitState::Closed);
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::json;
use thiserror::Error;

use crate::config::{CircuitSettings, ResilienceConfig};
use crate::error::Context;
use crate::observability::{emit, EventLevel};
use crate::time::{Clock, SystemClock};

const COMPONENT: &str = "circuit_breaker";

//==============================================================================
// Error Types
//==============================================================================

/// Outcome of a call made through [`CircuitBreakerRegistry::execute`].
#[derive(Debug, Error)]
pub enum CircuitError<E> {
    /// The circuit rejected the call without running it.
    #[error("circuit open for {service_name}, retry after {:.1}s", retry_after.as_secs_f64())]
    Open {
        /// Service whose circuit is open.
        service_name: String,
        /// Remaining cooldown.
        retry_after: Duration,
    },

    /// The call ran and failed.
    #[error("{0}")]
    Operation(#[source] E),
}

impl<E> CircuitError<E> {
    /// Whether the call was rejected by an open circuit.
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The operation's own failure, if it ran.
    pub fn into_operation(self) -> Option<E> {
        match self {
            Self::Operation(error) => Some(error),
            Self::Open { .. } => None,
        }
    }
}

/// Result type for calls guarded by a circuit
pub type CircuitResult<T, E> = Result<T, CircuitError<E>>;

//==============================================================================
// State
//==============================================================================

/// Circuit breaker states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CircuitState {
    /// Circuit is closed, allowing requests
    Closed,
    /// Circuit is open, rejecting requests
    Open,
    /// Circuit is half-open, allowing one trial request
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => write!(f, "CLOSED"),
            CircuitState::Open => write!(f, "OPEN"),
            CircuitState::HalfOpen => write!(f, "HALF_OPEN"),
        }
    }
}

/// Per-call overrides for [`CircuitBreakerRegistry::execute_with`].
///
/// Overrides are stored on the service's circuit and stay in effect for
/// later calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CircuitOverrides {
    /// Replacement failure threshold.
    pub failure_threshold: Option<u32>,
    /// Replacement recovery timeout.
    pub recovery_timeout: Option<Duration>,
}

impl CircuitOverrides {
    /// Override the failure threshold.
    pub fn failure_threshold(mut self, threshold: u32) -> Self {
        self.failure_threshold = Some(threshold);
        self
    }

    /// Override the recovery timeout.
    pub fn recovery_timeout(mut self, timeout: Duration) -> Self {
        self.recovery_timeout = Some(timeout);
        self
    }

    fn is_empty(&self) -> bool {
        self.failure_threshold.is_none() && self.recovery_timeout.is_none()
    }
}

/// Point-in-time view of one circuit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CircuitSnapshot {
    /// Service the circuit protects.
    pub service_name: String,
    /// Current state.
    pub state: CircuitState,
    /// Failures recorded since the last reset to zero.
    pub failure_count: u32,
    /// Failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a trial call.
    pub recovery_timeout: Duration,
    /// When the last failure was recorded.
    #[serde(skip)]
    pub last_failure_time: Option<Instant>,
    /// When the last success (or reset) was recorded.
    #[serde(skip)]
    pub last_success_time: Option<Instant>,
}

#[derive(Debug)]
struct ServiceCircuit {
    state: CircuitState,
    failure_count: u32,
    last_failure_time: Option<Instant>,
    last_success_time: Option<Instant>,
    failure_threshold: u32,
    recovery_timeout: Duration,
    trial_started: Option<Instant>,
}

enum Admission {
    Allowed,
    Rejected { retry_after: Duration },
}

impl ServiceCircuit {
    fn new(settings: CircuitSettings) -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            last_failure_time: None,
            last_success_time: None,
            failure_threshold: settings.failure_threshold.max(1),
            recovery_timeout: settings.recovery_timeout(),
            trial_started: None,
        }
    }

    fn apply(&mut self, overrides: CircuitOverrides) {
        if let Some(threshold) = overrides.failure_threshold {
            self.failure_threshold = threshold.max(1);
        }
        if let Some(timeout) = overrides.recovery_timeout {
            self.recovery_timeout = timeout;
        }
    }

    fn since_last_failure(&self, now: Instant) -> Option<Duration> {
        self.last_failure_time.map(|t| now.saturating_duration_since(t))
    }

    fn remaining_cooldown(&self, now: Instant) -> Duration {
        match self.since_last_failure(now) {
            Some(elapsed) => self.recovery_timeout.saturating_sub(elapsed),
            None => Duration::ZERO,
        }
    }

    /// Decide whether a call may proceed, performing the OPEN -> HALF_OPEN
    /// transition and claiming the trial lease when it does.
    fn admit(&mut self, now: Instant) -> (Admission, Option<CircuitState>) {
        match self.state {
            CircuitState::Closed => (Admission::Allowed, None),
            CircuitState::Open => {
                let cooled_down = self
                    .since_last_failure(now)
                    .map_or(true, |elapsed| elapsed > self.recovery_timeout);
                if cooled_down {
                    self.state = CircuitState::HalfOpen;
                    self.trial_started = Some(now);
                    (Admission::Allowed, Some(CircuitState::Open))
                } else {
                    (Admission::Rejected { retry_after: self.remaining_cooldown(now) }, None)
                }
            }
            CircuitState::HalfOpen => match self.trial_started {
                Some(started) if now.saturating_duration_since(started) < self.recovery_timeout => {
                    let retry_after = self
                        .recovery_timeout
                        .saturating_sub(now.saturating_duration_since(started));
                    (Admission::Rejected { retry_after }, None)
                }
                _ => {
                    self.trial_started = Some(now);
                    (Admission::Allowed, None)
                }
            },
        }
    }

    fn snapshot(&self, service_name: &str) -> CircuitSnapshot {
        CircuitSnapshot {
            service_name: service_name.to_string(),
            state: self.state,
            failure_count: self.failure_count,
            failure_threshold: self.failure_threshold,
            recovery_timeout: self.recovery_timeout,
            last_failure_time: self.last_failure_time,
            last_success_time: self.last_success_time,
        }
    }
}

//==============================================================================
// Registry
//==============================================================================

/// Circuit breakers keyed by service name.
///
/// Generic over [`Clock`] so cooldowns can be driven by a
/// [`MockClock`](crate::time::MockClock) in tests.
pub struct CircuitBreakerRegistry<C: Clock = SystemClock> {
    circuits: DashMap<String, Arc<Mutex<ServiceCircuit>>>,
    defaults: CircuitSettings,
    configured: HashMap<String, CircuitSettings>,
    clock: C,
}

impl<C: Clock> fmt::Debug for CircuitBreakerRegistry<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CircuitBreakerRegistry")
            .field("defaults", &self.defaults)
            .field("circuits", &self.circuits.len())
            .finish()
    }
}

impl CircuitBreakerRegistry<SystemClock> {
    /// Registry using the system clock.
    pub fn new(config: &ResilienceConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for CircuitBreakerRegistry<SystemClock> {
    fn default() -> Self {
        Self::new(&ResilienceConfig::default())
    }
}

impl<C: Clock> CircuitBreakerRegistry<C> {
    /// Registry using a custom clock (useful for testing)
    pub fn with_clock(config: &ResilienceConfig, clock: C) -> Self {
        Self {
            circuits: DashMap::new(),
            defaults: config.circuit_defaults,
            configured: config.circuits.clone(),
            clock,
        }
    }

    /// The clock driving cooldowns.
    pub fn clock(&self) -> &C {
        &self.clock
    }

    fn settings_for(&self, service_name: &str) -> CircuitSettings {
        self.configured.get(service_name).copied().unwrap_or(self.defaults)
    }

    fn circuit(&self, service_name: &str) -> Arc<Mutex<ServiceCircuit>> {
        if let Some(existing) = self.circuits.get(service_name) {
            return Arc::clone(existing.value());
        }
        let settings = self.settings_for(service_name);
        let entry = self
            .circuits
            .entry(service_name.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ServiceCircuit::new(settings))));
        Arc::clone(entry.value())
    }

    /// Current state of the service's circuit, creating it if needed.
    ///
    /// This never performs the OPEN -> HALF_OPEN transition; that only
    /// happens when a call is attempted.
    pub fn get_state(&self, service_name: &str) -> CircuitState {
        self.circuit(service_name).lock().state
    }

    /// Point-in-time view of one circuit, creating it if needed.
    pub fn circuit_snapshot(&self, service_name: &str) -> CircuitSnapshot {
        self.circuit(service_name).lock().snapshot(service_name)
    }

    /// Views of every known circuit, sorted by service name.
    pub fn snapshot(&self) -> Vec<CircuitSnapshot> {
        let mut snapshots: Vec<CircuitSnapshot> = self
            .circuits
            .iter()
            .map(|entry| entry.value().lock().snapshot(entry.key()))
            .collect();
        snapshots.sort_by(|a, b| a.service_name.cmp(&b.service_name));
        snapshots
    }

    /// Replace the threshold and cooldown of a service's circuit.
    pub fn configure(&self, service_name: &str, settings: CircuitSettings) {
        let circuit = self.circuit(service_name);
        let mut circuit = circuit.lock();
        circuit.apply(CircuitOverrides {
            failure_threshold: Some(settings.failure_threshold),
            recovery_timeout: Some(settings.recovery_timeout()),
        });
    }

    /// Record a successful call.
    pub fn record_success(&self, service_name: &str) {
        let now = self.clock.now();
        let circuit = self.circuit(service_name);
        let mut circuit = circuit.lock();
        circuit.last_success_time = Some(now);

        match circuit.state {
            CircuitState::Closed => circuit.failure_count = 0,
            CircuitState::HalfOpen => {
                circuit.state = CircuitState::Closed;
                circuit.failure_count = 0;
                circuit.trial_started = None;
                log_transition(service_name, CircuitState::HalfOpen, &circuit);
            }
            CircuitState::Open => {
                // Only reachable when a caller bypassed `is_open`.
                emit(
                    EventLevel::Warn,
                    COMPONENT,
                    "success recorded while circuit is open",
                    &circuit_context(service_name, &circuit),
                );
            }
        }
    }

    /// Record a failed call; returns whether the circuit is now open.
    ///
    /// `threshold`, when given, replaces the circuit's failure threshold
    /// before the decision and stays in effect for later calls.
    pub fn record_failure<E>(&self, service_name: &str, failure: &E, threshold: Option<u32>) -> bool
    where
        E: fmt::Display + ?Sized,
    {
        let now = self.clock.now();
        let circuit = self.circuit(service_name);
        let mut circuit = circuit.lock();

        circuit.failure_count = circuit.failure_count.saturating_add(1);
        circuit.last_failure_time = Some(now);
        circuit.trial_started = None;

        if let Some(threshold) = threshold {
            circuit.failure_threshold = threshold.max(1);
        }
        let previous = circuit.state;
        let opens = match previous {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => circuit.failure_count >= circuit.failure_threshold,
            CircuitState::Open => false,
        };

        let mut context = circuit_context(service_name, &circuit);
        context.insert("error".into(), json!(failure.to_string()));
        emit(EventLevel::Debug, COMPONENT, "failure recorded", &context);

        if opens {
            circuit.state = CircuitState::Open;
            log_transition(service_name, previous, &circuit);
        }

        circuit.state == CircuitState::Open
    }

    /// Whether calls to the service are currently rejected.
    ///
    /// When the cooldown has elapsed this moves the circuit to HALF_OPEN and
    /// returns `false`: the caller now holds the single trial and must report
    /// its outcome with [`record_success`](Self::record_success) or
    /// [`record_failure`](Self::record_failure).
    pub fn is_open(&self, service_name: &str) -> bool {
        matches!(self.admit(service_name), Admission::Rejected { .. })
    }

    /// Remaining cooldown for an open circuit.
    pub fn remaining_cooldown(&self, service_name: &str) -> Option<Duration> {
        let now = self.clock.now();
        let circuit = self.circuit(service_name);
        let circuit = circuit.lock();
        (circuit.state == CircuitState::Open).then(|| circuit.remaining_cooldown(now))
    }

    /// Restore a circuit to CLOSED with a zero failure count.
    ///
    /// Returns `false` if the service had no circuit yet.
    pub fn reset(&self, service_name: &str) -> bool {
        let Some(existing) = self.circuits.get(service_name).map(|c| Arc::clone(c.value())) else {
            return false;
        };
        let now = self.clock.now();
        let mut circuit = existing.lock();
        let previous = circuit.state;
        let (threshold, timeout) = (circuit.failure_threshold, circuit.recovery_timeout);

        *circuit = ServiceCircuit::new(CircuitSettings::default());
        circuit.failure_threshold = threshold;
        circuit.recovery_timeout = timeout;
        circuit.last_success_time = Some(now);

        emit(
            EventLevel::Info,
            COMPONENT,
            &format!("circuit reset from {previous}"),
            &circuit_context(service_name, &circuit),
        );
        true
    }

    fn admit(&self, service_name: &str) -> Admission {
        let now = self.clock.now();
        let circuit = self.circuit(service_name);
        let mut circuit = circuit.lock();
        let (admission, transitioned_from) = circuit.admit(now);
        if let Some(previous) = transitioned_from {
            log_transition(service_name, previous, &circuit);
        }
        admission
    }

    /// Run `operation` through the service's circuit.
    ///
    /// # Errors
    ///
    /// [`CircuitError::Open`] when the call was rejected, or
    /// [`CircuitError::Operation`] with the operation's own failure.
    pub fn execute<T, E, F>(&self, service_name: &str, operation: F) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        self.execute_with(service_name, CircuitOverrides::default(), operation, None::<fn() -> Result<T, E>>)
    }

    /// Run `operation`, or `fallback` if the circuit rejects the call.
    ///
    /// # Errors
    ///
    /// [`CircuitError::Operation`] with the failure of whichever function ran.
    pub fn execute_with_fallback<T, E, F, Fb>(
        &self,
        service_name: &str,
        operation: F,
        fallback: Fb,
    ) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        Fb: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        self.execute_with(service_name, CircuitOverrides::default(), operation, Some(fallback))
    }

    /// Run `operation` with optional per-service overrides and fallback.
    ///
    /// Checks the circuit, runs the operation or falls back, then records
    /// the outcome. Fallback results are not recorded.
    ///
    /// # Errors
    ///
    /// See [`execute`](Self::execute).
    pub fn execute_with<T, E, F, Fb>(
        &self,
        service_name: &str,
        overrides: CircuitOverrides,
        operation: F,
        fallback: Option<Fb>,
    ) -> CircuitResult<T, E>
    where
        F: FnOnce() -> Result<T, E>,
        Fb: FnOnce() -> Result<T, E>,
        E: fmt::Display,
    {
        if !overrides.is_empty() {
            self.circuit(service_name).lock().apply(overrides);
        }

        if let Admission::Rejected { retry_after } = self.admit(service_name) {
            return match fallback {
                Some(fallback) => {
                    let mut context = Context::new();
                    context.insert("service".into(), json!(service_name));
                    emit(EventLevel::Info, COMPONENT, "circuit open, using fallback", &context);
                    fallback().map_err(CircuitError::Operation)
                }
                None => Err(CircuitError::Open { service_name: service_name.to_string(), retry_after }),
            };
        }

        match operation() {
            Ok(value) => {
                self.record_success(service_name);
                Ok(value)
            }
            Err(error) => {
                self.record_failure(service_name, &error, None);
                Err(CircuitError::Operation(error))
            }
        }
    }
}

fn circuit_context(service_name: &str, circuit: &ServiceCircuit) -> Context {
    let mut context = Context::new();
    context.insert("service".into(), json!(service_name));
    context.insert("state".into(), json!(circuit.state.to_string()));
    context.insert("failure_count".into(), json!(circuit.failure_count));
    context.insert("failure_threshold".into(), json!(circuit.failure_threshold));
    context
}

fn log_transition(service_name: &str, from: CircuitState, circuit: &ServiceCircuit) {
    let level = match circuit.state {
        CircuitState::Open => EventLevel::Warn,
        CircuitState::HalfOpen | CircuitState::Closed => EventLevel::Info,
    };
    let mut context = circuit_context(service_name, circuit);
    context.insert("previous_state".into(), json!(from.to_string()));
    emit(level, COMPONENT, &format!("circuit {} -> {}", from, circuit.state), &context);
}
