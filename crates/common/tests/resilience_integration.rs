//! Integration tests for resilience module
//!
//! Tests retry, circuit breaking and their composition against simulated
//! dependencies driven by a mock clock.

#![cfg(feature = "runtime")]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::config::{CircuitSettings, ResilienceConfig, RetrySettings};
use bulwark_common::error::{Context, Failure, RemoteCallFailure};
use bulwark_common::resilience::{
    execute_with_retry, CircuitBreakerRegistry, CircuitError, CircuitState, DependencyOutcome,
    ErrorResponseBuilder, ProtectedCall, RetriableClassifier, RetryExecutor, RetryPolicy,
};
use bulwark_common::time::{Clock, MockClock};

fn status(service: &str, code: u16) -> Failure {
    RemoteCallFailure::new(service, "fetch", format!("status {code}")).with_status(code).into()
}

fn config(threshold: u32, recovery_secs: u64, max_retries: u32) -> ResilienceConfig {
    ResilienceConfig {
        retry: RetrySettings { max_retries, jitter_fraction: 0.0, ..Default::default() },
        circuit_defaults: CircuitSettings::new(threshold, recovery_secs),
        ..Default::default()
    }
}

/// Validates retry backoff with exact, jitter-free delays.
///
/// # Test Steps
/// 1. Configure base delay 1s, factor 2, no jitter
/// 2. Fail twice with a retriable status, then succeed
/// 3. Verify three calls and sleeps of exactly 1s then 2s
#[test]
fn test_retry_exponential_backoff_exact_delays() {
    let clock = MockClock::new();
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .base_delay(Duration::from_secs(1))
        .backoff_factor(2.0)
        .jitter_fraction(0.0)
        .build()
        .expect("valid policy");
    let executor = RetryExecutor::with_sleeper(policy, clock.clone());
    let calls = AtomicU32::new(0);

    let result = executor.execute_classified(
        || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(status("ledger", 503))
            } else {
                Ok("posted")
            }
        },
        &RetriableClassifier::default(),
    );

    assert_eq!(result, Ok("posted"));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
}

/// Validates the backoff sequence when the dependency is unreachable.
///
/// # Test Steps
/// 1. Fail twice with a connection fault (no status code), then succeed
/// 2. Run through the classified executor with a 1s base delay, factor 2
/// 3. Verify three calls, sleeps of exactly 1s then 2s, and the success value
#[test]
fn test_retry_connectivity_failures_exact_delays() {
    let clock = MockClock::new();
    let policy = RetryPolicy::builder()
        .max_retries(3)
        .base_delay(Duration::from_secs(1))
        .backoff_factor(2.0)
        .jitter_fraction(0.0)
        .build()
        .expect("valid policy");
    let executor = RetryExecutor::with_sleeper(policy, clock.clone());
    let calls = AtomicU32::new(0);

    let result = executor.execute_classified(
        || {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Failure::from(RemoteCallFailure::connection("ledger", "fetch", "connection refused")))
            } else {
                Ok(42)
            }
        },
        &RetriableClassifier::default(),
    );

    assert_eq!(result, Ok(42));
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(clock.recorded_sleeps(), vec![Duration::from_secs(1), Duration::from_secs(2)]);
}

/// Validates the free-function form against connectivity failures.
#[test]
fn test_execute_with_retry_connectivity_failures() {
    let classifier = RetriableClassifier::default();
    let mut calls = 0;

    let result = execute_with_retry(
        || {
            calls += 1;
            if calls < 3 {
                Err(Failure::from(RemoteCallFailure::connection("ledger", "fetch", "connection reset")))
            } else {
                Ok("posted")
            }
        },
        |failure| classifier.is_retriable(failure),
        3,
        Duration::from_millis(1),
        2.0,
        0.0,
    );

    assert_eq!(result, Ok("posted"));
    assert_eq!(calls, 3);
}

/// Validates retries are bounded and the last failure is surfaced.
///
/// # Test Steps
/// 1. Configure max_retries = 2
/// 2. Fail on every attempt with distinct messages
/// 3. Verify exactly 3 calls and the third failure is returned
#[test]
fn test_retry_bounded_attempts_surface_last_failure() {
    let clock = MockClock::new();
    let executor = RetryExecutor::with_sleeper(
        RetryPolicy::builder().max_retries(2).jitter_fraction(0.0).build().expect("valid policy"),
        clock,
    );
    let mut codes = vec![500, 502, 504].into_iter();

    let result: Result<(), Failure> = executor.execute_classified(
        || Err(status("ledger", codes.next().unwrap_or(599))),
        &RetriableClassifier::default(),
    );

    match result {
        Err(Failure::RemoteCall(failure)) => assert_eq!(failure.status_code, Some(504)),
        other => panic!("expected final remote failure, got {other:?}"),
    }
}

/// Validates the circuit opens after exactly `failure_threshold` failures
/// and responses report its state.
///
/// # Test Steps
/// 1. Threshold 3 on service "ledger"
/// 2. Record three 503 failures, building a response after each
/// 3. Verify states CLOSED, CLOSED, OPEN and retriable responses throughout
#[test]
fn test_circuit_threshold_reflected_in_responses() {
    let config = config(3, 60, 0);
    let registry = Arc::new(CircuitBreakerRegistry::with_clock(&config, MockClock::new()));
    let builder = ErrorResponseBuilder::new(Arc::clone(&registry), RetriableClassifier::from_config(&config));

    let mut states = Vec::new();
    let mut last = None;
    for _ in 0..3 {
        let failure = status("ledger", 503);
        registry.record_failure("ledger", &failure, None);
        states.push(registry.get_state("ledger"));
        last = Some(builder.build_response(&failure, "sync", "pull_ledger", &Context::new()));
    }

    assert_eq!(states, vec![CircuitState::Closed, CircuitState::Closed, CircuitState::Open]);
    let response = last.expect("three responses built");
    assert!(response.is_retriable());
    assert_eq!(response.circuit_state(), Some(CircuitState::Open));

    let body: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
    assert_eq!(body["details"]["circuit_state"], "OPEN");
    assert_eq!(body["details"]["retriable"], true);
}

/// Validates the full OPEN -> HALF_OPEN -> CLOSED recovery cycle.
///
/// # Test Steps
/// 1. Open the circuit with one failure (threshold 1, recovery 30s)
/// 2. Verify calls are rejected without running the operation
/// 3. Advance past the recovery timeout
/// 4. Verify the next call runs as the trial and closes the circuit
#[test]
fn test_circuit_recovery_cycle() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(&config(1, 30, 0), clock.clone());
    let runs = AtomicU32::new(0);

    let first = registry.execute("ledger", || Err::<(), _>(status("ledger", 503)));
    assert!(matches!(first, Err(CircuitError::Operation(_))));

    let rejected = registry.execute("ledger", || {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, Failure>(())
    });
    assert!(matches!(rejected, Err(CircuitError::Open { .. })));
    assert_eq!(runs.load(Ordering::SeqCst), 0);

    clock.advance_secs(31);
    let trial = registry.execute("ledger", || {
        runs.fetch_add(1, Ordering::SeqCst);
        Ok::<_, Failure>("recovered")
    });

    assert_eq!(trial.ok(), Some("recovered"));
    assert_eq!(runs.load(Ordering::SeqCst), 1);
    assert_eq!(registry.get_state("ledger"), CircuitState::Closed);
}

/// Validates per-service isolation of circuit state.
#[test]
fn test_circuit_isolation_between_services() {
    let registry = CircuitBreakerRegistry::with_clock(&config(2, 60, 0), MockClock::new());

    registry.record_failure("ledger", "503", None);
    registry.record_failure("ledger", "503", None);
    registry.record_failure("mailer", "503", None);

    assert!(registry.is_open("ledger"));
    assert!(!registry.is_open("mailer"));
    assert!(!registry.is_open("payroll"));

    let names: Vec<String> = registry.snapshot().into_iter().map(|s| s.service_name).collect();
    assert_eq!(names, vec!["ledger", "mailer", "payroll"]);
}

/// Validates that a degraded optional dependency does not fail the
/// workflow once its circuit is open.
///
/// # Test Steps
/// 1. Guard with threshold 2 and two retries
/// 2. First call fails twice, opening the circuit mid-sequence
/// 3. Second call is skipped with the remaining cooldown
/// 4. After the cooldown the dependency recovers
#[test]
fn test_protected_call_degrades_and_recovers() {
    let clock = MockClock::new();
    let config = config(2, 60, 2);
    let registry = Arc::new(CircuitBreakerRegistry::with_clock(&config, clock.clone()));
    let guard = ProtectedCall::with_sleeper(&config, registry, clock.clone()).expect("valid config");

    let failed = guard.call_or_degrade("enrichment", "report", "enrich", || -> Result<u32, Failure> {
        Err(status("enrichment", 502))
    });
    assert!(matches!(failed, DependencyOutcome::Failed(_)));

    let skipped = guard.call_or_degrade("enrichment", "report", "enrich", || Ok(1));
    assert!(skipped.is_skipped());

    clock.advance_secs(61);
    let recovered = guard.call_or_degrade("enrichment", "report", "enrich", || Ok(7));
    assert_eq!(recovered.completed(), Some(7));
    assert_eq!(guard.registry().get_state("enrichment"), CircuitState::Closed);
}

/// Validates recovery timing uses the injected clock rather than wall time.
#[test]
fn test_remaining_cooldown_follows_mock_clock() {
    let clock = MockClock::new();
    let registry = CircuitBreakerRegistry::with_clock(&config(1, 60, 0), clock.clone());
    let start = clock.now();

    registry.record_failure("ledger", "503", None);
    clock.advance_secs(45);

    assert_eq!(registry.remaining_cooldown("ledger"), Some(Duration::from_secs(15)));
    assert_eq!(clock.now().duration_since(start), Duration::from_secs(45));
}

/// Validates the async retry path with real (short) sleeps.
#[tokio::test]
async fn test_execute_async_with_classifier() {
    let executor = RetryExecutor::new(
        RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(1))
            .build()
            .expect("valid policy"),
    );
    let classifier = RetriableClassifier::default();
    let calls = Arc::new(AtomicU32::new(0));

    let result = executor
        .execute_async(
            || {
                let calls = Arc::clone(&calls);
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) == 0 {
                        Err(Failure::from(RemoteCallFailure::timeout("ledger", "fetch", "deadline")))
                    } else {
                        Ok(())
                    }
                }
            },
            |failure| classifier.is_retriable(failure),
        )
        .await;

    assert!(result.is_ok());
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
