//! Resilience benchmarks
//!
//! Benchmarks for failure classification, circuit registry bookkeeping,
//! context redaction and retry sequencing against a mock clock.
//!
//! Run with: `cargo bench --bench resilience_bench -p bulwark-common
//! --features runtime`

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bulwark_common::config::{CircuitSettings, ResilienceConfig};
use bulwark_common::error::{Context, Failure, RemoteCallFailure};
use bulwark_common::privacy::redact_context;
use bulwark_common::resilience::{
    CircuitBreakerRegistry, ErrorResponseBuilder, RetriableClassifier, RetryExecutor, RetryPolicy,
};
use bulwark_common::time::MockClock;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use serde_json::json;

// ============================================================================
// Classification Benchmarks
// ============================================================================

fn bench_classifier(c: &mut Criterion) {
    let mut group = c.benchmark_group("classifier");
    let classifier = RetriableClassifier::default();

    for code in [200_u16, 404, 503] {
        let failure: Failure =
            RemoteCallFailure::new("ledger", "fetch", "status").with_status(code).into();
        group.bench_with_input(BenchmarkId::new("status", code), &failure, |b, failure| {
            b.iter(|| black_box(classifier.is_retriable(failure)));
        });
    }

    let timeout: Failure = RemoteCallFailure::timeout("ledger", "fetch", "deadline").into();
    group.bench_function("transport_timeout", |b| {
        b.iter(|| black_box(classifier.is_retriable(&timeout)));
    });

    group.finish();
}

// ============================================================================
// Circuit Registry Benchmarks
// ============================================================================

fn bench_circuit_registry(c: &mut Criterion) {
    let mut group = c.benchmark_group("circuit_registry");
    let config = ResilienceConfig {
        circuit_defaults: CircuitSettings::new(1_000_000, 60),
        ..Default::default()
    };

    group.bench_function("is_open_closed_circuit", |b| {
        let registry = CircuitBreakerRegistry::with_clock(&config, MockClock::new());
        b.iter(|| black_box(registry.is_open("ledger")));
    });

    group.bench_function("record_failure_then_success", |b| {
        let registry = CircuitBreakerRegistry::with_clock(&config, MockClock::new());
        b.iter(|| {
            black_box(registry.record_failure("ledger", "503", None));
            registry.record_success("ledger");
        });
    });

    for services in [10_usize, 100] {
        group.bench_with_input(BenchmarkId::new("snapshot", services), &services, |b, &n| {
            let registry = CircuitBreakerRegistry::with_clock(&config, MockClock::new());
            for i in 0..n {
                registry.record_failure(&format!("service-{i}"), "503", None);
            }
            b.iter(|| black_box(registry.snapshot()));
        });
    }

    group.finish();
}

// ============================================================================
// Redaction Benchmarks
// ============================================================================

fn bench_redaction(c: &mut Criterion) {
    let mut group = c.benchmark_group("redaction");

    let mut flat = Context::new();
    flat.insert("tenant".into(), json!("acme"));
    flat.insert("api_token".into(), json!("abcd1234"));
    flat.insert("page".into(), json!(3));

    let mut nested = flat.clone();
    nested.insert(
        "request".into(),
        json!({
            "headers": { "authorization": "Bearer abc", "accept": "application/json" },
            "rows": [{ "account_id": "acc-1", "amount": 12 }, { "account_id": "acc-2", "amount": 7 }],
        }),
    );

    group.bench_function("flat_context", |b| b.iter(|| black_box(redact_context(&flat))));
    group.bench_function("nested_context", |b| b.iter(|| black_box(redact_context(&nested))));

    group.finish();
}

// ============================================================================
// Retry and Response Benchmarks
// ============================================================================

fn bench_retry_and_responses(c: &mut Criterion) {
    let mut group = c.benchmark_group("retry");
    let classifier = RetriableClassifier::default();

    group.bench_function("three_attempts_mock_clock", |b| {
        let policy = RetryPolicy::builder()
            .max_retries(2)
            .base_delay(Duration::from_millis(100))
            .build()
            .expect("valid retry policy for benchmarks");
        let executor = RetryExecutor::with_sleeper(policy, MockClock::new());
        b.iter(|| {
            let calls = AtomicU32::new(0);
            let result = executor.execute_classified(
                || {
                    if calls.fetch_add(1, Ordering::Relaxed) < 2 {
                        Err(Failure::from(
                            RemoteCallFailure::new("ledger", "fetch", "unavailable").with_status(503),
                        ))
                    } else {
                        Ok(())
                    }
                },
                &classifier,
            );
            black_box(result)
        });
    });

    group.bench_function("backoff_delay", |b| {
        let policy = RetryPolicy::default();
        b.iter(|| {
            for k in 0..8 {
                black_box(policy.backoff_delay(k));
            }
        });
    });

    let config = ResilienceConfig::default();
    let registry = Arc::new(CircuitBreakerRegistry::with_clock(&config, MockClock::new()));
    let builder = ErrorResponseBuilder::new(registry, RetriableClassifier::from_config(&config));
    let failure: Failure = RemoteCallFailure::new("ledger", "fetch", "bad gateway").with_status(502).into();
    let mut context = Context::new();
    context.insert("api_token".into(), json!("abcd1234"));

    group.bench_function("build_response", |b| {
        b.iter(|| black_box(builder.build_response(&failure, "sync", "pull", &context)));
    });

    group.finish();
}

criterion_group!(
    resilience,
    bench_classifier,
    bench_circuit_registry,
    bench_redaction,
    bench_retry_and_responses,
);
criterion_main!(resilience);
