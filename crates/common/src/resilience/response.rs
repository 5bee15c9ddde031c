//! Structured error responses
//!
//! [`ErrorResponseBuilder`] turns a [`Failure`] into an [`ErrorResponse`]
//! that is safe to hand back to a caller or persist: every context map is
//! redacted, remote failures carry their retriability and the current state
//! of the service's circuit, and each kind gets a recovery suggestion.
//!
//! Building a response never changes circuit state, so building twice from
//! the same inputs yields the same response apart from the timestamp.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;

use crate::error::{
    AuthenticationFailure, Context, Failure, FailureKind, RemoteCallFailure, ValidationFailure,
};
use crate::observability::{emit, EventLevel};
use crate::privacy::{redact_context, redact_value};
use crate::resilience::circuit_breaker::{CircuitBreakerRegistry, CircuitState};
use crate::resilience::classifier::RetriableClassifier;
use crate::time::{Clock, SystemClock};

const COMPONENT: &str = "error_response";

/// Status marker carried by every error response.
pub const ERROR_STATUS: &str = "error";

/// Kind-specific part of an [`ErrorResponse`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetails {
    /// Details of a remote-call failure.
    RemoteCall {
        /// Service that failed.
        service_name: String,
        /// Operation attempted against it.
        operation: String,
        /// Whether retrying may succeed.
        retriable: bool,
        /// State of the service's circuit when the response was built.
        circuit_state: CircuitState,
        /// Status code, when a response was received.
        status_code: Option<u16>,
        /// Raw response body, when one was received.
        raw_response: Option<String>,
    },
    /// Details of a validation failure.
    Validation {
        /// Kind of data that was rejected.
        data_kind: String,
        /// Per-field messages.
        field_errors: BTreeMap<String, String>,
    },
    /// Details of an authentication failure.
    Authentication {
        /// Service the credential belongs to.
        service_name: String,
        /// Whether a credential refresh was attempted.
        refresh_attempted: bool,
        /// Outcome of the refresh, when one was attempted.
        refresh_succeeded: Option<bool>,
        /// Redacted authentication context.
        auth_context: Context,
    },
}

/// Caller-facing description of a failure.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Always `"error"`.
    pub status: String,
    /// Component that was running.
    pub component: String,
    /// Operation that was running.
    pub operation: String,
    /// Failure kind label.
    pub error_kind: FailureKind,
    /// Failure message.
    pub message: String,
    /// When the response was built.
    pub timestamp: DateTime<Utc>,
    /// What the caller can do about it.
    pub recovery_suggestion: String,
    /// Kind-specific details.
    pub details: FailureDetails,
    /// Redacted diagnostic context.
    pub context: Context,
}

impl ErrorResponse {
    /// Whether the failure is worth retrying.
    pub fn is_retriable(&self) -> bool {
        matches!(self.details, FailureDetails::RemoteCall { retriable: true, .. })
    }

    /// Circuit state for remote-call failures.
    pub fn circuit_state(&self) -> Option<CircuitState> {
        match self.details {
            FailureDetails::RemoteCall { circuit_state, .. } => Some(circuit_state),
            _ => None,
        }
    }

    /// Serialize to a JSON string.
    ///
    /// # Errors
    ///
    /// Returns the serializer's error; none of the fields can produce one in
    /// practice.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Outcome of the credential refresh hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RefreshOutcome {
    NotAttempted,
    Succeeded,
    Failed,
}

/// Builds [`ErrorResponse`]s using the shared circuit registry.
#[derive(Debug, Clone)]
pub struct ErrorResponseBuilder<C: Clock = SystemClock> {
    registry: Arc<CircuitBreakerRegistry<C>>,
    classifier: RetriableClassifier,
}

impl<C: Clock> ErrorResponseBuilder<C> {
    /// Builder reading circuit state from `registry`.
    pub fn new(registry: Arc<CircuitBreakerRegistry<C>>, classifier: RetriableClassifier) -> Self {
        Self { registry, classifier }
    }

    /// Build a response for `failure`.
    pub fn build_response(
        &self,
        failure: &Failure,
        component: &str,
        operation: &str,
        context: &Context,
    ) -> ErrorResponse {
        self.build(failure, component, operation, context, RefreshOutcome::NotAttempted)
    }

    /// Build a response, first invoking `refresh` if `failure` is an
    /// authentication failure.
    ///
    /// The refresh outcome is reported in the response; `refresh` is not
    /// called for other failure kinds.
    pub fn build_response_with_refresh<F>(
        &self,
        failure: &Failure,
        component: &str,
        operation: &str,
        context: &Context,
        refresh: F,
    ) -> ErrorResponse
    where
        F: FnOnce() -> Result<(), Failure>,
    {
        let outcome = match failure {
            Failure::Authentication(auth) => match refresh() {
                Ok(()) => RefreshOutcome::Succeeded,
                Err(refresh_failure) => {
                    let mut event = Context::new();
                    event.insert("service".into(), json!(auth.service_name));
                    event.insert("error".into(), json!(refresh_failure.to_string()));
                    emit(EventLevel::Warn, COMPONENT, "credential refresh failed", &event);
                    RefreshOutcome::Failed
                }
            },
            _ => RefreshOutcome::NotAttempted,
        };
        self.build(failure, component, operation, context, outcome)
    }

    fn build(
        &self,
        failure: &Failure,
        component: &str,
        operation: &str,
        context: &Context,
        refresh: RefreshOutcome,
    ) -> ErrorResponse {
        let (details, recovery_suggestion, own_context) = match failure {
            Failure::RemoteCall(remote) => self.remote_details(remote),
            Failure::Validation(invalid) => validation_details(invalid),
            Failure::Authentication(auth) => authentication_details(auth, refresh),
        };

        let mut merged = own_context;
        merged.extend(context.iter().map(|(k, v)| (k.clone(), v.clone())));

        let response = ErrorResponse {
            status: ERROR_STATUS.to_string(),
            component: component.to_string(),
            operation: operation.to_string(),
            error_kind: failure.kind(),
            message: failure.message().to_string(),
            timestamp: DateTime::<Utc>::from(self.registry.clock().system_time()),
            recovery_suggestion,
            details,
            context: redact_context(&merged),
        };

        let mut event = response.context.clone();
        event.insert("operation".into(), json!(operation));
        event.insert("error_kind".into(), json!(response.error_kind));
        event.insert("severity".into(), json!(failure.severity()));
        emit(EventLevel::Error, component, &response.message, &event);

        response
    }

    fn remote_details(&self, remote: &RemoteCallFailure) -> (FailureDetails, String, Context) {
        let retriable = self.classifier.is_retriable_remote(remote);
        let circuit_state = self.registry.get_state(&remote.service_name);
        let service = &remote.service_name;

        let suggestion = match (retriable, circuit_state) {
            (_, CircuitState::Open) => format!(
                "Service '{service}' is temporarily unavailable and its circuit is open; retry after the cooldown period."
            ),
            (true, _) => {
                format!("Transient failure calling '{service}'; retry with exponential backoff.")
            }
            (false, _) => match remote.status_code {
                Some(code) => format!(
                    "Request to '{service}' was rejected with status {code}; fix the request before retrying."
                ),
                None => format!("Request to '{service}' failed; manual intervention required."),
            },
        };

        let details = FailureDetails::RemoteCall {
            service_name: remote.service_name.clone(),
            operation: remote.operation.clone(),
            retriable,
            circuit_state,
            status_code: remote.status_code,
            raw_response: remote.raw_response.as_deref().map(redact_raw_response),
        };
        (details, suggestion, remote.context.clone())
    }
}

/// Redact a raw provider body when it is a JSON document; other bodies are
/// passed through unchanged.
fn redact_raw_response(raw: &str) -> String {
    match serde_json::from_str::<serde_json::Value>(raw) {
        Ok(body) if body.is_object() || body.is_array() => {
            serde_json::to_string(&redact_value(&body)).unwrap_or_else(|_| raw.to_string())
        }
        _ => raw.to_string(),
    }
}

fn validation_details(invalid: &ValidationFailure) -> (FailureDetails, String, Context) {
    let suggestion = if invalid.field_errors.is_empty() {
        format!("Correct the {} data and resubmit.", invalid.data_kind)
    } else {
        let fields: Vec<&str> = invalid.field_errors.keys().map(String::as_str).collect();
        format!("Correct the invalid fields ({}) and resubmit.", fields.join(", "))
    };
    let details = FailureDetails::Validation {
        data_kind: invalid.data_kind.clone(),
        field_errors: invalid.field_errors.clone(),
    };
    (details, suggestion, invalid.context.clone())
}

fn authentication_details(
    auth: &AuthenticationFailure,
    refresh: RefreshOutcome,
) -> (FailureDetails, String, Context) {
    let service = &auth.service_name;
    let suggestion = match refresh {
        RefreshOutcome::NotAttempted => {
            format!("Re-authenticate with '{service}' and retry the operation.")
        }
        RefreshOutcome::Succeeded => {
            format!("Credentials for '{service}' were refreshed; retry the operation.")
        }
        RefreshOutcome::Failed => format!(
            "Credential refresh for '{service}' failed; check the configured credentials."
        ),
    };
    let details = FailureDetails::Authentication {
        service_name: auth.service_name.clone(),
        refresh_attempted: refresh != RefreshOutcome::NotAttempted,
        refresh_succeeded: match refresh {
            RefreshOutcome::NotAttempted => None,
            RefreshOutcome::Succeeded => Some(true),
            RefreshOutcome::Failed => Some(false),
        },
        auth_context: auth.redacted_auth_context(),
    };
    (details, suggestion, Context::new())
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::config::{CircuitSettings, ResilienceConfig};
    use crate::time::MockClock;

    fn builder(threshold: u32) -> (ErrorResponseBuilder<MockClock>, Arc<CircuitBreakerRegistry<MockClock>>) {
        let config = ResilienceConfig {
            circuit_defaults: CircuitSettings::new(threshold, 60),
            ..Default::default()
        };
        let registry = Arc::new(CircuitBreakerRegistry::with_clock(&config, MockClock::new()));
        let builder =
            ErrorResponseBuilder::new(Arc::clone(&registry), RetriableClassifier::from_config(&config));
        (builder, registry)
    }

    fn unavailable() -> Failure {
        RemoteCallFailure::new("ledger", "fetch_accounts", "service unavailable")
            .with_status(503)
            .with_raw_response("{\"error\":\"maintenance\"}")
            .into()
    }

    /// Validates `build_response` behavior for the transient remote failure
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms status, kind and message are carried over.
    /// - Confirms the response is retriable with a CLOSED circuit.
    #[test]
    fn test_remote_response_fields() {
        let (builder, _) = builder(5);
        let response = builder.build_response(&unavailable(), "sync", "pull_ledger", &Context::new());

        assert_eq!(response.status, "error");
        assert_eq!(response.component, "sync");
        assert_eq!(response.operation, "pull_ledger");
        assert_eq!(response.error_kind, FailureKind::RemoteCall);
        assert_eq!(response.message, "service unavailable");
        assert!(response.is_retriable());
        assert_eq!(response.circuit_state(), Some(CircuitState::Closed));
        assert!(response.recovery_suggestion.contains("retry with exponential backoff"));
        match &response.details {
            FailureDetails::RemoteCall { status_code, raw_response, .. } => {
                assert_eq!(*status_code, Some(503));
                assert!(raw_response.as_deref().unwrap().contains("maintenance"));
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_remote_response_reports_open_circuit() {
        let (builder, registry) = builder(1);
        registry.record_failure("ledger", "503", None);

        let response = builder.build_response(&unavailable(), "sync", "pull", &Context::new());
        assert_eq!(response.circuit_state(), Some(CircuitState::Open));
        assert!(response.recovery_suggestion.contains("circuit is open"));
    }

    #[test]
    fn test_non_retriable_remote_response() {
        let (builder, _) = builder(5);
        let failure: Failure = RemoteCallFailure::new("ledger", "fetch", "not found").with_status(404).into();

        let response = builder.build_response(&failure, "sync", "pull", &Context::new());
        assert!(!response.is_retriable());
        assert!(response.recovery_suggestion.contains("status 404"));
    }

    /// Validates `build_response` redaction for the sensitive context
    /// scenario.
    ///
    /// Assertions:
    /// - Ensures the token value never appears in the serialized response.
    /// - Confirms the key is kept with the redaction marker.
    #[test]
    fn test_context_is_redacted() {
        let (builder, _) = builder(5);
        let mut context = Context::new();
        context.insert("api_token".into(), json!("abcd1234"));
        context.insert("batch".into(), json!(7));

        let response = builder.build_response(&unavailable(), "sync", "pull", &context);
        let body = response.to_json().unwrap();

        assert!(!body.contains("abcd1234"));
        assert_eq!(response.context["api_token"], "[REDACTED]");
        assert_eq!(response.context["batch"], 7);
    }

    /// Validates `build_response` redaction for a JSON provider body.
    ///
    /// Assertions:
    /// - Ensures an echoed access token is replaced by the marker.
    /// - Confirms non-JSON bodies are kept verbatim.
    #[test]
    fn test_raw_response_is_redacted() {
        let (builder, _) = builder(5);
        let failure: Failure = RemoteCallFailure::new("ledger", "token_exchange", "bad gateway")
            .with_status(502)
            .with_raw_response(r#"{"error":"upstream","request":{"access_token":"at-5f4e3d2c1b"}}"#)
            .into();

        let response = builder.build_response(&failure, "auth", "exchange", &Context::new());
        let body = response.to_json().unwrap();
        assert!(!body.contains("at-5f4e3d2c1b"));
        assert!(body.contains("upstream"));

        let plain: Failure = RemoteCallFailure::new("ledger", "fetch", "bad gateway")
            .with_status(502)
            .with_raw_response("<html>502 Bad Gateway</html>")
            .into();
        match builder.build_response(&plain, "sync", "pull", &Context::new()).details {
            FailureDetails::RemoteCall { raw_response, .. } => {
                assert_eq!(raw_response.as_deref(), Some("<html>502 Bad Gateway</html>"));
            }
            other => panic!("unexpected details {other:?}"),
        }
    }

    #[test]
    fn test_auth_context_is_redacted() {
        let (builder, _) = builder(5);
        let failure: Failure = AuthenticationFailure::new("ledger", "token rejected")
            .with_auth_context("client_secret", "hunter2-hunter2")
            .with_auth_context("tenant", "acme")
            .into();

        let response = builder.build_response(&failure, "sync", "login", &Context::new());
        let body = response.to_json().unwrap();

        assert!(!body.contains("hunter2"));
        assert!(body.contains("acme"));
        assert!(!response.is_retriable());
        assert_eq!(response.circuit_state(), None);
    }

    #[test]
    fn test_validation_response() {
        let (builder, _) = builder(5);
        let failure: Failure = ValidationFailure::new("budget_row", "row rejected")
            .with_field_error("amount", "must be positive")
            .with_context("row", 12)
            .into();

        let response = builder.build_response(&failure, "import", "load_rows", &Context::new());
        assert_eq!(response.error_kind, FailureKind::Validation);
        assert!(response.recovery_suggestion.contains("amount"));
        assert_eq!(response.context["row"], 12);

        let value: serde_json::Value = serde_json::from_str(&response.to_json().unwrap()).unwrap();
        assert_eq!(value["details"]["kind"], "validation");
        assert_eq!(value["details"]["field_errors"]["amount"], "must be positive");
    }

    /// Validates `build_response_with_refresh` behavior for the refresh
    /// hook scenarios.
    ///
    /// Assertions:
    /// - Confirms the hook runs for authentication failures only.
    /// - Confirms success and failure outcomes are reported.
    #[test]
    fn test_refresh_hook() {
        let (builder, _) = builder(5);
        let auth: Failure = AuthenticationFailure::new("ledger", "expired").into();
        let calls = Cell::new(0);

        let refreshed = builder.build_response_with_refresh(&auth, "sync", "pull", &Context::new(), || {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert!(matches!(
            refreshed.details,
            FailureDetails::Authentication { refresh_attempted: true, refresh_succeeded: Some(true), .. }
        ));

        let failed = builder.build_response_with_refresh(&auth, "sync", "pull", &Context::new(), || {
            calls.set(calls.get() + 1);
            Err(AuthenticationFailure::new("ledger", "refresh denied").into())
        });
        assert!(matches!(
            failed.details,
            FailureDetails::Authentication { refresh_succeeded: Some(false), .. }
        ));

        let remote = builder.build_response_with_refresh(&unavailable(), "sync", "pull", &Context::new(), || {
            calls.set(calls.get() + 1);
            Ok(())
        });
        assert_eq!(remote.error_kind, FailureKind::RemoteCall);
        assert_eq!(calls.get(), 2);
    }

    #[test]
    fn test_building_does_not_change_circuit_state() {
        let (builder, registry) = builder(1);
        let first = builder.build_response(&unavailable(), "sync", "pull", &Context::new());
        let second = builder.build_response(&unavailable(), "sync", "pull", &Context::new());

        assert_eq!(registry.get_state("ledger"), CircuitState::Closed);
        assert_eq!(first, second);
    }
}
