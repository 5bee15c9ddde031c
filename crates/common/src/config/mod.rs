//! Resilience configuration
//!
//! Plain data types describing retry, circuit-breaker and credential-cache
//! behaviour. They deserialize from TOML or JSON (missing fields fall back to
//! defaults) and are checked with [`ResilienceConfig::validate`] before use.
//! Loading from the environment or from disk lives in `bulwark-infra`.
//!
//! ```rust
//! use bulwark_common::config::ResilienceConfig;
//!
//! let config: ResilienceConfig =
//!     serde_json::from_str(r#"{ "retry": { "max_retries": 5 } }"#).unwrap();
//!
//! assert_eq!(config.retry.max_retries, 5);
//! assert_eq!(config.retry.base_delay_ms, 1_000);
//! assert!(config.validate().is_ok());
//! ```

pub mod constants;

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use constants::*;

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// A field holds a value outside its allowed range.
    #[error("invalid value for {field}: {message}")]
    Invalid {
        /// Dotted path of the offending field.
        field: String,
        /// What is wrong with it.
        message: String,
    },
}

impl ConfigError {
    fn invalid<F: Into<String>, M: Into<String>>(field: F, message: M) -> Self {
        Self::Invalid { field: field.into(), message: message.into() }
    }
}

/// Retry executor settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    /// Retries after the first attempt; zero means a single attempt.
    pub max_retries: u32,
    /// Delay before the first retry, in milliseconds.
    pub base_delay_ms: u64,
    /// Multiplier applied to the delay after each retry.
    pub backoff_factor: f64,
    /// Random spread applied to each delay, as a fraction of it.
    pub jitter_fraction: f64,
    /// Optional cap on a single delay, in milliseconds.
    pub max_delay_ms: Option<u64>,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            backoff_factor: DEFAULT_BACKOFF_FACTOR,
            jitter_fraction: DEFAULT_JITTER_FRACTION,
            max_delay_ms: None,
        }
    }
}

impl RetrySettings {
    /// Base delay as a [`Duration`].
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap as a [`Duration`], if configured.
    pub fn max_delay(&self) -> Option<Duration> {
        self.max_delay_ms.map(Duration::from_millis)
    }

    /// Validate retry settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_retries > MAX_MAX_RETRIES {
            return Err(ConfigError::invalid(
                "retry.max_retries",
                format!("must be at most {MAX_MAX_RETRIES}"),
            ));
        }
        if !self.backoff_factor.is_finite() || self.backoff_factor < 1.0 {
            return Err(ConfigError::invalid("retry.backoff_factor", "must be a finite value >= 1.0"));
        }
        if !(0.0..=1.0).contains(&self.jitter_fraction) {
            return Err(ConfigError::invalid("retry.jitter_fraction", "must be between 0.0 and 1.0"));
        }
        if let Some(max) = self.max_delay_ms {
            if max < self.base_delay_ms {
                return Err(ConfigError::invalid(
                    "retry.max_delay_ms",
                    "must be greater than or equal to base_delay_ms",
                ));
            }
        }
        Ok(())
    }
}

/// Per-service circuit-breaker settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitSettings {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// Cooldown before a trial call is allowed, in seconds.
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitSettings {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            recovery_timeout_secs: DEFAULT_RECOVERY_TIMEOUT_SECS,
        }
    }
}

impl CircuitSettings {
    /// Create settings with an explicit threshold and cooldown.
    pub const fn new(failure_threshold: u32, recovery_timeout_secs: u64) -> Self {
        Self { failure_threshold, recovery_timeout_secs }
    }

    /// Stricter settings for the most important dependencies: trip sooner,
    /// stay open longer.
    pub const fn critical() -> Self {
        Self { failure_threshold: 3, recovery_timeout_secs: 300 }
    }

    /// Cooldown as a [`Duration`].
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_secs(self.recovery_timeout_secs)
    }

    /// Validate circuit settings.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when the threshold is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::invalid("failure_threshold", "must be greater than 0"));
        }
        Ok(())
    }
}

/// Credential cache settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialSettings {
    /// Credentials expiring within this many seconds count as expired.
    pub expiry_margin_secs: u64,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self { expiry_margin_secs: DEFAULT_EXPIRY_MARGIN_SECS }
    }
}

impl CredentialSettings {
    /// Safety margin as a [`Duration`].
    pub fn expiry_margin(&self) -> Duration {
        Duration::from_secs(self.expiry_margin_secs)
    }
}

/// Complete resilience configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    /// Retry executor settings.
    pub retry: RetrySettings,
    /// Status codes classified as transient.
    pub retriable_status_codes: Vec<u16>,
    /// Circuit settings for services without an explicit entry.
    pub circuit_defaults: CircuitSettings,
    /// Circuit settings per service name.
    pub circuits: HashMap<String, CircuitSettings>,
    /// Credential cache settings.
    pub credentials: CredentialSettings,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetrySettings::default(),
            retriable_status_codes: DEFAULT_RETRIABLE_STATUS_CODES.to_vec(),
            circuit_defaults: CircuitSettings::default(),
            circuits: HashMap::new(),
            credentials: CredentialSettings::default(),
        }
    }
}

impl ResilienceConfig {
    /// Circuit settings that apply to `service_name`.
    pub fn circuit_settings_for(&self, service_name: &str) -> CircuitSettings {
        self.circuits.get(service_name).copied().unwrap_or(self.circuit_defaults)
    }

    /// Validate the whole configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.retry.validate()?;

        if let Some(code) = self.retriable_status_codes.iter().find(|c| !(100..=599).contains(*c)) {
            return Err(ConfigError::invalid(
                "retriable_status_codes",
                format!("{code} is not a valid status code"),
            ));
        }

        self.circuit_defaults.validate().map_err(|_| {
            ConfigError::invalid("circuit_defaults.failure_threshold", "must be greater than 0")
        })?;

        for (service, settings) in &self.circuits {
            settings.validate().map_err(|_| {
                ConfigError::invalid(
                    format!("circuits.{service}.failure_threshold"),
                    "must be greater than 0",
                )
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ResilienceConfig::default();
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.base_delay(), Duration::from_secs(1));
        assert_eq!(config.retry.backoff_factor, 2.0);
        assert_eq!(config.retry.jitter_fraction, 0.1);
        assert_eq!(config.retriable_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.circuit_defaults.failure_threshold, 5);
        assert_eq!(config.circuit_defaults.recovery_timeout(), Duration::from_secs(60));
        assert_eq!(config.credentials.expiry_margin(), Duration::from_secs(10));
        assert!(config.validate().is_ok());
    }

    /// Validates `ResilienceConfig` deserialization for the partial document
    /// scenario.
    ///
    /// Assertions:
    /// - Confirms provided fields override defaults.
    /// - Confirms omitted fields keep their defaults.
    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ResilienceConfig = serde_json::from_str(
            r#"{
                "retry": { "max_retries": 1, "jitter_fraction": 0.0 },
                "circuits": { "ledger": { "failure_threshold": 3, "recovery_timeout_secs": 300 } }
            }"#,
        )
        .unwrap();

        assert_eq!(config.retry.max_retries, 1);
        assert_eq!(config.retry.jitter_fraction, 0.0);
        assert_eq!(config.retry.base_delay_ms, DEFAULT_BASE_DELAY_MS);
        assert_eq!(config.circuit_settings_for("ledger"), CircuitSettings::critical());
        assert_eq!(config.circuit_settings_for("mailer"), CircuitSettings::default());
    }

    #[test]
    fn test_validate_rejects_bad_retry_settings() {
        let mut config = ResilienceConfig::default();
        config.retry.backoff_factor = 0.5;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { ref field, .. }) if field == "retry.backoff_factor"
        ));

        let mut config = ResilienceConfig::default();
        config.retry.jitter_fraction = 1.5;
        assert!(config.validate().is_err());

        let mut config = ResilienceConfig::default();
        config.retry.max_delay_ms = Some(10);
        assert!(config.validate().is_err());

        let mut config = ResilienceConfig::default();
        config.retry.max_retries = MAX_MAX_RETRIES + 1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_zero_threshold() {
        let mut config = ResilienceConfig::default();
        config.circuits.insert("ledger".into(), CircuitSettings::new(0, 30));

        let err = config.validate().unwrap_err();
        assert_eq!(
            err.to_string(),
            "invalid value for circuits.ledger.failure_threshold: must be greater than 0"
        );
    }

    #[test]
    fn test_validate_rejects_bad_status_code() {
        let config =
            ResilienceConfig { retriable_status_codes: vec![503, 42], ..Default::default() };
        assert!(config.validate().is_err());
    }
}
