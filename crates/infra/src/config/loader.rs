//! Configuration loader
//!
//! Loads the resilience configuration from environment variables or files.
//!
//! ## Loading Strategy
//! 1. First, attempts to load from environment variables
//! 2. If `BULWARK_MAX_RETRIES` is absent, falls back to loading from file
//! 3. Probes multiple paths for config files
//! 4. Supports JSON and TOML formats
//!
//! Whatever the source, the result is validated before it is returned.
//!
//! ## Environment Variables
//! - `BULWARK_MAX_RETRIES`: Retries after the first attempt (required)
//! - `BULWARK_BASE_DELAY_MS`: Delay before the first retry
//! - `BULWARK_BACKOFF_FACTOR`: Delay multiplier per retry
//! - `BULWARK_JITTER_FRACTION`: Random spread applied to each delay
//! - `BULWARK_RETRIABLE_STATUS_CODES`: Comma separated list, e.g. `429,503`
//! - `BULWARK_FAILURE_THRESHOLD`: Consecutive failures that open a circuit
//! - `BULWARK_RECOVERY_TIMEOUT_SECS`: Seconds a circuit stays open
//! - `BULWARK_CREDENTIAL_MARGIN_SECS`: Seconds before expiry a credential is
//!   treated as expired
//!
//! ## File Locations
//! The loader probes the following paths (in order):
//! 1. `./bulwark.toml` or `./bulwark.json` (current working directory)
//! 2. `./config/bulwark.toml` or `./config/bulwark.json`
//! 3. Relative to executable location

use std::path::{Path, PathBuf};
use std::str::FromStr;

use bulwark_common::config::ResilienceConfig;

use crate::errors::{InfraError, Result};

const FILE_NAMES: [&str; 2] = ["bulwark.toml", "bulwark.json"];

/// Load configuration with automatic fallback strategy
///
/// First attempts to load from environment variables. If
/// `BULWARK_MAX_RETRIES` is not set, falls back to loading from a config
/// file. A malformed environment value is reported rather than skipped.
///
/// # Errors
/// Returns `InfraError::Config` if configuration cannot be loaded from
/// either source, and `InfraError::Invalid` if it fails validation.
pub fn load() -> Result<ResilienceConfig> {
    if std::env::var_os("BULWARK_MAX_RETRIES").is_none() {
        tracing::debug!("BULWARK_MAX_RETRIES not set, trying config file");
        return load_from_file(None);
    }

    let config = load_from_env()?;
    tracing::info!("Configuration loaded from environment variables");
    Ok(config)
}

/// Load configuration from environment variables
///
/// `BULWARK_MAX_RETRIES` must be present; every other variable falls back
/// to its default.
///
/// # Errors
/// Returns `InfraError::Config` if `BULWARK_MAX_RETRIES` is missing or any
/// variable fails to parse, and `InfraError::Invalid` if the result fails
/// validation.
pub fn load_from_env() -> Result<ResilienceConfig> {
    let mut config = ResilienceConfig::default();

    config.retry.max_retries = parse_value("BULWARK_MAX_RETRIES", &env_var("BULWARK_MAX_RETRIES")?)?;
    if let Some(value) = env_parse("BULWARK_BASE_DELAY_MS")? {
        config.retry.base_delay_ms = value;
    }
    if let Some(value) = env_parse("BULWARK_BACKOFF_FACTOR")? {
        config.retry.backoff_factor = value;
    }
    if let Some(value) = env_parse("BULWARK_JITTER_FRACTION")? {
        config.retry.jitter_fraction = value;
    }
    if let Ok(raw) = std::env::var("BULWARK_RETRIABLE_STATUS_CODES") {
        config.retriable_status_codes = parse_status_codes(&raw)?;
    }
    if let Some(value) = env_parse("BULWARK_FAILURE_THRESHOLD")? {
        config.circuit_defaults.failure_threshold = value;
    }
    if let Some(value) = env_parse("BULWARK_RECOVERY_TIMEOUT_SECS")? {
        config.circuit_defaults.recovery_timeout_secs = value;
    }
    if let Some(value) = env_parse("BULWARK_CREDENTIAL_MARGIN_SECS")? {
        config.credentials.expiry_margin_secs = value;
    }

    config.validate()?;
    Ok(config)
}

/// Load configuration from a file
///
/// If `path` is `None`, probes multiple locations for config files.
/// Supports both JSON and TOML formats (detected by file extension).
/// Fields absent from the file keep their defaults.
///
/// # Errors
/// Returns `InfraError::Config` if:
/// - File not found (when path is specified)
/// - No config file found (when path is `None`)
/// - File format is invalid
///
/// Returns `InfraError::Invalid` if the parsed values fail validation.
pub fn load_from_file(path: Option<PathBuf>) -> Result<ResilienceConfig> {
    let config_path = match path {
        Some(p) => {
            if !p.exists() {
                return Err(InfraError::Config(format!("Config file not found: {}", p.display())));
            }
            p
        }
        None => probe_config_paths().ok_or_else(|| {
            InfraError::Config("No config file found in any of the standard locations".to_string())
        })?,
    };

    tracing::info!(path = %config_path.display(), "Loading configuration from file");

    let contents = std::fs::read_to_string(&config_path)
        .map_err(|e| InfraError::Config(format!("Failed to read config file: {}", e)))?;

    let config = parse_config(&contents, &config_path)?;
    config.validate()?;
    Ok(config)
}

/// Parse configuration from string content
///
/// Format is detected by file extension (`.json` or `.toml`).
fn parse_config(contents: &str, path: &Path) -> Result<ResilienceConfig> {
    let extension = path.extension().and_then(|e| e.to_str()).unwrap_or("json");

    match extension {
        "toml" => toml::from_str(contents)
            .map_err(|e| InfraError::Config(format!("Invalid TOML format: {}", e))),
        "json" => serde_json::from_str(contents)
            .map_err(|e| InfraError::Config(format!("Invalid JSON format: {}", e))),
        _ => Err(InfraError::Config(format!("Unsupported config format: {}", extension))),
    }
}

/// Probe multiple paths for configuration files
///
/// Searches the current working directory, its `config/` subdirectory and
/// the executable's directory, in that order.
///
/// # Returns
/// The first config file found, or `None` if no file exists.
pub fn probe_config_paths() -> Option<PathBuf> {
    let mut candidates = Vec::new();

    if let Ok(cwd) = std::env::current_dir() {
        candidates.extend(FILE_NAMES.iter().map(|name| cwd.join(name)));
        candidates.extend(FILE_NAMES.iter().map(|name| cwd.join("config").join(name)));
    }

    if let Ok(exe_path) = std::env::current_exe() {
        if let Some(exe_dir) = exe_path.parent() {
            candidates.extend(FILE_NAMES.iter().map(|name| exe_dir.join(name)));
        }
    }

    candidates.into_iter().find(|path| path.exists())
}

/// Get required environment variable
///
/// # Errors
/// Returns `InfraError::Config` if the variable is not set.
fn env_var(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| InfraError::Config(format!("Missing required environment variable: {}", key)))
}

/// Parse an optional environment variable.
///
/// Unset variables yield `Ok(None)`; set but malformed ones are an error.
fn env_parse<T>(key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => parse_value(key, &raw).map(Some),
        Err(_) => Ok(None),
    }
}

fn parse_value<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| InfraError::Config(format!("Invalid value for {}: {}", key, e)))
}

/// Parse a comma separated status code list, ignoring empty entries.
fn parse_status_codes(raw: &str) -> Result<Vec<u16>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|code| parse_value("BULWARK_RETRIABLE_STATUS_CODES", code))
        .collect()
}
