//! Errors raised while preparing the process.

use bulwark_common::config::ConfigError;
use thiserror::Error;

/// Result alias for infrastructure setup.
pub type Result<T> = std::result::Result<T, InfraError>;

/// Failures while loading configuration or installing logging.
#[derive(Debug, Error)]
pub enum InfraError {
    /// Configuration could not be found, read or parsed.
    #[error("configuration error: {0}")]
    Config(String),

    /// Configuration parsed but holds values the runtime rejects.
    #[error(transparent)]
    Invalid(#[from] ConfigError),

    /// A global subscriber was already installed.
    #[error("logging error: {0}")]
    Logging(String),
}

impl InfraError {
    /// Stable label for logs.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Config(_) => "config",
            Self::Invalid(_) => "invalid_config",
            Self::Logging(_) => "logging",
        }
    }
}
