//! # Bulwark Infrastructure
//!
//! Process-start plumbing for services that use `bulwark-common`.
//!
//! This crate contains:
//! - Configuration loading (environment variables, TOML/JSON files)
//! - Logging pipeline setup (`tracing-subscriber`)
//!
//! Call both once, before any workflow runs:
//!
//! ```no_run
//! use bulwark_infra::observability::{init_logging, LogFormat};
//!
//! init_logging(LogFormat::Json)?;
//! let config = bulwark_infra::config::load()?;
//! # Ok::<(), bulwark_infra::InfraError>(())
//! ```

pub mod config;
pub mod errors;
pub mod observability;

// Re-export commonly used items
pub use errors::{InfraError, Result};
