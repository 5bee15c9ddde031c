//! Configuration loading
//!
//! Builds a validated [`ResilienceConfig`](bulwark_common::config::ResilienceConfig)
//! from environment variables or files at process start.

pub mod loader;

// Re-export commonly used items
pub use loader::{load, load_from_env, load_from_file, probe_config_paths};
