//! Observability setup
//!
//! Installs the process-wide `tracing` subscriber that renders the
//! structured events emitted by `bulwark-common`.

pub mod logging;

pub use logging::{init_logging, LogFormat};
