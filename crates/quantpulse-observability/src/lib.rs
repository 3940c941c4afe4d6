//! Quantpulse Observability
//!
//! Logging setup. Log lines are the system's only reporting channel, so the
//! subscriber is installed before anything else runs.

pub mod logging;

pub use logging::{init_default_logging, init_logging, LogFormat};
