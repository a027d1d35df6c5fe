//! Telemetry module for logging configuration and initialization.

mod logging;

pub use logging::{init_logging, LogConfig};
