//! Utility modules for configuration and logging

pub mod config;
pub mod logging;

pub use config::{ConfigError, SessionConfig, ValidationReport};
pub use logging::{init_tracing, InitError};
