//! Input validation and error classification

pub mod error;

pub use error::{ErrorSeverity, SessionError, SessionResult, ValidationError};
