//! Error classification for the shared-anchor session

use crate::core::types::ParticipantId;
use crate::processing::codec::ParseError;
use crate::scene::graph::SceneError;
use crate::transport::error::TransportError;
use crate::utils::config::ConfigError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Rejected pose input. Never allowed to reach the alignment frame.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    #[error("position component {axis} is not finite ({value})")]
    NonFinitePosition { axis: String, value: f32 },
    #[error("rotation has non-finite components {components:?}")]
    NonFiniteRotation { components: [f32; 4] },
    #[error("rotation quaternion is degenerate (norm {norm:e})")]
    DegenerateRotation { norm: f32 },
    #[error("rotation quaternion is not normalised (norm {norm})")]
    UnnormalizedRotation { norm: f32 },
}

/// Caller-facing error for session operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SessionError {
    /// Publishing requires the authority role
    #[error("participant {participant} does not hold the authority role")]
    NotAuthority { participant: ParticipantId },
    /// The cached anchor already carries the largest representable version
    #[error("anchor version {version} cannot be incremented")]
    VersionExhausted { version: u32 },
    /// The operation needs a tracked local reference first
    #[error("no local reference has been registered")]
    NoLocalReference,
    #[error("invalid pose: {0}")]
    InvalidPose(#[from] ValidationError),
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    #[error("malformed payload: {0}")]
    Codec(#[from] ParseError),
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("scene error: {0}")]
    Scene(#[from] SceneError),
}

/// Result type for session operations
pub type SessionResult<T> = Result<T, SessionError>;

/// How much a failure affects alignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Caller misuse; will not succeed on retry
    High,
    /// Alignment is delayed until the condition clears
    Medium,
    /// Input dropped, alignment unaffected
    Low,
}

impl SessionError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            SessionError::NotAuthority { .. }
            | SessionError::VersionExhausted { .. }
            | SessionError::Config(_) => ErrorSeverity::High,
            SessionError::Transport(_) | SessionError::NoLocalReference | SessionError::Scene(_) => {
                ErrorSeverity::Medium
            }
            SessionError::InvalidPose(_) | SessionError::Codec(_) => ErrorSeverity::Low,
        }
    }

    /// Whether the same call may succeed later without caller changes
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::Transport(error) => error.is_recoverable(),
            SessionError::NoLocalReference => true,
            _ => false,
        }
    }
}
