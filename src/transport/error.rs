//! Transport error types and handling

use crate::core::types::ParticipantId;
use thiserror::Error;

/// Transport failures surfaced to session operations
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TransportError {
    /// No network connection
    #[error("transport is not connected")]
    NotConnected,
    /// Connected, but not inside a session/room
    #[error("not inside a session")]
    NotInSession,
    /// Specific target is not a current participant
    #[error("participant {participant} is not in the session")]
    UnknownParticipant { participant: ParticipantId },
    /// Payload exceeds what the transport will carry
    #[error("payload of {size} bytes exceeds limit of {limit}")]
    PayloadTooLarge { size: usize, limit: usize },
    /// Backend-specific failure
    #[error("transport backend error {code}: {description}")]
    Backend { code: u32, description: String },
}

/// Result type for transport operations
pub type TransportResult<T> = Result<T, TransportError>;

/// Recommended reaction to a transport failure
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecoveryStrategy {
    /// Retry on the next tick
    Retry,
    /// Hold the operation until the transport reports a connection again
    RetryWhenConnected,
    /// Drop the operation and continue
    Skip,
    /// Will not succeed without caller changes
    Fail,
}

impl TransportError {
    pub fn recovery_strategy(&self) -> RecoveryStrategy {
        match self {
            TransportError::NotConnected | TransportError::NotInSession => {
                RecoveryStrategy::RetryWhenConnected
            }
            TransportError::UnknownParticipant { .. } => RecoveryStrategy::Skip,
            TransportError::PayloadTooLarge { .. } => RecoveryStrategy::Fail,
            TransportError::Backend { .. } => RecoveryStrategy::Retry,
        }
    }

    /// Whether the same operation may succeed later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self.recovery_strategy(),
            RecoveryStrategy::Retry | RecoveryStrategy::RetryWhenConnected
        )
    }
}
