//! Shared Anchor
//!
//! Aligns several AR devices to one real-world frame. Each device tracks the
//! same physical reference on its own; one participant publishes the shared
//! anchor, everyone else reconciles their local measurement against it, and a
//! readiness barrier releases gameplay once all participants are aligned.

pub mod core;
pub mod algorithms;
pub mod processing;
pub mod transport;
pub mod tracking;
pub mod scene;
pub mod session;
pub mod validation;
pub mod utils;

// Re-export commonly used types
pub use crate::core::{AlignmentFrame, AnchorRecord, FrameSource, LocalReference, ParticipantId, Pose, PoseData};
pub use algorithms::reconciliation::{alignment_delta, reconcile, Reconciliation};
pub use processing::codec::{MessageCodec, ParseError, SessionMessage};
pub use transport::{
    Delivery, LoopbackRoom, LoopbackTransport, RecoveryStrategy, Target, Transport, TransportError,
    TransportEvent, TransportResult,
};
pub use tracking::{
    AcquisitionState, AcquisitionWindow, PerceptionSource, ReferenceTracker, ScriptedSource,
    TrackerEvent, TrackingSample, TrackingStatus,
};
pub use scene::{ContentBinder, NodeId, SceneError, SceneGraph, SceneTree};
pub use session::{
    AnchorCoordinator, BarrierState, CallbackHandle, ReadinessBarrier, RecordOutcome, SessionEvent,
    SessionStatus, SharedSpaceSession,
};
pub use validation::{ErrorSeverity, SessionError, SessionResult, ValidationError};
pub use utils::{init_tracing, ConfigError, SessionConfig};
