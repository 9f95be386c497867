//! Protocol constants and numeric tolerances

/// Shared-state key under which the authoritative anchor record is retained
pub const SHARED_ANCHOR_KEY: &str = "AMO_SHARED_ANCHOR";

/// Retained slot holding a participant's latest anchor broadcast
pub const ANCHOR_SLOT: &str = "anchor";

/// Retained slot holding a participant's readiness notice
pub const READINESS_SLOT: &str = "readiness";

/// Quaternions with a norm below this are rejected as degenerate
pub const MIN_QUATERNION_NORM: f32 = 1e-6;

/// Maximum deviation from unit length accepted (and renormalised) on input
pub const QUATERNION_NORM_TOLERANCE: f32 = 1e-3;

/// Two poses closer than this (per component) are treated as the same measurement
pub const POSE_EPSILON: f32 = 1e-5;

/// Default bound on the initial wait for a physical reference (milliseconds)
pub const DEFAULT_REFERENCE_TIMEOUT_MS: u64 = 10_000;

/// Default bound on the "everyone ready" wait (milliseconds)
pub const DEFAULT_READY_TIMEOUT_MS: u64 = 60_000;

/// Default interval between anchor requests while no record is known (milliseconds)
pub const DEFAULT_ANCHOR_REQUEST_INTERVAL_MS: u64 = 2_000;

/// Default name of the alignment root node
pub const DEFAULT_ALIGNMENT_ROOT_NAME: &str = "AnchorRoot";

/// Encoded size of an anchor record: 7 x f32 + version u32 + publisher u32
pub const ANCHOR_RECORD_SIZE: usize = 36;

/// Largest payload the transports in this crate accept
pub const MAX_PAYLOAD_SIZE: usize = 512;
