//! Shared-space session: anchor coordination, readiness barrier and the tick driver

/// Alignment chatter: `debug` when verbose, `trace` otherwise
macro_rules! chatter {
    ($verbose:expr, $($arg:tt)+) => {
        if $verbose {
            tracing::debug!($($arg)+)
        } else {
            tracing::trace!($($arg)+)
        }
    };
}

pub mod barrier;
pub mod coordinator;
pub mod events;
pub mod manager;

pub use barrier::{BarrierState, LocalAlignedOutcome, ReadinessBarrier};
pub use coordinator::{AnchorCoordinator, CoordinatorStats, RecordOutcome};
pub use events::{CallbackHandle, EventCallback, EventDispatcher, SessionEvent};
pub use manager::{SessionStatus, SharedSpaceSession};
