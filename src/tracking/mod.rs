//! Physical reference tracking
//!
//! A [`PerceptionSource`] backend reports raw per-frame samples. The
//! [`ReferenceTracker`] turns them into at-most-once "tracked" events, and the
//! [`AcquisitionWindow`] bounds how long the session waits for a first detection.

pub mod source;
pub mod tracker;
pub mod acquisition;

pub use source::{PerceptionSource, ScriptedSource, TrackingSample, TrackingStatus};
pub use tracker::{ReferenceTracker, TrackerEvent};
pub use acquisition::{AcquisitionState, AcquisitionWindow};
