//! Once-per-tracking-session reference detection

use crate::core::types::Pose;
use crate::tracking::source::TrackingSample;
use crate::validation::error::ValidationError;
use tracing::debug;

/// Transitions reported by [`ReferenceTracker`]
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TrackerEvent {
    /// The reference became reliably tracked; emitted once until tracking is lost
    Tracked(Pose),
    /// The detector lost the reference; the tracker is re-armed
    Lost,
}

/// Turns raw per-frame samples into at-most-once "tracked" notifications
#[derive(Debug, Clone)]
pub struct ReferenceTracker {
    /// Target to follow; empty accepts any
    target_name: String,
    reported: bool,
    last_pose: Option<Pose>,
}

impl ReferenceTracker {
    pub fn new(target_name: &str) -> Self {
        Self {
            target_name: target_name.trim().to_string(),
            reported: false,
            last_pose: None,
        }
    }

    pub fn target_name(&self) -> &str {
        &self.target_name
    }

    /// Whether the current tracking session has already been reported
    pub fn is_reported(&self) -> bool {
        self.reported
    }

    pub fn last_pose(&self) -> Option<Pose> {
        self.last_pose
    }

    fn accepts(&self, sample: &TrackingSample) -> bool {
        self.target_name.is_empty() || self.target_name == sample.target_name
    }

    /// Feed one sample. Malformed poses on reliable samples are rejected and leave state untouched.
    pub fn observe(&mut self, sample: &TrackingSample) -> Result<Option<TrackerEvent>, ValidationError> {
        if !self.accepts(sample) {
            return Ok(None);
        }

        if sample.status.is_reliable() {
            let pose = Pose::try_from(sample.pose)?;
            self.last_pose = Some(pose);
            if self.reported {
                return Ok(None);
            }
            self.reported = true;
            debug!(reference = %sample.target_name, %pose, "reference tracked");
            return Ok(Some(TrackerEvent::Tracked(pose)));
        }

        if self.reported {
            self.reported = false;
            debug!(reference = %sample.target_name, status = ?sample.status, "reference lost");
            return Ok(Some(TrackerEvent::Lost));
        }
        Ok(None)
    }

    /// Feed every sample gathered in one frame, possibly from several sources.
    ///
    /// A reliable sample for the target outweighs unreliable ones from the same
    /// frame, so one source losing sight of the reference while another still
    /// tracks it does not report a loss.
    pub fn observe_frame(&mut self, samples: &[TrackingSample]) -> Vec<Result<TrackerEvent, ValidationError>> {
        let tracked_this_frame = samples
            .iter()
            .any(|sample| self.accepts(sample) && sample.status.is_reliable());

        samples
            .iter()
            .filter(|sample| !tracked_this_frame || sample.status.is_reliable())
            .filter_map(|sample| self.observe(sample).transpose())
            .collect()
    }

    /// Forget the current tracking session so the next reliable sample reports again
    pub fn rearm(&mut self) {
        self.reported = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracking::source::TrackingStatus;

    const IDENTITY: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    #[test]
    fn test_reports_once_per_tracking_session() {
        let mut tracker = ReferenceTracker::new("");
        let sample = TrackingSample::tracked("marker", [1.0, 0.0, 0.0], IDENTITY);

        assert!(matches!(tracker.observe(&sample), Ok(Some(TrackerEvent::Tracked(_)))));
        assert_eq!(tracker.observe(&sample), Ok(None));
        assert_eq!(tracker.observe(&sample), Ok(None));
        assert!(tracker.is_reported());
    }

    #[test]
    fn test_rearms_after_loss() {
        let mut tracker = ReferenceTracker::new("marker");
        let tracked = TrackingSample::tracked("marker", [0.0; 3], IDENTITY);

        tracker.observe(&tracked).unwrap();
        assert_eq!(tracker.observe(&TrackingSample::lost("marker")), Ok(Some(TrackerEvent::Lost)));
        assert_eq!(tracker.observe(&TrackingSample::lost("marker")), Ok(None));
        assert!(matches!(tracker.observe(&tracked), Ok(Some(TrackerEvent::Tracked(_)))));
    }

    #[test]
    fn test_frame_with_one_source_tracking_is_not_a_loss() {
        let mut tracker = ReferenceTracker::new("marker");
        let tracked = TrackingSample::tracked("marker", [0.0; 3], IDENTITY);
        let missing = TrackingSample::lost("marker");

        let first = tracker.observe_frame(&[tracked.clone(), missing.clone()]);
        assert!(matches!(first.as_slice(), [Ok(TrackerEvent::Tracked(_))]));

        for _ in 0..5 {
            assert!(tracker.observe_frame(&[missing.clone(), tracked.clone()]).is_empty());
        }
        assert!(tracker.is_reported());

        assert_eq!(tracker.observe_frame(&[missing.clone(), missing]), vec![Ok(TrackerEvent::Lost)]);
    }

    #[test]
    fn test_ignores_other_targets() {
        let mut tracker = ReferenceTracker::new("ARMascot");
        let other = TrackingSample::tracked("Poster", [0.0; 3], IDENTITY);
        assert_eq!(tracker.observe(&other), Ok(None));
        assert!(!tracker.is_reported());
    }

    #[test]
    fn test_limited_tracking_is_not_enough() {
        let mut tracker = ReferenceTracker::new("");
        let mut sample = TrackingSample::tracked("marker", [0.0; 3], IDENTITY);
        sample.status = TrackingStatus::Limited;
        assert_eq!(tracker.observe(&sample), Ok(None));
    }

    #[test]
    fn test_malformed_pose_rejected_without_state_change() {
        let mut tracker = ReferenceTracker::new("");
        let bad = TrackingSample::tracked("marker", [0.0; 3], [0.0, 0.0, 0.0, 0.0]);
        assert!(tracker.observe(&bad).is_err());
        assert!(!tracker.is_reported());
        assert_eq!(tracker.last_pose(), None);
    }
}
