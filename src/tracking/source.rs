//! Perception capability interface

use crate::core::types::PoseData;
use std::collections::VecDeque;

/// Detector-reported tracking state of a physical reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackingStatus {
    NotFound,
    /// Detected but not reliable enough to align against
    Limited,
    Tracked,
    /// Tracked through the device's world tracking rather than direct sight
    ExtendedTracked,
}

impl TrackingStatus {
    /// Reliable enough to align against
    pub fn is_reliable(&self) -> bool {
        matches!(self, TrackingStatus::Tracked | TrackingStatus::ExtendedTracked)
    }
}

/// One per-frame report from a perception backend
#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSample {
    pub target_name: String,
    pub status: TrackingStatus,
    /// Reference pose in local device space, unvalidated
    pub pose: PoseData,
}

impl TrackingSample {
    pub fn tracked(target_name: &str, position: [f32; 3], rotation: [f32; 4]) -> Self {
        Self {
            target_name: target_name.to_string(),
            status: TrackingStatus::Tracked,
            pose: PoseData { position, rotation },
        }
    }

    pub fn lost(target_name: &str) -> Self {
        Self {
            target_name: target_name.to_string(),
            status: TrackingStatus::NotFound,
            pose: PoseData {
                position: [0.0; 3],
                rotation: [0.0, 0.0, 0.0, 1.0],
            },
        }
    }
}

/// A perception backend (image targets, markers, planes).
///
/// Backends are registered with the session at construction; the session polls
/// them once per tick while acquisition is active.
pub trait PerceptionSource {
    /// Human-readable backend name for logs
    fn name(&self) -> &str;

    /// Samples produced since the last poll
    fn poll(&mut self, now_ms: u64) -> Vec<TrackingSample>;
}

/// Replays a prepared timeline of samples
#[derive(Debug, Default)]
pub struct ScriptedSource {
    name: String,
    timeline: VecDeque<(u64, TrackingSample)>,
}

impl ScriptedSource {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            timeline: VecDeque::new(),
        }
    }

    /// Queue a sample to be emitted once `at_ms` is reached
    pub fn push(&mut self, at_ms: u64, sample: TrackingSample) {
        let position = self
            .timeline
            .iter()
            .position(|(time, _)| *time > at_ms)
            .unwrap_or(self.timeline.len());
        self.timeline.insert(position, (at_ms, sample));
    }

    pub fn with_sample(mut self, at_ms: u64, sample: TrackingSample) -> Self {
        self.push(at_ms, sample);
        self
    }

    pub fn remaining(&self) -> usize {
        self.timeline.len()
    }
}

impl PerceptionSource for ScriptedSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn poll(&mut self, now_ms: u64) -> Vec<TrackingSample> {
        let mut due = Vec::new();
        while let Some((at_ms, _)) = self.timeline.front() {
            if *at_ms > now_ms {
                break;
            }
            if let Some((_, sample)) = self.timeline.pop_front() {
                due.push(sample);
            }
        }
        due
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reliable_statuses() {
        assert!(TrackingStatus::Tracked.is_reliable());
        assert!(TrackingStatus::ExtendedTracked.is_reliable());
        assert!(!TrackingStatus::Limited.is_reliable());
        assert!(!TrackingStatus::NotFound.is_reliable());
    }

    #[test]
    fn test_scripted_source_releases_in_time_order() {
        let mut source = ScriptedSource::new("script")
            .with_sample(300, TrackingSample::lost("marker"))
            .with_sample(100, TrackingSample::tracked("marker", [0.0; 3], [0.0, 0.0, 0.0, 1.0]));

        assert!(source.poll(50).is_empty());
        let first = source.poll(150);
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].status, TrackingStatus::Tracked);
        assert_eq!(source.poll(1_000).len(), 1);
        assert_eq!(source.remaining(), 0);
    }
}
