//! Bounded wait for the physical reference

use serde::Serialize;

/// Where the acquisition window stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AcquisitionState {
    /// Not started
    Idle,
    Waiting { started_at_ms: u64 },
    /// The reference was seen at least once; polling continues to follow loss and re-acquisition
    Acquired,
    /// Gave up without detection. Not an error: alignment is simply not engaged.
    Expired,
}

/// Polling window with an explicit timeout
#[derive(Debug, Clone)]
pub struct AcquisitionWindow {
    timeout_ms: u64,
    state: AcquisitionState,
}

impl AcquisitionWindow {
    pub fn new(timeout_ms: u64) -> Self {
        Self {
            timeout_ms,
            state: AcquisitionState::Idle,
        }
    }

    pub fn state(&self) -> AcquisitionState {
        self.state
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_ms
    }

    /// Start (or restart) waiting from `now_ms`
    pub fn start(&mut self, now_ms: u64) {
        self.state = AcquisitionState::Waiting {
            started_at_ms: now_ms,
        };
    }

    pub fn mark_acquired(&mut self) {
        self.state = AcquisitionState::Acquired;
    }

    /// Whether the perception source should be polled this tick
    pub fn is_polling(&self) -> bool {
        matches!(
            self.state,
            AcquisitionState::Waiting { .. } | AcquisitionState::Acquired
        )
    }

    /// Advance the clock. Returns true exactly once, on the tick the window expires.
    pub fn check_expired(&mut self, now_ms: u64) -> bool {
        if let AcquisitionState::Waiting { started_at_ms } = self.state {
            if now_ms.saturating_sub(started_at_ms) >= self.timeout_ms {
                self.state = AcquisitionState::Expired;
                return true;
            }
        }
        false
    }
}
