//! One-shot "everyone ready" gate

use crate::core::constants::READINESS_SLOT;
use crate::core::types::ParticipantId;
use crate::processing::codec::{MessageCodec, SessionMessage};
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::interface::{Delivery, Target, Transport};
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum BarrierState {
    NotAligned,
    Aligned,
    /// Latched until [`ReadinessBarrier::reset`]
    AllReady,
}

/// Result of the local alignment transition
#[derive(Debug, Clone, PartialEq, Default)]
pub struct LocalAlignedOutcome {
    /// The barrier completed during this call
    pub everyone_ready: bool,
    /// Readiness could not be announced; it stays pending for [`ReadinessBarrier::retry_announcement`]
    pub announce_error: Option<TransportError>,
}

/// Tracks which participants reported alignment
#[derive(Debug, Clone)]
pub struct ReadinessBarrier {
    local_id: ParticipantId,
    wait_for_all: bool,
    ready_timeout_ms: Option<u64>,
    state: BarrierState,
    ready: BTreeSet<ParticipantId>,
    participants: BTreeSet<ParticipantId>,
    announcement_pending: bool,
    /// A readiness notice is retained by the transport
    announced: bool,
    /// A notice from before the last reset must be withdrawn
    withdrawal_pending: bool,
    aligned_at_ms: Option<u64>,
    timeout_reported: bool,
    codec: MessageCodec,
}

impl ReadinessBarrier {
    pub fn new(local_id: ParticipantId, wait_for_all: bool, ready_timeout_ms: Option<u64>) -> Self {
        Self {
            local_id,
            wait_for_all,
            ready_timeout_ms,
            state: BarrierState::NotAligned,
            ready: BTreeSet::new(),
            participants: BTreeSet::new(),
            announcement_pending: false,
            announced: false,
            withdrawal_pending: false,
            aligned_at_ms: None,
            timeout_reported: false,
            codec: MessageCodec::new(),
        }
    }

    pub fn state(&self) -> BarrierState {
        self.state
    }

    pub fn ready_set(&self) -> &BTreeSet<ParticipantId> {
        &self.ready
    }

    pub fn participants(&self) -> &BTreeSet<ParticipantId> {
        &self.participants
    }

    pub fn is_announcement_pending(&self) -> bool {
        self.announcement_pending
    }

    pub fn is_withdrawal_pending(&self) -> bool {
        self.withdrawal_pending
    }

    /// Gameplay may start: everyone is ready, or the barrier is disabled and this device is aligned
    pub fn gameplay_released(&self) -> bool {
        match self.state {
            BarrierState::AllReady => true,
            BarrierState::Aligned => !self.wait_for_all,
            BarrierState::NotAligned => false,
        }
    }

    /// Replace the participant set, e.g. on joining a session
    pub fn set_participants(&mut self, participants: BTreeSet<ParticipantId>) -> bool {
        self.participants = participants;
        self.evaluate()
    }

    pub fn on_participant_joined(&mut self, participant: ParticipantId) {
        self.participants.insert(participant);
    }

    /// Returns true if the departure completed the barrier
    pub fn on_participant_left(&mut self, participant: ParticipantId) -> bool {
        self.participants.remove(&participant);
        if self.state == BarrierState::AllReady {
            return false;
        }
        self.ready.remove(&participant);
        self.evaluate()
    }

    /// `NotAligned → Aligned`, then announce readiness to current and future participants.
    ///
    /// A failed announcement keeps the transition and leaves the announcement pending.
    pub fn on_local_aligned<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        now_ms: u64,
    ) -> LocalAlignedOutcome {
        if self.state != BarrierState::NotAligned {
            return LocalAlignedOutcome::default();
        }

        self.state = BarrierState::Aligned;
        self.aligned_at_ms = Some(now_ms);
        self.ready.insert(self.local_id);
        self.announcement_pending = true;
        debug!(participant = %self.local_id, "locally aligned");

        let announce_error = self.retry_announcement(transport).err();
        LocalAlignedOutcome {
            everyone_ready: self.evaluate(),
            announce_error,
        }
    }

    /// Returns true if this notice completed the barrier
    pub fn on_remote_readiness(&mut self, participant: ParticipantId) -> bool {
        if self.ready.insert(participant) {
            debug!(%participant, ready = self.ready.len(), "participant ready");
        }
        self.evaluate()
    }

    /// Withdraw a notice left over from before a reset, then send a pending
    /// readiness announcement. Ok(true) if an announcement went out.
    pub fn retry_announcement<T: Transport + ?Sized>(&mut self, transport: &mut T) -> TransportResult<bool> {
        if self.withdrawal_pending {
            if let Err(error) = transport.withdraw_retained(READINESS_SLOT) {
                warn!(%error, "readiness withdrawal failed, will retry");
                return Err(error);
            }
            self.withdrawal_pending = false;
            debug!(participant = %self.local_id, "readiness withdrawn");
        }

        if !self.announcement_pending {
            return Ok(false);
        }

        let payload = self.codec.encode(&SessionMessage::Readiness {
            participant: self.local_id,
        });
        let delivery = Delivery::Retained {
            slot: READINESS_SLOT,
        };
        match transport.broadcast_reliable(&payload, Target::OthersOnly, delivery) {
            Ok(()) => {
                self.announcement_pending = false;
                self.announced = true;
                Ok(true)
            }
            Err(error) => {
                warn!(%error, "readiness announcement failed, will retry");
                Err(error)
            }
        }
    }

    /// Fire once when every live participant is ready. Returns true on the firing call.
    pub fn evaluate(&mut self) -> bool {
        if !self.wait_for_all || self.state != BarrierState::Aligned || self.participants.is_empty() {
            return false;
        }
        if !self.ready.is_superset(&self.participants) {
            return false;
        }

        self.state = BarrierState::AllReady;
        info!(participants = self.participants.len(), "everyone ready");
        true
    }

    /// Returns true exactly once when the ready wait exceeds its timeout
    pub fn check_timeout(&mut self, now_ms: u64) -> bool {
        if !self.wait_for_all || self.state != BarrierState::Aligned || self.timeout_reported {
            return false;
        }
        let (Some(timeout_ms), Some(aligned_at_ms)) = (self.ready_timeout_ms, self.aligned_at_ms) else {
            return false;
        };
        if now_ms.saturating_sub(aligned_at_ms) < timeout_ms {
            return false;
        }

        self.timeout_reported = true;
        let missing: Vec<ParticipantId> = self.participants.difference(&self.ready).copied().collect();
        warn!(?missing, "timed out waiting for everyone to be ready");
        true
    }

    /// Back to `NotAligned` with an empty ready set. Membership is kept.
    ///
    /// A readiness notice already retained by the transport is withdrawn on the
    /// next [`retry_announcement`](Self::retry_announcement).
    pub fn reset(&mut self) {
        self.state = BarrierState::NotAligned;
        self.ready.clear();
        self.withdrawal_pending |= self.announced;
        self.announced = false;
        self.announcement_pending = false;
        self.aligned_at_ms = None;
        self.timeout_reported = false;
    }
}
