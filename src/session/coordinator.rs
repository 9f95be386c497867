//! Shared anchor ownership and alignment frame derivation

use crate::algorithms::reconciliation::reconcile;
use crate::core::constants::{ANCHOR_SLOT, SHARED_ANCHOR_KEY};
use crate::core::types::{AlignmentFrame, AnchorRecord, FrameSource, LocalReference, ParticipantId, Pose};
use crate::processing::codec::{MessageCodec, SessionMessage};
use crate::transport::error::TransportError;
use crate::transport::interface::{Delivery, Target, Transport};
use crate::validation::error::{SessionError, SessionResult};
use serde::Serialize;
use tracing::{debug, info};

/// What happened to a received anchor record
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RecordOutcome {
    /// Cached. Carries the new frame if one could be derived.
    Applied { frame: Option<AlignmentFrame> },
    /// Not newer than the cache; discarded
    Stale { version: u32, cached_version: u32 },
    /// The cached record delivered again
    Duplicate,
}

/// Coordinator counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CoordinatorStats {
    pub records_applied: u32,
    pub stale_discarded: u32,
    pub duplicates_ignored: u32,
    pub requests_sent: u32,
    pub requests_answered: u32,
    pub publishes: u32,
}

/// Owns the cached [`AnchorRecord`], the [`LocalReference`] and the derived [`AlignmentFrame`]
#[derive(Debug, Clone)]
pub struct AnchorCoordinator {
    local_id: ParticipantId,
    codec: MessageCodec,
    record: Option<AnchorRecord>,
    local: Option<LocalReference>,
    frame: AlignmentFrame,
    verbose: bool,
    stats: CoordinatorStats,
}

impl AnchorCoordinator {
    pub fn new(local_id: ParticipantId) -> Self {
        Self {
            local_id,
            codec: MessageCodec::new(),
            record: None,
            local: None,
            frame: AlignmentFrame::unaligned(),
            verbose: false,
            stats: CoordinatorStats::default(),
        }
    }

    /// Log alignment chatter at debug instead of trace
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    pub fn local_id(&self) -> ParticipantId {
        self.local_id
    }

    pub fn record(&self) -> Option<&AnchorRecord> {
        self.record.as_ref()
    }

    pub fn local_reference(&self) -> Option<&LocalReference> {
        self.local.as_ref()
    }

    pub fn frame(&self) -> &AlignmentFrame {
        &self.frame
    }

    pub fn is_aligned(&self) -> bool {
        self.frame.is_aligned()
    }

    /// A local reference is tracked but no anchor is known yet
    pub fn needs_anchor(&self) -> bool {
        self.local.is_some() && self.record.is_none()
    }

    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    /// Record this device's measurement of the reference.
    ///
    /// Re-registering the same measurement is a no-op. Returns the new frame when
    /// an anchor is already cached.
    pub fn register_local_reference(&mut self, pose: Pose, now_ms: u64) -> Option<AlignmentFrame> {
        if let Some(current) = &self.local {
            if current.pose.same_measurement(&pose) {
                return None;
            }
        }

        self.local = Some(LocalReference {
            pose,
            registered_at_ms: now_ms,
        });
        chatter!(self.verbose, %pose, "local reference registered");
        self.realign()
    }

    /// Publish `pose` as the new shared anchor. Requires the authority role.
    ///
    /// The record is committed locally only once the transport has accepted it,
    /// so a failed publish can simply be retried.
    pub fn publish_as_authority<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        pose: Pose,
        now_ms: u64,
    ) -> SessionResult<AnchorRecord> {
        if !transport.is_connected() {
            return Err(TransportError::NotConnected.into());
        }
        if !transport.is_authority() {
            return Err(SessionError::NotAuthority {
                participant: self.local_id,
            });
        }

        let version = match self.record {
            Some(cached) => cached
                .version
                .checked_add(1)
                .ok_or(SessionError::VersionExhausted { version: cached.version })?,
            None => 1,
        };
        let record = AnchorRecord::new(pose, self.local_id, version);

        transport.set_shared_state(SHARED_ANCHOR_KEY, &self.codec.encode_shared_record(&record))?;
        let payload = self.codec.encode(&SessionMessage::AnchorPublished(record));
        let delivery = Delivery::Retained { slot: ANCHOR_SLOT };
        transport.broadcast_reliable(&payload, Target::OthersOnly, delivery)?;

        self.record = Some(record);
        self.local = Some(LocalReference {
            pose,
            registered_at_ms: now_ms,
        });
        self.frame = AlignmentFrame {
            pose: Pose::identity(),
            source: FrameSource::Authority {
                anchor_version: version,
            },
            revision: self.frame.revision + 1,
        };
        self.stats.publishes += 1;
        info!(version, %pose, "anchor published");
        Ok(record)
    }

    /// Apply a record delivered by the transport. Last writer wins by version.
    pub fn on_remote_anchor_received(&mut self, record: AnchorRecord) -> RecordOutcome {
        if self.record.as_ref() == Some(&record) {
            self.stats.duplicates_ignored += 1;
            return RecordOutcome::Duplicate;
        }

        if let Some(cached) = self.record.filter(|cached| !record.supersedes(Some(cached))) {
            self.stats.stale_discarded += 1;
            debug!(
                version = record.version,
                cached_version = cached.version,
                from = %record.published_by,
                "stale anchor discarded"
            );
            return RecordOutcome::Stale {
                version: record.version,
                cached_version: cached.version,
            };
        }

        self.record = Some(record);
        self.stats.records_applied += 1;
        chatter!(self.verbose, version = record.version, from = %record.published_by, "anchor record applied");
        RecordOutcome::Applied {
            frame: self.realign(),
        }
    }

    /// Ask the other participants for the current anchor
    pub fn request_anchor_from_peers<T: Transport + ?Sized>(&mut self, transport: &mut T) -> SessionResult<()> {
        let payload = self.codec.encode(&SessionMessage::AnchorRequest {
            requester: self.local_id,
        });
        transport.broadcast_reliable(&payload, Target::OthersOnly, Delivery::Transient)?;
        self.stats.requests_sent += 1;
        chatter!(self.verbose, "anchor requested from peers");
        Ok(())
    }

    /// Answer an anchor request with the cached record.
    ///
    /// The authority always answers; other participants relay only while they
    /// hold a tracked local reference. Returns whether a response was sent.
    pub fn on_anchor_request<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        requester: ParticipantId,
    ) -> SessionResult<bool> {
        let Some(record) = self.record else {
            return Ok(false);
        };
        if requester == self.local_id || !(transport.is_authority() || self.local.is_some()) {
            return Ok(false);
        }

        let payload = self.codec.encode(&SessionMessage::AnchorPublished(record));
        transport.broadcast_reliable(&payload, Target::Specific(requester), Delivery::Transient)?;
        self.stats.requests_answered += 1;
        debug!(%requester, version = record.version, "anchor request answered");
        Ok(true)
    }

    /// Pull the retained record from the transport's shared state, if any
    pub fn load_from_shared_state<T: Transport + ?Sized>(
        &mut self,
        transport: &T,
    ) -> SessionResult<Option<RecordOutcome>> {
        let Some(payload) = transport.get_shared_state(SHARED_ANCHOR_KEY) else {
            return Ok(None);
        };
        let record = self.codec.decode_shared_record(&payload)?;
        Ok(Some(self.on_remote_anchor_received(record)))
    }

    /// Tracking was lost. The frame is kept; the next registration reconciles again.
    pub fn on_reference_lost(&mut self) {
        self.local = None;
    }

    /// Forget the local measurement and the derived frame. The cached record is kept.
    pub fn reset(&mut self) {
        self.local = None;
        self.frame = AlignmentFrame {
            revision: self.frame.revision + 1,
            ..AlignmentFrame::unaligned()
        };
    }

    /// Reconcile the local measurement against the cached record. The
    /// authority's identity frame comes from `publish_as_authority` alone; a
    /// later measurement is reconciled like any other.
    fn realign(&mut self) -> Option<AlignmentFrame> {
        let record = self.record?;
        let local = self.local?;

        let reconciliation = reconcile(&record, &local);
        chatter!(
            self.verbose,
            version = record.version,
            delta = %reconciliation.delta,
            position_residual = reconciliation.position_residual,
            "reconciled against anchor"
        );

        self.frame = AlignmentFrame {
            pose: reconciliation.delta,
            source: FrameSource::Reconciled {
                anchor_version: record.version,
            },
            revision: self.frame.revision + 1,
        };
        Some(self.frame)
    }
}
