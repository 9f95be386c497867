//! Explicitly constructed shared-space session driven by a per-frame tick

use crate::core::constants::SHARED_ANCHOR_KEY;
use crate::core::types::{AlignmentFrame, AnchorRecord, ParticipantId, Pose};
use crate::processing::codec::{MessageCodec, SessionMessage};
use crate::scene::binder::ContentBinder;
use crate::scene::graph::{NodeId, SceneGraph};
use crate::session::barrier::{BarrierState, ReadinessBarrier};
use crate::session::coordinator::{AnchorCoordinator, CoordinatorStats, RecordOutcome};
use crate::session::events::{CallbackHandle, EventCallback, EventDispatcher, SessionEvent};
use crate::tracking::{AcquisitionState, AcquisitionWindow, PerceptionSource, ReferenceTracker, TrackerEvent};
use crate::transport::interface::{Transport, TransportEvent};
use crate::utils::config::SessionConfig;
use crate::validation::error::{SessionError, SessionResult};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Snapshot of a session for diagnostics
#[derive(Debug, Clone, Serialize)]
pub struct SessionStatus {
    pub participant: ParticipantId,
    pub authority: Option<ParticipantId>,
    pub connected: bool,
    pub participants: usize,
    pub acquisition: AcquisitionState,
    pub barrier: BarrierState,
    pub ready: usize,
    pub frame: AlignmentFrame,
    pub anchor_version: Option<u32>,
    pub gameplay_released: bool,
    #[serde(flatten)]
    pub coordinator: CoordinatorStats,
    pub malformed_dropped: u32,
    pub errors_reported: u32,
    pub last_error: Option<String>,
}

/// One device's view of a shared AR space.
///
/// Owns the transport, scene and perception backends it was built with and
/// advances everything from [`tick`](Self::tick). Nothing here is global: any
/// number of sessions can live side by side.
pub struct SharedSpaceSession<T: Transport, S: SceneGraph> {
    config: SessionConfig,
    transport: T,
    scene: S,
    sources: Vec<Box<dyn PerceptionSource>>,
    tracker: ReferenceTracker,
    acquisition: AcquisitionWindow,
    coordinator: AnchorCoordinator,
    barrier: ReadinessBarrier,
    binder: ContentBinder,
    dispatcher: EventDispatcher,
    codec: MessageCodec,
    alignment_root: NodeId,
    acquisition_armed: bool,
    publish_pending: bool,
    last_request_ms: Option<u64>,
    link_up: bool,
    malformed_dropped: u32,
    errors_reported: u32,
    last_error: Option<String>,
    events: Vec<SessionEvent>,
}

impl<T: Transport, S: SceneGraph> SharedSpaceSession<T, S> {
    /// Validate the configuration and find or create the alignment root
    pub fn new(config: SessionConfig, transport: T, mut scene: S) -> SessionResult<Self> {
        config.validate()?;

        let alignment_root = match scene.find_node(&config.alignment_root_name) {
            Some(node) => node,
            None => scene.create_node(&config.alignment_root_name, None)?,
        };

        let local_id = transport.local_id();
        let mut coordinator = AnchorCoordinator::new(local_id);
        coordinator.set_verbose(config.debug_logging);

        info!(
            participant = %local_id,
            root = %alignment_root,
            image_target = %config.image_target_name,
            "shared space session created"
        );

        Ok(Self {
            tracker: ReferenceTracker::new(&config.image_target_name),
            acquisition: AcquisitionWindow::new(config.reference_timeout_ms),
            barrier: ReadinessBarrier::new(
                local_id,
                config.wait_for_all_clients,
                config.everyone_ready_timeout_ms,
            ),
            binder: ContentBinder::new(config.keep_world_position),
            acquisition_armed: config.auto_acquire_on_start,
            coordinator,
            config,
            transport,
            scene,
            sources: Vec::new(),
            dispatcher: EventDispatcher::new(),
            codec: MessageCodec::new(),
            alignment_root,
            publish_pending: false,
            last_request_ms: None,
            link_up: true,
            malformed_dropped: 0,
            errors_reported: 0,
            last_error: None,
            events: vec![SessionEvent::AlignmentRootReady {
                node: alignment_root,
            }],
        })
    }

    /// Register a perception backend
    pub fn add_source(&mut self, source: Box<dyn PerceptionSource>) {
        debug!(source = source.name(), "perception source registered");
        self.sources.push(source);
    }

    pub fn with_source(mut self, source: Box<dyn PerceptionSource>) -> Self {
        self.add_source(source);
        self
    }

    pub fn register_callback(&mut self, callback: EventCallback) -> CallbackHandle {
        self.dispatcher.register(callback)
    }

    pub fn unregister_callback(&mut self, handle: CallbackHandle) -> bool {
        self.dispatcher.unregister(handle)
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn scene(&self) -> &S {
        &self.scene
    }

    pub fn scene_mut(&mut self) -> &mut S {
        &mut self.scene
    }

    pub fn coordinator(&self) -> &AnchorCoordinator {
        &self.coordinator
    }

    pub fn barrier(&self) -> &ReadinessBarrier {
        &self.barrier
    }

    pub fn alignment_root(&self) -> NodeId {
        self.alignment_root
    }

    pub fn frame(&self) -> &AlignmentFrame {
        self.coordinator.frame()
    }

    pub fn is_aligned(&self) -> bool {
        self.coordinator.is_aligned()
    }

    pub fn gameplay_released(&self) -> bool {
        self.barrier.gameplay_released()
    }

    pub fn acquisition_state(&self) -> AcquisitionState {
        self.acquisition.state()
    }

    /// Keep `node` parented under the alignment root from now on
    pub fn bind_content(&mut self, node: NodeId) -> SessionResult<()> {
        self.binder.bind(&self.scene, node)?;
        self.binder.ensure_anchored(&mut self.scene, self.alignment_root);
        Ok(())
    }

    /// Return `node` to where it was before binding
    pub fn release_content(&mut self, node: NodeId) -> SessionResult<bool> {
        Ok(self.binder.release(&mut self.scene, node)?)
    }

    /// Re-arm the tracker and wait for the reference again from `now_ms`
    pub fn restart_acquisition(&mut self, now_ms: u64) {
        self.tracker.rearm();
        self.acquisition.start(now_ms);
        self.acquisition_armed = false;
        info!(timeout_ms = self.acquisition.timeout_ms(), "waiting for reference");
    }

    /// Start over locally: drop the local reference and alignment, clear the
    /// readiness set, withdraw this device's retained readiness notice and wait
    /// for the reference again. The cached anchor is kept.
    pub fn reset(&mut self) {
        self.coordinator.reset();
        self.barrier.reset();
        self.tracker.rearm();
        self.acquisition = AcquisitionWindow::new(self.config.reference_timeout_ms);
        self.acquisition_armed = self.config.auto_acquire_on_start;
        self.publish_pending = false;
        self.last_request_ms = None;

        if self.transport.is_connected() {
            if let Err(error) = self.barrier.retry_announcement(&mut self.transport) {
                self.report(error.into());
            }
        }

        let frame = *self.coordinator.frame();
        if let Err(error) = self.scene.set_local_pose(self.alignment_root, frame.pose) {
            self.report(error.into());
        }
        self.events.push(SessionEvent::AlignmentChanged { frame });
        info!("session reset");
    }

    /// Publish the tracked reference as the shared anchor now, for sessions
    /// that do not publish automatically
    pub fn publish_anchor(&mut self, now_ms: u64) -> SessionResult<AnchorRecord> {
        let local = self
            .coordinator
            .local_reference()
            .copied()
            .ok_or(SessionError::NoLocalReference)?;
        self.try_publish(local.pose, now_ms)
    }

    /// Advance the session. Returns the events raised, after passing them to callbacks.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        if self.acquisition_armed {
            self.restart_acquisition(now_ms);
        }

        self.drain_transport(now_ms);
        self.poll_perception(now_ms);
        self.binder.ensure_anchored(&mut self.scene, self.alignment_root);

        if self.barrier.check_timeout(now_ms) {
            self.events.push(SessionEvent::BarrierTimedOut {
                ready: self.barrier.ready_set().len(),
                expected: self.barrier.participants().len(),
            });
        }
        self.retry_pending(now_ms);

        let events = std::mem::take(&mut self.events);
        for event in &events {
            self.dispatcher.dispatch(event);
        }
        events
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            participant: self.transport.local_id(),
            authority: self.transport.authority(),
            connected: self.transport.is_connected(),
            participants: self.barrier.participants().len(),
            acquisition: self.acquisition.state(),
            barrier: self.barrier.state(),
            ready: self.barrier.ready_set().len(),
            frame: *self.coordinator.frame(),
            anchor_version: self.coordinator.record().map(|r| r.version),
            gameplay_released: self.barrier.gameplay_released(),
            coordinator: self.coordinator.stats(),
            malformed_dropped: self.malformed_dropped,
            errors_reported: self.errors_reported,
            last_error: self.last_error.clone(),
        }
    }

    pub fn status_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.status())
    }

    fn drain_transport(&mut self, now_ms: u64) {
        loop {
            match self.transport.poll_event() {
                Ok(Some(event)) => {
                    self.link_up = true;
                    self.handle_transport_event(event, now_ms);
                }
                Ok(None) => {
                    self.link_up = true;
                    break;
                }
                Err(error) => {
                    if self.link_up {
                        self.link_up = false;
                        self.report(error.into());
                    }
                    break;
                }
            }
        }
    }

    fn handle_transport_event(&mut self, event: TransportEvent, now_ms: u64) {
        match event {
            TransportEvent::Joined {
                participants,
                authority,
            } => {
                info!(participants = participants.len(), ?authority, "joined session");
                if self.barrier.set_participants(participants) {
                    self.emit_everyone_ready();
                }
                match self.coordinator.load_from_shared_state(&self.transport) {
                    Ok(Some(outcome)) => self.handle_outcome(outcome, now_ms),
                    Ok(None) => debug!("no shared anchor yet"),
                    Err(error) => self.drop_malformed(error),
                }
                if let Some(authority) = authority {
                    self.on_authority_changed(authority, now_ms);
                }
            }
            TransportEvent::ParticipantJoined(participant) => {
                debug!(%participant, "participant joined");
                self.barrier.on_participant_joined(participant);
            }
            TransportEvent::ParticipantLeft(participant) => {
                debug!(%participant, "participant left");
                if self.barrier.on_participant_left(participant) {
                    self.emit_everyone_ready();
                }
            }
            TransportEvent::AuthorityChanged(authority) => {
                info!(%authority, "authority changed");
                self.on_authority_changed(authority, now_ms);
            }
            TransportEvent::Message { from, payload } => match self.codec.decode(&payload) {
                Ok(message) => self.handle_message(message, now_ms),
                Err(error) => {
                    debug!(%from, "undecodable message");
                    self.drop_malformed(error.into());
                }
            },
            TransportEvent::SharedStateChanged { key, payload } => {
                if key != SHARED_ANCHOR_KEY {
                    return;
                }
                match self.codec.decode_shared_record(&payload) {
                    Ok(record) => {
                        let outcome = self.coordinator.on_remote_anchor_received(record);
                        self.handle_outcome(outcome, now_ms);
                    }
                    Err(error) => self.drop_malformed(error.into()),
                }
            }
        }
    }

    fn handle_message(&mut self, message: SessionMessage, now_ms: u64) {
        match message {
            SessionMessage::AnchorPublished(record) => {
                let outcome = self.coordinator.on_remote_anchor_received(record);
                self.handle_outcome(outcome, now_ms);
            }
            SessionMessage::AnchorRequest { requester } => {
                if let Err(error) = self.coordinator.on_anchor_request(&mut self.transport, requester) {
                    self.report(error);
                }
            }
            SessionMessage::Readiness { participant } => {
                if self.barrier.on_remote_readiness(participant) {
                    self.emit_everyone_ready();
                }
            }
        }
    }

    fn handle_outcome(&mut self, outcome: RecordOutcome, now_ms: u64) {
        match outcome {
            RecordOutcome::Applied { frame } => {
                self.publish_pending = false;
                if let Some(frame) = frame {
                    self.on_frame_changed(frame, now_ms);
                }
            }
            RecordOutcome::Stale {
                version,
                cached_version,
            } => self.events.push(SessionEvent::StaleAnchorDiscarded {
                version,
                cached_version,
            }),
            RecordOutcome::Duplicate => {}
        }
    }

    /// A new authority keeps an existing anchor; it only publishes when none exists yet
    fn on_authority_changed(&mut self, authority: ParticipantId, now_ms: u64) {
        self.events.push(SessionEvent::AuthorityChanged { authority });
        if authority != self.transport.local_id() || !self.config.publish_if_authority {
            return;
        }
        if self.coordinator.record().is_some() {
            return;
        }
        if let Some(local) = self.coordinator.local_reference().copied() {
            self.publish(local.pose, now_ms);
        }
    }

    fn poll_perception(&mut self, now_ms: u64) {
        if !self.acquisition.is_polling() {
            return;
        }

        let mut samples = Vec::new();
        for source in &mut self.sources {
            samples.extend(source.poll(now_ms));
        }

        for result in self.tracker.observe_frame(&samples) {
            match result {
                Ok(TrackerEvent::Tracked(pose)) => {
                    self.acquisition.mark_acquired();
                    self.events.push(SessionEvent::ReferenceTracked { pose });
                    self.on_reference_tracked(pose, now_ms);
                }
                Ok(TrackerEvent::Lost) => {
                    self.coordinator.on_reference_lost();
                    self.events.push(SessionEvent::ReferenceLost);
                }
                Err(error) => self.drop_malformed(error.into()),
            }
        }

        if self.acquisition.check_expired(now_ms) {
            info!(
                timeout_ms = self.acquisition.timeout_ms(),
                "reference not detected, alignment not engaged"
            );
            self.events.push(SessionEvent::AcquisitionTimedOut);
        }
    }

    fn on_reference_tracked(&mut self, pose: Pose, now_ms: u64) {
        if self.should_publish(&pose) {
            self.publish(pose, now_ms);
            return;
        }
        if let Some(frame) = self.coordinator.register_local_reference(pose, now_ms) {
            self.on_frame_changed(frame, now_ms);
        }
    }

    /// The authority publishes when there is no anchor yet, or when its own
    /// measurement of the reference moved
    fn should_publish(&self, pose: &Pose) -> bool {
        if !self.config.publish_if_authority || !self.transport.is_authority() {
            return false;
        }
        match self.coordinator.record() {
            None => true,
            Some(record) => {
                record.published_by == self.transport.local_id()
                    && !record.pose.same_measurement(pose)
            }
        }
    }

    fn try_publish(&mut self, pose: Pose, now_ms: u64) -> SessionResult<AnchorRecord> {
        let record = self
            .coordinator
            .publish_as_authority(&mut self.transport, pose, now_ms)?;

        self.publish_pending = false;
        self.events.push(SessionEvent::AnchorPublished {
            version: record.version,
        });
        let frame = *self.coordinator.frame();
        self.on_frame_changed(frame, now_ms);
        Ok(record)
    }

    /// Publish, falling back to plain registration when the transport refuses
    fn publish(&mut self, pose: Pose, now_ms: u64) {
        if let Err(error) = self.try_publish(pose, now_ms) {
            self.publish_pending = error.is_retryable();
            self.report(error);
            if let Some(frame) = self.coordinator.register_local_reference(pose, now_ms) {
                self.on_frame_changed(frame, now_ms);
            }
        }
    }

    fn on_frame_changed(&mut self, frame: AlignmentFrame, now_ms: u64) {
        if let Err(error) = self.scene.set_local_pose(self.alignment_root, frame.pose) {
            self.report(error.into());
        }
        self.events.push(SessionEvent::AlignmentChanged { frame });

        if self.config.reapply_on_alignment_updates {
            self.binder.ensure_anchored(&mut self.scene, self.alignment_root);
        }

        if frame.is_aligned() && self.barrier.state() == BarrierState::NotAligned {
            self.events.push(SessionEvent::LocallyAligned);
            let outcome = self.barrier.on_local_aligned(&mut self.transport, now_ms);
            if let Some(error) = outcome.announce_error {
                self.report(error.into());
            }
            if outcome.everyone_ready {
                self.emit_everyone_ready();
            }
        }
    }

    fn retry_pending(&mut self, now_ms: u64) {
        if !self.transport.is_connected() {
            return;
        }

        if let Err(error) = self.barrier.retry_announcement(&mut self.transport) {
            self.report(error.into());
        }

        if self.publish_pending {
            let local = self.coordinator.local_reference().copied();
            match local {
                Some(local) if self.transport.is_authority() => self.publish(local.pose, now_ms),
                _ => self.publish_pending = false,
            }
        }

        if self.coordinator.needs_anchor() && !self.publish_pending {
            let due = self
                .last_request_ms
                .map_or(true, |last| now_ms.saturating_sub(last) >= self.config.anchor_request_interval_ms);
            if due {
                self.last_request_ms = Some(now_ms);
                if let Err(error) = self.coordinator.request_anchor_from_peers(&mut self.transport) {
                    self.report(error);
                }
            }
        }
    }

    fn emit_everyone_ready(&mut self) {
        self.events.push(SessionEvent::EveryoneReady {
            participants: self.barrier.participants().len(),
        });
    }

    fn drop_malformed(&mut self, error: SessionError) {
        self.malformed_dropped += 1;
        self.report(error);
    }

    fn report(&mut self, error: SessionError) {
        warn!(%error, "session error");
        self.errors_reported += 1;
        self.last_error = Some(error.to_string());
        self.events.push(SessionEvent::error(error));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::{AnchorRecord, FrameSource};
    use crate::scene::graph::SceneTree;
    use crate::tracking::{ScriptedSource, TrackingSample};
    use crate::transport::error::TransportError;
    use crate::transport::interface::{Delivery, Target};
    use crate::transport::loopback::{LoopbackRoom, LoopbackTransport};
    use nalgebra::{UnitQuaternion, Vector3};
    use std::cell::RefCell;
    use std::rc::Rc;

    type Device = SharedSpaceSession<LoopbackTransport, SceneTree>;

    const IDENTITY: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

    fn device(room: &LoopbackRoom, config: SessionConfig, script: ScriptedSource) -> Device {
        let mut transport = room.create_transport();
        transport.join();
        SharedSpaceSession::new(config, transport, SceneTree::new())
            .unwrap()
            .with_source(Box::new(script))
    }

    fn tracked_at(at_ms: u64, position: [f32; 3]) -> ScriptedSource {
        ScriptedSource::new("script").with_sample(at_ms, TrackingSample::tracked("marker", position, IDENTITY))
    }

    /// Tick every device from `from` to `to` inclusive, collecting `(time, event)` per device
    fn run(devices: &mut [Device], from: u64, to: u64, step: u64) -> Vec<Vec<(u64, SessionEvent)>> {
        let mut log = vec![Vec::new(); devices.len()];
        let mut now = from;
        while now <= to {
            for (index, device) in devices.iter_mut().enumerate() {
                log[index].extend(device.tick(now).into_iter().map(|event| (now, event)));
            }
            now += step;
        }
        log
    }

    fn count(events: &[(u64, SessionEvent)], predicate: impl Fn(&SessionEvent) -> bool) -> usize {
        events.iter().filter(|(_, event)| predicate(event)).count()
    }

    #[test]
    fn test_authority_and_peer_align() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0, 0.0, 0.0])),
            device(&room, SessionConfig::default(), tracked_at(0, [1.0, 0.0, 0.0])),
        ];
        let log = run(&mut devices, 0, 200, 50);

        let authority = &devices[0];
        assert_eq!(authority.frame().source, FrameSource::Authority { anchor_version: 1 });
        assert!(authority.frame().pose.is_identity(1e-6));

        let peer = &devices[1];
        assert_eq!(peer.frame().source, FrameSource::Reconciled { anchor_version: 1 });
        assert!((peer.frame().pose.position() - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-6);
        assert!(peer.frame().pose.angle_to(&Pose::identity()) < 1e-6);
        let root_pose = peer.scene().local_pose(peer.alignment_root()).unwrap();
        assert!(root_pose.approx_eq(&peer.frame().pose, 1e-6));

        for events in &log {
            assert_eq!(count(events, |e| matches!(e, SessionEvent::EveryoneReady { .. })), 1);
            assert_eq!(count(events, |e| matches!(e, SessionEvent::LocallyAligned)), 1);
        }
        assert!(devices.iter().all(|d| d.gameplay_released()));
    }

    #[test]
    fn test_three_device_barrier_waits_for_last() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3])),
            device(&room, SessionConfig::default(), tracked_at(0, [0.5, 0.0, 0.0])),
            device(&room, SessionConfig::default(), tracked_at(500, [0.0, 0.5, 0.0])),
        ];
        let log = run(&mut devices, 0, 1_000, 50);

        for events in &log {
            let ready: Vec<u64> = events
                .iter()
                .filter(|(_, e)| matches!(e, SessionEvent::EveryoneReady { .. }))
                .map(|(time, _)| *time)
                .collect();
            assert_eq!(ready.len(), 1);
            assert!(ready[0] >= 500);
            assert!(events.iter().any(|(_, e)| *e == SessionEvent::EveryoneReady { participants: 3 }));
        }
    }

    #[test]
    fn test_late_joiner_matches_existing_participant() {
        let room = LoopbackRoom::new();
        let local = [0.2, 0.0, -1.5];
        let authority_script = ScriptedSource::new("script")
            .with_sample(0, TrackingSample::tracked("marker", [0.0, 0.0, 0.0], IDENTITY))
            .with_sample(100, TrackingSample::lost("marker"))
            .with_sample(200, TrackingSample::tracked("marker", [0.1, 0.0, 0.0], IDENTITY))
            .with_sample(300, TrackingSample::lost("marker"))
            .with_sample(400, TrackingSample::tracked("marker", [0.2, 0.0, 0.0], IDENTITY));

        let mut devices = vec![
            device(&room, SessionConfig::default(), authority_script),
            device(&room, SessionConfig::default(), tracked_at(0, local)),
        ];
        run(&mut devices, 0, 500, 50);
        assert_eq!(devices[1].coordinator().record().map(|r| r.version), Some(3));

        devices.push(device(&room, SessionConfig::default(), tracked_at(600, local)));
        run(&mut devices, 600, 800, 50);

        let existing = devices[1].frame();
        let late = devices[2].frame();
        assert_eq!(late.anchor_version(), Some(3));
        assert!(late.pose.approx_eq(&existing.pose, 1e-5));
    }

    #[test]
    fn test_reordered_records_keep_highest_version() {
        let room = LoopbackRoom::new();
        let mut publisher = room.create_transport();
        publisher.join();
        let mut devices = vec![device(&room, SessionConfig::default(), ScriptedSource::new("idle"))];

        let codec = MessageCodec::new();
        for version in [2, 3, 1] {
            let record = AnchorRecord::new(
                Pose::from_translation(version as f32, 0.0, 0.0),
                publisher.local_id(),
                version,
            );
            publisher
                .broadcast_reliable(
                    &codec.encode(&SessionMessage::AnchorPublished(record)),
                    Target::OthersOnly,
                    Delivery::Transient,
                )
                .unwrap();
        }

        let log = run(&mut devices, 0, 0, 50);
        assert_eq!(devices[0].coordinator().record().map(|r| r.version), Some(3));
        assert!(log[0].iter().any(|(_, e)| *e
            == SessionEvent::StaleAnchorDiscarded {
                version: 1,
                cached_version: 3
            }));
        assert_eq!(devices[0].status().coordinator.stale_discarded, 1);
    }

    #[test]
    fn test_publish_retried_after_reconnect() {
        let room = LoopbackRoom::new();
        let mut devices = vec![device(&room, SessionConfig::default(), tracked_at(100, [0.0; 3]))];
        run(&mut devices, 0, 0, 50);

        devices[0].transport_mut().suspend();
        let offline = run(&mut devices, 100, 200, 50);
        assert!(offline[0].iter().any(|(_, e)| matches!(
            e,
            SessionEvent::Error {
                error: SessionError::Transport(TransportError::NotConnected),
                ..
            }
        )));
        assert!(devices[0].coordinator().record().is_none());

        devices[0].transport_mut().resume();
        let online = run(&mut devices, 250, 300, 50);
        assert_eq!(count(&online[0], |e| *e == SessionEvent::AnchorPublished { version: 1 }), 1);
        assert_eq!(room.shared_state(SHARED_ANCHOR_KEY).map(|p| p.len()), Some(38));
        assert!(devices[0].is_aligned());
    }

    #[test]
    fn test_new_authority_publishes_when_no_anchor_exists() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), ScriptedSource::new("idle")),
            device(&room, SessionConfig::default(), tracked_at(0, [1.0, 0.0, 0.0])),
            device(&room, SessionConfig::default(), tracked_at(0, [0.0, 0.0, 2.0])),
        ];
        run(&mut devices, 0, 500, 50);
        assert!(devices.iter().all(|d| !d.is_aligned()));
        assert!(devices[1].status().coordinator.requests_sent >= 1);

        devices[0].transport_mut().leave();
        let successor = devices[1].transport().local_id();
        run(&mut devices, 550, 700, 50);

        let record = devices[1].coordinator().record().copied().unwrap();
        assert_eq!((record.published_by, record.version), (successor, 1));
        assert!(devices[2].is_aligned());
        assert!((devices[2].frame().pose.position() - Vector3::new(1.0, 0.0, -2.0)).norm() < 1e-6);
        assert!(devices[1].gameplay_released() && devices[2].gameplay_released());
    }

    #[test]
    fn test_new_authority_keeps_existing_anchor() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3])),
            device(&room, SessionConfig::default(), tracked_at(0, [1.0, 0.0, 0.0])),
        ];
        run(&mut devices, 0, 100, 50);
        let before = *devices[1].frame();

        devices[0].transport_mut().leave();
        let log = run(&mut devices[1..], 150, 300, 50);

        assert!(log[0].iter().any(|(_, e)| matches!(e, SessionEvent::AuthorityChanged { .. })));
        assert_eq!(devices[1].status().coordinator.publishes, 0);
        assert_eq!(devices[1].coordinator().record().map(|r| r.version), Some(1));
        assert_eq!(*devices[1].frame(), before);
    }

    #[test]
    fn test_acquisition_timeout_and_restart() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_reference_timeout(1_000);
        let mut devices = vec![device(&room, config, tracked_at(1_500, [0.0; 3]))];

        let log = run(&mut devices, 0, 1_900, 100);
        assert_eq!(count(&log[0], |e| *e == SessionEvent::AcquisitionTimedOut), 1);
        assert_eq!(devices[0].acquisition_state(), AcquisitionState::Expired);
        assert!(!devices[0].is_aligned());

        devices[0].restart_acquisition(2_000);
        run(&mut devices, 2_000, 2_000, 100);
        assert_eq!(devices[0].acquisition_state(), AcquisitionState::Acquired);
        assert!(devices[0].is_aligned());
    }

    #[test]
    fn test_manual_acquisition_start() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_auto_acquire(false);
        let mut devices = vec![device(&room, config, tracked_at(0, [0.0; 3]))];

        run(&mut devices, 0, 200, 100);
        assert_eq!(devices[0].acquisition_state(), AcquisitionState::Idle);
        devices[0].restart_acquisition(300);
        run(&mut devices, 300, 300, 100);
        assert!(devices[0].is_aligned());
    }

    #[test]
    fn test_target_name_filter() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_image_target("ARMascot");
        let mut devices = vec![device(&room, config, tracked_at(0, [0.0; 3]))];
        run(&mut devices, 0, 100, 50);
        assert!(!devices[0].is_aligned());
    }

    #[test]
    fn test_bound_content_follows_alignment_root() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3])),
            device(
                &room,
                SessionConfig::default().with_keep_world_position(false),
                tracked_at(0, [1.0, 0.0, 0.0]),
            ),
        ];
        let cube = devices[1].scene_mut().create_node("cube", None).unwrap();
        devices[1]
            .scene_mut()
            .set_local_pose(cube, Pose::from_translation(0.0, 1.0, 0.0))
            .unwrap();
        devices[1].bind_content(cube).unwrap();

        run(&mut devices, 0, 100, 50);
        let peer = &devices[1];
        assert_eq!(peer.scene().parent(cube).unwrap(), Some(peer.alignment_root()));
        let world = peer.scene().world_pose(cube).unwrap();
        assert!((world.position() - Vector3::new(-1.0, 1.0, 0.0)).norm() < 1e-6);

        assert_eq!(devices[1].release_content(cube), Ok(true));
        assert_eq!(devices[1].scene().parent(cube).unwrap(), None);
    }

    #[test]
    fn test_rotated_reference_alignment() {
        let room = LoopbackRoom::new();
        let quarter = UnitQuaternion::from_euler_angles(0.0, std::f32::consts::FRAC_PI_2, 0.0);
        let q = quarter.quaternion();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0, 0.0, 1.0])),
            device(
                &room,
                SessionConfig::default(),
                ScriptedSource::new("script").with_sample(
                    0,
                    TrackingSample::tracked("marker", [2.0, 0.0, 0.0], [q.i, q.j, q.k, q.w]),
                ),
            ),
        ];
        run(&mut devices, 0, 100, 50);

        let peer = &devices[1];
        let local = Pose::new([2.0, 0.0, 0.0], [q.i, q.j, q.k, q.w]).unwrap();
        let landed = peer.frame().apply(&local);
        assert!(landed.approx_eq(&Pose::from_translation(0.0, 0.0, 1.0), 1e-5));
    }

    #[test]
    fn test_disabled_barrier_releases_on_alignment() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default()
            .with_wait_for_all_clients(false)
            .with_ready_timeout(None);
        let mut devices = vec![
            device(&room, config.clone(), tracked_at(0, [0.0; 3])),
            device(&room, config, ScriptedSource::new("idle")),
        ];
        let log = run(&mut devices, 0, 100, 50);

        assert!(devices[0].gameplay_released());
        assert!(!devices[1].gameplay_released());
        assert_eq!(count(&log[0], |e| matches!(e, SessionEvent::EveryoneReady { .. })), 0);
    }

    #[test]
    fn test_ready_timeout_reported_once() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_ready_timeout(Some(1_000));
        let mut devices = vec![
            device(&room, config.clone(), tracked_at(0, [0.0; 3])),
            device(&room, config, ScriptedSource::new("idle")),
        ];
        let log = run(&mut devices, 0, 3_000, 100);

        assert_eq!(
            count(&log[0], |e| *e == SessionEvent::BarrierTimedOut { ready: 1, expected: 2 }),
            1
        );
        assert!(!devices[0].gameplay_released());
    }

    #[test]
    fn test_malformed_message_reported_not_fatal() {
        let room = LoopbackRoom::new();
        let mut sender = room.create_transport();
        sender.join();
        let mut devices = vec![device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3]))];

        sender
            .broadcast_reliable(&[1, 9, 0, 0], Target::OthersOnly, Delivery::Transient)
            .unwrap();
        let log = run(&mut devices, 0, 0, 50);

        assert!(log[0]
            .iter()
            .any(|(_, e)| matches!(e, SessionEvent::Error { error: SessionError::Codec(_), .. })));
        let status = devices[0].status();
        assert_eq!(status.malformed_dropped, 1);
        assert!(status.last_error.is_some());
        assert!(devices[0].status_json().unwrap().contains("\"malformed_dropped\": 1"));
    }

    #[test]
    fn test_callbacks_receive_events() {
        let room = LoopbackRoom::new();
        let mut devices = vec![device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3]))];
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&seen);
        let handle = devices[0].register_callback(Box::new(move |event| sink.borrow_mut().push(event.clone())));

        run(&mut devices, 0, 50, 50);
        assert!(seen
            .borrow()
            .iter()
            .any(|e| matches!(e, SessionEvent::AlignmentRootReady { .. })));
        assert!(seen.borrow().contains(&SessionEvent::LocallyAligned));

        assert!(devices[0].unregister_callback(handle));
    }

    #[test]
    fn test_reset_returns_to_unaligned() {
        let room = LoopbackRoom::new();
        let script = ScriptedSource::new("script")
            .with_sample(0, TrackingSample::tracked("marker", [0.0; 3], IDENTITY))
            .with_sample(500, TrackingSample::tracked("marker", [0.0; 3], IDENTITY));
        let mut devices = vec![device(&room, SessionConfig::default(), script)];
        run(&mut devices, 0, 100, 50);
        assert!(devices[0].gameplay_released());

        devices[0].reset();
        assert!(!devices[0].is_aligned());
        assert_eq!(devices[0].barrier().state(), BarrierState::NotAligned);

        let log = run(&mut devices, 500, 500, 50);
        assert!(devices[0].is_aligned());
        assert_eq!(count(&log[0], |e| matches!(e, SessionEvent::EveryoneReady { .. })), 1);
        assert_eq!(devices[0].coordinator().record().map(|r| r.version), Some(1));
    }

    #[test]
    fn test_offline_retrack_after_reset_realigns() {
        let room = LoopbackRoom::new();
        let script = ScriptedSource::new("script")
            .with_sample(0, TrackingSample::tracked("marker", [0.0; 3], IDENTITY))
            .with_sample(500, TrackingSample::tracked("marker", [1.0, 0.0, 0.0], IDENTITY));
        let mut devices = vec![device(&room, SessionConfig::default(), script)];
        run(&mut devices, 0, 100, 50);

        devices[0].reset();
        devices[0].transport_mut().suspend();
        let offline = run(&mut devices, 500, 500, 50);

        let session = &devices[0];
        assert!(session.is_aligned());
        assert_ne!(session.barrier().state(), BarrierState::NotAligned);
        assert_eq!(count(&offline[0], |e| *e == SessionEvent::LocallyAligned), 1);
        assert_eq!(session.frame().source, FrameSource::Reconciled { anchor_version: 1 });
        assert!((session.frame().pose.position() - Vector3::new(-1.0, 0.0, 0.0)).norm() < 1e-6);
        let root_pose = session.scene().local_pose(session.alignment_root()).unwrap();
        assert!(root_pose.approx_eq(&session.frame().pose, 1e-6));

        devices[0].transport_mut().resume();
        let online = run(&mut devices, 550, 550, 50);
        assert_eq!(count(&online[0], |e| *e == SessionEvent::AnchorPublished { version: 2 }), 1);
        assert_eq!(devices[0].frame().source, FrameSource::Authority { anchor_version: 2 });
    }

    #[test]
    fn test_late_joiner_after_reset_waits_for_realignment() {
        let room = LoopbackRoom::new();
        let mut devices = vec![
            device(&room, SessionConfig::default(), tracked_at(0, [0.0; 3])),
            device(&room, SessionConfig::default(), tracked_at(0, [1.0, 0.0, 0.0])),
        ];
        run(&mut devices, 0, 200, 50);
        assert!(devices.iter().all(|d| d.barrier().state() == BarrierState::AllReady));

        for session in devices.iter_mut() {
            session.reset();
        }
        // Only the authority's anchor broadcast stays retained.
        assert_eq!(room.retained_count(), 1);

        devices.push(device(&room, SessionConfig::default(), tracked_at(300, [0.0, 0.0, 1.0])));
        let log = run(&mut devices, 300, 600, 50);

        let late = &devices[2];
        assert!(late.is_aligned());
        assert_eq!(late.barrier().state(), BarrierState::Aligned);
        assert_eq!(late.barrier().ready_set().len(), 1);
        for events in &log {
            assert_eq!(count(events, |e| matches!(e, SessionEvent::EveryoneReady { .. })), 0);
        }
        assert!(!late.gameplay_released());
    }

    #[test]
    fn test_republished_anchor_replayed_once_to_late_joiner() {
        let room = LoopbackRoom::new();
        let authority_script = ScriptedSource::new("script")
            .with_sample(0, TrackingSample::tracked("marker", [0.0; 3], IDENTITY))
            .with_sample(100, TrackingSample::lost("marker"))
            .with_sample(200, TrackingSample::tracked("marker", [0.3, 0.0, 0.0], IDENTITY));
        let mut devices = vec![device(&room, SessionConfig::default(), authority_script)];
        run(&mut devices, 0, 300, 50);
        assert_eq!(devices[0].coordinator().record().map(|r| r.version), Some(2));

        devices.push(device(&room, SessionConfig::default(), tracked_at(400, [0.0; 3])));
        let log = run(&mut devices, 400, 500, 50);

        assert_eq!(devices[1].coordinator().record().map(|r| r.version), Some(2));
        assert_eq!(count(&log[1], |e| matches!(e, SessionEvent::StaleAnchorDiscarded { .. })), 0);
        assert_eq!(devices[1].status().coordinator.stale_discarded, 0);
    }

    #[test]
    fn test_reordering_room_converges_on_highest_version() {
        for seed in 0..8 {
            let room = LoopbackRoom::with_reordering(seed, 0.7);
            let mut relay = room.create_transport();
            relay.join();
            let mut devices = vec![device(&room, SessionConfig::default(), tracked_at(0, [0.5, 0.0, 0.0]))];

            let codec = MessageCodec::new();
            for version in 1..=10u32 {
                let record = AnchorRecord::new(
                    Pose::from_translation(version as f32, 0.0, 0.0),
                    relay.local_id(),
                    version,
                );
                relay
                    .broadcast_reliable(
                        &codec.encode(&SessionMessage::AnchorPublished(record)),
                        Target::OthersOnly,
                        Delivery::Transient,
                    )
                    .unwrap();
            }
            assert_eq!(room.messages_sent(), 10);

            run(&mut devices, 0, 0, 50);
            let session = &devices[0];
            let stats = session.status().coordinator;
            assert_eq!(session.coordinator().record().map(|r| r.version), Some(10), "seed {seed}");
            assert_eq!(stats.records_applied + stats.stale_discarded, 10);
            assert_eq!(session.frame().anchor_version(), Some(10));
            assert!((session.frame().pose.position() - Vector3::new(9.5, 0.0, 0.0)).norm() < 1e-5);
        }
    }

    #[test]
    fn test_manual_publish_needs_local_reference() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_publish_if_authority(false);
        let mut devices = vec![device(&room, config, tracked_at(100, [0.0; 3]))];
        run(&mut devices, 0, 0, 50);
        assert_eq!(devices[0].publish_anchor(50), Err(SessionError::NoLocalReference));

        run(&mut devices, 100, 100, 50);
        assert!(devices[0].coordinator().record().is_none());

        let record = devices[0].publish_anchor(150).unwrap();
        assert_eq!(record.version, 1);
        assert_eq!(devices[0].frame().source, FrameSource::Authority { anchor_version: 1 });

        let log = run(&mut devices, 200, 200, 50);
        assert_eq!(count(&log[0], |e| *e == SessionEvent::AnchorPublished { version: 1 }), 1);
        assert!(devices[0].gameplay_released());
    }

    #[test]
    fn test_invalid_config_rejected() {
        let room = LoopbackRoom::new();
        let config = SessionConfig::default().with_reference_timeout(0);
        let result = SharedSpaceSession::new(config, room.create_transport(), SceneTree::new());
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
