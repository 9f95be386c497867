//! In-process transport for tests, demos and single-machine simulations
//!
//! A [`LoopbackRoom`] plays the role of the networked room: it keeps the member
//! list, per-member inboxes, retained broadcasts and the shared key/value
//! store. Each participant talks to it through its own [`LoopbackTransport`].

use crate::core::constants::MAX_PAYLOAD_SIZE;
use crate::core::types::ParticipantId;
use crate::transport::error::{TransportError, TransportResult};
use crate::transport::interface::{Delivery, Target, Transport, TransportEvent};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::rc::Rc;

#[derive(Debug, Clone)]
struct RetainedMessage {
    from: ParticipantId,
    slot: &'static str,
    target: Target,
    payload: Vec<u8>,
}

impl RetainedMessage {
    fn reaches(&self, participant: ParticipantId) -> bool {
        match self.target {
            Target::All => true,
            Target::OthersOnly => self.from != participant,
            Target::Specific(id) => id == participant,
        }
    }
}

struct RoomState {
    members: BTreeMap<ParticipantId, VecDeque<TransportEvent>>,
    retained: Vec<RetainedMessage>,
    shared: BTreeMap<String, Vec<u8>>,
    authority: Option<ParticipantId>,
    next_id: u32,
    reorder: Option<(StdRng, f64)>,
    messages_sent: usize,
}

impl RoomState {
    fn deliver(&mut self, recipient: ParticipantId, event: TransportEvent) {
        let Some(inbox) = self.members.get_mut(&recipient) else {
            return;
        };

        let is_message = matches!(event, TransportEvent::Message { .. });
        if let (true, Some((rng, probability))) = (is_message, self.reorder.as_mut()) {
            // Only overtake other messages, never membership events.
            let floor = inbox
                .iter()
                .rposition(|queued| !matches!(queued, TransportEvent::Message { .. }))
                .map(|index| index + 1)
                .unwrap_or(0);
            if inbox.len() > floor && rng.gen_bool(*probability) {
                let position = rng.gen_range(floor..inbox.len());
                inbox.insert(position, event);
                return;
            }
        }
        inbox.push_back(event);
    }

    fn recipients(&self, from: ParticipantId, target: Target) -> TransportResult<Vec<ParticipantId>> {
        match target {
            Target::All => Ok(self.members.keys().copied().collect()),
            Target::OthersOnly => Ok(self
                .members
                .keys()
                .copied()
                .filter(|id| *id != from)
                .collect()),
            Target::Specific(id) if self.members.contains_key(&id) => Ok(vec![id]),
            Target::Specific(id) => Err(TransportError::UnknownParticipant { participant: id }),
        }
    }
}

/// Shared in-memory room
#[derive(Clone)]
pub struct LoopbackRoom {
    state: Rc<RefCell<RoomState>>,
}

impl LoopbackRoom {
    pub fn new() -> Self {
        Self {
            state: Rc::new(RefCell::new(RoomState {
                members: BTreeMap::new(),
                retained: Vec::new(),
                shared: BTreeMap::new(),
                authority: None,
                next_id: 1,
                reorder: None,
                messages_sent: 0,
            })),
        }
    }

    /// Room that lets messages overtake each other with the given probability
    pub fn with_reordering(seed: u64, probability: f64) -> Self {
        let room = Self::new();
        room.state.borrow_mut().reorder =
            Some((StdRng::seed_from_u64(seed), probability.clamp(0.0, 1.0)));
        room
    }

    /// Allocate a participant id and a transport for it. The transport is not yet joined.
    pub fn create_transport(&self) -> LoopbackTransport {
        let mut state = self.state.borrow_mut();
        let id = ParticipantId(state.next_id);
        state.next_id += 1;

        LoopbackTransport {
            id,
            room: Rc::clone(&self.state),
            joined: false,
            suspended: false,
            sent: Vec::new(),
        }
    }

    pub fn participants(&self) -> BTreeSet<ParticipantId> {
        self.state.borrow().members.keys().copied().collect()
    }

    pub fn authority(&self) -> Option<ParticipantId> {
        self.state.borrow().authority
    }

    /// Hand the authority role to a current member
    pub fn transfer_authority(&self, participant: ParticipantId) -> TransportResult<()> {
        let mut state = self.state.borrow_mut();
        if !state.members.contains_key(&participant) {
            return Err(TransportError::UnknownParticipant { participant });
        }
        state.authority = Some(participant);
        let members: Vec<ParticipantId> = state.members.keys().copied().collect();
        for member in members {
            state.deliver(member, TransportEvent::AuthorityChanged(participant));
        }
        Ok(())
    }

    pub fn shared_state(&self, key: &str) -> Option<Vec<u8>> {
        self.state.borrow().shared.get(key).cloned()
    }

    pub fn retained_count(&self) -> usize {
        self.state.borrow().retained.len()
    }

    pub fn messages_sent(&self) -> usize {
        self.state.borrow().messages_sent
    }
}

impl Default for LoopbackRoom {
    fn default() -> Self {
        Self::new()
    }
}

/// One participant's handle on a [`LoopbackRoom`]
pub struct LoopbackTransport {
    id: ParticipantId,
    room: Rc<RefCell<RoomState>>,
    joined: bool,
    suspended: bool,
    sent: Vec<(Target, Delivery, Vec<u8>)>,
}

impl LoopbackTransport {
    /// Enter the room. Retained broadcasts are replayed after the `Joined` event.
    pub fn join(&mut self) {
        if self.joined {
            return;
        }
        self.joined = true;

        let mut state = self.room.borrow_mut();
        let existing: Vec<ParticipantId> = state.members.keys().copied().collect();
        state.members.insert(self.id, VecDeque::new());
        if state.authority.is_none() {
            state.authority = Some(self.id);
        }

        let participants = state.members.keys().copied().collect();
        let authority = state.authority;
        state.deliver(self.id, TransportEvent::Joined { participants, authority });

        let replay: Vec<TransportEvent> = state
            .retained
            .iter()
            .filter(|message| message.reaches(self.id))
            .map(|message| TransportEvent::Message {
                from: message.from,
                payload: message.payload.clone(),
            })
            .collect();
        for event in replay {
            state.deliver(self.id, event);
        }

        for member in existing {
            state.deliver(member, TransportEvent::ParticipantJoined(self.id));
        }
    }

    /// Leave the room. Retained broadcasts from this participant are dropped and
    /// authority moves to the lowest remaining id.
    pub fn leave(&mut self) {
        if !self.joined {
            return;
        }
        self.joined = false;

        let mut state = self.room.borrow_mut();
        state.members.remove(&self.id);
        let id = self.id;
        state.retained.retain(|message| message.from != id);

        let remaining: Vec<ParticipantId> = state.members.keys().copied().collect();
        for member in &remaining {
            state.deliver(*member, TransportEvent::ParticipantLeft(id));
        }

        if state.authority == Some(id) {
            state.authority = remaining.first().copied();
            if let Some(successor) = state.authority {
                for member in &remaining {
                    state.deliver(*member, TransportEvent::AuthorityChanged(successor));
                }
            }
        }
    }

    /// Simulate losing connectivity without leaving the room
    pub fn suspend(&mut self) {
        self.suspended = true;
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    /// Everything this transport has sent
    pub fn sent_messages(&self) -> &[(Target, Delivery, Vec<u8>)] {
        &self.sent
    }

    fn ensure_connected(&self) -> TransportResult<()> {
        if self.suspended {
            return Err(TransportError::NotConnected);
        }
        if !self.joined {
            return Err(TransportError::NotInSession);
        }
        Ok(())
    }
}

impl Transport for LoopbackTransport {
    fn local_id(&self) -> ParticipantId {
        self.id
    }

    fn is_connected(&self) -> bool {
        self.joined && !self.suspended
    }

    fn authority(&self) -> Option<ParticipantId> {
        if !self.joined {
            return None;
        }
        self.room.borrow().authority
    }

    fn participants(&self) -> BTreeSet<ParticipantId> {
        if !self.joined {
            return BTreeSet::new();
        }
        self.room.borrow().members.keys().copied().collect()
    }

    fn broadcast_reliable(
        &mut self,
        payload: &[u8],
        target: Target,
        delivery: Delivery,
    ) -> TransportResult<()> {
        self.ensure_connected()?;
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(TransportError::PayloadTooLarge {
                size: payload.len(),
                limit: MAX_PAYLOAD_SIZE,
            });
        }

        let mut state = self.room.borrow_mut();
        let recipients = state.recipients(self.id, target)?;
        for recipient in recipients {
            state.deliver(
                recipient,
                TransportEvent::Message {
                    from: self.id,
                    payload: payload.to_vec(),
                },
            );
        }

        if let (Delivery::Retained { slot }, Target::All | Target::OthersOnly) = (delivery, target) {
            let from = self.id;
            state
                .retained
                .retain(|message| !(message.from == from && message.slot == slot));
            state.retained.push(RetainedMessage {
                from,
                slot,
                target,
                payload: payload.to_vec(),
            });
        }
        state.messages_sent += 1;
        drop(state);

        self.sent.push((target, delivery, payload.to_vec()));
        Ok(())
    }

    fn set_shared_state(&mut self, key: &str, payload: &[u8]) -> TransportResult<()> {
        self.ensure_connected()?;

        let mut state = self.room.borrow_mut();
        state.shared.insert(key.to_string(), payload.to_vec());
        let members: Vec<ParticipantId> = state.members.keys().copied().collect();
        for member in members {
            state.deliver(
                member,
                TransportEvent::SharedStateChanged {
                    key: key.to_string(),
                    payload: payload.to_vec(),
                },
            );
        }
        Ok(())
    }

    fn withdraw_retained(&mut self, slot: &str) -> TransportResult<()> {
        self.ensure_connected()?;

        let from = self.id;
        self.room
            .borrow_mut()
            .retained
            .retain(|message| !(message.from == from && message.slot == slot));
        Ok(())
    }

    fn get_shared_state(&self, key: &str) -> Option<Vec<u8>> {
        if !self.joined {
            return None;
        }
        self.room.borrow().shared.get(key).cloned()
    }

    fn poll_event(&mut self) -> TransportResult<Option<TransportEvent>> {
        if !self.joined {
            return Ok(None);
        }
        if self.suspended {
            return Err(TransportError::NotConnected);
        }
        Ok(self
            .room
            .borrow_mut()
            .members
            .get_mut(&self.id)
            .and_then(|inbox| inbox.pop_front()))
    }
}
