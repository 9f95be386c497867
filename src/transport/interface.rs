//! Transport abstraction for session messaging and retained state

use crate::core::types::ParticipantId;
use crate::transport::error::TransportResult;
use std::collections::BTreeSet;

/// Recipients of a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// Every participant, including the sender
    All,
    /// Every participant except the sender
    OthersOnly,
    /// A single participant; never retained
    Specific(ParticipantId),
}

/// Delivery semantics for a broadcast
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Current participants only
    Transient,
    /// Current participants plus anyone who joins later (`All`/`OthersOnly` only).
    ///
    /// Each sender holds at most one retained message per slot; a newer one replaces it.
    Retained { slot: &'static str },
}

/// Notifications delivered by the transport, drained once per tick
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// The local participant entered a session
    Joined {
        participants: BTreeSet<ParticipantId>,
        authority: Option<ParticipantId>,
    },
    ParticipantJoined(ParticipantId),
    ParticipantLeft(ParticipantId),
    /// The authority role moved to another participant
    AuthorityChanged(ParticipantId),
    Message {
        from: ParticipantId,
        payload: Vec<u8>,
    },
    SharedStateChanged {
        key: String,
        payload: Vec<u8>,
    },
}

/// Session transport.
///
/// Delivery is reliable (at-least-once) to connected targets. The session only
/// ever reads what the transport delivers and writes through `broadcast_reliable`
/// and `set_shared_state`; the transport decides what is visible to whom.
pub trait Transport {
    /// Identifier of the local participant
    fn local_id(&self) -> ParticipantId;

    /// Connected and inside a session
    fn is_connected(&self) -> bool;

    /// Current holder of the authority role, if any
    fn authority(&self) -> Option<ParticipantId>;

    fn is_authority(&self) -> bool {
        self.authority() == Some(self.local_id())
    }

    /// Live participant set, including the local participant
    fn participants(&self) -> BTreeSet<ParticipantId>;

    /// Send a payload. Fails fast when not connected.
    fn broadcast_reliable(
        &mut self,
        payload: &[u8],
        target: Target,
        delivery: Delivery,
    ) -> TransportResult<()>;

    /// Write a retained key/value entry visible to current and future participants
    fn set_shared_state(&mut self, key: &str, payload: &[u8]) -> TransportResult<()>;

    /// Drop this participant's retained broadcast in `slot` so later joiners no longer receive it
    fn withdraw_retained(&mut self, slot: &str) -> TransportResult<()>;

    /// Read a retained entry
    fn get_shared_state(&self, key: &str) -> Option<Vec<u8>>;

    /// Next pending event.
    /// Returns Ok(None) when nothing is queued.
    fn poll_event(&mut self) -> TransportResult<Option<TransportEvent>>;
}
