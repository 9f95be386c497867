//! Session events and callback registration

use crate::core::types::{AlignmentFrame, ParticipantId, Pose};
use crate::scene::graph::NodeId;
use crate::validation::error::{ErrorSeverity, SessionError};
use std::collections::BTreeMap;

/// Callback function type for session events
pub type EventCallback = Box<dyn Fn(&SessionEvent)>;

/// Notifications raised while driving a session
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The alignment root node exists and content may be parented to it
    AlignmentRootReady { node: NodeId },
    /// A new alignment frame was derived and written to the root
    AlignmentChanged { frame: AlignmentFrame },
    /// First alignment since the session (or the last reset) started
    LocallyAligned,
    /// Every current participant reported alignment. Fires once.
    EveryoneReady { participants: usize },
    /// The everyone-ready wait exceeded its timeout. Gameplay stays gated.
    BarrierTimedOut { ready: usize, expected: usize },
    /// This device published a new anchor record
    AnchorPublished { version: u32 },
    /// A received record was not newer than the cached one
    StaleAnchorDiscarded { version: u32, cached_version: u32 },
    ReferenceTracked { pose: Pose },
    ReferenceLost,
    /// The reference was not detected within the acquisition window
    AcquisitionTimedOut,
    AuthorityChanged { authority: ParticipantId },
    /// Recoverable failure reported from the tick loop
    Error { error: SessionError, severity: ErrorSeverity },
}

impl SessionEvent {
    pub fn error(error: SessionError) -> Self {
        let severity = error.severity();
        SessionEvent::Error { error, severity }
    }
}

/// Callback registration handle
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CallbackHandle(u32);

impl CallbackHandle {
    pub fn id(&self) -> u32 {
        self.0
    }
}

/// Registered event callbacks, invoked in registration order
#[derive(Default)]
pub struct EventDispatcher {
    counter: u32,
    callbacks: BTreeMap<CallbackHandle, EventCallback>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, callback: EventCallback) -> CallbackHandle {
        self.counter += 1;
        let handle = CallbackHandle(self.counter);
        self.callbacks.insert(handle, callback);
        handle
    }

    /// Returns false for unknown handles
    pub fn unregister(&mut self, handle: CallbackHandle) -> bool {
        self.callbacks.remove(&handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.callbacks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.callbacks.is_empty()
    }

    pub fn dispatch(&self, event: &SessionEvent) {
        for callback in self.callbacks.values() {
            callback(event);
        }
    }
}
