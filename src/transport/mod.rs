//! Transport abstraction layer
//!
//! The session never talks to a network stack directly. It goes through the
//! [`Transport`] trait: reliable broadcast with optional retention for late
//! joiners, a small retained key/value store, and membership notifications.

pub mod interface;
pub mod loopback;
pub mod error;

pub use interface::{Delivery, Target, Transport, TransportEvent};
pub use loopback::{LoopbackRoom, LoopbackTransport};
pub use error::{RecoveryStrategy, TransportError, TransportResult};
