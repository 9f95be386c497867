//! Wire encoding for session traffic

pub mod codec;

pub use codec::{MessageCodec, ParseError, SessionMessage};
