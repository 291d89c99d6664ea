//! Questlink Protocol - Wire Codec
//!
//! Every frame on the link is a JSON envelope `{type, payload, timestamp, id?}`.
//! This crate turns text frames into typed [`Envelope`]s and back. It holds
//! no state.

mod envelope;
mod lenient;
mod message_type;
mod payloads;

pub use envelope::{decode, encode, parse_wire_time, Envelope, Message};
pub use message_type::{Direction, MessageType};
pub use payloads::*;
