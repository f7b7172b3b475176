//! Frame payload types.
//!
//! A frame payload is either the liveness sentinel or a MessagePack-encoded
//! [`Event`]. Events serialize as a three-element array, so their first byte
//! is always `0x93` and can never collide with the sentinel (`b"hello"`).

use crate::error::WireError;
use crate::frame::MAX_FRAME_SIZE;
use std::io::Cursor;
use tether_types::event::Event;

/// Payload of a liveness frame.
pub const HEARTBEAT_PAYLOAD: &[u8] = b"hello";

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Liveness sentinel. Refreshes the peer's deadline and nothing else.
    Heartbeat,
    /// An event to dispatch.
    Event(Event),
}

/// Whether a payload is the liveness sentinel.
pub fn is_heartbeat(payload: &[u8]) -> bool {
    payload == HEARTBEAT_PAYLOAD
}

/// Serialize an event into a frame payload.
pub fn encode_event(event: &Event) -> Result<Vec<u8>, WireError> {
    event
        .validate()
        .map_err(|e| WireError::InvalidEvent(e.to_string()))?;
    let bytes = rmp_serde::to_vec(event)?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(WireError::FrameTooLarge {
            size: bytes.len(),
            max: MAX_FRAME_SIZE,
        });
    }
    Ok(bytes)
}

/// Deserialize an event from a frame payload.
///
/// Garbled input, trailing bytes and events without a name are all
/// rejected with [`WireError::Decode`].
pub fn decode_event(payload: &[u8]) -> Result<Event, WireError> {
    let mut cursor = Cursor::new(payload);
    let event: Event =
        rmp_serde::decode::from_read(&mut cursor).map_err(|e| WireError::Decode(e.to_string()))?;
    let consumed = cursor.position() as usize;
    if consumed != payload.len() {
        return Err(WireError::Decode(format!(
            "{} trailing bytes after event",
            payload.len() - consumed
        )));
    }
    event
        .validate()
        .map_err(|e| WireError::Decode(e.to_string()))?;
    Ok(event)
}

/// Classify a frame payload.
pub fn decode_inbound(payload: &[u8]) -> Result<Inbound, WireError> {
    if is_heartbeat(payload) {
        return Ok(Inbound::Heartbeat);
    }
    decode_event(payload).map(Inbound::Event)
}
