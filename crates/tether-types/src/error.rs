//! Shared error types for the tether system.

use std::time::Duration;
use thiserror::Error;

/// Top-level error type for the tether system.
///
/// Variants follow the failure classes of the relay protocol. Decode, lookup
/// and execution failures only spoil the current message; the rest end the
/// connection or the process.
#[derive(Error, Debug)]
pub enum TetherError {
    /// Certificate, private key or trust root could not be loaded.
    #[error("Identity material error: {0}")]
    Auth(String),

    /// Dialing or accepting a transport connection failed.
    #[error("Connection to {addr} failed: {reason}")]
    Connect {
        /// Address that was dialed or listened on.
        addr: String,
        /// Underlying cause.
        reason: String,
    },

    /// The stream closed mid-frame or declared an invalid length.
    #[error("Framing error: {0}")]
    Framing(String),

    /// A frame payload is not a well-formed event.
    #[error("Event decode failed: {0}")]
    Decode(String),

    /// No local action is registered under the event name.
    #[error("No action registered for event '{0}'")]
    ActionNotFound(String),

    /// The action did not finish within its execution deadline.
    #[error("Action '{name}' exceeded its {after:?} deadline")]
    ActionTimeout {
        /// Action name.
        name: String,
        /// The deadline that elapsed.
        after: Duration,
    },

    /// No frame arrived within the dead-peer window.
    #[error("No traffic from peer within {0:?}")]
    LivenessTimeout(Duration),

    /// An event failed validation before it was sent.
    #[error("Invalid event: {0}")]
    InvalidEvent(String),

    /// A configuration error occurred.
    #[error("Configuration error: {0}")]
    Config(String),

    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
