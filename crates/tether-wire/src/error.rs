//! Errors from the wire protocol layer.

use std::time::Duration;
use tether_types::error::TetherError;
use thiserror::Error;

/// Errors from the wire protocol layer.
#[derive(Debug, Error)]
pub enum WireError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Identity material error: {0}")]
    Auth(String),
    #[error("TLS configuration error: {0}")]
    Tls(#[from] rustls::Error),
    #[error("Connection to {addr} failed: {source}")]
    Connect {
        addr: String,
        #[source]
        source: std::io::Error,
    },
    #[error("TLS handshake with {peer} failed: {reason}")]
    Handshake { peer: String, reason: String },
    #[error("Connection closed")]
    ConnectionClosed,
    #[error("Connection closed mid-frame ({read} of {expected} bytes)")]
    Truncated { read: usize, expected: usize },
    #[error("Frame too large: {size} bytes (max {max})")]
    FrameTooLarge { size: usize, max: usize },
    #[error("Event encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Event decode failed: {0}")]
    Decode(String),
    #[error("Invalid event: {0}")]
    InvalidEvent(String),
    #[error("No frame from peer within {window:?}")]
    LivenessTimeout { window: Duration },
    #[error("Write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

impl WireError {
    /// Whether the connection this error occurred on must be torn down.
    ///
    /// Only a malformed event payload leaves the framing intact.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(self, WireError::Decode(_) | WireError::InvalidEvent(_))
    }
}

impl From<WireError> for TetherError {
    fn from(err: WireError) -> Self {
        match err {
            WireError::Io(e) => TetherError::Io(e),
            WireError::Auth(msg) => TetherError::Auth(msg),
            WireError::Tls(e) => TetherError::Auth(e.to_string()),
            WireError::Connect { addr, source } => TetherError::Connect {
                addr,
                reason: source.to_string(),
            },
            WireError::Handshake { peer, reason } => TetherError::Connect { addr: peer, reason },
            WireError::Decode(msg) => TetherError::Decode(msg),
            WireError::InvalidEvent(msg) => TetherError::InvalidEvent(msg),
            WireError::LivenessTimeout { window } => TetherError::LivenessTimeout(window),
            other @ (WireError::ConnectionClosed
            | WireError::Truncated { .. }
            | WireError::FrameTooLarge { .. }
            | WireError::Encode(_)
            | WireError::WriteTimeout(_)) => TetherError::Framing(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_payload_errors_are_recoverable() {
        assert!(!WireError::Decode("garbled".into()).is_connection_fatal());
        assert!(WireError::ConnectionClosed.is_connection_fatal());
        assert!(WireError::LivenessTimeout {
            window: Duration::from_secs(15)
        }
        .is_connection_fatal());
    }

    #[test]
    fn test_maps_into_taxonomy() {
        let err: TetherError = WireError::LivenessTimeout {
            window: Duration::from_secs(15),
        }
        .into();
        assert!(matches!(err, TetherError::LivenessTimeout(_)));

        let err: TetherError = WireError::Truncated {
            read: 2,
            expected: 10,
        }
        .into();
        assert!(matches!(err, TetherError::Framing(_)));

        let err: TetherError = WireError::Auth("bad root".into()).into();
        assert!(matches!(err, TetherError::Auth(_)));
    }
}
