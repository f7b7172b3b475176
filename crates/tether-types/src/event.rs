//! The event relayed from a producer to a consumer.
//!
//! An event names an action registered on the consumer, carries its
//! positional arguments and an optional stdin payload. Events are immutable
//! once built and are consumed by the action executor.

use crate::error::TetherError;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A request to run a named action on the consumer.
///
/// Field order is part of the wire format: the event codec serializes the
/// struct positionally.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Name of the registered action to invoke.
    pub name: String,
    /// Positional arguments passed to the action.
    pub args: Vec<String>,
    /// Bytes fed to the action's stdin. Empty means no input.
    #[serde(with = "serde_bytes")]
    pub stdin: Vec<u8>,
}

impl Event {
    /// Build an event with no stdin payload.
    pub fn new(name: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            name: name.into(),
            args,
            stdin: Vec::new(),
        }
    }

    /// Attach a stdin payload.
    pub fn with_stdin(mut self, stdin: Vec<u8>) -> Self {
        self.stdin = stdin;
        self
    }

    /// Check the invariants every event must satisfy on the wire.
    pub fn validate(&self) -> Result<(), TetherError> {
        if self.name.is_empty() {
            return Err(TetherError::InvalidEvent("event name is empty".into()));
        }
        if self.name.chars().any(char::is_control) {
            return Err(TetherError::InvalidEvent(format!(
                "event name {:?} contains control characters",
                self.name
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {:?}", self.name, self.args)?;
        if !self.stdin.is_empty() {
            write!(f, " (+{} bytes stdin)", self.stdin.len())?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(Event::new("notify", vec!["hello".into()]).validate().is_ok());
        assert!(Event::new("", vec![]).validate().is_err());
        assert!(Event::new("no\ntify", vec![]).validate().is_err());
    }

    #[test]
    fn test_display() {
        let event = Event::new("notify", vec!["hello".into()]);
        assert_eq!(event.to_string(), "notify [\"hello\"]");
        let event = event.with_stdin(b"abc".to_vec());
        assert_eq!(event.to_string(), "notify [\"hello\"] (+3 bytes stdin)");
    }

    #[test]
    fn test_msgpack_is_positional() {
        let event = Event::new("copy", vec![]).with_stdin(b"clip".to_vec());
        let bytes = rmp_serde::to_vec(&event).unwrap();
        // fixarray of three elements
        assert_eq!(bytes[0], 0x93);
        let decoded: Event = rmp_serde::from_slice(&bytes).unwrap();
        assert_eq!(decoded, event);
    }
}
