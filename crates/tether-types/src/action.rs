//! Local actions bound to event names.
//!
//! The consumer's dispatch loop talks to the action executor through the
//! [`ActionHandle`] trait, so the wire crate never depends on how actions are
//! discovered or run.

use crate::error::TetherError;
use crate::event::Event;
use async_trait::async_trait;
use std::time::Duration;

/// How an action invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionOutcome {
    /// The action exited with status zero.
    Completed {
        /// Combined stdout and stderr.
        output: String,
    },
    /// The action exited with a non-zero status or was killed by a signal.
    Failed {
        /// Exit code, if the process exited normally.
        code: Option<i32>,
        /// Combined stdout and stderr.
        output: String,
    },
    /// The action ran past its deadline and was killed.
    TimedOut {
        /// The deadline that elapsed.
        after: Duration,
    },
    /// No action is registered under the event name.
    NotFound,
    /// The action exists but could not be started.
    SpawnFailed {
        /// Why the spawn failed.
        reason: String,
    },
}

impl ActionOutcome {
    /// The taxonomy error matching this outcome, if it is a lookup or deadline failure.
    pub fn as_error(&self, name: &str) -> Option<TetherError> {
        match self {
            ActionOutcome::NotFound => Some(TetherError::ActionNotFound(name.to_string())),
            ActionOutcome::TimedOut { after } => Some(TetherError::ActionTimeout {
                name: name.to_string(),
                after: *after,
            }),
            _ => None,
        }
    }
}

/// The action registry and executor, as seen by the dispatch loop.
#[async_trait]
pub trait ActionHandle: Send + Sync + 'static {
    /// Whether an action is currently registered under `name`.
    fn has_action(&self, name: &str) -> bool;

    /// Run the action bound to `event.name` with a bounded execution time.
    ///
    /// Implementations must release the spawned process on every path,
    /// including when `deadline` elapses.
    async fn invoke(&self, event: Event, deadline: Duration) -> ActionOutcome;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_classification() {
        let ok = ActionOutcome::Completed {
            output: String::new(),
        };
        assert!(ok.as_error("x").is_none());

        let missing = ActionOutcome::NotFound;
        assert!(matches!(
            missing.as_error("unknown"),
            Some(TetherError::ActionNotFound(name)) if name == "unknown"
        ));

        let slow = ActionOutcome::TimedOut {
            after: Duration::from_secs(10),
        };
        assert!(matches!(
            slow.as_error("notify"),
            Some(TetherError::ActionTimeout { .. })
        ));
    }
}
