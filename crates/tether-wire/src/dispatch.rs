//! Consumer side: receive events from the relay and run matching actions.
//!
//! Per-event failures (undecodable payload, unknown action, failed or slow
//! action) are logged and the loop keeps reading. Only a transport failure
//! or a silent relay ends it.

use crate::connection::Connection;
use crate::error::WireError;
use crate::heartbeat::{Heartbeat, HeartbeatConfig};
use crate::message::{decode_inbound, Inbound};
use crate::tls::SecureDialer;
use std::sync::Arc;
use std::time::Duration;
use tether_types::action::{ActionHandle, ActionOutcome};
use tether_types::error::TetherError;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, error, info, warn};

/// Default upper bound on a single action's run time.
pub const ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Dispatch loop timing.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub heartbeat: HeartbeatConfig,
    /// Deadline handed to every action invocation.
    pub action_timeout: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            action_timeout: ACTION_TIMEOUT,
        }
    }
}

/// What happened to one inbound frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    Heartbeat,
    /// The payload could not be decoded and was skipped.
    Malformed,
    /// No action is registered under the event name.
    Unmatched(String),
    /// The action ran (or tried to).
    Ran { name: String, outcome: ActionOutcome },
}

/// Running totals for one dispatch session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub heartbeats: u64,
    pub malformed: u64,
    pub unmatched: u64,
    pub completed: u64,
    pub failed: u64,
}

/// Routes decoded events to the action executor.
pub struct Dispatcher {
    actions: Arc<dyn ActionHandle>,
    config: DispatchConfig,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(actions: Arc<dyn ActionHandle>, config: DispatchConfig) -> Self {
        Self {
            actions,
            config,
            stats: DispatchStats::default(),
        }
    }

    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Handle one frame payload. Never fails: every per-event problem is
    /// logged and reported through the returned disposition.
    pub async fn handle_frame(&mut self, payload: &[u8]) -> Disposition {
        let event = match decode_inbound(payload) {
            Ok(Inbound::Heartbeat) => {
                self.stats.heartbeats += 1;
                return Disposition::Heartbeat;
            }
            Ok(Inbound::Event(event)) => event,
            Err(e) => {
                self.stats.malformed += 1;
                warn!(len = payload.len(), error = %e, "Dropping undecodable frame");
                return Disposition::Malformed;
            }
        };

        if !self.actions.has_action(&event.name) {
            self.stats.unmatched += 1;
            let err = TetherError::ActionNotFound(event.name.clone());
            warn!(error = %err, "Ignoring event");
            return Disposition::Unmatched(event.name);
        }

        let name = event.name.clone();
        info!(event = %event, "Running action");
        let outcome = self
            .actions
            .invoke(event, self.config.action_timeout)
            .await;
        self.log_outcome(&name, &outcome);
        Disposition::Ran { name, outcome }
    }

    fn log_outcome(&mut self, name: &str, outcome: &ActionOutcome) {
        match outcome {
            ActionOutcome::Completed { output } => {
                self.stats.completed += 1;
                info!(action = %name, "Action completed");
                if !output.is_empty() {
                    debug!(action = %name, output = %output, "Action output");
                }
            }
            ActionOutcome::Failed { code, output } => {
                self.stats.failed += 1;
                warn!(action = %name, code = ?code, output = %output, "Action failed");
            }
            ActionOutcome::NotFound => {
                self.stats.unmatched += 1;
                if let Some(err) = outcome.as_error(name) {
                    warn!(error = %err, "Action disappeared before it could run");
                }
            }
            ActionOutcome::TimedOut { .. } => {
                self.stats.failed += 1;
                if let Some(err) = outcome.as_error(name) {
                    warn!(error = %err, "Action killed");
                }
            }
            ActionOutcome::SpawnFailed { reason } => {
                self.stats.failed += 1;
                error!(action = %name, reason = %reason, "Action could not be started");
            }
        }
    }

    /// Read and dispatch frames from `conn` until it fails or goes silent.
    ///
    /// A heartbeat writer runs alongside for the lifetime of the loop. The
    /// connection is closed before this returns. A clean close by the relay
    /// yields `Ok`; every other exit is an error.
    pub async fn run<S>(&mut self, conn: Arc<Connection<S>>) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        self.run_after(conn, None).await
    }

    /// Like [`Dispatcher::run`], handling `first_frame` (already read by the
    /// caller) before reading more.
    pub async fn run_after<S>(
        &mut self,
        conn: Arc<Connection<S>>,
        first_frame: Option<Vec<u8>>,
    ) -> Result<(), WireError>
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let heartbeat = Heartbeat::spawn(conn.clone(), self.config.heartbeat.clone());
        let window = self.config.heartbeat.dead_peer_window();

        if let Some(payload) = first_frame {
            self.handle_frame(&payload).await;
        }
        let result = loop {
            match conn.read_frame(window).await {
                Ok(payload) => {
                    self.handle_frame(&payload).await;
                }
                Err(WireError::ConnectionClosed) => break Ok(()),
                Err(e) if !e.is_connection_fatal() => {
                    warn!(conn = conn.id(), error = %e, "Skipping unreadable frame");
                }
                Err(e) => break Err(e),
            }
        };

        let reason = match &result {
            Ok(()) => "relay closed the connection".to_string(),
            Err(e) => e.to_string(),
        };
        conn.close(&reason).await;
        heartbeat.join().await;
        result
    }
}

/// Connect to the relay's consumer port and dispatch events until the
/// connection is lost.
pub async fn run_consumer(
    dialer: &SecureDialer,
    host: &str,
    port: u16,
    actions: Arc<dyn ActionHandle>,
    config: DispatchConfig,
) -> Result<DispatchStats, WireError> {
    let link = dialer.attach(host, port).await?;
    let conn = Arc::new(link.conn);
    info!(relay = %conn.peer(), "Connected to relay, waiting for events");

    let mut dispatcher = Dispatcher::new(actions, config);
    let result = dispatcher.run_after(conn, Some(link.first_frame)).await;
    let stats = dispatcher.stats().clone();
    info!(
        completed = stats.completed,
        failed = stats.failed,
        unmatched = stats.unmatched,
        malformed = stats.malformed,
        "Relay connection ended"
    );
    result.map(|()| stats)
}
