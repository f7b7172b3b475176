//! `tether consume`: stay connected to the relay and run hooks.

use super::{dialer, relay_host};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tether_runtime::{ExecutionLimits, HookExecutor, HookRegistry};
use tether_types::action::ActionHandle;
use tether_types::config::{Role, TetherConfig};
use tether_types::error::TetherError;
use tether_wire::dispatch::DispatchStats;
use tether_wire::heartbeat::HEARTBEAT_INTERVAL;
use tether_wire::{run_consumer, DispatchConfig, WireError};
use tracing::{debug, info, warn};

pub async fn run(conf_dir: &Path, config: &TetherConfig) -> Result<(), TetherError> {
    let host = relay_host(config)?;
    let dialer = dialer(conf_dir, Role::Consumer, config)?;

    let registry = HookRegistry::new(config.hooks_dir(conf_dir));
    info!(dir = %registry.dir().display(), hooks = ?registry.list(), "Hooks available");
    let actions: Arc<dyn ActionHandle> =
        Arc::new(HookExecutor::new(registry, ExecutionLimits::default()));
    let dispatch = DispatchConfig::default();

    let mut reconnect = Reconnect::default();
    loop {
        let session = run_consumer(
            &dialer,
            &host,
            config.consumer_port,
            actions.clone(),
            dispatch.clone(),
        );
        let result = tokio::select! {
            result = session => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, disconnecting");
                return Ok(());
            }
        };

        let delay = match reconnect.after(result) {
            Next::Redial => {
                debug!("Relay ended the session, reconnecting");
                continue;
            }
            Next::RetryAfter(delay) => delay,
            Next::Exit(e) => return Err(e.into()),
        };
        info!(retry_in = ?delay, "Reconnecting to relay");
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = tokio::signal::ctrl_c() => return Ok(()),
        }
    }
}

/// What the consume loop does once a session has ended.
#[derive(Debug)]
enum Next {
    /// Dial again right away.
    Redial,
    /// Dial again after a pause.
    RetryAfter(Duration),
    /// Give up and report the error.
    Exit(WireError),
}

/// Reconnection policy for the consume loop.
///
/// The relay closes the consumer whenever its producer goes away, which
/// happens after every event, so a clean end is followed by an immediate
/// redial to keep the window without a consumer short. Failures wait one
/// heartbeat interval. A first dial the relay refuses (unreachable, bad
/// certificate, rejected identity) ends the process instead.
#[derive(Debug, Default)]
struct Reconnect {
    established: bool,
}

impl Reconnect {
    fn after(&mut self, result: Result<DispatchStats, WireError>) -> Next {
        match result {
            Ok(_) => {
                self.established = true;
                Next::Redial
            }
            Err(e) if is_dial_failure(&e) && !self.established => Next::Exit(e),
            Err(e) => {
                if !is_dial_failure(&e) {
                    self.established = true;
                }
                warn!(error = %e, "Relay session ended");
                Next::RetryAfter(HEARTBEAT_INTERVAL)
            }
        }
    }
}

/// Errors that happen before the relay has accepted the session.
fn is_dial_failure(err: &WireError) -> bool {
    matches!(
        err,
        WireError::Connect { .. }
            | WireError::Handshake { .. }
            | WireError::Auth(_)
            | WireError::Tls(_)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn refused() -> WireError {
        WireError::Connect {
            addr: "relay:8891".into(),
            source: std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
        }
    }

    fn rejected() -> WireError {
        WireError::Handshake {
            peer: "relay:8891".into(),
            reason: "relay rejected the connection: connection closed".into(),
        }
    }

    #[test]
    fn test_dial_failures() {
        assert!(is_dial_failure(&refused()));
        assert!(is_dial_failure(&rejected()));
        assert!(!is_dial_failure(&WireError::ConnectionClosed));
        assert!(!is_dial_failure(&WireError::LivenessTimeout {
            window: Duration::from_secs(15)
        }));
    }

    #[test]
    fn test_rejected_first_dial_exits() {
        let mut reconnect = Reconnect::default();
        assert!(matches!(
            reconnect.after(Err(rejected())),
            Next::Exit(WireError::Handshake { .. })
        ));
        let mut reconnect = Reconnect::default();
        assert!(matches!(reconnect.after(Err(refused())), Next::Exit(_)));
    }

    #[test]
    fn test_clean_end_redials_immediately() {
        let mut reconnect = Reconnect::default();
        assert!(matches!(
            reconnect.after(Ok(DispatchStats::default())),
            Next::Redial
        ));
        assert!(matches!(
            reconnect.after(Ok(DispatchStats::default())),
            Next::Redial
        ));
    }

    #[test]
    fn test_failures_after_a_session_back_off() {
        let mut reconnect = Reconnect::default();
        reconnect.after(Ok(DispatchStats::default()));

        // The relay restarting must not end a consumer that was running.
        assert!(matches!(
            reconnect.after(Err(refused())),
            Next::RetryAfter(d) if d == HEARTBEAT_INTERVAL
        ));

        let mut reconnect = Reconnect::default();
        assert!(matches!(
            reconnect.after(Err(WireError::LivenessTimeout {
                window: Duration::from_secs(15)
            })),
            Next::RetryAfter(_)
        ));
        assert!(matches!(reconnect.after(Err(rejected())), Next::RetryAfter(_)));
    }
}
