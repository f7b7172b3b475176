//! Liveness for established connections.
//!
//! Each side of a connection writes the sentinel frame every `interval`. A
//! peer that sends nothing, sentinel or event, for `interval * multiplier` is
//! considered dead and its connection is closed. The writer side runs as a
//! task bound to the connection: it exits when the connection closes, and
//! closes the connection itself when a sentinel cannot be written in time.

use crate::connection::Connection;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Default interval between liveness sentinels.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A peer is dead after this many intervals of silence.
pub const DEAD_PEER_MULTIPLIER: u32 = 3;

/// Liveness timing for one connection.
#[derive(Debug, Clone)]
pub struct HeartbeatConfig {
    /// How often to write the sentinel. Also the per-write deadline.
    pub interval: Duration,
    /// Silence of `interval * dead_multiplier` marks the peer dead.
    pub dead_multiplier: u32,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: HEARTBEAT_INTERVAL,
            dead_multiplier: DEAD_PEER_MULTIPLIER,
        }
    }
}

impl HeartbeatConfig {
    /// Longest a read may wait for the next frame.
    pub fn dead_peer_window(&self) -> Duration {
        self.interval * self.dead_multiplier
    }
}

/// Handle to a running heartbeat writer.
///
/// Dropping the handle aborts the task.
pub struct Heartbeat {
    handle: Option<JoinHandle<()>>,
}

impl Heartbeat {
    /// Start writing sentinels on `conn` until it closes.
    pub fn spawn<S>(conn: Arc<Connection<S>>, config: HeartbeatConfig) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            loop {
                if let Err(e) = conn.send_heartbeat(config.interval).await {
                    if !conn.is_closed() {
                        warn!(
                            conn = conn.id(),
                            peer = %conn.peer(),
                            error = %e,
                            "Heartbeat write failed, closing connection"
                        );
                        conn.close("heartbeat write failed").await;
                    }
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.interval) => {}
                    _ = conn.closed() => break,
                }
            }
            debug!(conn = conn.id(), "Heartbeat stopped");
        });
        Self {
            handle: Some(handle),
        }
    }

    /// Wait for the writer to exit. Call after the connection is closed.
    pub async fn join(mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::is_heartbeat;

    #[test]
    fn test_default_timing() {
        let config = HeartbeatConfig::default();
        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.dead_peer_window(), Duration::from_secs(15));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sentinel_every_interval() {
        let (a, b) = tokio::io::duplex(1024);
        let conn = Arc::new(Connection::new(a, "peer"));
        let remote = Connection::new(b, "remote");
        let heartbeat = Heartbeat::spawn(conn.clone(), HeartbeatConfig::default());

        let started = tokio::time::Instant::now();
        for _ in 0..3 {
            let frame = remote.read_frame(Duration::from_secs(6)).await.unwrap();
            assert!(is_heartbeat(&frame));
        }
        // First sentinel goes out immediately, then one per interval.
        assert!(started.elapsed() >= Duration::from_secs(10));

        conn.close("test").await;
        heartbeat.join().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_write_closes_connection() {
        // One-byte pipe nobody reads: the first sentinel write stalls.
        let (a, _stalled) = tokio::io::duplex(1);
        let conn = Arc::new(Connection::new(a, "peer"));
        let heartbeat = Heartbeat::spawn(conn.clone(), HeartbeatConfig::default());
        heartbeat.join().await;
        assert!(conn.is_closed());
    }

    #[tokio::test]
    async fn test_exits_when_connection_closes() {
        let (a, _b) = tokio::io::duplex(1024);
        let conn = Arc::new(Connection::new(a, "peer"));
        let heartbeat = Heartbeat::spawn(conn.clone(), HeartbeatConfig::default());
        conn.close("done").await;
        tokio::time::timeout(Duration::from_secs(1), heartbeat.join())
            .await
            .unwrap();
    }
}
