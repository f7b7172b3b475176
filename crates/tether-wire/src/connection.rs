//! A framed, closable connection shared between tasks.
//!
//! Writes from any task (event forwarding, heartbeats) are serialized through
//! a single writer lock, so frames never interleave. Closing is idempotent:
//! the first [`Connection::close`] flips the state to dead, wakes every
//! pending read or write and shuts the stream down; later calls are no-ops.

use crate::error::WireError;
use crate::frame::{self, MAX_FRAME_SIZE};
use crate::message::{encode_event, HEARTBEAT_PAYLOAD};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tether_types::event::Event;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{watch, Mutex};
use tracing::debug;

/// How long a closing connection waits for its shutdown to flush.
const CLOSE_GRACE: Duration = Duration::from_secs(1);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Liveness state of a connection. `Dead` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
}

/// An authenticated byte stream with framing, a single writer and
/// close-once semantics.
pub struct Connection<S> {
    id: u64,
    peer: String,
    reader: Mutex<ReadHalf<S>>,
    writer: Mutex<WriteHalf<S>>,
    closed: watch::Sender<bool>,
    max_frame_size: usize,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    /// Wrap an established stream. `peer` is used in logs only.
    pub fn new(stream: S, peer: impl Into<String>) -> Self {
        let (reader, writer) = tokio::io::split(stream);
        let (closed, _) = watch::channel(false);
        Self {
            id: NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed),
            peer: peer.into(),
            reader: Mutex::new(reader),
            writer: Mutex::new(writer),
            closed,
            max_frame_size: MAX_FRAME_SIZE,
        }
    }

    /// Process-unique connection id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remote address or name this connection was made with.
    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn liveness(&self) -> Liveness {
        if *self.closed.borrow() {
            Liveness::Dead
        } else {
            Liveness::Alive
        }
    }

    pub fn is_closed(&self) -> bool {
        self.liveness() == Liveness::Dead
    }

    /// Resolves once the connection has been closed.
    pub async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    /// Read the next frame, waiting at most `window` for it.
    ///
    /// Any error leaves the stream mid-frame; the caller must close the
    /// connection.
    pub async fn read_frame(&self, window: Duration) -> Result<Vec<u8>, WireError> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        let max = self.max_frame_size;
        let read = async {
            let mut reader = self.reader.lock().await;
            tokio::time::timeout(window, frame::read_frame(&mut *reader, max)).await
        };
        tokio::select! {
            result = read => match result {
                Ok(frame) => frame,
                Err(_) => Err(WireError::LivenessTimeout { window }),
            },
            _ = self.closed() => Err(WireError::ConnectionClosed),
        }
    }

    /// Write one frame, waiting at most `deadline` for the writer lock and
    /// the write itself.
    pub async fn write_frame(&self, payload: &[u8], deadline: Duration) -> Result<(), WireError> {
        if self.is_closed() {
            return Err(WireError::ConnectionClosed);
        }
        let write = tokio::time::timeout(deadline, async {
            let mut writer = self.writer.lock().await;
            frame::write_frame(&mut *writer, payload).await
        });
        tokio::select! {
            result = write => match result {
                Ok(written) => written,
                Err(_) => Err(WireError::WriteTimeout(deadline)),
            },
            _ = self.closed() => Err(WireError::ConnectionClosed),
        }
    }

    /// Encode and write one event.
    pub async fn send_event(&self, event: &Event, deadline: Duration) -> Result<(), WireError> {
        let payload = encode_event(event)?;
        self.write_frame(&payload, deadline).await
    }

    /// Write one liveness sentinel.
    pub async fn send_heartbeat(&self, deadline: Duration) -> Result<(), WireError> {
        self.write_frame(HEARTBEAT_PAYLOAD, deadline).await
    }

    /// Close the connection. Returns `true` only for the call that actually
    /// performed the close.
    pub async fn close(&self, reason: &str) -> bool {
        let first = self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
        if !first {
            return false;
        }
        debug!(conn = self.id, peer = %self.peer, reason, "Closing connection");
        let shutdown = async {
            let mut writer = self.writer.lock().await;
            writer.shutdown().await
        };
        if let Ok(Err(e)) = tokio::time::timeout(CLOSE_GRACE, shutdown).await {
            debug!(conn = self.id, error = %e, "Shutdown after close failed");
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    const WINDOW: Duration = Duration::from_secs(5);

    #[tokio::test]
    async fn test_frames_flow_both_ways() {
        let (a, b) = tokio::io::duplex(1024);
        let left = Connection::new(a, "left");
        let right = Connection::new(b, "right");

        let event = Event::new("notify", vec!["hi".into()]);
        left.send_event(&event, WINDOW).await.unwrap();
        left.send_heartbeat(WINDOW).await.unwrap();

        let first = right.read_frame(WINDOW).await.unwrap();
        assert_eq!(crate::message::decode_event(&first).unwrap(), event);
        let second = right.read_frame(WINDOW).await.unwrap();
        assert!(crate::message::is_heartbeat(&second));
        assert_ne!(left.id(), right.id());
    }

    #[tokio::test]
    async fn test_close_is_idempotent_and_wakes_reader() {
        let (a, _b) = tokio::io::duplex(1024);
        let conn = Arc::new(Connection::new(a, "peer"));

        let reader = {
            let conn = conn.clone();
            tokio::spawn(async move { conn.read_frame(Duration::from_secs(60)).await })
        };
        tokio::task::yield_now().await;

        assert!(conn.close("test").await);
        assert!(!conn.close("again").await);
        assert_eq!(conn.liveness(), Liveness::Dead);

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(WireError::ConnectionClosed)));
        assert!(matches!(
            conn.send_heartbeat(WINDOW).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_reaches_the_peer_as_eof() {
        let (a, b) = tokio::io::duplex(1024);
        let local = Connection::new(a, "local");
        let remote = Connection::new(b, "remote");
        local.close("done").await;
        assert!(matches!(
            remote.read_frame(WINDOW).await,
            Err(WireError::ConnectionClosed)
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_hits_liveness_window() {
        let (a, _silent) = tokio::io::duplex(1024);
        let conn = Connection::new(a, "peer");
        let started = tokio::time::Instant::now();
        let err = conn
            .read_frame(Duration::from_secs(15))
            .await
            .unwrap_err();
        assert!(matches!(err, WireError::LivenessTimeout { .. }));
        assert!(started.elapsed() >= Duration::from_secs(15));
    }

    #[tokio::test]
    async fn test_concurrent_writers_never_interleave() {
        let (a, b) = tokio::io::duplex(64);
        let writer = Arc::new(Connection::new(a, "writer"));
        let reader = Connection::new(b, "reader");

        let mut tasks = Vec::new();
        for i in 0..8u8 {
            let writer = writer.clone();
            tasks.push(tokio::spawn(async move {
                writer.write_frame(&[i; 100], WINDOW).await.unwrap();
            }));
        }
        for _ in 0..8 {
            let frame = reader.read_frame(WINDOW).await.unwrap();
            assert_eq!(frame.len(), 100);
            assert!(frame.iter().all(|b| *b == frame[0]));
        }
        for task in tasks {
            task.await.unwrap();
        }
    }
}
