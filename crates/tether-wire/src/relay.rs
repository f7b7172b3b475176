//! The relay: pairs one producer connection with one consumer connection.
//!
//! The relay listens on two ports, one per role. Each role has a single
//! slot; a reconnect replaces the occupant and closes the stale connection.
//! Frames from the producer are forwarded verbatim to the current consumer.
//! When either side of a pairing is lost (EOF, error, or silence past the
//! dead-peer window) the other side is closed too, so neither end keeps a
//! half-open pairing.

use crate::connection::Connection;
use crate::error::WireError;
use crate::heartbeat::{Heartbeat, HeartbeatConfig};
use crate::message::is_heartbeat;
use crate::tls::{Identity, PendingHandshake, SecureListener, ServerStream};
use chrono::{DateTime, Utc};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::{Arc, Mutex};
use tether_types::config::{Role, DEFAULT_CONSUMER_PORT, DEFAULT_PRODUCER_PORT};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Relay listener configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub listen_addr: IpAddr,
    pub producer_port: u16,
    pub consumer_port: u16,
    pub heartbeat: HeartbeatConfig,
    /// Name producer certificates must be valid for, on top of the shared root.
    pub producer_identity: Option<String>,
    /// Name consumer certificates must be valid for, on top of the shared root.
    pub consumer_identity: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            producer_port: DEFAULT_PRODUCER_PORT,
            consumer_port: DEFAULT_CONSUMER_PORT,
            heartbeat: HeartbeatConfig::default(),
            producer_identity: None,
            consumer_identity: None,
        }
    }
}

/// Public view of an occupied slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotInfo {
    pub connection_id: u64,
    pub peer: SocketAddr,
    pub connected_at: DateTime<Utc>,
}

/// Point-in-time view of both slots.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RelaySnapshot {
    pub producer: Option<SlotInfo>,
    pub consumer: Option<SlotInfo>,
}

impl RelaySnapshot {
    /// Whether a producer and a consumer are both attached.
    pub fn is_paired(&self) -> bool {
        self.producer.is_some() && self.consumer.is_some()
    }
}

fn partner(side: Role) -> Role {
    match side {
        Role::Producer => Role::Consumer,
        _ => Role::Producer,
    }
}

struct Slot<S> {
    conn: Arc<Connection<S>>,
    info: SlotInfo,
}

/// One connection slot per role.
struct Slots<S> {
    producer: Option<Slot<S>>,
    consumer: Option<Slot<S>>,
    /// Set by [`Slots::drain`]; no connection attaches afterwards.
    closed: bool,
}

impl<S> Default for Slots<S> {
    fn default() -> Self {
        Self {
            producer: None,
            consumer: None,
            closed: false,
        }
    }
}

/// Result of offering a connection to a slot.
enum Attach<S> {
    /// The slot was free or held a stale connection, now replaced.
    Attached { replaced: Option<Slot<S>> },
    /// The relay is shutting down.
    Refused,
}

impl<S> Slots<S>
where
    S: AsyncRead + AsyncWrite + Send + 'static,
{
    fn slot_mut(&mut self, side: Role) -> &mut Option<Slot<S>> {
        match side {
            Role::Producer => &mut self.producer,
            _ => &mut self.consumer,
        }
    }

    /// Put `conn` in the slot for `side`, handing back the connection it
    /// replaced.
    fn attach(&mut self, side: Role, conn: Arc<Connection<S>>, peer: SocketAddr) -> Attach<S> {
        if self.closed {
            return Attach::Refused;
        }
        let info = SlotInfo {
            connection_id: conn.id(),
            peer,
            connected_at: Utc::now(),
        };
        Attach::Attached {
            replaced: self.slot_mut(side).replace(Slot { conn, info }),
        }
    }

    /// Release the slot held by connection `conn_id` and take its partner.
    ///
    /// Returns `None` without touching anything when `conn_id` no longer
    /// occupies the slot, i.e. it was already replaced or torn down.
    fn detach(&mut self, side: Role, conn_id: u64) -> Option<Option<Slot<S>>> {
        let own = self.slot_mut(side);
        if own.as_ref().map(|s| s.conn.id()) != Some(conn_id) {
            return None;
        }
        *own = None;
        Some(self.slot_mut(partner(side)).take())
    }

    fn consumer(&self) -> Option<Arc<Connection<S>>> {
        self.consumer.as_ref().map(|s| s.conn.clone())
    }

    fn snapshot(&self) -> RelaySnapshot {
        RelaySnapshot {
            producer: self.producer.as_ref().map(|s| s.info.clone()),
            consumer: self.consumer.as_ref().map(|s| s.info.clone()),
        }
    }

    fn drain(&mut self) -> Vec<Slot<S>> {
        self.closed = true;
        self.producer.take().into_iter().chain(self.consumer.take()).collect()
    }
}

/// The relay node.
pub struct Relay {
    config: RelayConfig,
    producer_addr: SocketAddr,
    consumer_addr: SocketAddr,
    slots: Mutex<Slots<ServerStream>>,
    shutdown: watch::Sender<bool>,
}

impl Relay {
    /// Bind both listeners and start accepting.
    ///
    /// Returns the relay and the handle of the task running both accept
    /// loops. The task ends after [`Relay::shutdown`].
    pub async fn start(
        config: RelayConfig,
        identity: &Identity,
    ) -> Result<(Arc<Self>, JoinHandle<()>), WireError> {
        let mut producer_listener = SecureListener::bind(
            SocketAddr::new(config.listen_addr, config.producer_port),
            Role::Producer,
            identity,
        )
        .await?;
        if let Some(name) = &config.producer_identity {
            producer_listener = producer_listener.require_identity(name)?;
        }
        let mut consumer_listener = SecureListener::bind(
            SocketAddr::new(config.listen_addr, config.consumer_port),
            Role::Consumer,
            identity,
        )
        .await?;
        if let Some(name) = &config.consumer_identity {
            consumer_listener = consumer_listener.require_identity(name)?;
        }
        let producer_addr = producer_listener.local_addr()?;
        let consumer_addr = consumer_listener.local_addr()?;

        info!(
            producer = %producer_addr,
            consumer = %consumer_addr,
            "Relay listening"
        );

        let (shutdown, _) = watch::channel(false);
        let relay = Arc::new(Self {
            config,
            producer_addr,
            consumer_addr,
            slots: Mutex::new(Slots::default()),
            shutdown,
        });

        let producer_loop = tokio::spawn(Arc::clone(&relay).accept_loop(producer_listener));
        let consumer_loop = tokio::spawn(Arc::clone(&relay).accept_loop(consumer_listener));
        let handle = tokio::spawn(async move {
            let _ = producer_loop.await;
            let _ = consumer_loop.await;
        });

        Ok((relay, handle))
    }

    /// Actual producer listener address (useful when binding to port 0).
    pub fn producer_addr(&self) -> SocketAddr {
        self.producer_addr
    }

    /// Actual consumer listener address.
    pub fn consumer_addr(&self) -> SocketAddr {
        self.consumer_addr
    }

    /// Who is attached right now.
    pub fn snapshot(&self) -> RelaySnapshot {
        self.lock_slots().snapshot()
    }

    /// Stop accepting and close every attached connection.
    pub async fn shutdown(&self) {
        self.shutdown.send_replace(true);
        let drained = self.lock_slots().drain();
        for slot in drained {
            slot.conn.close("relay shutting down").await;
        }
    }

    fn lock_slots(&self) -> std::sync::MutexGuard<'_, Slots<ServerStream>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    async fn accept_loop(self: Arc<Self>, listener: SecureListener) {
        let side = listener.role();
        let mut shutdown = self.shutdown.subscribe();
        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok(pending) => {
                        debug!(role = %side, peer = %pending.peer(), "Accepted connection");
                        let relay = Arc::clone(&self);
                        tokio::spawn(async move {
                            relay.serve(side, pending).await;
                        });
                    }
                    Err(e) => {
                        error!(role = %side, error = %e, "Accept failed");
                        tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                    }
                },
                _ = async { let _ = shutdown.wait_for(|stop| *stop).await; } => break,
            }
        }
        debug!(role = %side, "Accept loop stopped");
    }

    /// Authenticate one connection, attach it and run its session.
    async fn serve(self: Arc<Self>, side: Role, pending: PendingHandshake) {
        let peer = pending.peer();
        let stream = match pending.complete().await {
            Ok(stream) => stream,
            Err(e) => {
                warn!(role = %side, error = %e, "Rejected connection");
                return;
            }
        };

        let conn = Arc::new(Connection::new(stream, peer.to_string()));
        let attached = self.lock_slots().attach(side, conn.clone(), peer);
        let replaced = match attached {
            Attach::Attached { replaced } => replaced,
            Attach::Refused => {
                debug!(role = %side, peer = %peer, "Relay shutting down, dropping connection");
                conn.close("relay shutting down").await;
                return;
            }
        };
        info!(role = %side, conn = conn.id(), peer = %peer, "Connection attached");
        // The first heartbeat tells the client it has been accepted.
        let heartbeat = Heartbeat::spawn(conn.clone(), self.config.heartbeat.clone());
        if let Some(old) = replaced {
            info!(
                role = %side,
                conn = old.conn.id(),
                since = %old.info.connected_at,
                "Replacing stale connection"
            );
            old.conn.close("replaced by reconnect").await;
        }

        let reason = self.session(side, &conn).await;
        info!(role = %side, conn = conn.id(), peer = %peer, reason = %reason, "Connection lost");
        conn.close(&reason.to_string()).await;
        heartbeat.join().await;
        self.teardown(side, conn.id()).await;
    }

    /// Read frames from one side until the connection fails.
    async fn session(&self, side: Role, conn: &Connection<ServerStream>) -> WireError {
        let window = self.config.heartbeat.dead_peer_window();
        loop {
            let payload = match conn.read_frame(window).await {
                Ok(payload) => payload,
                Err(e) => return e,
            };
            if is_heartbeat(&payload) {
                continue;
            }
            match side {
                Role::Producer => self.forward(&payload).await,
                _ => debug!(
                    conn = conn.id(),
                    len = payload.len(),
                    "Discarding frame from consumer"
                ),
            }
        }
    }

    /// Hand a producer frame to the attached consumer, if any.
    async fn forward(&self, payload: &[u8]) {
        let consumer = self.lock_slots().consumer();
        let Some(consumer) = consumer else {
            warn!(len = payload.len(), "No consumer attached, dropping frame");
            return;
        };
        match consumer
            .write_frame(payload, self.config.heartbeat.interval)
            .await
        {
            Ok(()) => debug!(conn = consumer.id(), len = payload.len(), "Forwarded frame"),
            Err(e) => {
                warn!(conn = consumer.id(), error = %e, "Forward to consumer failed");
                consumer.close("forward failed").await;
            }
        }
    }

    /// Close the partner of a lost connection, unless the lost connection
    /// had already been replaced.
    async fn teardown(&self, side: Role, conn_id: u64) {
        let detached = self.lock_slots().detach(side, conn_id);
        if let Some(Some(paired)) = detached {
            info!(
                role = %partner(side),
                conn = paired.conn.id(),
                "Closing paired connection"
            );
            paired.conn.close("paired connection lost").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::DuplexStream;

    fn conn() -> Arc<Connection<DuplexStream>> {
        let (a, _b) = tokio::io::duplex(64);
        Arc::new(Connection::new(a, "test"))
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port)
    }

    fn replaced<S>(attach: Attach<S>) -> Option<Slot<S>> {
        match attach {
            Attach::Attached { replaced } => replaced,
            Attach::Refused => panic!("attach refused"),
        }
    }

    #[test]
    fn test_reconnect_replaces_slot() {
        let mut slots = Slots::default();
        let first = conn();
        let second = conn();

        assert!(replaced(slots.attach(Role::Consumer, first.clone(), addr(1))).is_none());
        let old = replaced(slots.attach(Role::Consumer, second.clone(), addr(2))).unwrap();
        assert_eq!(old.conn.id(), first.id());

        let snapshot = slots.snapshot();
        assert_eq!(snapshot.consumer.unwrap().connection_id, second.id());
        assert!(snapshot.producer.is_none());
    }

    #[test]
    fn test_stale_connection_does_not_tear_down_pairing() {
        let mut slots = Slots::default();
        let stale = conn();
        let fresh = conn();
        let producer = conn();
        slots.attach(Role::Consumer, stale.clone(), addr(1));
        slots.attach(Role::Consumer, fresh.clone(), addr(2));
        slots.attach(Role::Producer, producer.clone(), addr(3));

        // The replaced consumer ending must not touch the live pairing.
        assert!(slots.detach(Role::Consumer, stale.id()).is_none());
        assert!(slots.snapshot().is_paired());
    }

    #[test]
    fn test_lost_side_takes_partner_out() {
        let mut slots = Slots::default();
        let consumer = conn();
        let producer = conn();
        slots.attach(Role::Consumer, consumer.clone(), addr(1));
        slots.attach(Role::Producer, producer.clone(), addr(2));

        let partner = slots.detach(Role::Producer, producer.id()).unwrap().unwrap();
        assert_eq!(partner.conn.id(), consumer.id());
        assert_eq!(slots.snapshot(), RelaySnapshot::default());

        // The partner's own teardown afterwards is a no-op.
        assert!(slots.detach(Role::Consumer, consumer.id()).is_none());
    }

    #[test]
    fn test_lone_side_detaches_cleanly() {
        let mut slots = Slots::default();
        let consumer = conn();
        slots.attach(Role::Consumer, consumer.clone(), addr(1));
        assert!(matches!(
            slots.detach(Role::Consumer, consumer.id()),
            Some(None)
        ));
        assert_eq!(slots.drain().len(), 0);
    }

    #[test]
    fn test_no_attach_after_drain() {
        let mut slots = Slots::default();
        let producer = conn();
        slots.attach(Role::Producer, producer.clone(), addr(1));
        assert_eq!(slots.drain().len(), 1);

        // A handshake finishing after shutdown must not repopulate a slot.
        let late = conn();
        assert!(matches!(
            slots.attach(Role::Consumer, late, addr(2)),
            Attach::Refused
        ));
        assert_eq!(slots.snapshot(), RelaySnapshot::default());
    }
}
