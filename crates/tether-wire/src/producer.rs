//! Producer side: deliver a single event to the relay and disconnect.

use crate::error::WireError;
use crate::heartbeat::HEARTBEAT_INTERVAL;
use crate::message::encode_event;
use crate::tls::SecureDialer;
use tether_types::event::Event;
use tracing::info;

/// Send `event` through the relay at `host:port`.
///
/// The event is validated and encoded before dialing, so an invalid event
/// never opens a connection. The frame is written only after the relay has
/// accepted the connection. Returns once the frame is written and the
/// channel has been shut down.
pub async fn send_event(
    dialer: &SecureDialer,
    host: &str,
    port: u16,
    event: &Event,
) -> Result<(), WireError> {
    let payload = encode_event(event)?;

    let link = dialer.attach(host, port).await?;
    let conn = link.conn;
    let result = conn.write_frame(&payload, HEARTBEAT_INTERVAL).await;
    conn.close("event delivered").await;
    result?;

    info!(event = %event, relay = %conn.peer(), "Event sent");
    Ok(())
}
