//! Tether wire protocol: authenticated, framed connections between a
//! producer, a relay and a consumer.
//!
//! ## Architecture
//!
//! - **frame / message**: length-prefixed frames carrying either the liveness
//!   sentinel or a MessagePack-encoded event
//! - **Connection**: a framed stream with a single writer and close-once teardown
//! - **Heartbeat**: periodic sentinel writer plus the dead-peer window
//! - **tls**: mutually authenticated channels over a shared root certificate
//! - **Relay**: pairs one producer with one consumer and forwards events
//! - **Dispatcher**: consumer loop routing events to an [`ActionHandle`]
//!
//! [`ActionHandle`]: tether_types::action::ActionHandle

pub mod connection;
pub mod dispatch;
pub mod error;
pub mod frame;
pub mod heartbeat;
pub mod message;
pub mod producer;
pub mod relay;
pub mod tls;

pub use connection::{Connection, Liveness};
pub use dispatch::{run_consumer, DispatchConfig, Dispatcher};
pub use error::WireError;
pub use heartbeat::{Heartbeat, HeartbeatConfig};
pub use relay::{Relay, RelayConfig, RelaySnapshot};
pub use tls::{Identity, PeerVerification, RelayLink, SecureDialer};
