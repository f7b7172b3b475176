//! `tether relay`: run the relay until interrupted.

use std::path::Path;
use std::time::Duration;
use tether_types::config::{IdentityPaths, Role, TetherConfig};
use tether_types::error::TetherError;
use tether_wire::{HeartbeatConfig, Identity, Relay, RelayConfig};
use tracing::{debug, info};

/// How often the relay logs who is attached (at debug level).
const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub async fn run(conf_dir: &Path, config: &TetherConfig) -> Result<(), TetherError> {
    let identity = Identity::load(&IdentityPaths::in_dir(conf_dir, Role::Relay))?;
    let relay_config = RelayConfig {
        listen_addr: config.listen_addr,
        producer_port: config.producer_port,
        consumer_port: config.consumer_port,
        heartbeat: HeartbeatConfig::default(),
        producer_identity: config.producer_identity.clone(),
        consumer_identity: config.consumer_identity.clone(),
    };
    let (relay, accept) = Relay::start(relay_config, &identity).await?;

    let mut status = tokio::time::interval(STATUS_INTERVAL);
    status.tick().await;
    loop {
        tokio::select! {
            _ = status.tick() => {
                let snapshot = relay.snapshot();
                debug!(
                    paired = snapshot.is_paired(),
                    producer = ?snapshot.producer.as_ref().map(|s| s.peer),
                    consumer = ?snapshot.consumer.as_ref().map(|s| s.peer),
                    "Relay status"
                );
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, shutting down relay");
                break;
            }
        }
    }

    relay.shutdown().await;
    let _ = accept.await;
    info!("Relay stopped");
    Ok(())
}
