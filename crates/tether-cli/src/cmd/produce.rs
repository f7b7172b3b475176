//! `tether produce`: send one event and exit.

use super::{dialer, relay_host};
use crate::cli::ProduceArgs;
use std::io::IsTerminal;
use std::path::Path;
use tether_types::config::{Role, TetherConfig};
use tether_types::error::TetherError;
use tether_types::event::Event;
use tether_wire::producer::send_event;
use tokio::io::AsyncReadExt;

pub async fn run(
    conf_dir: &Path,
    config: &TetherConfig,
    args: &ProduceArgs,
) -> Result<(), TetherError> {
    let stdin = read_piped_stdin().await?;
    let event = Event::new(args.event.clone(), args.args.clone()).with_stdin(stdin);
    event.validate()?;

    let host = relay_host(config)?;
    let dialer = dialer(conf_dir, Role::Producer, config)?;
    send_event(&dialer, &host, config.producer_port, &event).await?;
    Ok(())
}

/// Standard input when it is redirected; empty when it is a terminal.
async fn read_piped_stdin() -> Result<Vec<u8>, TetherError> {
    if std::io::stdin().is_terminal() {
        return Ok(Vec::new());
    }
    let mut buf = Vec::new();
    tokio::io::stdin().read_to_end(&mut buf).await?;
    Ok(buf)
}
