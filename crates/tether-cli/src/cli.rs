//! Clap CLI definitions for tether.

use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use tether_types::config::{IdentityCheck, Role, TetherConfig};

pub const AFTER_HELP: &str = "\
\x1b[1;36mExamples:\x1b[0m
  tether relay                                  Listen on :8890 (producers) and :8891 (consumers)
  tether consume --relay relay.example.net      Run hooks for events arriving through the relay
  tether produce --relay relay.example.net --event notify hello
  echo hi | tether produce --relay relay.example.net --event copy

\x1b[1;36mFiles:\x1b[0m
  <conf-dir>/ca_cert, <role>_cert, <role>_key   Identity material (PEM)
  <conf-dir>/config.toml                        Optional settings
  <conf-dir>/hooks/<event>                      Executables run by the consumer";

/// tether: relay events between hosts over mutually authenticated TLS.
#[derive(Debug, Parser)]
#[command(name = "tether", version, about, after_help = AFTER_HELP)]
pub struct Cli {
    /// Configuration directory (default: $TETHER_CONF_DIR, then the platform config dir).
    #[arg(long, global = true)]
    pub conf_dir: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Bridge producers and consumers.
    Relay(RelayArgs),
    /// Connect to the relay and run hooks for incoming events.
    Consume(ConsumeArgs),
    /// Send one event through the relay and exit.
    Produce(ProduceArgs),
}

impl Commands {
    pub fn role(&self) -> Role {
        match self {
            Commands::Relay(_) => Role::Relay,
            Commands::Consume(_) => Role::Consumer,
            Commands::Produce(_) => Role::Producer,
        }
    }

    /// Overlay command-line flags on the loaded configuration.
    pub fn apply(&self, config: &mut TetherConfig) {
        match self {
            Commands::Relay(args) => {
                if let Some(listen) = args.listen {
                    config.listen_addr = listen;
                }
                if let Some(port) = args.producer_port {
                    config.producer_port = port;
                }
                if let Some(port) = args.consumer_port {
                    config.consumer_port = port;
                }
            }
            Commands::Consume(args) => {
                args.dial.apply(config);
                if let Some(port) = args.consumer_port {
                    config.consumer_port = port;
                }
            }
            Commands::Produce(args) => {
                args.dial.apply(config);
                if let Some(port) = args.producer_port {
                    config.producer_port = port;
                }
            }
        }
    }
}

#[derive(Debug, Args)]
pub struct RelayArgs {
    /// Address to listen on.
    #[arg(long)]
    pub listen: Option<IpAddr>,
    /// Port for producer connections.
    #[arg(long)]
    pub producer_port: Option<u16>,
    /// Port for consumer connections.
    #[arg(long)]
    pub consumer_port: Option<u16>,
}

/// Flags shared by the roles that dial the relay.
#[derive(Debug, Args)]
pub struct DialArgs {
    /// Relay host name or address.
    #[arg(long)]
    pub relay: Option<String>,
    /// Check the relay certificate against the configured expected identity
    /// instead of the dialed host.
    #[arg(long)]
    pub loose: bool,
}

impl DialArgs {
    fn apply(&self, config: &mut TetherConfig) {
        if let Some(relay) = &self.relay {
            config.relay_host = Some(relay.clone());
        }
        if self.loose {
            config.identity_check = IdentityCheck::Relaxed;
        }
    }
}

#[derive(Debug, Args)]
pub struct ConsumeArgs {
    #[command(flatten)]
    pub dial: DialArgs,
    /// Relay port for consumer connections.
    #[arg(long)]
    pub consumer_port: Option<u16>,
}

#[derive(Debug, Args)]
pub struct ProduceArgs {
    #[command(flatten)]
    pub dial: DialArgs,
    /// Relay port for producer connections.
    #[arg(long)]
    pub producer_port: Option<u16>,
    /// Name of the hook to run on the consumer.
    #[arg(long)]
    pub event: String,
    /// Arguments passed to the hook.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}
