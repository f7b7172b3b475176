//! tether: forward named events from a producer, through a relay, to hooks
//! on a consumer.

mod cli;
mod cmd;
mod config;

use clap::Parser;
use cli::{Cli, Commands};
use std::process::ExitCode;
use tether_types::config::default_conf_dir;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.log_json);

    let role = cli.command.role();
    let conf_dir = cli.conf_dir.clone().unwrap_or_else(default_conf_dir);
    info!(
        version = env!("CARGO_PKG_VERSION"),
        role = %role,
        conf_dir = %conf_dir.display(),
        "tether starting"
    );

    let mut config = config::load_config(&conf_dir);
    cli.command.apply(&mut config);

    let result = match &cli.command {
        Commands::Relay(_) => cmd::relay::run(&conf_dir, &config).await,
        Commands::Consume(_) => cmd::consume::run(&conf_dir, &config).await,
        Commands::Produce(args) => cmd::produce::run(&conf_dir, &config, args).await,
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(role = %role, error = %e, "tether failed");
            ExitCode::FAILURE
        }
    }
}
