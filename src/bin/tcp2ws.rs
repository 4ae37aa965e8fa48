//! tcp2ws - relay TCP connections to a WebSocket server
//!
//! Every TCP connection accepted on the listen address is relayed to its own
//! WebSocket connection to the target URL.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use wsrelay::{cli, config::ConfigManager, logging, ConnectionManager, RelayMode, ShutdownCoordinator};

/// CLI arguments for tcp2ws
#[derive(Parser, Debug)]
#[command(name = "tcp2ws")]
#[command(about = "Relay TCP connections to a WebSocket server")]
#[command(version)]
#[command(override_usage = "tcp2ws [OPTIONS] ws[s]://...")]
pub struct CliArgs {
    /// WebSocket URL to relay connections to
    #[arg(value_name = "URL")]
    pub url: Option<String>,

    /// TCP listen address:port [default: :7101]; `-listen` is accepted too
    #[arg(short, long)]
    pub listen: Option<String>,

    /// Configuration file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Enable verbose logging (sets log level to debug)
    #[arg(short, long)]
    pub verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = CliArgs::parse_from(cli::normalize_args(std::env::args_os()));
    logging::init_tracing(&args.log_level, args.verbose)?;

    let mut config = ConfigManager::load(args.config.as_deref(), RelayMode::Tcp2Ws)?;
    config.merge_with_cli_args(args.listen.as_deref(), args.url.as_deref());

    if config.server.target.is_empty() {
        let _ = CliArgs::command().write_help(&mut std::io::stderr());
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }

    let shutdown = ShutdownCoordinator::new();
    let mut manager = ConnectionManager::new(Arc::new(config));
    manager.bind().await?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    manager.start(shutdown.token()).await?;
    info!("Server shutdown complete");
    Ok(())
}
