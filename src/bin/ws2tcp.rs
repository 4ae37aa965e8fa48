//! ws2tcp - relay WebSocket connections to a TCP server
//!
//! Every WebSocket upgrade accepted on the listen address is relayed to its
//! own TCP connection to the target address.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use tracing::{error, info};

use wsrelay::{cli, config::ConfigManager, logging, RelayMode, ShutdownCoordinator, WebSocketServer};

/// CLI arguments for ws2tcp
#[derive(Parser, Debug)]
#[command(name = "ws2tcp")]
#[command(about = "Relay WebSocket connections to a TCP server")]
#[command(version)]
#[command(override_usage = "ws2tcp [OPTIONS] addr:port")]
pub struct CliArgs {
    /// TCP address:port to relay connections to
    #[arg(value_name = "ADDR")]
    pub addr: Option<String>,

    /// WebSocket listen address:port [default: :8080]; `-listen` is accepted too
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

    let mut config = ConfigManager::load(args.config.as_deref(), RelayMode::Ws2Tcp)?;
    config.merge_with_cli_args(args.listen.as_deref(), args.addr.as_deref());

    if config.server.target.is_empty() {
        let _ = CliArgs::command().write_help(&mut std::io::stderr());
        std::process::exit(1);
    }

    if let Err(e) = config.validate() {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }

    let shutdown = ShutdownCoordinator::new();
    let mut server = WebSocketServer::new(Arc::new(config));
    server.bind().await?;

    let signals = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = signals.listen_for_signals().await {
            error!("Error setting up signal handlers: {}", e);
        }
    });

    server.start(shutdown.token()).await?;
    info!("Server shutdown complete");
    Ok(())
}
