//! Configuration Manager

use super::{Config, RelayMode};
use crate::Result;
use anyhow::{bail, Context};
use std::path::Path;
use tokio::sync::Semaphore;
use tokio_tungstenite::tungstenite::http::Uri;

/// Manages configuration loading and validation
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from file
    pub fn load_from_file(path: &Path, mode: RelayMode) -> Result<Config> {
        tracing::info!("Loading configuration from: {}", path.display());
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
        config.mode = mode;

        Ok(config)
    }

    /// Load configuration from an optional file, falling back to defaults
    pub fn load(path: Option<&Path>, mode: RelayMode) -> Result<Config> {
        match path {
            Some(path) => Self::load_from_file(path, mode),
            None => Ok(Config::for_mode(mode)),
        }
    }
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.validate_server_config()
            .with_context(|| "Server configuration validation failed")?;

        self.validate_relay_config()
            .with_context(|| "Relay configuration validation failed")?;

        Ok(())
    }

    fn validate_server_config(&self) -> Result<()> {
        validate_host_port(&self.listen_addr()).context("invalid listen address")?;

        if self.server.max_connections == 0 {
            bail!("max_connections must be greater than 0");
        }

        if self.server.max_connections > Semaphore::MAX_PERMITS {
            bail!("max_connections cannot exceed {}", Semaphore::MAX_PERMITS);
        }

        if self.server.dial_timeout.is_zero() {
            bail!("dial_timeout must be greater than 0");
        }

        match self.mode {
            RelayMode::Tcp2Ws => validate_ws_url(&self.server.target),
            RelayMode::Ws2Tcp => validate_host_port(&self.server.target)
                .with_context(|| format!("invalid tcp address: {:?}", self.server.target)),
        }
    }

    fn validate_relay_config(&self) -> Result<()> {
        if self.relay.chunk_size == 0 {
            bail!("chunk_size must be greater than 0");
        }

        if self.relay.chunk_size > 1048576 {
            bail!("chunk_size cannot exceed 1MB");
        }

        if self.relay.heartbeat_interval.is_zero() {
            bail!("heartbeat_interval must be greater than 0");
        }

        if self.relay.heartbeat_timeout >= self.relay.heartbeat_interval {
            bail!(
                "heartbeat_timeout ({:?}) must be shorter than heartbeat_interval ({:?})",
                self.relay.heartbeat_timeout,
                self.relay.heartbeat_interval
            );
        }

        Ok(())
    }

    /// Merge with CLI arguments
    pub fn merge_with_cli_args(&mut self, listen: Option<&str>, target: Option<&str>) {
        if let Some(listen) = listen {
            self.server.listen = Some(listen.to_string());
            tracing::info!("CLI override: listen address set to {}", listen);
        }

        if let Some(target) = target {
            self.server.target = target.to_string();
            tracing::info!("CLI override: target set to {}", target);
        }
    }
}

/// Check that `url` is a `ws://` or `wss://` URL with a host
pub fn validate_ws_url(url: &str) -> Result<()> {
    if url.is_empty() {
        bail!("target WebSocket URL must be set");
    }

    let uri: Uri = url
        .parse()
        .with_context(|| format!("url parse error: {:?}", url))?;

    match uri.scheme_str() {
        Some("ws") | Some("wss") => {}
        _ => bail!("url scheme must be ws or wss"),
    }

    if uri.host().map_or(true, str::is_empty) {
        bail!("url host must be set");
    }

    Ok(())
}

/// Check that `addr` looks like `host:port`; an empty host means the local system
pub fn validate_host_port(addr: &str) -> Result<()> {
    let Some((_host, port)) = addr.rsplit_once(':') else {
        bail!("expected address:port, got {:?}", addr);
    };

    port.parse::<u16>()
        .with_context(|| format!("invalid port in {:?}", addr))?;

    Ok(())
}
