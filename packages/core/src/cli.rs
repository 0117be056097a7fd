use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;

use crate::config::{Config, ConfigError};

/// EVM gas monitor CLI arguments.
///
/// Every flag overrides the matching environment variable.
#[derive(Debug, Parser)]
#[command(
    name = "evm-gas-monitor",
    version,
    about = "Multi-network EVM gas fee monitor with threshold alerts"
)]
pub struct Cli {
    /// Comma-separated networks to monitor (e.g. ethereum,base)
    #[arg(long, value_delimiter = ',')]
    pub networks: Option<Vec<String>>,

    /// Poll interval in seconds, applied to every network
    #[arg(long)]
    pub poll_interval: Option<u64>,

    /// Where the history snapshot is written
    #[arg(long)]
    pub snapshot_path: Option<PathBuf>,

    /// Serve the read-only API on this address (e.g. 127.0.0.1:8080)
    #[arg(long)]
    pub api_bind: Option<SocketAddr>,

    /// Validate configuration, print a summary and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Apply flag overrides on top of an environment-derived config, then
    /// re-validate.
    pub fn apply(&self, config: &mut Config) -> Result<(), ConfigError> {
        if let Some(networks) = &self.networks {
            let keys: Vec<String> = networks
                .iter()
                .map(|key| key.trim().to_ascii_lowercase())
                .filter(|key| !key.is_empty())
                .collect();
            config.retain_networks(&keys)?;
        }
        if let Some(secs) = self.poll_interval {
            let interval = Duration::from_secs(secs);
            config.monitor.check_interval = interval;
            for network in config.networks.values_mut() {
                network.poll_interval = interval;
            }
        }
        if let Some(path) = &self.snapshot_path {
            config.persistence.path = path.clone();
        }
        if let Some(addr) = self.api_bind {
            config.api_bind = Some(addr);
        }
        config.validate()
    }
}
