use std::collections::BTreeMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::fees::l1::{L1FeeModel, RollupConfig};
use crate::fees::types::{gwei_to_wei, AlertLevel, Percentile};

/// Longest retention or cooldown accepted; both are converted to
/// `chrono::Duration` for timestamp arithmetic.
pub const MAX_SPAN: Duration = Duration::from_secs(10 * 365 * 24 * 3600);

/// Configuration validation or parsing failure. Always fatal at startup.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{key} is invalid: {reason}")]
    Invalid { key: String, reason: String },

    #[error("No networks are enabled")]
    NoNetworks,

    #[error("Unknown network '{0}'")]
    UnknownNetwork(String),

    #[error("Network '{0}' has no RPC endpoints")]
    NoEndpoints(String),

    #[error("Network '{network}': threshold for {level} must be positive")]
    NonPositiveThreshold { network: String, level: AlertLevel },

    #[error("Network '{network}': threshold for {upper} must be greater than threshold for {lower}")]
    ThresholdOrder {
        network: String,
        lower: AlertLevel,
        upper: AlertLevel,
    },

    #[error("Invalid interval: {0}")]
    InvalidInterval(String),
}

impl ConfigError {
    fn invalid(key: &str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// One monitored network. Immutable after load.
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    /// Stable identifier used as map key, metric label and snapshot key.
    pub key: String,
    pub name: String,
    pub chain_id: u64,
    pub native_token: String,
    pub supports_eip1559: bool,
    pub rollup: Option<RollupConfig>,
    /// Informational only.
    pub block_time_secs: u64,
    pub explorer_url: Option<String>,
    /// Tried in this order; see `EndpointPool`.
    pub endpoints: Vec<String>,
    /// Upper bound (gwei) of every configured level.
    pub thresholds: BTreeMap<AlertLevel, f64>,
    pub poll_interval: Duration,
    /// Excludes `high` and `ultra_high` from alert matching.
    pub disable_high_alerts: bool,
}

impl NetworkConfig {
    pub fn is_rollup(&self) -> bool {
        self.rollup.is_some()
    }

    /// Threshold for `level` in wei per gas, if configured.
    pub fn threshold_wei(&self, level: AlertLevel) -> Option<u64> {
        self.thresholds.get(&level).map(|gwei| gwei_to_wei(*gwei))
    }

    /// Environment prefixes that may carry this network's settings.
    fn env_prefixes(&self) -> Vec<String> {
        match self.key.as_str() {
            "ethereum" => vec!["ETHEREUM".into(), "ETH".into()],
            "arbitrum" => vec!["ARBITRUM".into(), "ARB".into()],
            "optimism" => vec!["OPTIMISM".into(), "OP".into()],
            "polygon" => vec!["POLYGON".into(), "MATIC".into()],
            other => vec![other.to_ascii_uppercase()],
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.endpoints.is_empty() {
            return Err(ConfigError::NoEndpoints(self.key.clone()));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(format!(
                "poll interval of '{}' must be greater than zero",
                self.key
            )));
        }

        let mut previous: Option<(AlertLevel, f64)> = None;
        for (&level, &gwei) in &self.thresholds {
            if gwei <= 0.0 || !gwei.is_finite() {
                return Err(ConfigError::NonPositiveThreshold {
                    network: self.key.clone(),
                    level,
                });
            }
            if let Some((lower, lower_gwei)) = previous {
                if gwei <= lower_gwei {
                    return Err(ConfigError::ThresholdOrder {
                        network: self.key.clone(),
                        lower,
                        upper: level,
                    });
                }
            }
            previous = Some((level, gwei));
        }
        Ok(())
    }
}

/// Polling and retention parameters shared by every network.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub check_interval: Duration,
    pub cycle_safety_margin: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
    pub backoff_base: Duration,
    pub fee_history_blocks: u64,
    pub base_fee_smoothing: usize,
    pub retention: Duration,
    pub shutdown_grace: Duration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(12),
            cycle_safety_margin: Duration::from_millis(500),
            max_attempts: 3,
            request_timeout: Duration::from_millis(4_000),
            backoff_base: Duration::from_millis(250),
            fee_history_blocks: 16,
            base_fee_smoothing: 5,
            retention: Duration::from_secs(24 * 3600),
            shutdown_grace: Duration::from_secs(5),
        }
    }
}

/// Alert evaluation parameters.
#[derive(Debug, Clone)]
pub struct AlertConfig {
    pub enabled: bool,
    pub cooldown: Duration,
    /// Percentile whose total fee is compared against thresholds.
    pub percentile: Percentile,
    /// Whether the rollup L1 surcharge counts toward that fee.
    pub include_l1_surcharge: bool,
    pub webhook_url: Option<String>,
}

impl Default for AlertConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cooldown: Duration::from_secs(300),
            percentile: Percentile::P50,
            include_l1_surcharge: false,
            webhook_url: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct PersistenceConfig {
    pub path: PathBuf,
    pub save_interval: Duration,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/history_backup.json"),
            save_interval: Duration::from_secs(300),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub alerts: AlertConfig,
    pub persistence: PersistenceConfig,
    pub api_bind: Option<SocketAddr>,
    pub log_level: String,
    pub networks: BTreeMap<String, NetworkConfig>,
}

impl Config {
    /// Load from the process environment and validate.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load from an arbitrary key lookup and validate.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };

        let monitor = MonitorConfig {
            check_interval: Duration::from_secs(env.u64("CHECK_INTERVAL", 12)?),
            cycle_safety_margin: Duration::from_millis(env.u64("CYCLE_SAFETY_MARGIN_MS", 500)?),
            max_attempts: env.u64("MAX_ATTEMPTS", 3)? as u32,
            request_timeout: Duration::from_millis(env.u64("REQUEST_TIMEOUT_MS", 4_000)?),
            backoff_base: Duration::from_millis(env.u64("BACKOFF_BASE_MS", 250)?),
            fee_history_blocks: env.u64("FEE_HISTORY_BLOCKS", 16)?,
            base_fee_smoothing: env.u64("BASE_FEE_SMOOTHING", 5)? as usize,
            retention: Duration::from_secs(env.u64("MAX_HISTORY_HOURS", 24)?.saturating_mul(3600)),
            shutdown_grace: Duration::from_secs(env.u64("SHUTDOWN_GRACE_SECS", 5)?),
        };

        let percentile = match env.get("ALERT_PERCENTILE") {
            Some(raw) => raw
                .parse::<Percentile>()
                .map_err(|reason| ConfigError::invalid("ALERT_PERCENTILE", reason))?,
            None => Percentile::P50,
        };

        let alerts = AlertConfig {
            enabled: env.bool("ENABLE_ALERTS", true)?,
            cooldown: Duration::from_secs(env.u64("ALERT_COOLDOWN", 300)?),
            percentile,
            include_l1_surcharge: env.bool("ALERT_INCLUDE_L1_FEE", false)?,
            webhook_url: env.get("ALERT_WEBHOOK_URL"),
        };

        let persistence = PersistenceConfig {
            path: env
                .get("HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PersistenceConfig::default().path),
            save_interval: Duration::from_secs(env.u64("SAVE_HISTORY_INTERVAL", 300)?),
        };

        let api_bind = match env.get("API_BIND") {
            Some(raw) => Some(
                raw.parse::<SocketAddr>()
                    .map_err(|e| ConfigError::invalid("API_BIND", e.to_string()))?,
            ),
            None => None,
        };

        let selected: Option<Vec<String>> = env.get("MONITORED_NETWORKS").map(|raw| split_list(&raw));

        let mut networks = BTreeMap::new();
        for mut network in builtin_networks(monitor.check_interval) {
            if let Some(selected) = &selected {
                if !selected.contains(&network.key) {
                    continue;
                }
            }
            env.apply_network_overrides(&mut network)?;
            networks.insert(network.key.clone(), network);
        }

        if let Some(selected) = &selected {
            if let Some(unknown) = selected.iter().find(|key| !networks.contains_key(*key)) {
                return Err(ConfigError::UnknownNetwork(unknown.clone()));
            }
        }

        let config = Self {
            monitor,
            alerts,
            persistence,
            api_bind,
            log_level: env.get("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            networks,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check every invariant the orchestrator relies on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.networks.is_empty() {
            return Err(ConfigError::NoNetworks);
        }
        let monitor = &self.monitor;
        if monitor.check_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "CHECK_INTERVAL must be greater than zero".into(),
            ));
        }
        if monitor.cycle_safety_margin >= monitor.check_interval {
            return Err(ConfigError::InvalidInterval(
                "cycle safety margin must be shorter than CHECK_INTERVAL".into(),
            ));
        }
        if monitor.retention > MAX_SPAN {
            return Err(ConfigError::invalid("MAX_HISTORY_HOURS", "must be at most ten years"));
        }
        if self.alerts.cooldown > MAX_SPAN {
            return Err(ConfigError::invalid("ALERT_COOLDOWN", "must be at most ten years"));
        }
        if monitor.retention < monitor.check_interval {
            return Err(ConfigError::InvalidInterval(
                "MAX_HISTORY_HOURS must cover at least one interval".into(),
            ));
        }
        if self.persistence.save_interval.is_zero() {
            return Err(ConfigError::InvalidInterval(
                "SAVE_HISTORY_INTERVAL must be greater than zero".into(),
            ));
        }
        if monitor.max_attempts == 0 {
            return Err(ConfigError::invalid("MAX_ATTEMPTS", "must be at least 1"));
        }
        if monitor.fee_history_blocks == 0 {
            return Err(ConfigError::invalid("FEE_HISTORY_BLOCKS", "must be at least 1"));
        }
        if monitor.base_fee_smoothing == 0 {
            return Err(ConfigError::invalid("BASE_FEE_SMOOTHING", "must be at least 1"));
        }
        for network in self.networks.values() {
            network.validate()?;
            if network.poll_interval <= monitor.cycle_safety_margin {
                return Err(ConfigError::InvalidInterval(format!(
                    "poll interval of '{}' must exceed the cycle safety margin",
                    network.key
                )));
            }
        }
        Ok(())
    }

    /// Keep only the listed networks.
    pub fn retain_networks(&mut self, keys: &[String]) -> Result<(), ConfigError> {
        if let Some(unknown) = keys.iter().find(|key| !self.networks.contains_key(*key)) {
            return Err(ConfigError::UnknownNetwork(unknown.clone()));
        }
        self.networks.retain(|key, _| keys.contains(key));
        Ok(())
    }

    /// Multi-line human summary printed by `--check-config`.
    pub fn summary(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Networks ({}): {}\n",
            self.networks.len(),
            self.networks.keys().cloned().collect::<Vec<_>>().join(", ")
        ));
        out.push_str(&format!(
            "Check interval: {}s, alert cooldown: {}s, alert percentile: {}\n",
            self.monitor.check_interval.as_secs(),
            self.alerts.cooldown.as_secs(),
            self.alerts.percentile
        ));
        out.push_str(&format!(
            "History: {}h retained, snapshot every {}s to {}\n",
            self.monitor.retention.as_secs() / 3600,
            self.persistence.save_interval.as_secs(),
            self.persistence.path.display()
        ));
        for network in self.networks.values() {
            out.push_str(&format!(
                "  {} (chain {}{}): {} endpoint(s), thresholds {:?}\n",
                network.name,
                network.chain_id,
                if network.is_rollup() { ", rollup" } else { "" },
                network.endpoints.len(),
                network.thresholds
            ));
        }
        out
    }
}

struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, key: &str) -> Option<String> {
        (self.lookup)(key)
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    }

    fn u64(&self, key: &str, default: u64) -> Result<u64, ConfigError> {
        match self.get(key) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| ConfigError::invalid(key, "must be a valid number")),
            None => Ok(default),
        }
    }

    fn bool(&self, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get(key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "y" | "t" => Ok(true),
                "false" | "0" | "no" | "n" | "f" => Ok(false),
                _ => Err(ConfigError::invalid(key, "must be a boolean")),
            },
            None => Ok(default),
        }
    }

    fn apply_network_overrides(&self, network: &mut NetworkConfig) -> Result<(), ConfigError> {
        let prefixes = network.env_prefixes();

        let mut endpoints: Vec<String> = Vec::new();
        for prefix in &prefixes {
            for suffix in ["_RPC", "_RPC_1", "_RPC_2", "_RPC_3"] {
                if let Some(url) = self.get(&format!("{}{}", prefix, suffix)) {
                    if !endpoints.contains(&url) {
                        endpoints.push(url);
                    }
                }
            }
        }
        if !endpoints.is_empty() {
            network.endpoints = endpoints;
        }

        let primary = &prefixes[0];
        let thresholds_key = format!("{}_THRESHOLDS", primary);
        if let Some(raw) = self.get(&thresholds_key) {
            network.thresholds = parse_thresholds(&thresholds_key, &raw)?;
        }

        let interval_key = format!("{}_POLL_INTERVAL", primary);
        if let Some(raw) = self.get(&interval_key) {
            let secs = raw
                .parse::<u64>()
                .map_err(|_| ConfigError::invalid(&interval_key, "must be a valid number"))?;
            network.poll_interval = Duration::from_secs(secs);
        }

        let disable_key = format!("{}_DISABLE_HIGH_ALERTS", primary);
        network.disable_high_alerts = self.bool(&disable_key, network.disable_high_alerts)?;
        Ok(())
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|item| item.trim().to_ascii_lowercase())
        .filter(|item| !item.is_empty())
        .collect()
}

/// Parse `low=20,medium=35` into a level → gwei map.
fn parse_thresholds(key: &str, raw: &str) -> Result<BTreeMap<AlertLevel, f64>, ConfigError> {
    let mut thresholds = BTreeMap::new();
    for pair in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let (level, value) = pair
            .split_once('=')
            .ok_or_else(|| ConfigError::invalid(key, format!("expected level=gwei, got '{}'", pair)))?;
        let level = level
            .parse::<AlertLevel>()
            .map_err(|reason| ConfigError::invalid(key, reason))?;
        let value = value
            .trim()
            .parse::<f64>()
            .map_err(|_| ConfigError::invalid(key, format!("'{}' is not a number", value.trim())))?;
        thresholds.insert(level, value);
    }
    Ok(thresholds)
}

fn thresholds(pairs: &[(AlertLevel, f64)]) -> BTreeMap<AlertLevel, f64> {
    pairs.iter().copied().collect()
}

fn endpoints(urls: &[&str]) -> Vec<String> {
    urls.iter().map(|url| url.to_string()).collect()
}

/// Networks known out of the box, with public RPC fallbacks.
pub fn builtin_networks(poll_interval: Duration) -> Vec<NetworkConfig> {
    use AlertLevel::*;

    let l2_thresholds = thresholds(&[(Low, 0.1), (Medium, 0.3), (High, 1.0)]);

    vec![
        NetworkConfig {
            key: "ethereum".into(),
            name: "Ethereum".into(),
            chain_id: 1,
            native_token: "ETH".into(),
            supports_eip1559: true,
            rollup: None,
            block_time_secs: 12,
            explorer_url: Some("https://etherscan.io".into()),
            endpoints: endpoints(&[
                "https://rpc.ankr.com/eth",
                "https://eth.llamarpc.com",
                "https://eth-mainnet.public.blastapi.io",
                "https://ethereum.publicnode.com",
            ]),
            thresholds: thresholds(&[
                (UltraLow, 15.0),
                (Low, 20.0),
                (Medium, 35.0),
                (High, 50.0),
                (UltraHigh, 100.0),
            ]),
            poll_interval,
            disable_high_alerts: false,
        },
        NetworkConfig {
            key: "arbitrum".into(),
            name: "Arbitrum One".into(),
            chain_id: 42161,
            native_token: "ETH".into(),
            supports_eip1559: true,
            rollup: Some(RollupConfig::new(L1FeeModel::Arbitrum)),
            block_time_secs: 0,
            explorer_url: Some("https://arbiscan.io".into()),
            endpoints: endpoints(&[
                "https://rpc.ankr.com/arbitrum",
                "https://arbitrum.llamarpc.com",
                "https://arbitrum.publicnode.com",
                "https://arb1.arbitrum.io/rpc",
            ]),
            thresholds: l2_thresholds.clone(),
            poll_interval,
            disable_high_alerts: true,
        },
        NetworkConfig {
            key: "optimism".into(),
            name: "Optimism".into(),
            chain_id: 10,
            native_token: "ETH".into(),
            supports_eip1559: true,
            rollup: Some(RollupConfig::new(L1FeeModel::op_stack_default())),
            block_time_secs: 2,
            explorer_url: Some("https://optimistic.etherscan.io".into()),
            endpoints: endpoints(&[
                "https://rpc.ankr.com/optimism",
                "https://optimism.llamarpc.com",
                "https://optimism.publicnode.com",
                "https://mainnet.optimism.io",
            ]),
            thresholds: l2_thresholds.clone(),
            poll_interval,
            disable_high_alerts: true,
        },
        NetworkConfig {
            key: "base".into(),
            name: "Base".into(),
            chain_id: 8453,
            native_token: "ETH".into(),
            supports_eip1559: true,
            rollup: Some(RollupConfig::new(L1FeeModel::op_stack_default())),
            block_time_secs: 2,
            explorer_url: Some("https://basescan.org".into()),
            endpoints: endpoints(&[
                "https://rpc.ankr.com/base",
                "https://base.llamarpc.com",
                "https://base.publicnode.com",
                "https://mainnet.base.org",
            ]),
            thresholds: l2_thresholds,
            poll_interval,
            disable_high_alerts: true,
        },
        NetworkConfig {
            key: "polygon".into(),
            name: "Polygon PoS".into(),
            chain_id: 137,
            native_token: "MATIC".into(),
            supports_eip1559: true,
            rollup: None,
            block_time_secs: 2,
            explorer_url: Some("https://polygonscan.com".into()),
            endpoints: endpoints(&[
                "https://rpc.ankr.com/polygon",
                "https://polygon.llamarpc.com",
                "https://polygon-bor.publicnode.com",
            ]),
            thresholds: thresholds(&[(Low, 30.0), (Medium, 60.0), (High, 100.0)]),
            poll_interval,
            disable_high_alerts: false,
        },
    ]
}
