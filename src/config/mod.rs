//! Configuration loading and validation
//!
//! Configuration comes from a single TOML file. Every key has a default, so a
//! missing file is not fatal, but validation still requires the active
//! identity pubkey and a usable snapshot directory.

pub mod size;

pub use size::{format_size, parse_size};

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::constants;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    pub log: LogConfig,
    pub validator: ValidatorConfig,
    pub cluster: ClusterConfig,
    pub snapshots: SnapshotsConfig,
    pub hooks: HooksConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: String,
    pub disable_timestamps: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
            disable_timestamps: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub rpc_url: String,
    pub active_identity_pubkey: String,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://127.0.0.1:8899".to_string(),
            active_identity_pubkey: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub name: String,
    pub rpc_url: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            name: constants::cluster::MAINNET_BETA.to_string(),
            rpc_url: String::new(),
        }
    }
}

impl ClusterConfig {
    /// The configured RPC URL, or the public endpoint derived from the
    /// cluster name when none is configured.
    pub fn effective_rpc_url(&self) -> String {
        if !self.rpc_url.is_empty() {
            return self.rpc_url.clone();
        }
        constants::cluster::rpc_url(&self.name)
            .unwrap_or_default()
            .to_string()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SnapshotsConfig {
    pub directory: String,
    pub discovery: DiscoveryConfig,
    pub download: DownloadConfig,
    pub age: AgeConfig,
}

impl Default for SnapshotsConfig {
    fn default() -> Self {
        Self {
            directory: "/mnt/accounts/snapshots".to_string(),
            discovery: DiscoveryConfig::default(),
            download: DownloadConfig::default(),
            age: AgeConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub candidates: CandidatesConfig,
    pub probe: ProbeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CandidatesConfig {
    pub min_suitable_full: usize,
    pub min_suitable_incremental: usize,
    pub sort_order: String,
}

impl Default for CandidatesConfig {
    fn default() -> Self {
        Self {
            min_suitable_full: 3,
            min_suitable_incremental: 5,
            sort_order: "latency".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ProbeConfig {
    pub concurrency: usize,
    pub max_latency: String,
    #[serde(skip)]
    pub max_latency_duration: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            concurrency: 500,
            max_latency: "100ms".to_string(),
            max_latency_duration: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub min_speed: String,
    pub min_speed_check_delay: String,
    pub timeout: String,
    pub connections: usize,
    #[serde(skip)]
    pub min_speed_bytes: u64,
    #[serde(skip)]
    pub min_speed_check_delay_duration: Duration,
    #[serde(skip)]
    pub timeout_duration: Duration,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_speed: "60mb".to_string(),
            min_speed_check_delay: "7s".to_string(),
            timeout: "30m".to_string(),
            connections: 8,
            min_speed_bytes: 60 * 1024 * 1024,
            min_speed_check_delay_duration: Duration::from_secs(7),
            timeout_duration: Duration::from_secs(30 * 60),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AgeConfig {
    pub remote: RemoteAgeConfig,
    pub local: LocalAgeConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RemoteAgeConfig {
    pub max_slots: u64,
}

impl Default for RemoteAgeConfig {
    fn default() -> Self {
        Self { max_slots: 1300 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LocalAgeConfig {
    pub max_incremental_slots: u64,
}

impl Default for LocalAgeConfig {
    fn default() -> Self {
        Self {
            max_incremental_slots: 1300,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HooksConfig {
    pub on_success: Vec<HookCommand>,
    pub on_failure: Vec<HookCommand>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct HookCommand {
    pub name: String,
    pub cmd: String,
    pub args: Vec<String>,
    pub environment: HashMap<String, String>,
    pub allow_failure: bool,
    pub stream_output: bool,
    pub disabled: bool,
}

impl Config {
    /// Load configuration from a TOML file, falling back to defaults when the
    /// file does not exist. The result is validated before being returned.
    pub fn load(path: &str) -> Result<Self> {
        let mut config = match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str::<Config>(&content)
                .map_err(|e| anyhow!("failed to parse config {}: {}", path, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(path, "config file not found, using defaults");
                Config::default()
            }
            Err(e) => return Err(anyhow!("failed to read config {}: {}", path, e)),
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate every section and compute the parsed duration/size fields.
    pub fn validate(&mut self) -> Result<()> {
        self.validate_log().context("log config")?;
        self.validate_validator().context("validator config")?;
        self.validate_cluster().context("cluster config")?;
        self.validate_snapshots().context("snapshots config")?;
        Ok(())
    }

    fn validate_log(&self) -> Result<()> {
        match self.log.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(anyhow!(
                    "log.level must be one of trace, debug, info, warn, error - got: {}",
                    other
                ))
            }
        }
        match self.log.format.as_str() {
            "text" | "json" => Ok(()),
            other => Err(anyhow!("log.format must be \"text\" or \"json\" - got: {}", other)),
        }
    }

    fn validate_validator(&self) -> Result<()> {
        if self.validator.rpc_url.is_empty() {
            return Err(anyhow!("validator.rpc_url is required"));
        }
        if self.validator.active_identity_pubkey.is_empty() {
            return Err(anyhow!("validator.active_identity_pubkey is required"));
        }
        Ok(())
    }

    fn validate_cluster(&self) -> Result<()> {
        if !constants::cluster::is_valid(&self.cluster.name) {
            return Err(anyhow!(
                "invalid cluster name {:?}, must be one of: {:?}",
                self.cluster.name,
                constants::cluster::VALID_CLUSTERS
            ));
        }
        Ok(())
    }

    fn validate_snapshots(&mut self) -> Result<()> {
        let s = &mut self.snapshots;

        match s.discovery.candidates.sort_order.as_str() {
            "latency" | "slot_age" => {}
            other => {
                return Err(anyhow!(
                    "discovery.candidates.sort_order must be \"latency\" or \"slot_age\", got {:?}",
                    other
                ))
            }
        }

        let max_latency: Duration = humantime::parse_duration(&s.discovery.probe.max_latency)
            .map_err(|e| anyhow!("discovery.probe.max_latency: {}", e))?;
        if max_latency.is_zero() {
            return Err(anyhow!("discovery.probe.max_latency must be > 0"));
        }
        s.discovery.probe.max_latency_duration = max_latency;

        if s.directory.is_empty() {
            return Err(anyhow!("snapshots.directory is required"));
        }
        let dir = Path::new(&s.directory);
        let meta = std::fs::metadata(dir)
            .map_err(|e| anyhow!("snapshots.directory {}: {}", s.directory, e))?;
        if !meta.is_dir() {
            return Err(anyhow!("snapshots.directory: {} is not a directory", s.directory));
        }
        let probe = dir.join(constants::files::WRITE_PROBE_FILENAME);
        std::fs::write(&probe, b"")
            .map_err(|e| anyhow!("snapshots.directory not writable: {}", e))?;
        let _ = std::fs::remove_file(&probe);

        let min_speed = parse_size(&s.download.min_speed)
            .map_err(|e| anyhow!("snapshots.download.min_speed: {}", e))?;
        if min_speed < 1 {
            return Err(anyhow!("snapshots.download.min_speed must be > 0"));
        }
        s.download.min_speed_bytes = min_speed;

        s.download.min_speed_check_delay_duration =
            humantime::parse_duration(&s.download.min_speed_check_delay)
                .map_err(|e| anyhow!("snapshots.download.min_speed_check_delay: {}", e))?;

        let timeout = humantime::parse_duration(&s.download.timeout)
            .map_err(|e| anyhow!("snapshots.download.timeout: {}", e))?;
        if timeout.is_zero() {
            return Err(anyhow!("snapshots.download.timeout must be > 0"));
        }
        s.download.timeout_duration = timeout;

        if s.download.connections < 1 {
            return Err(anyhow!("snapshots.download.connections must be >= 1"));
        }
        if s.age.remote.max_slots < 1 {
            return Err(anyhow!("snapshots.age.remote.max_slots must be >= 1"));
        }
        if s.age.local.max_incremental_slots < 1 {
            return Err(anyhow!("snapshots.age.local.max_incremental_slots must be >= 1"));
        }

        Ok(())
    }
}
