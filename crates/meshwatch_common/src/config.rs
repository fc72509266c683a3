//! Configuration management for meshwatchd.
//!
//! Loads settings from /etc/meshwatch/config.toml or uses defaults. Every
//! option has a default, so a missing file is not an error. A file that
//! exists but cannot be parsed is.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/meshwatch/config.toml";

/// Port the node-side responder listens on
pub const ANNOUNCED_PORT: u16 = 1001;

/// Polling behaviour towards the mesh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnouncedConfig {
    /// Seconds between multicast `GET nodeinfo` queries
    #[serde(default = "default_nodeinfo_interval")]
    pub nodeinfo_interval_secs: u64,

    /// Seconds between multicast `GET statistics` queries
    #[serde(default = "default_statistics_interval")]
    pub statistics_interval_secs: u64,

    /// Missed statistics intervals before a node counts as offline
    #[serde(default = "default_offline_factor")]
    pub offline_factor: u32,

    /// Pause between the statistics and the neighbours query
    #[serde(default = "default_neighbour_delay")]
    pub neighbour_delay_secs: u64,

    /// Destination port for unicast re-queries
    #[serde(default = "default_announced_port")]
    pub port: u16,
}

fn default_nodeinfo_interval() -> u64 {
    1800
}

fn default_statistics_interval() -> u64 {
    300
}

fn default_offline_factor() -> u32 {
    3
}

fn default_neighbour_delay() -> u64 {
    25
}

fn default_announced_port() -> u16 {
    ANNOUNCED_PORT
}

impl Default for AnnouncedConfig {
    fn default() -> Self {
        Self {
            nodeinfo_interval_secs: default_nodeinfo_interval(),
            statistics_interval_secs: default_statistics_interval(),
            offline_factor: default_offline_factor(),
            neighbour_delay_secs: default_neighbour_delay(),
            port: default_announced_port(),
        }
    }
}

impl AnnouncedConfig {
    pub fn nodeinfo_interval(&self) -> Duration {
        Duration::from_secs(self.nodeinfo_interval_secs)
    }

    pub fn statistics_interval(&self) -> Duration {
        Duration::from_secs(self.statistics_interval_secs)
    }

    /// Silence after which a node is presumed offline.
    pub fn liveness_window(&self) -> Duration {
        self.statistics_interval() * self.offline_factor
    }
}

/// Storage engine selection and lifecycle jobs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Engine name, `memory` or `sqlite`
    #[serde(default = "default_engine")]
    pub engine: String,

    /// Database file for the sqlite engine
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Days of silence after which a node is deleted
    #[serde(default = "default_expire_after_days")]
    pub expire_after_days: u64,

    /// Seconds between online status recomputations
    #[serde(default = "default_liveness_interval")]
    pub liveness_interval_secs: u64,

    /// Seconds between expiry sweeps
    #[serde(default = "default_expiry_interval")]
    pub expiry_interval_secs: u64,

    /// Capacity of the in-memory statistics and neighbour caches
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,
}

fn default_engine() -> String {
    "memory".to_string()
}

fn default_store_path() -> PathBuf {
    PathBuf::from("/var/lib/meshwatch/collector.db")
}

fn default_expire_after_days() -> u64 {
    365
}

fn default_liveness_interval() -> u64 {
    60
}

fn default_expiry_interval() -> u64 {
    24 * 60 * 60
}

fn default_cache_capacity() -> usize {
    10_000
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            engine: default_engine(),
            path: default_store_path(),
            expire_after_days: default_expire_after_days(),
            liveness_interval_secs: default_liveness_interval(),
            expiry_interval_secs: default_expiry_interval(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

/// One UDP receiver bound to a mesh interface
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiverConfig {
    /// Mesh interface, e.g. `bat0`
    #[serde(default = "default_interface")]
    pub interface: String,

    /// Local port responses arrive on
    #[serde(default = "default_receiver_port")]
    pub port: u16,

    /// Responses are raw DEFLATE streams
    #[serde(default = "default_true")]
    pub deflate: bool,
}

fn default_interface() -> String {
    "bat0".to_string()
}

fn default_receiver_port() -> u16 {
    12444
}

fn default_true() -> bool {
    true
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            interface: default_interface(),
            port: default_receiver_port(),
            deflate: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_listen")]
    pub listen: String,
}

fn default_listen() -> String {
    "[::]:8080".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
        }
    }
}

/// Per-node metric label verbosity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Add the node hostname as a label
    #[serde(default)]
    pub namelabel: bool,

    /// Add the site code as a label
    #[serde(default)]
    pub sitecodelabel: bool,
}

/// Graph and nodes.json generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MeshviewerConfig {
    #[serde(default = "default_regenerate_interval")]
    pub regenerate_interval_secs: u64,

    /// Also write nodes.json here after each regeneration
    #[serde(default)]
    pub nodes_path: Option<PathBuf>,

    /// Also write graph.json here after each regeneration
    #[serde(default)]
    pub graph_path: Option<PathBuf>,
}

fn default_regenerate_interval() -> u64 {
    60
}

impl Default for MeshviewerConfig {
    fn default() -> Self {
        Self {
            regenerate_interval_secs: default_regenerate_interval(),
            nodes_path: None,
            graph_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Complete collector configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CollectorConfig {
    #[serde(default)]
    pub announced: AnnouncedConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default = "default_receivers")]
    pub receiver: Vec<ReceiverConfig>,
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub prometheus: PrometheusConfig,
    #[serde(default)]
    pub meshviewer: MeshviewerConfig,
    #[serde(default)]
    pub logger: LoggerConfig,
}

fn default_receivers() -> Vec<ReceiverConfig> {
    vec![ReceiverConfig::default()]
}

impl CollectorConfig {
    /// Load from the default path.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_PATH))
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            warn!("Config file {} not found, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        info!("Loaded config from {}", path.display());
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Liveness thresholds handed to the store engines.
    pub fn liveness(&self) -> crate::liveness::LivenessConfig {
        crate::liveness::LivenessConfig {
            window: self.announced.liveness_window(),
            max_age: Duration::from_secs(self.store.expire_after_days * 24 * 60 * 60),
            recompute_interval: Duration::from_secs(self.store.liveness_interval_secs),
            expiry_interval: Duration::from_secs(self.store.expiry_interval_secs),
        }
    }
}
