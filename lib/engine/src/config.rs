//! Host and cluster configuration, loaded from the environment the way
//! `ServerConfig::from_env` does elsewhere in this workspace.

use std::fmt;

use serde::{Deserialize, Serialize};

fn default_tick_interval_secs() -> u64 {
    1
}

fn default_dangling_good_ends_run() -> bool {
    true
}

fn default_pending_age_alert_secs() -> u64 {
    300
}

/// This host's identity and the behavioral knobs the Hub and scheduler read
/// from (§9 "Design notes", §10.6 decision 2).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    pub host_id: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Whether a good event with no listening node ends the run (true) or is
    /// left dangling for other branches to still complete (§9 open question 2).
    #[serde(default = "default_dangling_good_ends_run")]
    pub dangling_good_ends_run: bool,
    /// A pending run older than this is a candidate for an age alert, not cancellation.
    #[serde(default = "default_pending_age_alert_secs")]
    pub pending_age_alert_secs: u64,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            host_id: String::new(),
            tags: Vec::new(),
            tick_interval_secs: default_tick_interval_secs(),
            dangling_good_ends_run: default_dangling_good_ends_run(),
            pending_age_alert_secs: default_pending_age_alert_secs(),
        }
    }
}

/// The static set of peer hosts this host knows about when running in
/// cluster mode (§4.3.3, §4.4). An empty peer list means standalone mode.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub peers: Vec<String>,
}

/// Error loading `HostConfig`/`ClusterConfig` from the environment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl HostConfig {
    /// Loads configuration from environment variables, using `__` as the
    /// nesting separator (e.g. `WAYPOST__TICK_INTERVAL_SECS`).
    pub fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("WAYPOST")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError(e.to_string()))
    }
}

impl ClusterConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        config::Config::builder()
            .add_source(
                config::Environment::with_prefix("WAYPOST_CLUSTER")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| ConfigError(e.to_string()))?
            .try_deserialize()
            .map_err(|e| ConfigError(e.to_string()))
    }
}
