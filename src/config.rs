//! WolfGossip Configuration
//!
//! This module provides configuration structures for the WolfGossip
//! membership daemon.

use serde::{Deserialize, Serialize};

use crate::gossip::ClusterOptions;

/// Main WolfGossip configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WolfGossipConfig {
    /// Node-specific configuration
    pub node: NodeConfig,

    /// Gossip cluster configuration
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Seed discovery configuration
    #[serde(default)]
    pub discovery: DiscoveryConfig,

    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Node-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Endpoint other nodes use to reach us (host:port); the node's identity
    pub endpoint: String,

    /// Address to bind for gossip traffic (defaults to the endpoint)
    #[serde(default)]
    pub bind_address: Option<String>,
}

/// Gossip cluster configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Static seed endpoints
    #[serde(default)]
    pub seeds: Vec<String>,

    /// Interval between gossip rounds in milliseconds
    #[serde(default = "default_gossip_interval_ms")]
    pub gossip_interval_ms: u64,

    /// Probability of picking a non-live node when live nodes exist
    #[serde(default = "default_non_live_probability")]
    pub gossip_non_live_nodes_probability: f64,

    /// Deadline for a direct Ping1/Ping2 call in milliseconds
    #[serde(default = "default_ping_timeout_ms")]
    pub ping_timeout_ms: u64,

    /// Deadline for a forwarded call in milliseconds
    #[serde(default = "default_forward_timeout_ms")]
    pub forward_timeout_ms: u64,

    /// First pause after a full unsuccessful pass over the seeds
    #[serde(default = "default_bootstrap_backoff_initial_ms")]
    pub bootstrap_backoff_initial_ms: u64,

    /// Upper bound of the bootstrap pause
    #[serde(default = "default_bootstrap_backoff_max_ms")]
    pub bootstrap_backoff_max_ms: u64,
}

/// Where seed endpoints come from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DiscoveryMode {
    /// Use `cluster.seeds`
    #[default]
    Static,
    /// Ask the framework launcher for the container addresses
    Launcher,
}

/// Seed discovery configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DiscoveryConfig {
    /// Discovery mode
    #[serde(default)]
    pub mode: DiscoveryMode,

    /// Launcher base URL (launcher mode)
    #[serde(default)]
    pub launcher_address: Option<String>,

    /// Framework name registered with the launcher (launcher mode)
    #[serde(default)]
    pub framework_name: Option<String>,
}

/// API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Enable HTTP API
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// HTTP API bind address
    #[serde(default = "default_api_address")]
    pub bind_address: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (pretty, json)
    #[serde(default = "default_log_format")]
    pub format: String,
}

// Default value functions
fn default_gossip_interval_ms() -> u64 {
    1000
}

fn default_non_live_probability() -> f64 {
    0.1
}

fn default_ping_timeout_ms() -> u64 {
    200
}

fn default_forward_timeout_ms() -> u64 {
    500
}

fn default_bootstrap_backoff_initial_ms() -> u64 {
    200
}

fn default_bootstrap_backoff_max_ms() -> u64 {
    5000
}

fn default_true() -> bool {
    true
}

fn default_api_address() -> String {
    "0.0.0.0:8946".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            seeds: Vec::new(),
            gossip_interval_ms: default_gossip_interval_ms(),
            gossip_non_live_nodes_probability: default_non_live_probability(),
            ping_timeout_ms: default_ping_timeout_ms(),
            forward_timeout_ms: default_forward_timeout_ms(),
            bootstrap_backoff_initial_ms: default_bootstrap_backoff_initial_ms(),
            bootstrap_backoff_max_ms: default_bootstrap_backoff_max_ms(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: default_api_address(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl WolfGossipConfig {
    /// Load configuration from a TOML file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_str(&content)
    }

    /// Load configuration from a TOML string
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(content: &str) -> crate::Result<Self> {
        let config: WolfGossipConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> crate::Result<()> {
        if self.node.endpoint.is_empty() {
            return Err(crate::Error::Config("node.endpoint cannot be empty".into()));
        }

        if !looks_like_host_port(&self.node.endpoint) {
            return Err(crate::Error::Config(format!(
                "node.endpoint must be host:port, got {}",
                self.node.endpoint
            )));
        }

        for seed in &self.cluster.seeds {
            if !looks_like_host_port(seed) {
                return Err(crate::Error::Config(format!(
                    "cluster.seeds entry must be host:port, got {}",
                    seed
                )));
            }
        }

        let p = self.cluster.gossip_non_live_nodes_probability;
        if !(0.0..=1.0).contains(&p) {
            return Err(crate::Error::Config(format!(
                "cluster.gossip_non_live_nodes_probability must be within [0, 1], got {}",
                p
            )));
        }

        if self.cluster.gossip_interval_ms == 0 {
            return Err(crate::Error::Config("cluster.gossip_interval_ms must be positive".into()));
        }

        if self.cluster.ping_timeout_ms == 0 || self.cluster.forward_timeout_ms == 0 {
            return Err(crate::Error::Config(
                "cluster.ping_timeout_ms and cluster.forward_timeout_ms must be positive".into(),
            ));
        }

        if self.cluster.bootstrap_backoff_max_ms < self.cluster.bootstrap_backoff_initial_ms {
            return Err(crate::Error::Config(
                "cluster.bootstrap_backoff_max_ms cannot be lower than bootstrap_backoff_initial_ms".into(),
            ));
        }

        if self.discovery.mode == DiscoveryMode::Launcher
            && (self.discovery.launcher_address.is_none() || self.discovery.framework_name.is_none())
        {
            return Err(crate::Error::Config(
                "launcher discovery requires discovery.launcher_address and discovery.framework_name".into(),
            ));
        }

        Ok(())
    }

    /// Get the bind address (or the endpoint if not set)
    pub fn bind_address(&self) -> &str {
        self.node
            .bind_address
            .as_deref()
            .unwrap_or(&self.node.endpoint)
    }

    /// Port part of the endpoint, used to build seed endpoints from bare IPs
    pub fn endpoint_port(&self) -> Option<u16> {
        self.node
            .endpoint
            .rsplit_once(':')
            .and_then(|(_, port)| port.parse().ok())
    }

    /// Options consumed by the gossip engine
    pub fn cluster_options(&self) -> ClusterOptions {
        ClusterOptions {
            gossip_interval_ms: self.cluster.gossip_interval_ms,
            gossip_non_live_nodes_probability: self.cluster.gossip_non_live_nodes_probability,
            ping_timeout_ms: self.cluster.ping_timeout_ms,
            forward_timeout_ms: self.cluster.forward_timeout_ms,
            bootstrap_backoff_initial_ms: self.cluster.bootstrap_backoff_initial_ms,
            bootstrap_backoff_max_ms: self.cluster.bootstrap_backoff_max_ms,
        }
    }
}

fn looks_like_host_port(s: &str) -> bool {
    match s.rsplit_once(':') {
        Some((host, port)) => !host.is_empty() && port.parse::<u16>().is_ok(),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_parse_config() {
        let toml = r#"
[node]
endpoint = "10.0.0.1:7946"

[cluster]
seeds = ["10.0.0.2:7946", "10.0.0.3:7946"]
gossip_interval_ms = 500
ping_timeout_ms = 150
"#;

        let config = WolfGossipConfig::from_str(toml).unwrap();
        assert_eq!(config.node.endpoint, "10.0.0.1:7946");
        assert_eq!(config.bind_address(), "10.0.0.1:7946");
        assert_eq!(config.cluster.seeds.len(), 2);
        assert_eq!(config.endpoint_port(), Some(7946));

        let options = config.cluster_options();
        assert_eq!(options.gossip_interval_ms, 500);
        assert_eq!(options.ping_timeout_ms, 150);
        assert_eq!(options.forward_timeout_ms, 500);
        assert!((options.gossip_non_live_nodes_probability - 0.1).abs() < f64::EPSILON);
        assert_eq!(config.discovery.mode, DiscoveryMode::Static);
        assert!(config.api.enabled);
    }

    #[test]
    fn test_rejects_bad_probability() {
        let toml = r#"
[node]
endpoint = "10.0.0.1:7946"

[cluster]
gossip_non_live_nodes_probability = 1.5
"#;
        assert!(matches!(
            WolfGossipConfig::from_str(toml),
            Err(crate::Error::Config(_))
        ));
    }

    #[test]
    fn test_rejects_endpoint_without_port() {
        let toml = r#"
[node]
endpoint = "localhost"
"#;
        assert!(WolfGossipConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_launcher_mode_requires_address() {
        let toml = r#"
[node]
endpoint = "10.0.0.1:7946"

[discovery]
mode = "launcher"
framework_name = "gossip"
"#;
        assert!(WolfGossipConfig::from_str(toml).is_err());
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            "[node]\nendpoint = \"127.0.0.1:7946\"\nbind_address = \"0.0.0.0:7946\"\n"
        )
        .unwrap();

        let config = WolfGossipConfig::from_file(file.path()).unwrap();
        assert_eq!(config.bind_address(), "0.0.0.0:7946");
        assert_eq!(config.cluster_options().gossip_interval_ms, 1000);
    }
}
