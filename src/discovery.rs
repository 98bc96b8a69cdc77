//! Seed Discovery
//!
//! Where the bootstrapper gets its seed endpoints from. Providers are
//! queried again on every bootstrap pass, so a launcher that is still
//! scheduling containers is picked up once it has addresses.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use crate::config::{DiscoveryMode, WolfGossipConfig};
use crate::error::{Error, Result};

/// Source of seed endpoints (`host:port`)
#[async_trait]
pub trait SeedProvider: Send + Sync {
    async fn seeds(&self) -> Result<Vec<String>>;

    /// Whether an empty answer is final.
    ///
    /// When it is not, the bootstrapper treats an empty list as "not yet"
    /// and asks again on its next pass instead of starting a cluster alone.
    fn empty_is_final(&self) -> bool {
        true
    }
}

/// Fixed list from the configuration
#[derive(Debug, Clone, Default)]
pub struct StaticSeeds {
    seeds: Vec<String>,
}

impl StaticSeeds {
    pub fn new(seeds: Vec<String>) -> Self {
        Self { seeds }
    }
}

#[async_trait]
impl SeedProvider for StaticSeeds {
    async fn seeds(&self) -> Result<Vec<String>> {
        Ok(self.seeds.clone())
    }
}

/// Container addresses reported by the framework launcher
pub struct LauncherSeeds {
    client: reqwest::Client,
    tracking_url: String,
    port: u16,
}

impl LauncherSeeds {
    pub fn new(launcher_address: &str, framework_name: &str, port: u16) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| Error::Discovery(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            tracking_url: format!(
                "{}/v1/Frameworks/{}",
                launcher_address.trim_end_matches('/'),
                framework_name
            ),
            port,
        })
    }

    pub fn tracking_url(&self) -> &str {
        &self.tracking_url
    }
}

#[async_trait]
impl SeedProvider for LauncherSeeds {
    async fn seeds(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(&self.tracking_url)
            .send()
            .await
            .map_err(|e| Error::Discovery(format!("GET {} failed: {}", self.tracking_url, e)))?;

        if !response.status().is_success() {
            return Err(Error::Discovery(format!(
                "GET {} returned {}",
                self.tracking_url,
                response.status()
            )));
        }

        let status: Value = response
            .json()
            .await
            .map_err(|e| Error::Discovery(format!("Invalid framework status: {}", e)))?;

        tracing::trace!("Parsing container addresses from framework status");
        let seeds: Vec<String> = container_addresses(&status)?
            .into_iter()
            .map(|ip| format!("{}:{}", ip, self.port))
            .collect();

        tracing::debug!("Launcher reported {} seeds", seeds.len());
        Ok(seeds)
    }

    /// Containers without addresses are still being scheduled
    fn empty_is_final(&self) -> bool {
        false
    }
}

/// Pull every `ContainerIPAddress` out of a framework status document.
///
/// Task roles are listed under `AggregatedTaskRoleStatuses`, keyed by role
/// name; every role is considered.
pub fn container_addresses(status: &Value) -> Result<Vec<String>> {
    let roles = status
        .get("AggregatedTaskRoleStatuses")
        .and_then(Value::as_object)
        .ok_or_else(|| Error::Discovery("missing AggregatedTaskRoleStatuses".into()))?;

    let mut addresses = Vec::new();
    for role in roles.values() {
        let tasks = role
            .pointer("/TaskStatuses/TaskStatusArray")
            .and_then(Value::as_array);
        let Some(tasks) = tasks else {
            continue;
        };

        addresses.extend(
            tasks
                .iter()
                .filter_map(|task| task.get("ContainerIPAddress").and_then(Value::as_str))
                .filter(|ip| !ip.is_empty())
                .map(str::to_string),
        );
    }

    Ok(addresses)
}

/// Build the provider selected by `[discovery]`
pub fn from_config(config: &WolfGossipConfig) -> Result<Arc<dyn SeedProvider>> {
    match config.discovery.mode {
        DiscoveryMode::Static => Ok(Arc::new(StaticSeeds::new(config.cluster.seeds.clone()))),
        DiscoveryMode::Launcher => {
            let address = config.discovery.launcher_address.as_deref().ok_or_else(|| {
                Error::Config("discovery.launcher_address is required in launcher mode".into())
            })?;
            let framework = config.discovery.framework_name.as_deref().ok_or_else(|| {
                Error::Config("discovery.framework_name is required in launcher mode".into())
            })?;
            let port = config
                .endpoint_port()
                .ok_or_else(|| Error::Config("node.endpoint has no port".into()))?;
            Ok(Arc::new(LauncherSeeds::new(address, framework, port)?))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_static_seeds() {
        let provider = StaticSeeds::new(vec!["10.0.0.2:7946".into()]);
        assert_eq!(provider.seeds().await.unwrap(), vec!["10.0.0.2:7946".to_string()]);
    }

    #[test]
    fn test_container_addresses() {
        let status = json!({
            "AggregatedTaskRoleStatuses": {
                "SaaS": {
                    "TaskStatuses": {
                        "TaskStatusArray": [
                            { "TaskIndex": 0, "ContainerIPAddress": "10.1.0.4" },
                            { "TaskIndex": 1, "ContainerIPAddress": "10.1.0.5" },
                            { "TaskIndex": 2, "ContainerIPAddress": "" }
                        ]
                    }
                },
                "Pending": {}
            }
        });

        assert_eq!(container_addresses(&status).unwrap(), vec!["10.1.0.4", "10.1.0.5"]);
        assert!(container_addresses(&json!({})).is_err());
    }

    #[test]
    fn test_from_config() {
        let config = WolfGossipConfig::from_str(
            r#"
[node]
endpoint = "10.0.0.1:7946"

[discovery]
mode = "launcher"
launcher_address = "http://launcher:9086/"
framework_name = "gossip"
"#,
        )
        .unwrap();
        assert!(from_config(&config).is_ok());

        let launcher = LauncherSeeds::new("http://launcher:9086/", "gossip", 7946).unwrap();
        assert_eq!(launcher.tracking_url(), "http://launcher:9086/v1/Frameworks/gossip");
    }

    #[test]
    fn test_empty_answer_finality() {
        assert!(StaticSeeds::default().empty_is_final());
        let launcher = LauncherSeeds::new("http://launcher:9086", "gossip", 7946).unwrap();
        assert!(!launcher.empty_is_final());
    }
}
