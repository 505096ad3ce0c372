use anyhow::Context;
use pinset_connector_ipfs::{IpfsHttpConfig, IpfsHttpConnector};
use pinset_connector_memory::MemoryConnector;
use pinset_core::{Pin, PinConnector};
use pinset_tracker::TrackerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Name of this peer as it appears in pin allocations.
    pub peer_name: String,
    #[serde(default)]
    pub tracker: TrackerConfig,
    #[serde(default)]
    pub connector: ConnectorConfig,
    /// Desired pin set applied by `pinset reconcile`.
    #[serde(default)]
    pub pins: Vec<Pin>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
#[serde(rename_all = "snake_case")]
pub enum ConnectorConfig {
    IpfsHttp(IpfsHttpConfig),
    /// In-process daemon; forgets everything on exit.
    Memory,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self::IpfsHttp(IpfsHttpConfig::default())
    }
}

impl ClusterConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path).with_context(|| {
            format!(
                "could not read {}; run `pinset config init` first",
                path.display()
            )
        })?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("could not parse {}", path.display()))?;
        config.tracker.validate()?;
        Ok(config)
    }
}

impl ConnectorConfig {
    pub fn build(&self) -> anyhow::Result<Arc<dyn PinConnector>> {
        Ok(match self {
            Self::IpfsHttp(config) => Arc::new(IpfsHttpConnector::new(config.clone())?),
            Self::Memory => Arc::new(MemoryConnector::new()),
        })
    }
}
