use crate::{Cid, DaemonPinStatus, PinDepth, PinTypeFilter};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub type ConnectorResult<T, E = anyhow::Error> = std::result::Result<T, E>;

/// Boundary to the storage daemon that actually holds pinned content.
///
/// Implementations are expected to be slow and fallible. Callers bound
/// their own concurrency and abort an in-flight call by dropping its
/// future, so implementations must not leave shared state inconsistent
/// when a call is dropped halfway.
#[async_trait]
pub trait PinConnector: std::fmt::Debug + Send + Sync + 'static {
    /// Pins `cid` on the daemon, retaining references up to `depth`.
    async fn pin(&self, cid: &Cid, depth: PinDepth) -> ConnectorResult<()>;

    /// Unpins `cid`. Unpinning content that is not pinned succeeds.
    async fn unpin(&self, cid: &Cid) -> ConnectorResult<()>;

    /// Returns the daemon's pin status for a single CID.
    async fn pin_ls_cid(&self, cid: &Cid) -> ConnectorResult<DaemonPinStatus>;

    /// Lists every pin on the daemon matching `filter`.
    async fn pin_ls(&self, filter: PinTypeFilter) -> ConnectorResult<HashMap<Cid, DaemonPinStatus>>;

    /// Returns repository usage statistics.
    async fn repo_stat(&self) -> ConnectorResult<RepoStat>;

    /// Looks up a value in the daemon configuration by a slash separated
    /// path, e.g. `Datastore/StorageMax`.
    async fn config_key(&self, path: &str) -> ConnectorResult<serde_json::Value>;
}

/// Repository usage as reported by the daemon.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStat {
    pub repo_size: u64,
    pub storage_max: u64,
    pub num_objects: u64,
}

/// Walks a slash separated `path` through a daemon configuration document.
///
/// Empty paths and paths naming missing keys are errors.
pub fn lookup_config_path(config: &serde_json::Value, path: &str) -> ConnectorResult<serde_json::Value> {
    if path.is_empty() {
        anyhow::bail!("config key path is empty");
    }
    let mut current = config;
    for segment in path.split('/') {
        current = current
            .as_object()
            .and_then(|obj| obj.get(segment))
            .ok_or_else(|| anyhow::anyhow!("config key {path} not found (at {segment})"))?;
    }
    Ok(current.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_lookup_config_path() {
        let config = json!({"Datastore": {"StorageMax": "10G", "GCPeriod": "1h"}});
        assert_eq!(
            lookup_config_path(&config, "Datastore/StorageMax").unwrap(),
            json!("10G")
        );
        assert!(lookup_config_path(&config, "Datastore").unwrap().is_object());
        assert!(lookup_config_path(&config, "").is_err());
        assert!(lookup_config_path(&config, "Datastore/abc").is_err());
        assert!(lookup_config_path(&config, "Datastore/StorageMax/deeper").is_err());
    }
}
