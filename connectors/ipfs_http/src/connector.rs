use crate::Error;
use crate::config::IpfsHttpConfig;
use pinset_core::{
    Cid, ConnectorResult, DaemonPinStatus, PinConnector, PinDepth, PinTypeFilter, RepoStat,
    lookup_config_path,
};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
pub struct IpfsHttpConnector {
    config: IpfsHttpConfig,
    api_url: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct DaemonErrorBody {
    #[serde(rename = "Message")]
    message: String,
    #[serde(rename = "Code", default)]
    code: i64,
    #[serde(rename = "Type", default)]
    kind: String,
}

#[derive(Deserialize)]
struct PinLsResponse {
    #[serde(rename = "Keys", default)]
    keys: HashMap<String, PinLsEntry>,
}

#[derive(Deserialize)]
struct PinLsEntry {
    #[serde(rename = "Type")]
    kind: String,
}

#[derive(Deserialize)]
struct PinOpResponse {
    #[serde(rename = "Pins", default)]
    pins: Vec<String>,
}

#[derive(Deserialize)]
struct RepoStatResponse {
    #[serde(rename = "RepoSize")]
    repo_size: u64,
    #[serde(rename = "StorageMax", default)]
    storage_max: u64,
    #[serde(rename = "NumObjects", default)]
    num_objects: u64,
}

impl IpfsHttpConnector {
    pub fn new(config: IpfsHttpConfig) -> Result<Self, Error> {
        let api_url = format!("{}/api/v0", config.node_addr.trim_end_matches('/'));
        let client = reqwest::Client::builder().build()?;
        Ok(Self {
            config,
            api_url,
            client,
        })
    }

    pub fn config(&self) -> &IpfsHttpConfig {
        &self.config
    }

    /// POSTs to `endpoint` and returns the raw response body. Non-2xx
    /// answers become `Error::Daemon` when the body is the daemon's JSON
    /// error, `Error::HttpFailWithBody` otherwise.
    async fn post(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<Vec<u8>, Error> {
        let url = format!("{}/{endpoint}", self.api_url);
        trace!(%url, ?query, "ipfs request");
        let mut req = self.client.post(&url).query(query);
        if let Some(timeout) = timeout {
            req = req.timeout(timeout);
        }
        let res = req.send().await?;
        let status = res.status();
        let body = res.bytes().await?;
        if status.is_success() {
            return Ok(body.to_vec());
        }
        match serde_json::from_slice::<DaemonErrorBody>(&body) {
            Ok(err) => Err(Error::Daemon {
                message: err.message,
                code: err.code,
                kind: err.kind,
            }),
            Err(_) => Err(Error::HttpFailWithBody(
                status.as_u16(),
                String::from_utf8_lossy(&body).into_owned(),
            )),
        }
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        query: &[(&str, &str)],
        timeout: Option<Duration>,
    ) -> Result<T, Error> {
        let body = self.post(endpoint, query, timeout).await?;
        Ok(serde_json::from_slice(&body)?)
    }

    async fn list(&self, query: &[(&str, &str)]) -> Result<HashMap<Cid, DaemonPinStatus>, Error> {
        let res: PinLsResponse = self
            .post_json("pin/ls", query, self.config.request_timeout())
            .await?;
        res.keys
            .into_iter()
            .map(|(key, entry)| -> Result<_, Error> {
                let cid = Cid::parse(&key).map_err(|source| Error::InvalidCid {
                    cid: key.clone(),
                    source,
                })?;
                Ok((cid, DaemonPinStatus::from_daemon_type(&entry.kind)))
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl PinConnector for IpfsHttpConnector {
    async fn pin(&self, cid: &Cid, depth: PinDepth) -> ConnectorResult<()> {
        if self.pin_ls_cid(cid).await?.is_pinned(depth) {
            debug!(%cid, %depth, "already pinned");
            return Ok(());
        }
        let arg = cid.to_string();
        let recursive = if depth.is_recursive() { "true" } else { "false" };
        let res: PinOpResponse = self
            .post_json(
                "pin/add",
                &[("arg", &arg), ("recursive", recursive)],
                self.config.pin_timeout(),
            )
            .await?;
        debug!(%cid, %depth, pins = ?res.pins, "pinned");
        Ok(())
    }

    async fn unpin(&self, cid: &Cid) -> ConnectorResult<()> {
        let arg = cid.to_string();
        match self
            .post("pin/rm", &[("arg", &arg)], self.config.unpin_timeout())
            .await
        {
            Ok(_) => {
                debug!(%cid, "unpinned");
                Ok(())
            }
            Err(e) if e.is_not_pinned() => {
                debug!(%cid, "unpin of a cid the daemon does not hold");
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn pin_ls_cid(&self, cid: &Cid) -> ConnectorResult<DaemonPinStatus> {
        let arg = cid.to_string();
        match self.list(&[("arg", &arg), ("type", "all")]).await {
            // The daemon echoes the CID in the form it was asked for.
            Ok(keys) => Ok(keys
                .get(cid)
                .copied()
                .unwrap_or(DaemonPinStatus::Unpinned)),
            Err(e) if e.is_not_pinned() => Ok(DaemonPinStatus::Unpinned),
            Err(e) => Err(e.into()),
        }
    }

    async fn pin_ls(&self, filter: PinTypeFilter) -> ConnectorResult<HashMap<Cid, DaemonPinStatus>> {
        Ok(self.list(&[("type", filter.as_str())]).await?)
    }

    async fn repo_stat(&self) -> ConnectorResult<RepoStat> {
        let res: RepoStatResponse = self
            .post_json(
                "repo/stat",
                &[("size-only", "true")],
                self.config.request_timeout(),
            )
            .await?;
        Ok(RepoStat {
            repo_size: res.repo_size,
            storage_max: res.storage_max,
            num_objects: res.num_objects,
        })
    }

    async fn config_key(&self, path: &str) -> ConnectorResult<serde_json::Value> {
        let config: serde_json::Value = self
            .post_json("config/show", &[], self.config.request_timeout())
            .await?;
        lookup_config_path(&config, path)
    }
}
