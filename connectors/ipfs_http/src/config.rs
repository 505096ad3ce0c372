use serde::{Deserialize, Serialize};
use std::time::Duration;

pub const DEFAULT_NODE_ADDR: &str = "http://127.0.0.1:5001";
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 60;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IpfsHttpConfig {
    /// Base URL of the daemon's API listener, without the `/api/v0` suffix.
    pub node_addr: String,
    /// Applies to every call except pin and unpin.
    pub request_timeout_secs: u64,
    /// 0 disables the timeout.
    pub pin_timeout_secs: u64,
    /// 0 disables the timeout.
    pub unpin_timeout_secs: u64,
}

impl Default for IpfsHttpConfig {
    fn default() -> Self {
        Self {
            node_addr: DEFAULT_NODE_ADDR.to_owned(),
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            pin_timeout_secs: 0,
            unpin_timeout_secs: 0,
        }
    }
}

impl IpfsHttpConfig {
    pub fn new(node_addr: impl Into<String>) -> Self {
        Self {
            node_addr: node_addr.into(),
            ..Default::default()
        }
    }

    pub(crate) fn request_timeout(&self) -> Option<Duration> {
        secs(self.request_timeout_secs)
    }

    pub(crate) fn pin_timeout(&self) -> Option<Duration> {
        secs(self.pin_timeout_secs)
    }

    pub(crate) fn unpin_timeout(&self) -> Option<Duration> {
        secs(self.unpin_timeout_secs)
    }
}

fn secs(s: u64) -> Option<Duration> {
    (s > 0).then(|| Duration::from_secs(s))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: IpfsHttpConfig =
            serde_json::from_str(r#"{"node_addr": "http://10.0.0.2:5001", "pin_timeout_secs": 300}"#)
                .unwrap();
        assert_eq!(config.node_addr, "http://10.0.0.2:5001");
        assert_eq!(config.request_timeout(), Some(Duration::from_secs(60)));
        assert_eq!(config.pin_timeout(), Some(Duration::from_secs(300)));
        assert_eq!(config.unpin_timeout(), None);
    }
}
