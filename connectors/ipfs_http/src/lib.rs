//! `PinConnector` for IPFS-compatible daemons (kubo and friends), driven
//! through the daemon's HTTP API v0.

mod config;
mod connector;

pub use config::{DEFAULT_NODE_ADDR, DEFAULT_REQUEST_TIMEOUT_SECS, IpfsHttpConfig};
pub use connector::IpfsHttpConnector;

use pinset_core::CidError;
use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// The daemon answered with its JSON error body.
    #[error("{message}")]
    Daemon {
        message: String,
        code: i64,
        kind: String,
    },
    #[error("Got HTTP {0} with content '{1}'")]
    HttpFailWithBody(u16, String),
    #[error("daemon listed an invalid cid '{cid}': {source}")]
    InvalidCid { cid: String, source: CidError },

    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),
    #[error(transparent)]
    SerdeJson(#[from] serde_json::Error),
}

impl Error {
    /// True for the daemon's answer to pin/ls or pin/rm on a CID it does
    /// not hold.
    pub fn is_not_pinned(&self) -> bool {
        matches!(self, Self::Daemon { message, .. } if message.contains("not pinned"))
    }
}
