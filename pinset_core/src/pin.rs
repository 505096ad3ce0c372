use crate::Cid;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How many levels of referenced content a pin retains.
///
/// On the wire and in config files this is a plain integer where any
/// negative value means unbounded (full recursive retention) and `0`
/// retains only the object itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(from = "i32", into = "i32")]
pub enum PinDepth {
    #[default]
    Unbounded,
    Limited(u32),
}

impl PinDepth {
    /// Pins only the object itself.
    pub const DIRECT: PinDepth = PinDepth::Limited(0);

    pub fn is_recursive(&self) -> bool {
        *self != Self::DIRECT
    }
}

impl From<i32> for PinDepth {
    fn from(value: i32) -> Self {
        if value < 0 {
            PinDepth::Unbounded
        } else {
            PinDepth::Limited(value as u32)
        }
    }
}

impl From<PinDepth> for i32 {
    fn from(value: PinDepth) -> Self {
        match value {
            PinDepth::Unbounded => -1,
            PinDepth::Limited(depth) => depth.min(i32::MAX as u32) as i32,
        }
    }
}

impl fmt::Display for PinDepth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PinDepth::Unbounded => f.write_str("unbounded"),
            PinDepth::Limited(depth) => write!(f, "{depth}"),
        }
    }
}

/// What a pin refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinKind {
    /// Regular content, pinned on the daemon when allocated here.
    #[default]
    Data,
    /// Root of a sharded DAG. The shards are tracked as their own pins and
    /// the root itself is never pinned on the daemon.
    Meta,
    /// One shard of a sharded DAG.
    Shard,
}

/// Desired-state record for one CID, as issued by the cluster.
///
/// A `Pin` is immutable once issued; a new `Pin` for the same CID
/// replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub cid: Cid,
    #[serde(default)]
    pub name: String,
    /// Minimum number of peers that should hold the content; `-1` means all.
    #[serde(default = "replication_everywhere")]
    pub replication_factor_min: i32,
    /// Maximum number of peers that should hold the content; `-1` means all.
    #[serde(default = "replication_everywhere")]
    pub replication_factor_max: i32,
    #[serde(default)]
    pub max_depth: PinDepth,
    /// Peers this pin is allocated to. Empty means every peer.
    #[serde(default)]
    pub allocations: Vec<String>,
    #[serde(default)]
    pub kind: PinKind,
}

fn replication_everywhere() -> i32 {
    -1
}

impl Pin {
    /// A recursive, unnamed pin allocated everywhere.
    pub fn new(cid: Cid) -> Self {
        Self {
            cid,
            name: String::new(),
            replication_factor_min: -1,
            replication_factor_max: -1,
            max_depth: PinDepth::Unbounded,
            allocations: Vec::new(),
            kind: PinKind::Data,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_depth(mut self, depth: PinDepth) -> Self {
        self.max_depth = depth;
        self
    }

    pub fn with_allocations<I, S>(mut self, peers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allocations = peers.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_kind(mut self, kind: PinKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_replication(mut self, min: i32, max: i32) -> Self {
        self.replication_factor_min = min;
        self.replication_factor_max = max;
        self
    }

    /// Returns true if this pin is meant to be held by other peers only.
    pub fn is_remote_for(&self, peer: &str) -> bool {
        !self.allocations.is_empty() && !self.allocations.iter().any(|p| p == peer)
    }
}
