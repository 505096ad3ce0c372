use crate::{Cid, PinDepth};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Externally observable state of a CID on this peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackerStatus {
    Unpinned,
    PinQueued,
    Pinning,
    Pinned,
    PinError,
    UnpinQueued,
    Unpinning,
    UnpinError,
    /// Pinned on purpose by other peers, not held locally.
    Remote,
    /// Root of a sharded DAG whose shards are tracked separately.
    Sharded,
}

impl TrackerStatus {
    pub fn is_error(&self) -> bool {
        matches!(self, Self::PinError | Self::UnpinError)
    }

    pub fn is_queued(&self) -> bool {
        matches!(self, Self::PinQueued | Self::UnpinQueued)
    }

    /// True while a daemon call for this CID may still be outstanding.
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            Self::PinQueued | Self::Pinning | Self::UnpinQueued | Self::Unpinning
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unpinned => "unpinned",
            Self::PinQueued => "pin_queued",
            Self::Pinning => "pinning",
            Self::Pinned => "pinned",
            Self::PinError => "pin_error",
            Self::UnpinQueued => "unpin_queued",
            Self::Unpinning => "unpinning",
            Self::UnpinError => "unpin_error",
            Self::Remote => "remote",
            Self::Sharded => "sharded",
        }
    }
}

impl fmt::Display for TrackerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of what the tracker knows about one CID.
///
/// Always a copy; holding a `PinInfo` never blocks the tracker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinInfo {
    pub cid: Cid,
    pub name: String,
    /// The peer reporting this status.
    pub peer: String,
    pub status: TrackerStatus,
    /// Last daemon or admission error, verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

/// Pin state as reported by the storage daemon itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DaemonPinStatus {
    /// The daemon answered with a pin type we do not understand.
    Bug,
    Error,
    Direct,
    Recursive,
    Indirect,
    Unpinned,
}

impl DaemonPinStatus {
    /// Maps the daemon's pin type strings (`direct`, `recursive`,
    /// `indirect through <cid>`, …) to a status.
    pub fn from_daemon_type(t: &str) -> Self {
        let t = t.trim();
        match t {
            "" | "unpinned" => Self::Unpinned,
            "direct" => Self::Direct,
            "recursive" => Self::Recursive,
            _ if t.starts_with("indirect") => Self::Indirect,
            _ => Self::Bug,
        }
    }

    /// Returns true if this daemon status satisfies a pin at `depth`.
    pub fn is_pinned(&self, depth: PinDepth) -> bool {
        match depth {
            PinDepth::Limited(0) => *self == Self::Direct,
            PinDepth::Unbounded | PinDepth::Limited(_) => *self == Self::Recursive,
        }
    }

    /// Returns true if the daemon holds the object in any form.
    pub fn is_held(&self) -> bool {
        matches!(self, Self::Direct | Self::Recursive | Self::Indirect)
    }
}

impl fmt::Display for DaemonPinStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Bug => "bug",
            Self::Error => "error",
            Self::Direct => "direct",
            Self::Recursive => "recursive",
            Self::Indirect => "indirect",
            Self::Unpinned => "unpinned",
        };
        f.write_str(s)
    }
}

/// Which pins a daemon listing should include.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinTypeFilter {
    #[default]
    All,
    Direct,
    Recursive,
    Indirect,
}

impl PinTypeFilter {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::Direct => "direct",
            Self::Recursive => "recursive",
            Self::Indirect => "indirect",
        }
    }

    pub fn matches(&self, status: DaemonPinStatus) -> bool {
        match self {
            Self::All => status.is_held(),
            Self::Direct => status == DaemonPinStatus::Direct,
            Self::Recursive => status == DaemonPinStatus::Recursive,
            Self::Indirect => status == DaemonPinStatus::Indirect,
        }
    }
}

impl FromStr for PinTypeFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(Self::All),
            "direct" => Ok(Self::Direct),
            "recursive" => Ok(Self::Recursive),
            "indirect" => Ok(Self::Indirect),
            other => Err(format!("unknown pin type filter: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_daemon_type_parsing() {
        assert_eq!(DaemonPinStatus::from_daemon_type("recursive"), DaemonPinStatus::Recursive);
        assert_eq!(DaemonPinStatus::from_daemon_type("direct"), DaemonPinStatus::Direct);
        assert_eq!(
            DaemonPinStatus::from_daemon_type("indirect through QmXoypizjW3WknFiJnKLwHCnL72vedxjQkDDP1mXWo6uco"),
            DaemonPinStatus::Indirect
        );
        assert_eq!(DaemonPinStatus::from_daemon_type(""), DaemonPinStatus::Unpinned);
        assert_eq!(DaemonPinStatus::from_daemon_type("weird"), DaemonPinStatus::Bug);
    }

    #[test]
    fn test_is_pinned_by_depth() {
        use DaemonPinStatus::*;
        assert!(Recursive.is_pinned(PinDepth::Unbounded));
        assert!(!Direct.is_pinned(PinDepth::Unbounded));
        assert!(Direct.is_pinned(PinDepth::DIRECT));
        assert!(!Recursive.is_pinned(PinDepth::DIRECT));
        assert!(Recursive.is_pinned(PinDepth::Limited(2)));
        assert!(!Indirect.is_pinned(PinDepth::Limited(2)));
        assert!(!Unpinned.is_pinned(PinDepth::Unbounded));
    }

    #[test]
    fn test_filter() {
        assert!(PinTypeFilter::All.matches(DaemonPinStatus::Indirect));
        assert!(!PinTypeFilter::All.matches(DaemonPinStatus::Unpinned));
        assert!(!PinTypeFilter::Recursive.matches(DaemonPinStatus::Direct));
        assert_eq!("direct".parse::<PinTypeFilter>(), Ok(PinTypeFilter::Direct));
        assert!("bogus".parse::<PinTypeFilter>().is_err());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(TrackerStatus::PinQueued.to_string(), "pin_queued");
        assert_eq!(
            serde_json::to_string(&TrackerStatus::UnpinError).unwrap(),
            "\"unpin_error\""
        );
        assert!(TrackerStatus::PinError.is_error());
        assert!(TrackerStatus::Unpinning.is_busy());
        assert!(!TrackerStatus::Remote.is_busy());
    }
}
