use chrono::{DateTime, Utc};
use pinset_core::{PinInfo, TrackerStatus};
use serde::Serialize;
use std::collections::BTreeMap;

/// A point-in-time view of everything a tracker knows.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub peer: String,
    pub generated_at: DateTime<Utc>,
    pub counts: BTreeMap<TrackerStatus, usize>,
    pub pins: Vec<PinInfo>,
}

impl StatusReport {
    pub fn new(peer: &str, pins: impl IntoIterator<Item = PinInfo>) -> Self {
        let pins: Vec<PinInfo> = pins.into_iter().collect();
        let mut counts = BTreeMap::new();
        for info in &pins {
            *counts.entry(info.status).or_insert(0) += 1;
        }
        Self {
            peer: peer.to_owned(),
            generated_at: Utc::now(),
            counts,
            pins,
        }
    }

    pub fn count(&self, status: TrackerStatus) -> usize {
        self.counts.get(&status).copied().unwrap_or(0)
    }

    pub fn errors(&self) -> impl Iterator<Item = &PinInfo> {
        self.pins.iter().filter(|info| info.status.is_error())
    }

    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
