//! An in-process stand-in for the storage daemon.
//!
//! `MemoryConnector` keeps its pin set in a `DashMap` and offers the knobs
//! tests need to reproduce a slow, fallible daemon: per-call and per-CID
//! latency, a gate that stalls daemon calls until released, CIDs that
//! always fail, an offline switch, a call log and peak-concurrency counters.

use anyhow::anyhow;
use dashmap::{DashMap, DashSet};
use pinset_core::{
    Cid, ConnectorResult, DaemonPinStatus, PinConnector, PinDepth, PinTypeFilter, RepoStat,
    lookup_config_path,
};
use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};
use tokio::sync::watch;

/// Bytes the mock accounts for every pinned object in `repo_stat`.
pub const BYTES_PER_PIN: u64 = 1000;

/// Storage limit reported by `repo_stat` (10 GB).
pub const STORAGE_MAX: u64 = 10_000_000_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallKind {
    Pin,
    Unpin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallPhase {
    Started,
    Finished,
}

/// One entry of the call log.
#[derive(Debug, Clone)]
pub struct CallEvent {
    pub kind: CallKind,
    pub phase: CallPhase,
    pub cid: Cid,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Concurrency {
    active: AtomicUsize,
    peak: AtomicUsize,
}

/// Decrements the active counter when a call ends, including when the
/// caller drops the call's future.
struct ActiveGuard<'a>(&'a Concurrency);

impl<'a> ActiveGuard<'a> {
    fn enter(c: &'a Concurrency) -> Self {
        let now = c.active.fetch_add(1, Ordering::SeqCst) + 1;
        c.peak.fetch_max(now, Ordering::SeqCst);
        Self(c)
    }
}

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.active.fetch_sub(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub struct MemoryConnector {
    pins: DashMap<Cid, DaemonPinStatus>,
    failing: DashSet<Cid>,
    offline: AtomicBool,
    latency_ms: AtomicU64,
    delays: DashMap<Cid, Duration>,
    gate: watch::Sender<bool>,
    log: Mutex<Vec<CallEvent>>,
    pin_calls: Concurrency,
    unpin_calls: Concurrency,
    config: Mutex<serde_json::Value>,
}

impl MemoryConnector {
    /// Creates a new daemon with no pins, no latency and an open gate.
    pub fn new() -> Self {
        let (gate, _) = watch::channel(true);
        Self {
            pins: DashMap::new(),
            failing: DashSet::new(),
            offline: AtomicBool::new(false),
            latency_ms: AtomicU64::new(0),
            delays: DashMap::new(),
            gate,
            log: Mutex::new(Vec::new()),
            pin_calls: Concurrency::default(),
            unpin_calls: Concurrency::default(),
            config: Mutex::new(serde_json::json!({
                "Datastore": { "StorageMax": "10G" }
            })),
        }
    }

    /// Delay applied to every daemon call except `repo_stat` and
    /// `config_key`.
    pub fn set_latency(&self, latency: Duration) {
        self.latency_ms
            .store(latency.as_millis() as u64, Ordering::SeqCst);
    }

    /// Extra delay for pin and unpin calls on `cid` only.
    pub fn delay_on(&self, cid: &Cid, delay: Duration) {
        self.delays.insert(cid.clone(), delay);
    }

    /// Stalls pin, unpin and listing calls until `release` is called.
    /// Calls that are already past the gate are not affected.
    pub fn stall(&self) {
        self.gate.send_replace(false);
    }

    pub fn release(&self) {
        self.gate.send_replace(true);
    }

    /// Makes every pin and unpin of `cid` fail.
    pub fn fail_on(&self, cid: &Cid) {
        self.failing.insert(cid.clone());
    }

    pub fn clear_failures(&self) {
        self.failing.clear();
    }

    /// While offline every call fails as if the daemon were unreachable.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Overrides the daemon's view of `cid`, bypassing the call path.
    pub fn force_status(&self, cid: &Cid, status: DaemonPinStatus) {
        if status == DaemonPinStatus::Unpinned {
            self.pins.remove(cid);
        } else {
            self.pins.insert(cid.clone(), status);
        }
    }

    pub fn set_config(&self, config: serde_json::Value) {
        *self.config.lock().unwrap_or_else(|e| e.into_inner()) = config;
    }

    /// Status as currently held, without going through the call path.
    pub fn status_of(&self, cid: &Cid) -> DaemonPinStatus {
        self.pins
            .get(cid)
            .map(|s| *s)
            .unwrap_or(DaemonPinStatus::Unpinned)
    }

    /// A copy of the call log.
    pub fn events(&self) -> Vec<CallEvent> {
        self.log.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// CIDs of calls of `kind` in the order they started.
    pub fn started(&self, kind: CallKind) -> Vec<Cid> {
        self.events()
            .into_iter()
            .filter(|e| e.kind == kind && e.phase == CallPhase::Started)
            .map(|e| e.cid)
            .collect()
    }

    /// Number of calls of `kind` that reached the daemon.
    pub fn calls(&self, kind: CallKind) -> usize {
        self.started(kind).len()
    }

    /// Number of calls of `kind` currently in flight.
    pub fn active(&self, kind: CallKind) -> usize {
        self.counter(kind).active.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent calls of `kind` observed.
    pub fn peak(&self, kind: CallKind) -> usize {
        self.counter(kind).peak.load(Ordering::SeqCst)
    }

    fn counter(&self, kind: CallKind) -> &Concurrency {
        match kind {
            CallKind::Pin => &self.pin_calls,
            CallKind::Unpin => &self.unpin_calls,
        }
    }

    fn record(&self, kind: CallKind, phase: CallPhase, cid: &Cid) {
        self.log
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(CallEvent {
                kind,
                phase,
                cid: cid.clone(),
                at: Instant::now(),
            });
    }

    fn check_online(&self) -> ConnectorResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(anyhow!("daemon unreachable"));
        }
        Ok(())
    }

    /// Reachability check, gate and global latency.
    async fn round_trip(&self) -> ConnectorResult<()> {
        self.check_online()?;
        let mut gate = self.gate.subscribe();
        // The sender lives as long as `self`, so this only fails if the
        // connector is being torn down.
        gate.wait_for(|open| *open)
            .await
            .map_err(|_| anyhow!("daemon shutting down"))?;

        let latency = self.latency_ms.load(Ordering::SeqCst);
        if latency > 0 {
            tokio::time::sleep(Duration::from_millis(latency)).await;
        }
        Ok(())
    }

    /// Runs the shared prologue of a mutating call: round trip, per-CID
    /// delay, failure injection.
    async fn enter(&self, kind: CallKind, cid: &Cid) -> ConnectorResult<()> {
        self.round_trip().await?;
        let delay = self.delays.get(cid).map(|d| *d);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        if self.failing.contains(cid) {
            let op = match kind {
                CallKind::Pin => "pin",
                CallKind::Unpin => "unpin",
            };
            return Err(anyhow!("{op} of {cid} failed: injected failure"));
        }
        Ok(())
    }
}

impl Default for MemoryConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PinConnector for MemoryConnector {
    async fn pin(&self, cid: &Cid, depth: PinDepth) -> ConnectorResult<()> {
        let _active = ActiveGuard::enter(&self.pin_calls);
        self.record(CallKind::Pin, CallPhase::Started, cid);
        let result = self.enter(CallKind::Pin, cid).await;
        if result.is_ok() {
            let status = if depth.is_recursive() {
                DaemonPinStatus::Recursive
            } else {
                DaemonPinStatus::Direct
            };
            self.pins
                .entry(cid.clone())
                .and_modify(|current| {
                    if *current != DaemonPinStatus::Recursive {
                        *current = status;
                    }
                })
                .or_insert(status);
            tracing::trace!(%cid, %depth, "memory daemon pinned");
        }
        self.record(CallKind::Pin, CallPhase::Finished, cid);
        result
    }

    async fn unpin(&self, cid: &Cid) -> ConnectorResult<()> {
        let _active = ActiveGuard::enter(&self.unpin_calls);
        self.record(CallKind::Unpin, CallPhase::Started, cid);
        let result = self.enter(CallKind::Unpin, cid).await;
        if result.is_ok() {
            self.pins.remove(cid);
            tracing::trace!(%cid, "memory daemon unpinned");
        }
        self.record(CallKind::Unpin, CallPhase::Finished, cid);
        result
    }

    async fn pin_ls_cid(&self, cid: &Cid) -> ConnectorResult<DaemonPinStatus> {
        self.round_trip().await?;
        Ok(self.status_of(cid))
    }

    async fn pin_ls(&self, filter: PinTypeFilter) -> ConnectorResult<HashMap<Cid, DaemonPinStatus>> {
        self.round_trip().await?;
        Ok(self
            .pins
            .iter()
            .filter(|entry| filter.matches(*entry.value()))
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect())
    }

    async fn repo_stat(&self) -> ConnectorResult<RepoStat> {
        self.check_online()?;
        let num_objects = self.pins.len() as u64;
        Ok(RepoStat {
            repo_size: num_objects * BYTES_PER_PIN,
            storage_max: STORAGE_MAX,
            num_objects,
        })
    }

    async fn config_key(&self, path: &str) -> ConnectorResult<serde_json::Value> {
        self.check_online()?;
        let config = self.config.lock().unwrap_or_else(|e| e.into_inner());
        lookup_config_path(&config, path)
    }
}
