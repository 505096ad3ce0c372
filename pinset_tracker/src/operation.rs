//! Per-CID operation bookkeeping.
//!
//! The `OperationTracker` is the single owner of the CID → operation map.
//! Every CID has exactly one record: the latest operation issued for it,
//! live or retired. Status is a projection of that record, so exactly one
//! status holds per CID at any instant.
//!
//! Each operation carries a generation number drawn from a tracker-wide
//! counter. Writes coming back from workers name the generation they were
//! issued for and are dropped unless it is still the current one, so a
//! slow, superseded daemon call can never overwrite a newer result.

use chrono::{DateTime, Utc};
use pinset_core::{Cid, Pin, PinInfo, TrackerStatus};
use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

/// Error text recorded when an operation is aborted through its
/// cancellation token.
pub const CANCELLED_ERROR: &str = "operation cancelled";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationType {
    Pin,
    Unpin,
    /// Bookkeeping only: the pin is allocated to other peers.
    Remote,
    /// Bookkeeping only: the pin is the root of a sharded DAG.
    Shard,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Queued,
    InProgress,
    Done,
    Cancelled,
    Error,
}

/// How a worker finished an operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Done,
    Failed(String),
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub cid: Cid,
    pub op_type: OperationType,
    pub phase: Phase,
    pub error: Option<String>,
    /// The desired-state record this operation acts on. For unpins it is
    /// the last pin known for the CID.
    pub pin: Pin,
    pub generation: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Operation {
    pub fn is_live(&self) -> bool {
        matches!(self.phase, Phase::Queued | Phase::InProgress)
    }

    pub fn status(&self) -> TrackerStatus {
        match (self.op_type, self.phase) {
            (OperationType::Remote, _) => TrackerStatus::Remote,
            (OperationType::Shard, _) => TrackerStatus::Sharded,
            (OperationType::Pin, Phase::Queued) => TrackerStatus::PinQueued,
            (OperationType::Pin, Phase::InProgress) => TrackerStatus::Pinning,
            (OperationType::Pin, Phase::Done) => TrackerStatus::Pinned,
            (OperationType::Pin, Phase::Error | Phase::Cancelled) => TrackerStatus::PinError,
            (OperationType::Unpin, Phase::Queued) => TrackerStatus::UnpinQueued,
            (OperationType::Unpin, Phase::InProgress) => TrackerStatus::Unpinning,
            (OperationType::Unpin, Phase::Done) => TrackerStatus::Unpinned,
            (OperationType::Unpin, Phase::Error | Phase::Cancelled) => TrackerStatus::UnpinError,
        }
    }

    pub fn to_info(&self, peer: &str) -> PinInfo {
        PinInfo {
            cid: self.cid.clone(),
            name: self.pin.name.clone(),
            peer: peer.to_owned(),
            status: self.status(),
            error: self.error.clone(),
            updated_at: self.updated_at,
        }
    }
}

/// Handed to the caller of `begin`; everything a worker needs to run
/// and retire the new operation.
#[derive(Debug)]
pub struct Ticket {
    pub operation: Operation,
    /// Flipped to `true` once the worker is done with the operation.
    pub finished: watch::Sender<bool>,
    /// Completion signal of an older operation on the same CID whose
    /// daemon call may still be outstanding.
    pub predecessor: Option<watch::Receiver<bool>>,
}

#[derive(Debug)]
struct Entry {
    op: Operation,
    finished: watch::Receiver<bool>,
    predecessor: Option<watch::Receiver<bool>>,
}

#[derive(Debug, Default)]
pub struct OperationTracker {
    ops: RwLock<HashMap<Cid, Entry>>,
    next_generation: AtomicU64,
}

impl OperationTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Issues a new operation for `pin.cid` in `phase`, superseding any
    /// live one. Returns `None` without touching the map when `skip`
    /// holds for the current record.
    pub fn begin(
        &self,
        pin: Pin,
        op_type: OperationType,
        phase: Phase,
        skip: impl FnOnce(&Operation) -> bool,
    ) -> Option<Ticket> {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        let cid = pin.cid.clone();

        let predecessor = match ops.get(&cid) {
            Some(entry) if skip(&entry.op) => return None,
            Some(entry) => {
                if entry.op.is_live() {
                    tracing::debug!(
                        cid = %cid,
                        generation = entry.op.generation,
                        status = %entry.op.status(),
                        "superseding live operation"
                    );
                }
                match entry.op.phase {
                    // A started operation may still be talking to the daemon.
                    Phase::InProgress => Some(entry.finished.clone()),
                    // Anything else never reached the daemon, or did so only
                    // after its own predecessor returned. Keep waiting on
                    // that predecessor; a finished one resolves at once.
                    _ => entry.predecessor.clone(),
                }
            }
            None => None,
        };

        let now = Utc::now();
        let operation = Operation {
            cid: cid.clone(),
            op_type,
            phase,
            error: None,
            pin,
            generation: self.next_generation.fetch_add(1, Ordering::SeqCst) + 1,
            created_at: now,
            updated_at: now,
        };
        let (finished, finished_rx) = watch::channel(false);
        ops.insert(
            cid,
            Entry {
                op: operation.clone(),
                finished: finished_rx,
                predecessor: predecessor.clone(),
            },
        );

        Some(Ticket {
            operation,
            finished,
            predecessor,
        })
    }

    /// Moves a queued operation to in-progress. Returns false if the
    /// operation was superseded or cancelled in the meantime.
    pub fn start(&self, cid: &Cid, generation: u64) -> bool {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        match ops.get_mut(cid) {
            Some(entry) if entry.op.generation == generation && entry.op.phase == Phase::Queued => {
                entry.op.phase = Phase::InProgress;
                entry.op.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Commits the result of a live operation. Late results of superseded
    /// operations are dropped and reported as `false`.
    pub fn complete(&self, cid: &Cid, generation: u64, outcome: Outcome) -> bool {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        let Some(entry) = ops.get_mut(cid) else {
            return false;
        };
        if entry.op.generation != generation || !entry.op.is_live() {
            return false;
        }
        let (phase, error) = match outcome {
            Outcome::Done => (Phase::Done, None),
            Outcome::Failed(err) => (Phase::Error, Some(err)),
            Outcome::Cancelled => (Phase::Cancelled, Some(CANCELLED_ERROR.to_owned())),
        };
        entry.op.phase = phase;
        entry.op.error = error;
        entry.op.updated_at = Utc::now();
        true
    }

    /// Rewrites a retired operation after comparing it with the daemon.
    /// Only applies while `generation` is current and nothing is in flight.
    pub fn reconcile(&self, cid: &Cid, generation: u64, phase: Phase, error: Option<String>) -> bool {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        match ops.get_mut(cid) {
            Some(entry) if entry.op.generation == generation && !entry.op.is_live() => {
                entry.op.phase = phase;
                entry.op.error = error;
                entry.op.updated_at = Utc::now();
                true
            }
            _ => false,
        }
    }

    /// Marks every live operation cancelled. Used on shutdown.
    pub fn cancel_live(&self) -> usize {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let mut cancelled = 0;
        for entry in ops.values_mut().filter(|e| e.op.is_live()) {
            entry.op.phase = Phase::Cancelled;
            entry.op.error = Some(CANCELLED_ERROR.to_owned());
            entry.op.updated_at = now;
            cancelled += 1;
        }
        cancelled
    }

    /// Removes the record for `cid` if `pred` holds for it.
    pub fn remove_if(&self, cid: &Cid, pred: impl FnOnce(&Operation) -> bool) -> Option<Operation> {
        let mut ops = self.ops.write().unwrap_or_else(|e| e.into_inner());
        if !pred(&ops.get(cid)?.op) {
            return None;
        }
        ops.remove(cid).map(|entry| entry.op)
    }

    pub fn is_current(&self, cid: &Cid, generation: u64) -> bool {
        let ops = self.ops.read().unwrap_or_else(|e| e.into_inner());
        ops.get(cid).is_some_and(|e| e.op.generation == generation)
    }

    pub fn get(&self, cid: &Cid) -> Option<Operation> {
        let ops = self.ops.read().unwrap_or_else(|e| e.into_inner());
        ops.get(cid).map(|e| e.op.clone())
    }

    pub fn get_all(&self) -> Vec<Operation> {
        let ops = self.ops.read().unwrap_or_else(|e| e.into_inner());
        ops.values().map(|e| e.op.clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.ops.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pin(data: &[u8]) -> Pin {
        Pin::new(Cid::new_raw(data))
    }

    fn never(_: &Operation) -> bool {
        false
    }

    #[test]
    fn test_status_projection() {
        let tracker = OperationTracker::new();
        let p = pin(b"a");
        let t = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        let generation = t.operation.generation;
        assert_eq!(tracker.get(&p.cid).unwrap().status(), TrackerStatus::PinQueued);

        assert!(tracker.start(&p.cid, generation));
        assert_eq!(tracker.get(&p.cid).unwrap().status(), TrackerStatus::Pinning);
        assert!(!tracker.start(&p.cid, generation), "an operation starts once");

        assert!(tracker.complete(&p.cid, generation, Outcome::Done));
        assert_eq!(tracker.get(&p.cid).unwrap().status(), TrackerStatus::Pinned);
        assert!(
            !tracker.complete(&p.cid, generation, Outcome::Failed("late".into())),
            "a retired operation cannot be completed twice"
        );
    }

    #[test]
    fn test_late_result_of_superseded_operation_is_dropped() {
        let tracker = OperationTracker::new();
        let p = pin(b"b");
        let first = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        assert!(tracker.start(&p.cid, first.operation.generation));

        let second = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        assert!(second.operation.generation > first.operation.generation);
        assert!(second.predecessor.is_some(), "in-progress pin must be waited on");

        assert!(tracker.start(&p.cid, second.operation.generation));
        assert!(tracker.complete(&p.cid, second.operation.generation, Outcome::Done));

        // The pin comes back after the unpin was committed.
        assert!(!tracker.complete(&p.cid, first.operation.generation, Outcome::Done));
        let op = tracker.get(&p.cid).unwrap();
        assert_eq!(op.status(), TrackerStatus::Unpinned);
        assert_eq!(op.generation, second.operation.generation);
    }

    #[test]
    fn test_queued_operation_cannot_start_once_superseded() {
        let tracker = OperationTracker::new();
        let p = pin(b"c");
        let first = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        let second = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        assert!(second.predecessor.is_none(), "nothing was in flight");
        assert!(!tracker.start(&p.cid, first.operation.generation));
        assert!(tracker.start(&p.cid, second.operation.generation));
    }

    #[test]
    fn test_predecessor_is_inherited_through_queued_operations() {
        let tracker = OperationTracker::new();
        let p = pin(b"d");
        let first = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        assert!(tracker.start(&p.cid, first.operation.generation));
        let _second = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        let third = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();

        let mut waits_on = third.predecessor.expect("first pin is still in flight");
        assert!(!*waits_on.borrow_and_update());
        first.finished.send_replace(true);
        assert!(*waits_on.borrow());
    }

    #[test]
    fn test_predecessor_survives_cancelled_operation() {
        let tracker = OperationTracker::new();
        let p = pin(b"i");
        let first = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        assert!(tracker.start(&p.cid, first.operation.generation));

        let second = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        assert!(tracker.complete(&p.cid, second.operation.generation, Outcome::Cancelled));

        // The pin is still in flight; a retry must still wait for it.
        let third = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        let mut waits_on = third.predecessor.expect("first pin is still in flight");
        assert!(!*waits_on.borrow_and_update());
        first.finished.send_replace(true);
        assert!(*waits_on.borrow());
    }

    #[test]
    fn test_skip_leaves_record_untouched() {
        let tracker = OperationTracker::new();
        let p = pin(b"e");
        let first = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        let skipped = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, |op| {
            op.op_type == OperationType::Pin
        });
        assert!(skipped.is_none());
        assert_eq!(tracker.get(&p.cid).unwrap().generation, first.operation.generation);
    }

    #[test]
    fn test_cancelled_operation_projects_to_error() {
        let tracker = OperationTracker::new();
        let p = pin(b"f");
        let t = tracker.begin(p.clone(), OperationType::Unpin, Phase::Queued, never).unwrap();
        assert!(tracker.complete(&p.cid, t.operation.generation, Outcome::Cancelled));
        let op = tracker.get(&p.cid).unwrap();
        assert_eq!(op.phase, Phase::Cancelled);
        assert_eq!(op.status(), TrackerStatus::UnpinError);
        assert_eq!(op.error.as_deref(), Some(CANCELLED_ERROR));
    }

    #[test]
    fn test_reconcile_requires_retired_current_operation() {
        let tracker = OperationTracker::new();
        let p = pin(b"g");
        let t = tracker.begin(p.clone(), OperationType::Pin, Phase::Queued, never).unwrap();
        let generation = t.operation.generation;
        assert!(!tracker.reconcile(&p.cid, generation, Phase::Error, None), "live");
        tracker.complete(&p.cid, generation, Outcome::Done);
        assert!(!tracker.reconcile(&p.cid, generation + 1, Phase::Error, None), "stale");
        assert!(tracker.reconcile(&p.cid, generation, Phase::Error, Some("drift".into())));
        assert_eq!(tracker.get(&p.cid).unwrap().status(), TrackerStatus::PinError);
    }

    #[test]
    fn test_remove_if() {
        let tracker = OperationTracker::new();
        let p = pin(b"h");
        tracker.begin(p.clone(), OperationType::Remote, Phase::Done, never);
        assert!(tracker.remove_if(&p.cid, |op| op.op_type == OperationType::Unpin).is_none());
        assert_eq!(tracker.len(), 1);
        assert!(tracker.remove_if(&p.cid, |_| true).is_some());
        assert!(tracker.is_empty());
    }
}
