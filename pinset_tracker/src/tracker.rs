//! The reconciliation engine.

use crate::config::{TrackerConfig, UNPIN_CONCURRENCY};
use crate::error::{TrackerError, TrackerResult};
use crate::operation::{Operation, OperationTracker, OperationType, Outcome, Phase, Ticket};
use crate::queue::{Lane, Slot};
use crate::report::StatusReport;
use pinset_core::{
    Cid, DaemonPinStatus, Pin, PinConnector, PinDepth, PinInfo, PinKind, PinTypeFilter,
    TrackerStatus,
};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A unit of work travelling through a lane.
#[derive(Debug)]
struct Job {
    cid: Cid,
    generation: u64,
    op_type: OperationType,
    depth: PinDepth,
    /// Caller-supplied; aborts the daemon call when cancelled.
    cancel: CancellationToken,
    finished: watch::Sender<bool>,
}

impl Job {
    fn new(op: Operation, finished: watch::Sender<bool>, cancel: CancellationToken) -> Self {
        Self {
            cid: op.cid,
            generation: op.generation,
            op_type: op.op_type,
            depth: op.pin.max_depth,
            cancel,
            finished,
        }
    }
}

/// Executes jobs pulled from either lane and commits their results.
#[derive(Debug)]
struct Worker {
    ops: Arc<OperationTracker>,
    connector: Arc<dyn PinConnector>,
    shutdown: CancellationToken,
}

impl Worker {
    async fn run(&self, job: Job) {
        let Job {
            cid,
            generation,
            op_type,
            depth,
            cancel,
            finished,
        } = job;

        self.execute(&cid, generation, op_type, depth, &cancel).await;
        // Wakes any newer operation on this CID waiting for our daemon call.
        finished.send_replace(true);
    }

    async fn execute(
        &self,
        cid: &Cid,
        generation: u64,
        op_type: OperationType,
        depth: PinDepth,
        cancel: &CancellationToken,
    ) {
        if cancel.is_cancelled() || self.shutdown.is_cancelled() {
            self.ops.complete(cid, generation, Outcome::Cancelled);
            return;
        }
        if !self.ops.start(cid, generation) {
            debug!(%cid, generation, "skipping superseded operation");
            return;
        }

        debug!(%cid, generation, ?op_type, "calling daemon");
        let call = async {
            match op_type {
                OperationType::Pin => self.connector.pin(cid, depth).await,
                OperationType::Unpin => self.connector.unpin(cid).await,
                OperationType::Remote | OperationType::Shard => Ok(()),
            }
        };
        let outcome = tokio::select! {
            result = call => match result {
                Ok(()) => Outcome::Done,
                Err(e) => {
                    let err = format!("{e:#}");
                    warn!(%cid, ?op_type, error = %err, "daemon call failed");
                    Outcome::Failed(err)
                }
            },
            _ = cancel.cancelled() => Outcome::Cancelled,
            _ = self.shutdown.cancelled() => Outcome::Cancelled,
        };

        if self.ops.complete(cid, generation, outcome.clone()) {
            debug!(%cid, generation, ?op_type, ?outcome, "operation finished");
        } else {
            debug!(
                %cid,
                generation,
                ?outcome,
                reason = %TrackerError::Superseded(cid.clone()),
                "discarding late result"
            );
        }
    }

    /// Holds a job outside its lane until the operation it replaced is
    /// done with the daemon, then sends it through the reserved slot.
    async fn park(self: Arc<Self>, job: Job, predecessor: watch::Receiver<bool>, slot: Slot<Job>) {
        let cancelled = tokio::select! {
            _ = wait_finished(predecessor.clone()) => false,
            _ = job.cancel.cancelled() => true,
            _ = self.shutdown.cancelled() => true,
        };
        if !cancelled {
            if self.ops.is_current(&job.cid, job.generation) {
                slot.send(job);
            } else {
                debug!(cid = %job.cid, generation = job.generation, "superseded while parked");
                job.finished.send_replace(true);
            }
            return;
        }

        drop(slot);
        self.ops
            .complete(&job.cid, job.generation, Outcome::Cancelled);
        // Newer operations may have inherited our predecessor; only
        // report finished once it is.
        tokio::select! {
            _ = wait_finished(predecessor) => {}
            _ = self.shutdown.cancelled() => {}
        }
        job.finished.send_replace(true);
    }
}

async fn wait_finished(mut rx: watch::Receiver<bool>) {
    while !*rx.borrow_and_update() {
        // A dropped sender means the operation was discarded unrun.
        if rx.changed().await.is_err() {
            break;
        }
    }
}

/// Tracks the desired pin state of CIDs on this peer and drives the
/// storage daemon towards it.
///
/// Intent registration (`track`, `untrack`, `recover`) never waits for
/// the daemon: it records the new operation, submits it to the pin or
/// unpin lane and returns. Pins run up to `concurrent_pins` at a time,
/// unpins strictly one by one. Status queries read a snapshot of the
/// operation map and never touch the daemon; `sync` and `sync_all` are
/// the only calls that do.
///
/// Must be created inside a tokio runtime.
#[derive(Debug)]
pub struct PinTracker {
    peer: String,
    config: TrackerConfig,
    ops: Arc<OperationTracker>,
    connector: Arc<dyn PinConnector>,
    worker: Arc<Worker>,
    pin_lane: Lane<Job>,
    unpin_lane: Lane<Job>,
    shutdown: CancellationToken,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl PinTracker {
    pub fn new(
        config: TrackerConfig,
        connector: Arc<dyn PinConnector>,
        peer: impl Into<String>,
    ) -> Result<Self, crate::config::ConfigError> {
        config.validate()?;
        let peer = peer.into();
        let ops = Arc::new(OperationTracker::new());
        let shutdown = CancellationToken::new();
        let worker = Arc::new(Worker {
            ops: ops.clone(),
            connector: connector.clone(),
            shutdown: shutdown.clone(),
        });

        let (pin_lane, pin_task) = {
            let worker = worker.clone();
            Lane::spawn(
                "pin",
                config.max_pin_queue_size,
                config.concurrent_pins,
                move |job: Job| {
                    let worker = worker.clone();
                    async move { worker.run(job).await }
                },
                shutdown.clone(),
            )
        };
        let (unpin_lane, unpin_task) = {
            let worker = worker.clone();
            Lane::spawn(
                "unpin",
                config.max_pin_queue_size,
                UNPIN_CONCURRENCY,
                move |job: Job| {
                    let worker = worker.clone();
                    async move { worker.run(job).await }
                },
                shutdown.clone(),
            )
        };

        info!(
            %peer,
            max_pin_queue_size = config.max_pin_queue_size,
            concurrent_pins = config.concurrent_pins,
            "pin tracker started"
        );

        Ok(Self {
            peer,
            config,
            ops,
            connector,
            worker,
            pin_lane,
            unpin_lane,
            shutdown,
            tasks: Mutex::new(vec![pin_task, unpin_task]),
        })
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Starts tracking `pin`: the daemon should hold it at `pin.max_depth`.
    pub fn track(&self, pin: Pin) -> TrackerResult<()> {
        self.track_with_cancel(pin, CancellationToken::new())
    }

    /// Like `track`, but cancelling `cancel` aborts the daemon call and
    /// leaves the CID in `PinError`.
    pub fn track_with_cancel(&self, pin: Pin, cancel: CancellationToken) -> TrackerResult<()> {
        self.ensure_running()?;
        let cid = pin.cid.clone();

        if pin.kind == PinKind::Meta {
            debug!(%cid, "tracking sharded dag root");
            self.ops.begin(pin, OperationType::Shard, Phase::Done, |op| {
                op.op_type == OperationType::Shard
            });
            return Ok(());
        }
        if pin.is_remote_for(&self.peer) {
            debug!(%cid, allocations = ?pin.allocations, "pin is allocated elsewhere");
            self.ops.begin(pin, OperationType::Remote, Phase::Done, |op| {
                op.op_type == OperationType::Remote
            });
            return Ok(());
        }

        let depth = pin.max_depth;
        let ticket = self.ops.begin(pin, OperationType::Pin, Phase::Queued, |op| {
            op.op_type == OperationType::Pin
                && op.pin.max_depth == depth
                && matches!(op.phase, Phase::Queued | Phase::InProgress | Phase::Done)
        });
        match ticket {
            Some(ticket) => self.submit(&self.pin_lane, ticket, cancel),
            None => {
                debug!(%cid, %depth, "already pinned or pinning at this depth");
                Ok(())
            }
        }
    }

    /// Stops tracking `cid`: the daemon should no longer hold it.
    pub fn untrack(&self, cid: &Cid) -> TrackerResult<()> {
        self.untrack_with_cancel(cid, CancellationToken::new())
    }

    /// Like `untrack`, but cancelling `cancel` aborts the daemon call and
    /// leaves the CID in `UnpinError`.
    pub fn untrack_with_cancel(&self, cid: &Cid, cancel: CancellationToken) -> TrackerResult<()> {
        self.ensure_running()?;
        let pin = self
            .ops
            .get(cid)
            .map(|op| op.pin)
            .unwrap_or_else(|| Pin::new(cid.clone()));

        let ticket = self.ops.begin(pin, OperationType::Unpin, Phase::Queued, |op| {
            op.op_type == OperationType::Unpin
                && matches!(op.phase, Phase::Queued | Phase::InProgress | Phase::Done)
        });
        match ticket {
            Some(ticket) => self.submit(&self.unpin_lane, ticket, cancel),
            None => {
                debug!(%cid, "already unpinned or unpinning");
                Ok(())
            }
        }
    }

    /// Re-issues the operation that failed for `cid`.
    pub fn recover(&self, cid: &Cid) -> TrackerResult<()> {
        self.ensure_running()?;
        let op = self
            .ops
            .get(cid)
            .ok_or_else(|| TrackerError::NotFound(cid.clone()))?;
        let status = op.status();
        let lane = match status {
            TrackerStatus::PinError => &self.pin_lane,
            TrackerStatus::UnpinError => &self.unpin_lane,
            _ => {
                return Err(TrackerError::NotInErrorState {
                    cid: cid.clone(),
                    status,
                });
            }
        };

        info!(%cid, %status, previous_error = ?op.error, "recovering");
        let failed_generation = op.generation;
        // Only re-issue if nobody replaced the failed operation meanwhile.
        let ticket = self
            .ops
            .begin(op.pin, op.op_type, Phase::Queued, |current| {
                current.generation != failed_generation
            });
        match ticket {
            Some(ticket) => self.submit(lane, ticket, CancellationToken::new()),
            None => Ok(()),
        }
    }

    /// Calls `recover` for every CID in an error state.
    pub fn recover_all(&self) -> BTreeMap<Cid, TrackerResult<()>> {
        self.ops
            .get_all()
            .into_iter()
            .filter(|op| op.status().is_error())
            .map(|op| {
                let result = self.recover(&op.cid);
                (op.cid, result)
            })
            .collect()
    }

    /// Returns what the tracker currently knows about `cid`.
    pub fn status(&self, cid: &Cid) -> TrackerResult<PinInfo> {
        self.ops
            .get(cid)
            .map(|op| op.to_info(&self.peer))
            .ok_or_else(|| TrackerError::NotFound(cid.clone()))
    }

    pub fn status_all(&self) -> BTreeMap<Cid, PinInfo> {
        self.ops
            .get_all()
            .into_iter()
            .map(|op| (op.cid.clone(), op.to_info(&self.peer)))
            .collect()
    }

    /// Status of every tracked CID plus per-status counts.
    pub fn report(&self) -> StatusReport {
        StatusReport::new(&self.peer, self.status_all().into_values())
    }

    /// Compares the tracker's belief about `cid` with the daemon and
    /// records any drift.
    pub async fn sync(&self, cid: &Cid) -> TrackerResult<PinInfo> {
        self.sync_with_cancel(cid, CancellationToken::new()).await
    }

    pub async fn sync_with_cancel(
        &self,
        cid: &Cid,
        cancel: CancellationToken,
    ) -> TrackerResult<PinInfo> {
        self.ensure_running()?;
        let op = self
            .ops
            .get(cid)
            .ok_or_else(|| TrackerError::NotFound(cid.clone()))?;
        if !needs_daemon_check(op.op_type, op.phase) {
            return Ok(op.to_info(&self.peer));
        }

        let daemon = tokio::select! {
            result = self.connector.pin_ls_cid(cid) => {
                result.map_err(|e| TrackerError::Daemon(format!("{e:#}")))?
            }
            _ = cancel.cancelled() => return Err(TrackerError::Cancelled),
            _ = self.shutdown.cancelled() => return Err(TrackerError::Shutdown),
        };
        self.reconcile(cid, op.generation, daemon);
        self.status(cid)
    }

    /// Runs `sync` for every tracked CID against a single daemon listing.
    pub async fn sync_all(&self) -> TrackerResult<BTreeMap<Cid, PinInfo>> {
        self.ensure_running()?;
        let listing: HashMap<Cid, DaemonPinStatus> = tokio::select! {
            result = self.connector.pin_ls(PinTypeFilter::All) => {
                result.map_err(|e| TrackerError::Daemon(format!("{e:#}")))?
            }
            _ = self.shutdown.cancelled() => return Err(TrackerError::Shutdown),
        };

        let mut drifted = 0;
        for op in self.ops.get_all() {
            if !needs_daemon_check(op.op_type, op.phase) {
                continue;
            }
            let daemon = listing
                .get(&op.cid)
                .copied()
                .unwrap_or(DaemonPinStatus::Unpinned);
            if self.reconcile(&op.cid, op.generation, daemon) {
                drifted += 1;
            }
        }
        debug!(daemon_pins = listing.len(), changed = drifted, "sync_all finished");
        Ok(self.status_all())
    }

    /// Applies the daemon's view to a retired operation. Returns true if
    /// the recorded status changed.
    fn reconcile(&self, cid: &Cid, generation: u64, daemon: DaemonPinStatus) -> bool {
        let Some(op) = self.ops.get(cid).filter(|op| op.generation == generation) else {
            // Replaced while we were asking the daemon.
            return false;
        };
        let depth = op.pin.max_depth;
        let holds_pin = matches!(daemon, DaemonPinStatus::Direct | DaemonPinStatus::Recursive);

        let change = match (op.op_type, op.phase) {
            (OperationType::Pin, Phase::Done) if !daemon.is_pinned(depth) => Some((
                Phase::Error,
                Some(format!(
                    "drift: daemon reports {daemon}, expected pinned at depth {depth}"
                )),
            )),
            (OperationType::Pin, Phase::Error | Phase::Cancelled) if daemon.is_pinned(depth) => {
                Some((Phase::Done, None))
            }
            (OperationType::Unpin, Phase::Done) if holds_pin => Some((
                Phase::Error,
                Some(format!("drift: daemon reports {daemon}, expected unpinned")),
            )),
            (OperationType::Unpin, Phase::Error | Phase::Cancelled) if !holds_pin => {
                Some((Phase::Done, None))
            }
            _ => None,
        };

        let Some((phase, error)) = change else {
            return false;
        };
        let changed = self.ops.reconcile(cid, generation, phase, error.clone());
        if changed {
            match error {
                Some(error) => warn!(%cid, %error, "daemon state drifted"),
                None => info!(%cid, %daemon, "daemon agrees with intent, clearing error"),
            }
        }
        changed
    }

    /// Drops the record of a CID whose unpin finished. The record of
    /// anything else is kept.
    pub fn forget(&self, cid: &Cid) -> TrackerResult<()> {
        let op = self
            .ops
            .get(cid)
            .ok_or_else(|| TrackerError::NotFound(cid.clone()))?;
        let status = op.status();
        if status != TrackerStatus::Unpinned {
            return Err(TrackerError::StillTracked {
                cid: cid.clone(),
                status,
            });
        }
        let generation = op.generation;
        match self
            .ops
            .remove_if(cid, |current| current.generation == generation)
        {
            Some(_) => Ok(()),
            None => {
                let status = self.status(cid)?.status;
                Err(TrackerError::StillTracked {
                    cid: cid.clone(),
                    status,
                })
            }
        }
    }

    /// Operations waiting for a pin execution unit.
    pub fn queued_pins(&self) -> usize {
        self.pin_lane.queued()
    }

    /// Operations waiting for the unpin execution unit.
    pub fn queued_unpins(&self) -> usize {
        self.unpin_lane.queued()
    }

    /// Stops both lanes and cancels every live operation.
    pub async fn shutdown(&self) {
        if self.shutdown.is_cancelled() {
            return;
        }
        info!(peer = %self.peer, "stopping pin tracker");
        self.shutdown.cancel();
        let tasks: Vec<_> = self
            .tasks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .drain(..)
            .collect();
        for task in tasks {
            if let Err(e) = task.await {
                warn!("dispatch loop ended abnormally: {e}");
            }
        }
        let cancelled = self.ops.cancel_live();
        debug!(cancelled, "pin tracker stopped");
    }

    fn ensure_running(&self) -> TrackerResult<()> {
        if self.shutdown.is_cancelled() {
            return Err(TrackerError::Shutdown);
        }
        Ok(())
    }

    /// Claims a lane position for a new operation. An operation whose
    /// predecessor is still at the daemon waits in its own task, so it
    /// never occupies an execution unit while blocked.
    fn submit(&self, lane: &Lane<Job>, ticket: Ticket, cancel: CancellationToken) -> TrackerResult<()> {
        let Ticket {
            operation,
            finished,
            predecessor,
        } = ticket;
        let cid = operation.cid.clone();
        let generation = operation.generation;
        let status = operation.status();

        let slot = match lane.reserve() {
            Ok(slot) => slot,
            Err(err) => {
                warn!(%cid, lane = lane.name(), error = %err, "operation rejected");
                self.ops
                    .complete(&cid, generation, Outcome::Failed(err.to_string()));
                return Err(err);
            }
        };

        let job = Job::new(operation, finished, cancel);
        match predecessor.filter(|rx| !*rx.borrow()) {
            None => slot.send(job),
            Some(predecessor) => {
                debug!(%cid, generation, "waiting for previous operation to leave the daemon");
                tokio::spawn(self.worker.clone().park(job, predecessor, slot));
            }
        }
        debug!(%cid, generation, %status, "operation queued");
        Ok(())
    }
}

impl Drop for PinTracker {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Live operations and bookkeeping records are reported as they are.
fn needs_daemon_check(op_type: OperationType, phase: Phase) -> bool {
    matches!(op_type, OperationType::Pin | OperationType::Unpin)
        && !matches!(phase, Phase::Queued | Phase::InProgress)
}
