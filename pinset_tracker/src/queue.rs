//! Admission control and dispatch.
//!
//! A `Lane` is a bounded FIFO feeding a fixed-size pool of execution
//! units. Admission is a hard boundary: `enqueue` never waits, it rejects
//! with `TrackerError::QueueFull` once `capacity` items are waiting.
//!
//! The dispatch loop takes a concurrency permit *before* pulling the next
//! item, so an item leaves the queue only when it can start right away
//! and the queue length always equals the number of waiting items.

use crate::error::TrackerError;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug)]
pub struct Lane<T> {
    name: &'static str,
    tx: mpsc::Sender<T>,
}

impl<T: Send + 'static> Lane<T> {
    /// Spawns the dispatch loop of a new lane on the current runtime.
    ///
    /// `capacity` and `concurrency` must both be non-zero.
    pub fn spawn<H, Fut>(
        name: &'static str,
        capacity: usize,
        concurrency: usize,
        handler: H,
        shutdown: CancellationToken,
    ) -> (Self, JoinHandle<()>)
    where
        H: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity);
        let handle = tokio::spawn(dispatch(name, rx, concurrency, handler, shutdown));
        (Self { name, tx }, handle)
    }

    pub fn enqueue(&self, item: T) -> Result<(), TrackerError> {
        self.reserve()?.send(item);
        Ok(())
    }

    /// Claims a queue position now for an item that is sent later. The
    /// slot counts as queued until it is used or dropped.
    pub fn reserve(&self) -> Result<Slot<T>, TrackerError> {
        self.tx
            .clone()
            .try_reserve_owned()
            .map(Slot)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TrackerError::QueueFull {
                    lane: self.name,
                    capacity: self.tx.max_capacity(),
                },
                mpsc::error::TrySendError::Closed(_) => TrackerError::Shutdown,
            })
    }

    /// Number of items waiting for an execution unit.
    pub fn queued(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// A reserved position in a lane.
#[derive(Debug)]
pub struct Slot<T>(mpsc::OwnedPermit<T>);

impl<T> Slot<T> {
    /// Items enter the lane in the order they are sent, not reserved.
    pub fn send(self, item: T) {
        self.0.send(item);
    }
}

async fn dispatch<T, H, Fut>(
    name: &'static str,
    mut rx: mpsc::Receiver<T>,
    concurrency: usize,
    handler: H,
    shutdown: CancellationToken,
) where
    T: Send + 'static,
    H: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(concurrency));
    tracing::debug!(lane = name, concurrency, "dispatch loop started");

    loop {
        let permit = tokio::select! {
            _ = shutdown.cancelled() => break,
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };
        let item = tokio::select! {
            _ = shutdown.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let work = handler(item);
        tokio::spawn(async move {
            let _permit = permit;
            work.await;
        });
    }

    // Refuse further admissions; anything still queued is dropped here.
    rx.close();
    tracing::debug!(lane = name, "dispatch loop stopped");
}
