use pinset_core::{Cid, TrackerStatus};

pub type TrackerResult<T> = Result<T, TrackerError>;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TrackerError {
    /// Admission rejected; the caller should try again later.
    #[error("{lane} queue is full: {capacity} operations already waiting")]
    QueueFull { lane: &'static str, capacity: usize },
    /// Whatever the daemon connector returned, rendered verbatim.
    #[error("daemon error: {0}")]
    Daemon(String),
    #[error("{0} is not tracked")]
    NotFound(Cid),
    /// Attached to the late result of an operation that a newer one
    /// replaced. Never returned to callers.
    #[error("operation on {0} was superseded by a newer one")]
    Superseded(Cid),
    #[error("{cid} is {status}, not in an error state")]
    NotInErrorState { cid: Cid, status: TrackerStatus },
    #[error("{cid} is {status}; only unpinned cids can be forgotten")]
    StillTracked { cid: Cid, status: TrackerStatus },
    #[error("operation cancelled")]
    Cancelled,
    #[error("pin tracker is shut down")]
    Shutdown,
}
