//! Pin tracking for a single cluster peer.
//!
//! A [`PinTracker`] owns the peer's view of which CIDs should be pinned
//! and drives a [`PinConnector`](pinset_core::PinConnector) until the
//! storage daemon agrees. Callers register intent with
//! [`PinTracker::track`] and [`PinTracker::untrack`], which return as soon
//! as the operation is admitted. The latest intent for a CID always wins;
//! results of operations it replaced are discarded.
//!
//! ```no_run
//! # async fn demo(connector: std::sync::Arc<dyn pinset_core::PinConnector>) -> anyhow::Result<()> {
//! use pinset_core::{Cid, Pin};
//! use pinset_tracker::{PinTracker, TrackerConfig};
//!
//! let tracker = PinTracker::new(TrackerConfig::default(), connector, "peer-a")?;
//! let cid: Cid = "QmXoypizjW3WknFiJnKLwHCnL72vedxjQkDDP1mXWo6uco".parse()?;
//! tracker.track(Pin::new(cid.clone()))?;
//! println!("{}", tracker.status(&cid)?.status);
//! # Ok(())
//! # }
//! ```

mod config;
mod error;
mod operation;
mod queue;
mod report;
mod tracker;

pub use config::{
    ConfigError, DEFAULT_CONCURRENT_PINS, DEFAULT_MAX_PIN_QUEUE_SIZE, TrackerConfig,
    UNPIN_CONCURRENCY,
};
pub use error::{TrackerError, TrackerResult};
pub use operation::CANCELLED_ERROR;
pub use report::StatusReport;
pub use tracker::PinTracker;
