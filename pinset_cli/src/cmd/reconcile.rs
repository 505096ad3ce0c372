use std::time::Duration;

use anyhow::Result;
use pinset_core::Pin;
use pinset_tracker::{PinTracker, StatusReport, TrackerError};
use tracing::{info, warn};

const SETTLE_POLL: Duration = Duration::from_millis(200);

/// Tracks the desired pin set, then checks every record against the
/// daemon and retries whatever failed. With an interval the check and
/// retry repeat until interrupted.
pub async fn run_reconcile(tracker: &PinTracker, pins: &[Pin], interval: Option<u64>) -> Result<()> {
    let mut rejected = 0;
    for pin in pins {
        match tracker.track(pin.clone()) {
            Ok(()) => {}
            Err(e @ TrackerError::QueueFull { .. }) => {
                // Left in PinError; the recover pass below retries it.
                warn!(cid = %pin.cid, "{e}");
                rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
    }
    info!(pins = pins.len(), rejected, "desired pin set submitted");

    let Some(secs) = interval else {
        let report = sweep(tracker).await?;
        println!("{}", report.to_json_pretty()?);
        return Ok(());
    };

    let mut ticker = tokio::time::interval(Duration::from_secs(secs.max(1)));
    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("interrupted, stopping");
                return Ok(());
            }
        }
        match sweep(tracker).await {
            Ok(report) => println!("{}", report.to_json_pretty()?),
            // A daemon outage is not fatal; try again next round.
            Err(e) => warn!("sweep failed: {e:#}"),
        }
    }
}

async fn sweep(tracker: &PinTracker) -> Result<StatusReport> {
    settle(tracker).await;
    let synced = tracker.sync_all().await?;
    let recovering = tracker
        .recover_all()
        .into_iter()
        .filter(|(cid, result)| match result {
            Ok(()) => true,
            Err(e) => {
                warn!(%cid, "recover failed: {e}");
                false
            }
        })
        .count();
    info!(tracked = synced.len(), recovering, "sweep finished");
    if recovering > 0 {
        settle(tracker).await;
    }
    Ok(tracker.report())
}

/// Waits until no operation is queued or running.
async fn settle(tracker: &PinTracker) {
    while tracker
        .status_all()
        .values()
        .any(|info| info.status.is_busy())
    {
        tokio::time::sleep(SETTLE_POLL).await;
    }
}
