use std::time::Duration;

use anyhow::{Context, Result, bail};
use pinset_core::{Cid, Pin, PinDepth, PinInfo};
use pinset_tracker::PinTracker;

const POLL_INTERVAL: Duration = Duration::from_millis(100);

pub async fn run_pin(tracker: &PinTracker, cid: &str, depth: i32, name: String) -> Result<()> {
    let cid = parse_cid(cid)?;
    let pin = Pin::new(cid.clone())
        .with_depth(PinDepth::from(depth))
        .with_name(name);
    tracker.track(pin)?;
    report(wait_settled(tracker, &cid).await?)
}

pub async fn run_unpin(tracker: &PinTracker, cid: &str) -> Result<()> {
    let cid = parse_cid(cid)?;
    tracker.untrack(&cid)?;
    report(wait_settled(tracker, &cid).await?)
}

fn parse_cid(s: &str) -> Result<Cid> {
    s.trim()
        .parse()
        .with_context(|| format!("invalid cid '{s}'"))
}

/// Polls until no daemon call is outstanding for `cid`.
pub(crate) async fn wait_settled(tracker: &PinTracker, cid: &Cid) -> Result<PinInfo> {
    loop {
        let info = tracker.status(cid)?;
        if !info.status.is_busy() {
            return Ok(info);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

fn report(info: PinInfo) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(&info)?);
    if let Some(err) = info.error.filter(|_| info.status.is_error()) {
        bail!("{} is {}: {err}", info.cid, info.status);
    }
    Ok(())
}
