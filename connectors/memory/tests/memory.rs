use pinset_connector_memory::{CallKind, MemoryConnector};
use pinset_core::testutil::{ConnectorTests, random_cid};
use pinset_core::{DaemonPinStatus, PinConnector, PinDepth};
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn conformance() {
    let daemon = MemoryConnector::new();
    ConnectorTests::new(&daemon).run_all().await.unwrap();
}

#[tokio::test]
async fn injected_failure_leaves_pin_set_untouched() {
    let daemon = MemoryConnector::new();
    let cid = random_cid();
    daemon.fail_on(&cid);

    let err = daemon.pin(&cid, PinDepth::Unbounded).await.unwrap_err();
    assert!(err.to_string().contains("injected failure"));
    assert_eq!(daemon.status_of(&cid), DaemonPinStatus::Unpinned);

    daemon.clear_failures();
    daemon.pin(&cid, PinDepth::Unbounded).await.unwrap();
    assert_eq!(daemon.status_of(&cid), DaemonPinStatus::Recursive);
    assert_eq!(daemon.calls(CallKind::Pin), 2);
}

#[tokio::test]
async fn offline_daemon_fails_every_call() {
    let daemon = MemoryConnector::new();
    daemon.set_offline(true);
    let cid = random_cid();
    assert!(daemon.pin(&cid, PinDepth::Unbounded).await.is_err());
    assert!(daemon.pin_ls_cid(&cid).await.is_err());
    assert!(daemon.repo_stat().await.is_err());

    daemon.set_offline(false);
    assert_eq!(daemon.pin_ls_cid(&cid).await.unwrap(), DaemonPinStatus::Unpinned);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stalled_calls_resume_on_release() {
    let daemon = Arc::new(MemoryConnector::new());
    daemon.stall();

    let cid = random_cid();
    let call = {
        let daemon = daemon.clone();
        let cid = cid.clone();
        tokio::spawn(async move { daemon.pin(&cid, PinDepth::Unbounded).await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(daemon.active(CallKind::Pin), 1);
    assert_eq!(daemon.status_of(&cid), DaemonPinStatus::Unpinned);

    daemon.release();
    call.await.unwrap().unwrap();
    assert_eq!(daemon.active(CallKind::Pin), 0);
    assert_eq!(daemon.peak(CallKind::Pin), 1);
    assert_eq!(daemon.status_of(&cid), DaemonPinStatus::Recursive);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stall_also_holds_listings() {
    let daemon = Arc::new(MemoryConnector::new());
    let cid = random_cid();
    daemon.pin(&cid, PinDepth::Unbounded).await.unwrap();
    daemon.stall();

    let listing = {
        let daemon = daemon.clone();
        let cid = cid.clone();
        tokio::spawn(async move { daemon.pin_ls_cid(&cid).await })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!listing.is_finished());

    daemon.release();
    assert_eq!(listing.await.unwrap().unwrap(), DaemonPinStatus::Recursive);
}

#[tokio::test]
async fn delay_applies_to_one_cid() {
    let daemon = MemoryConnector::new();
    let slow = random_cid();
    let fast = random_cid();
    daemon.delay_on(&slow, Duration::from_millis(200));

    let start = std::time::Instant::now();
    daemon.pin(&fast, PinDepth::Unbounded).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(200));

    let start = std::time::Instant::now();
    daemon.pin(&slow, PinDepth::Unbounded).await.unwrap();
    assert!(start.elapsed() >= Duration::from_millis(200));
}

#[tokio::test]
async fn repo_stat_counts_pins() {
    let daemon = MemoryConnector::new();
    assert_eq!(daemon.repo_stat().await.unwrap().repo_size, 0);
    daemon.pin(&random_cid(), PinDepth::Unbounded).await.unwrap();
    let stat = daemon.repo_stat().await.unwrap();
    assert_eq!(stat.repo_size, 1000);
    assert_eq!(stat.num_objects, 1);
}

#[tokio::test]
async fn config_key_lookup() {
    let daemon = MemoryConnector::new();
    let value = daemon.config_key("Datastore/StorageMax").await.unwrap();
    assert_eq!(value.as_str(), Some("10G"));
    assert!(daemon.config_key("Datastore").await.unwrap().is_object());
    assert!(daemon.config_key("").await.is_err());
    assert!(daemon.config_key("Datastore/abc").await.is_err());
}
