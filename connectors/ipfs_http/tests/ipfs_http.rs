//! Runs the connector against an in-process mock of the daemon's HTTP API.

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use pinset_connector_ipfs::{IpfsHttpConfig, IpfsHttpConnector};
use pinset_core::testutil::{ConnectorTests, random_cid};
use pinset_core::{Cid, DaemonPinStatus, PinConnector, PinDepth, PinTypeFilter};
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

type Params = Query<HashMap<String, String>>;

#[derive(Debug, Default)]
struct MockDaemon {
    pins: Mutex<HashMap<String, &'static str>>,
    pin_adds: Mutex<Vec<String>>,
    error_cid: String,
}

fn daemon_error(message: impl Into<String>) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(json!({ "Message": message.into(), "Code": 0, "Type": "error" })),
    )
        .into_response()
}

async fn pin_add(State(mock): State<Arc<MockDaemon>>, Query(q): Params) -> Response {
    let Some(arg) = q.get("arg").cloned() else {
        return daemon_error("argument \"ipfs-path\" is required");
    };
    if arg == mock.error_cid {
        return daemon_error("expected error");
    }
    let kind = match q.get("recursive").map(String::as_str) {
        Some("false") => "direct",
        _ => "recursive",
    };
    mock.pin_adds.lock().unwrap().push(arg.clone());
    mock.pins
        .lock()
        .unwrap()
        .entry(arg.clone())
        .and_modify(|k| {
            if *k != "recursive" {
                *k = kind;
            }
        })
        .or_insert(kind);
    Json(json!({ "Pins": [arg] })).into_response()
}

async fn pin_rm(State(mock): State<Arc<MockDaemon>>, Query(q): Params) -> Response {
    let arg = q.get("arg").cloned().unwrap_or_default();
    if mock.pins.lock().unwrap().remove(&arg).is_none() {
        return daemon_error("not pinned or pinned indirectly");
    }
    Json(json!({ "Pins": [arg] })).into_response()
}

async fn pin_ls(State(mock): State<Arc<MockDaemon>>, Query(q): Params) -> Response {
    let pins = mock.pins.lock().unwrap();
    if let Some(arg) = q.get("arg") {
        let Some(kind) = pins.get(arg) else {
            return daemon_error(format!("path '{arg}' is not pinned"));
        };
        let mut keys = serde_json::Map::new();
        keys.insert(arg.clone(), json!({ "Type": kind }));
        return Json(json!({ "Keys": keys })).into_response();
    }
    let filter = q.get("type").map(String::as_str).unwrap_or("all");
    let keys: serde_json::Map<String, serde_json::Value> = pins
        .iter()
        .filter(|(_, kind)| filter == "all" || filter == **kind)
        .map(|(cid, kind)| (cid.clone(), json!({ "Type": kind })))
        .collect();
    Json(json!({ "Keys": keys })).into_response()
}

async fn repo_stat(State(mock): State<Arc<MockDaemon>>) -> Response {
    let objects = mock.pins.lock().unwrap().len() as u64;
    Json(json!({
        "RepoSize": objects * 1000,
        "StorageMax": 10_000_000_000u64,
        "NumObjects": objects,
    }))
    .into_response()
}

async fn config_show() -> Response {
    Json(json!({
        "Datastore": { "StorageMax": "10G", "GCPeriod": "1h" },
        "Addresses": { "API": "/ip4/127.0.0.1/tcp/5001" },
    }))
    .into_response()
}

async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

async fn setup() -> (IpfsHttpConnector, Arc<MockDaemon>) {
    let mock = Arc::new(MockDaemon {
        error_cid: error_cid().to_string(),
        ..Default::default()
    });
    let router = Router::new()
        .route("/api/v0/pin/add", post(pin_add))
        .route("/api/v0/pin/rm", post(pin_rm))
        .route("/api/v0/pin/ls", post(pin_ls))
        .route("/api/v0/repo/stat", post(repo_stat))
        .route("/api/v0/config/show", post(config_show))
        .with_state(mock.clone());
    let addr = serve(router).await;
    let connector = IpfsHttpConnector::new(IpfsHttpConfig::new(addr)).unwrap();
    (connector, mock)
}

fn error_cid() -> Cid {
    Cid::new_raw(b"the daemon refuses this one")
}

#[tokio::test]
async fn test_conformance() {
    let (connector, _mock) = setup().await;
    ConnectorTests::new(&connector).run_all().await.unwrap();
}

#[tokio::test]
async fn test_pin_error_carries_daemon_message() {
    let (connector, _mock) = setup().await;
    let err = connector
        .pin(&error_cid(), PinDepth::Unbounded)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "expected error");
}

#[tokio::test]
async fn test_pin_skips_already_pinned() {
    let (connector, mock) = setup().await;
    let cid = random_cid();
    connector.pin(&cid, PinDepth::Unbounded).await.unwrap();
    connector.pin(&cid, PinDepth::Unbounded).await.unwrap();
    assert_eq!(mock.pin_adds.lock().unwrap().len(), 1);

    // A direct pin is a different request.
    let direct = random_cid();
    connector.pin(&direct, PinDepth::DIRECT).await.unwrap();
    assert_eq!(mock.pins.lock().unwrap()[&direct.to_string()], "direct");
}

#[tokio::test]
async fn test_pin_ls_cid() {
    let (connector, _mock) = setup().await;
    let [pinned, other] = [random_cid(), random_cid()];
    connector.pin(&pinned, PinDepth::Unbounded).await.unwrap();

    let status = connector.pin_ls_cid(&pinned).await.unwrap();
    assert!(status.is_pinned(PinDepth::Unbounded));
    assert_eq!(
        connector.pin_ls_cid(&other).await.unwrap(),
        DaemonPinStatus::Unpinned
    );
}

#[tokio::test]
async fn test_pin_ls() {
    let (connector, _mock) = setup().await;
    let [a, b] = [random_cid(), random_cid()];
    connector.pin(&a, PinDepth::Unbounded).await.unwrap();
    connector.pin(&b, PinDepth::Unbounded).await.unwrap();

    let all = connector.pin_ls(PinTypeFilter::All).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all[&a].is_pinned(PinDepth::Unbounded));
    assert!(all[&b].is_pinned(PinDepth::Unbounded));
    assert!(connector.pin_ls(PinTypeFilter::Direct).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_unpin_not_pinned_is_success() {
    let (connector, _mock) = setup().await;
    let cid = random_cid();
    connector.unpin(&cid).await.unwrap();
    connector.pin(&cid, PinDepth::Unbounded).await.unwrap();
    connector.unpin(&cid).await.unwrap();
}

#[tokio::test]
async fn test_repo_stat() {
    let (connector, _mock) = setup().await;
    let stat = connector.repo_stat().await.unwrap();
    assert_eq!(stat.repo_size, 0);

    connector
        .pin(&random_cid(), PinDepth::Unbounded)
        .await
        .unwrap();
    let stat = connector.repo_stat().await.unwrap();
    assert_eq!(stat.repo_size, 1000);
    assert_eq!(stat.num_objects, 1);
    assert_eq!(stat.storage_max, 10_000_000_000);
}

#[tokio::test]
async fn test_config_key() {
    let (connector, _mock) = setup().await;
    let value = connector.config_key("Datastore/StorageMax").await.unwrap();
    assert_eq!(value, json!("10G"));
    assert!(connector.config_key("Datastore").await.unwrap().is_object());
    assert!(connector.config_key("").await.is_err());
    assert!(connector.config_key("Datastore/abc").await.is_err());
}

#[tokio::test]
async fn test_non_json_error_body() {
    let router = Router::new().fallback(|| async { (StatusCode::BAD_GATEWAY, "upstream down") });
    let addr = serve(router).await;
    let connector = IpfsHttpConnector::new(IpfsHttpConfig::new(format!("{addr}/"))).unwrap();

    let err = connector.repo_stat().await.unwrap_err();
    assert_eq!(err.to_string(), "Got HTTP 502 with content 'upstream down'");
}

#[tokio::test]
async fn test_unreachable_daemon() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let connector = IpfsHttpConnector::new(IpfsHttpConfig::new(format!("http://{addr}"))).unwrap();
    assert!(connector.pin_ls_cid(&random_cid()).await.is_err());
    assert!(connector.unpin(&random_cid()).await.is_err());
}
