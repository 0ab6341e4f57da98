//! Exercises the broker over real HTTP, pinning the exact wire contract
//! (status codes, JSON body shapes) documented for each endpoint.

use std::sync::Arc;

use gate_core::{GateConfig, LockStore};
use serde_json::{json, Value};

async fn spawn_broker() -> String {
    let store = Arc::new(LockStore::open_in_memory().unwrap());
    let mut config = GateConfig::default();
    config.host = "127.0.0.1".into();
    config.port = 0;

    let state = gate_broker::AppState::new(store, config);
    let app = gate_broker::build_router(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn acquire_release_round_trip() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a/b.txt", "mode": "write", "owner": "agent-1", "lease_ms": 60000}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "granted");
    let lock_id = body["lock"]["lock_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/v1/locks/release"))
        .json(&json!({"lock_id": lock_id, "owner": "agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "released");
}

#[tokio::test]
async fn acquire_rejects_invalid_mode() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a", "mode": "bogus", "owner": "agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 400);
}

#[tokio::test]
async fn release_by_wrong_owner_is_forbidden() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a", "mode": "write", "owner": "agent-1", "lease_ms": 60000}))
        .send()
        .await
        .unwrap();
    let body: Value = resp.json().await.unwrap();
    let lock_id = body["lock"]["lock_id"].as_str().unwrap().to_string();

    let resp = client
        .post(format!("{base}/v1/locks/release"))
        .json(&json!({"lock_id": lock_id, "owner": "agent-2"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn release_of_unknown_lock_is_not_found() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    let resp = client
        .post(format!("{base}/v1/locks/release"))
        .json(&json!({"lock_id": "does-not-exist", "owner": "agent-1"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn acquire_times_out_when_path_is_held() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a", "mode": "write", "owner": "agent-1", "lease_ms": 60000}))
        .send()
        .await
        .unwrap();

    let resp = client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a", "mode": "write", "owner": "agent-2", "timeout_ms": 50, "lease_ms": 60000}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 408);
}

#[tokio::test]
async fn status_reports_held_lock() {
    let base = spawn_broker().await;
    let client = reqwest::Client::new();

    client
        .post(format!("{base}/v1/locks/acquire"))
        .json(&json!({"path": "a/b.txt", "mode": "read", "owner": "agent-1", "lease_ms": 60000}))
        .send()
        .await
        .unwrap();

    let resp = client
        .get(format!("{base}/v1/locks/status?path=a/b.txt"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["locks"].as_array().unwrap().len(), 1);
}
