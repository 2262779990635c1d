//! The two sweeps that release a worker without an explicit kill: a manager that never
//! heartbeats, and a remote session whose vessel disconnects out from under it.

use futures_util::{SinkExt, StreamExt};
use relay_gateway::testkit::{Harness, HarnessConfig, RunningServer};
use relay_gateway::watchdog::Watchdogs;
use serde_json::{json, Value};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn poll_until<F: Fn() -> bool>(pred: F, attempts: u32, step_ms: u64) -> bool {
    for _ in 0..attempts {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(step_ms)).await;
    }
    false
}

#[tokio::test]
async fn manager_that_never_heartbeats_is_swept_to_idle() {
    let harness = Harness::build(HarnessConfig { manager_timeout_hours: 0, watchdog_interval_secs: 1, ..HarnessConfig::default() }).await;
    harness.relay.availability.mark_busy("Delta", relay_core::worker::Role::Manager, "session-mgr");
    assert!(harness.relay.availability.is_busy("Delta"));

    let watchdogs = Watchdogs::start(harness.relay.clone());

    let released = poll_until(|| !harness.relay.availability.is_busy("Delta"), 40, 50).await;
    assert!(released, "manager was never released by the timeout sweep");

    let actions = harness.audit_actions().await;
    assert!(actions.contains(&"MANAGER_TIMEOUT".to_string()));

    watchdogs.shutdown().await;
}

#[tokio::test]
async fn manager_that_keeps_heartbeating_is_left_busy() {
    let harness = Harness::build(HarnessConfig { manager_timeout_hours: 5, watchdog_interval_secs: 1, ..HarnessConfig::default() }).await;
    harness.relay.availability.mark_busy("Echo", relay_core::worker::Role::Manager, "session-mgr");

    let watchdogs = Watchdogs::start(harness.relay.clone());
    tokio::time::sleep(Duration::from_millis(300)).await;
    harness.relay.availability.heartbeat("Echo");
    tokio::time::sleep(Duration::from_millis(300)).await;

    assert!(harness.relay.availability.is_busy("Echo"));
    watchdogs.shutdown().await;
}

#[tokio::test]
async fn a_disconnecting_vessel_orphans_its_running_session_immediately() {
    let harness = Harness::build(HarnessConfig::default()).await;
    harness.issue_gate("Atlas");
    let server = RunningServer::start(harness.relay.clone()).await;
    let ws_base = server.base_url.replacen("http://", "ws://", 1);
    let http = client();

    let (mut vessel, _resp) = tokio_tungstenite::connect_async(format!("{ws_base}/ws/Atlas"))
        .await
        .expect("connect vessel websocket");
    vessel
        .send(Message::Text(json!({"token": harness.token}).to_string()))
        .await
        .expect("send handshake");
    let ack = vessel.next().await.expect("ack frame").expect("frame ok");
    let ack: Value = serde_json::from_str(ack.to_text().unwrap()).unwrap();
    assert_eq!(ack["status"], "connected");

    let spawn_body: Value = http
        .post(format!("{}/spawn", server.base_url))
        .header("Authorization", format!("Bearer {}", harness.token))
        .header("x-requester", "Apex")
        .json(&json!({"worker": "Atlas", "job_type": "trade", "prompt": "scan the book", "mode": "remote"}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let session_id = spawn_body["session_id"].as_str().unwrap().to_string();
    assert!(harness.relay.availability.is_busy("Atlas"));

    // The vessel drops without ever sending a result frame -- the inline orphan sweep on
    // disconnect (not the periodic watchdog) must release the worker.
    vessel.send(Message::Close(None)).await.expect("send close frame");
    drop(vessel);

    let released = poll_until(|| !harness.relay.availability.is_busy("Atlas"), 40, 50).await;
    assert!(released, "worker was never released after its vessel disconnected");

    let get_resp = http
        .get(format!("{}/session/{session_id}", server.base_url))
        .header("Authorization", format!("Bearer {}", harness.token))
        .header("x-requester", "Apex")
        .send()
        .await
        .unwrap();
    let session_body: Value = get_resp.json().await.unwrap();
    assert_eq!(session_body["status"], "orphaned");

    let actions = harness.audit_actions().await;
    assert!(actions.contains(&"SESSION_ORPHANED".to_string()));
    assert!(actions.contains(&"VESSEL_DISCONNECTED".to_string()));

    server.shutdown().await;
}
