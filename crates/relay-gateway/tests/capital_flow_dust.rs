//! Post-sell capital-flow classification driven through the real `/worker/:worker/sell`
//! endpoint, with the apex status/transfer calls doubled so the detached background task's
//! effects can be polled for and asserted on.

use relay_core::apex::{TokenHolding, WorkerHoldings};
use relay_gateway::testkit::{Harness, HarnessConfig, RunningServer};
use serde_json::json;
use std::time::Duration;

fn client() -> reqwest::Client {
    reqwest::Client::new()
}

async fn poll_until<F: Fn() -> bool>(pred: F, attempts: u32) -> bool {
    for _ in 0..attempts {
        if pred() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn dust_position_is_written_off_without_a_transfer() {
    let harness = Harness::build(HarnessConfig::default()).await;
    harness.issue_gate("Atlas");
    harness
        .apex
        .set_holdings(
            "Atlas",
            WorkerHoldings {
                sol_balance: 0.001,
                tokens: vec![TokenHolding { mint: "mint1".to_string(), ui_amount: 1.0, usd_value: Some(0.10) }],
            },
        )
        .await;
    harness.relay.availability.mark_busy("Atlas", relay_core::worker::Role::Trader, "session-1");

    let server = RunningServer::start(harness.relay.clone()).await;
    let http = client();

    let resp = http
        .post(format!("{}/worker/Atlas/sell", server.base_url))
        .header("Authorization", format!("Bearer {}", harness.token))
        .header("x-requester", "Atlas")
        .json(&json!({"mint": "1".repeat(32), "percent": 50.0, "slippage_bps": 50}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let released = poll_until(|| !harness.relay.availability.is_busy("Atlas"), 40).await;
    assert!(released, "worker was never released after dust classification");

    assert!(harness.apex.transfer_sol_calls().await.is_empty());
    let actions = harness.audit_actions().await;
    assert!(actions.contains(&"CAPITAL_RELEASED".to_string()));
    assert!(!actions.contains(&"CAPITAL_FINAL_RETURN".to_string()));

    server.shutdown().await;
}

#[tokio::test]
async fn residual_position_above_gas_threshold_keeps_worker_busy_and_returns_partial_sol() {
    let harness = Harness::build(HarnessConfig::default()).await;
    harness.issue_gate("Bishop");
    harness
        .apex
        .set_holdings(
            "Bishop",
            WorkerHoldings {
                sol_balance: 0.5,
                tokens: vec![TokenHolding { mint: "mint1".to_string(), ui_amount: 100.0, usd_value: Some(5.0) }],
            },
        )
        .await;
    harness.relay.availability.mark_busy("Bishop", relay_core::worker::Role::Trader, "session-1");

    let server = RunningServer::start(harness.relay.clone()).await;
    let http = client();

    let resp = http
        .post(format!("{}/worker/Bishop/sell", server.base_url))
        .header("Authorization", format!("Bearer {}", harness.token))
        .header("x-requester", "Bishop")
        .json(&json!({"mint": "1".repeat(32), "percent": 50.0, "slippage_bps": 50}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);

    let transfers = poll_until_nonempty(&harness).await;
    assert_eq!(transfers.len(), 1);
    assert!((transfers[0].amount_sol - 0.485).abs() < 1e-9);
    assert!(harness.relay.availability.is_busy("Bishop"));

    let actions = harness.audit_actions().await;
    assert!(actions.contains(&"CAPITAL_PARTIAL_RETURN".to_string()));
    assert!(!actions.contains(&"CAPITAL_RELEASED".to_string()));

    server.shutdown().await;
}

async fn poll_until_nonempty(harness: &Harness) -> Vec<relay_core::apex::TransferSolRequest> {
    for _ in 0..40 {
        let transfers = harness.apex.transfer_sol_calls().await;
        if !transfers.is_empty() {
            return transfers;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    Vec::new()
}
