//! Post-sell capital-flow state machine: probe holdings, classify dust, conditionally return
//! residual SOL, release the worker, notify the operator.

use relay_core::apex::TransferSolRequest;
use relay_core::audit;
use relay_core::notify::Notification;
use relay_core::worker::is_apex;
use serde_json::json;
use std::sync::Arc;

use crate::state::Relay;

/// Gas reserve kept with the worker on a partial return.
const GAS_RESERVE_PARTIAL: f64 = 0.01;
/// Reserve kept on a final return (covers the worker's own future tx fees).
const SELF_RESERVE_FINAL: f64 = 0.01;
const TX_FEE_BUFFER: f64 = 0.005;
const MIN_RETURNABLE: f64 = 0.002;
const DUST_USD_THRESHOLD: f64 = 0.50;
const GAS_SELL_THRESHOLD: f64 = 0.003;

/// Invoked asynchronously after a successful sell-proxy call.
pub async fn run(relay: Arc<Relay>, worker: String, percent_sold: f64) {
    if is_apex(&worker) {
        return;
    }

    let holdings = match relay.apex.status(&worker).await {
        Ok(h) => h,
        Err(err) => {
            relay
                .audit
                .record(audit::REJECTED, json!({"step": "capital_flow.status", "worker": worker, "error": err.to_string()}))
                .await;
            return;
        }
    };

    let has_tokens_raw = holdings.has_tokens_raw();
    let has_tokens = classify_dust(&relay, &worker, &holdings, has_tokens_raw, percent_sold).await;

    if has_tokens {
        partial_return(&relay, &worker, holdings.sol_balance).await;
    } else {
        final_return_and_release(&relay, &worker, holdings.sol_balance).await;
    }
}

/// Returns `true` if the worker should still be considered holding tokens after the sell (i.e.
/// the position is not dust and not fully liquidated).
async fn classify_dust(
    relay: &Relay,
    worker: &str,
    holdings: &relay_core::apex::WorkerHoldings,
    has_tokens_raw: bool,
    percent_sold: f64,
) -> bool {
    if !has_tokens_raw {
        return false;
    }
    if percent_sold >= 100.0 {
        // Rounding artifacts after a 100% sell.
        return false;
    }
    if holdings.sol_balance >= GAS_SELL_THRESHOLD {
        // Agent isn't stranded; keep managing the residual position.
        return true;
    }

    // Agent is stranded -- can it afford to sell at all?
    match holdings.total_usd_value() {
        None => {
            notify(relay, worker, "pricing failed while classifying stranded holdings; leaving as-is").await;
            true
        }
        Some(total_usd) if total_usd < DUST_USD_THRESHOLD => false, // dust, write off
        Some(_) => {
            notify(relay, worker, "stranded with value above dust threshold; leaving as-is").await;
            true
        }
    }
}

async fn partial_return(relay: &Relay, worker: &str, sol_balance: f64) {
    let returnable = sol_balance - GAS_RESERVE_PARTIAL - TX_FEE_BUFFER;
    if returnable > MIN_RETURNABLE {
        if let Err(err) = relay
            .apex
            .transfer_sol(&TransferSolRequest {
                from_worker: worker.to_string(),
                to_worker: relay_core::worker::APEX.to_string(),
                amount_sol: returnable,
            })
            .await
        {
            relay
                .audit
                .record(audit::REJECTED, json!({"step": "capital_flow.partial_transfer", "worker": worker, "error": err.to_string()}))
                .await;
            return;
        }
        relay
            .audit
            .record(audit::CAPITAL_PARTIAL_RETURN, json!({"worker": worker, "amount_sol": returnable}))
            .await;
        notify(relay, worker, &format!("partial return of {returnable:.4} SOL")).await;
    }
}

async fn final_return_and_release(relay: &Relay, worker: &str, sol_balance: f64) {
    let returnable = sol_balance - SELF_RESERVE_FINAL;
    if returnable > MIN_RETURNABLE {
        match relay
            .apex
            .transfer_sol(&TransferSolRequest {
                from_worker: worker.to_string(),
                to_worker: relay_core::worker::APEX.to_string(),
                amount_sol: returnable,
            })
            .await
        {
            Ok(_) => {
                relay
                    .audit
                    .record(audit::CAPITAL_FINAL_RETURN, json!({"worker": worker, "amount_sol": returnable}))
                    .await;
                notify(relay, worker, &format!("final return of {returnable:.4} SOL")).await;
            }
            Err(err) => {
                // A failed return never blocks release -- an empty position must not hold the
                // worker hostage.
                relay
                    .audit
                    .record(audit::REJECTED, json!({"step": "capital_flow.final_transfer", "worker": worker, "error": err.to_string()}))
                    .await;
            }
        }
    }

    relay.availability.mark_idle(worker);
    relay
        .audit
        .record(audit::CAPITAL_RELEASED, json!({"worker": worker}))
        .await;
    notify(relay, worker, "worker released").await;
}

async fn notify(relay: &Relay, worker: &str, message: &str) {
    let outcome = relay
        .notifier
        .notify(Notification {
            worker: worker.to_string(),
            message: message.to_string(),
        })
        .await;
    if outcome.is_err() {
        relay
            .audit
            .record(audit::NOTIFY_FAILED, json!({"worker": worker, "message": message}))
            .await;
    } else {
        relay
            .audit
            .record(audit::NOTIFY_SENT, json!({"worker": worker, "message": message}))
            .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use relay_core::apex::{ApexClient, BuyRequest, SellRequest, SellResult, TokenHolding, TransferTokenRequest, WorkerHoldings};
    use relay_core::audit::AuditLog;
    use relay_core::availability::AvailabilityRegistry;
    use relay_core::gate::GateVerifier;
    use relay_core::notify::{NullNotifier, OperatorNotifier};
    use relay_core::rate_limit::RateLimiter;
    use std::collections::HashMap;

    struct FakeApex {
        holdings: WorkerHoldings,
        transfers: tokio::sync::Mutex<Vec<f64>>,
    }

    #[async_trait]
    impl ApexClient for FakeApex {
        async fn status(&self, _worker: &str) -> relay_core::Result<WorkerHoldings> {
            Ok(self.holdings.clone())
        }
        async fn buy(&self, _req: &BuyRequest) -> relay_core::Result<serde_json::Value> {
            unimplemented!()
        }
        async fn sell(&self, _req: &SellRequest) -> relay_core::Result<SellResult> {
            unimplemented!()
        }
        async fn transfer_token(&self, _req: &TransferTokenRequest) -> relay_core::Result<serde_json::Value> {
            unimplemented!()
        }
        async fn transfer_sol(&self, req: &relay_core::apex::TransferSolRequest) -> relay_core::Result<serde_json::Value> {
            self.transfers.lock().await.push(req.amount_sol);
            Ok(json!({"ok": true}))
        }
        async fn read_proxy(&self, _path: &str) -> relay_core::Result<serde_json::Value> {
            unimplemented!()
        }
    }

    impl Clone for WorkerHoldings {
        fn clone(&self) -> Self {
            WorkerHoldings {
                sol_balance: self.sol_balance,
                tokens: self.tokens.clone(),
            }
        }
    }
    impl Clone for TokenHolding {
        fn clone(&self) -> Self {
            TokenHolding {
                mint: self.mint.clone(),
                ui_amount: self.ui_amount,
                usd_value: self.usd_value,
            }
        }
    }

    async fn build_relay(holdings: WorkerHoldings) -> (Arc<Relay>, Arc<FakeApex>) {
        let apex = Arc::new(FakeApex {
            holdings,
            transfers: tokio::sync::Mutex::new(Vec::new()),
        });
        let dir = tempfile::tempdir().unwrap();
        let relay = Arc::new(Relay {
            cfg: crate::state::RelayConfig {
                relay_token: "tok".to_string(),
                local_executor_bin: "true".to_string(),
                local_config_dir: dir.path().to_path_buf(),
                session_timeout_hours: 5,
                manager_timeout_hours: 5,
                watchdog_interval_secs: 300,
                position_state_path: dir.path().join("position-state.json"),
            },
            audit: AuditLog::new(dir.path().join("audit.jsonl")),
            gate: GateVerifier::new(None, dir.path()),
            rate_limiter: RateLimiter::new(),
            availability: AvailabilityRegistry::new(dir.path().join("availability.json")),
            sessions: crate::session_registry::SessionRegistry::new(),
            tasks: crate::task_store::TaskStore::connect("sqlite::memory:")
                .await
                .unwrap(),
            vessels: crate::vessel::VesselRegistry::new(),
            apex: apex.clone(),
            notifier: Arc::new(NullNotifier),
            local_processes: tokio::sync::Mutex::new(HashMap::new()),
        });
        (relay, apex)
    }

    #[tokio::test]
    async fn full_sell_with_no_dust_returns_all_and_releases() {
        let (relay, apex) = build_relay(WorkerHoldings {
            sol_balance: 0.5,
            tokens: vec![],
        })
        .await;
        relay
            .availability
            .mark_busy("Atlas", relay_core::worker::Role::Trader, "tok");

        run(relay.clone(), "Atlas".to_string(), 100.0).await;

        assert_eq!(apex.transfers.lock().await.len(), 1);
        assert!(!relay.availability.is_busy("Atlas"));
    }

    #[tokio::test]
    async fn hundred_percent_sold_is_treated_as_dust_despite_raw_tokens() {
        let (relay, apex) = build_relay(WorkerHoldings {
            sol_balance: 0.5,
            tokens: vec![TokenHolding {
                mint: "mint1".to_string(),
                ui_amount: 0.0000001,
                usd_value: Some(0.0001),
            }],
        })
        .await;
        relay
            .availability
            .mark_busy("Atlas", relay_core::worker::Role::Trader, "tok");

        run(relay.clone(), "Atlas".to_string(), 100.0).await;

        assert_eq!(apex.transfers.lock().await.len(), 1);
        assert!(!relay.availability.is_busy("Atlas"));
    }

    #[tokio::test]
    async fn partial_sell_with_remaining_tokens_keeps_worker_busy() {
        let (relay, apex) = build_relay(WorkerHoldings {
            sol_balance: 0.5,
            tokens: vec![TokenHolding {
                mint: "mint1".to_string(),
                ui_amount: 100.0,
                usd_value: Some(5.0),
            }],
        })
        .await;
        relay
            .availability
            .mark_busy("Atlas", relay_core::worker::Role::Trader, "tok");

        run(relay.clone(), "Atlas".to_string(), 50.0).await;

        assert_eq!(apex.transfers.lock().await.len(), 1);
        assert!(relay.availability.is_busy("Atlas"));
    }

    #[tokio::test]
    async fn apex_is_never_subject_to_capital_flow() {
        let (relay, apex) = build_relay(WorkerHoldings {
            sol_balance: 100.0,
            tokens: vec![],
        })
        .await;
        run(relay.clone(), relay_core::worker::APEX.to_string(), 100.0).await;
        assert!(apex.transfers.lock().await.is_empty());
    }
}
