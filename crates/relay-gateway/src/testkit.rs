//! Test-only construction of a full `Relay` plus a fake apex client, shared between this
//! crate's own unit tests and the crate-level `tests/` suites. Not behind `#[cfg(test)]` since
//! integration tests compile this crate as an ordinary external dependency.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;

use relay_core::apex::{
    ApexClient, BuyRequest, SellRequest, SellResult, TransferSolRequest, TransferTokenRequest,
    WorkerHoldings,
};
use relay_core::audit::AuditLog;
use relay_core::availability::AvailabilityRegistry;
use relay_core::gate::GateVerifier;
use relay_core::notify::NullNotifier;
use relay_core::rate_limit::RateLimiter;

use crate::session_registry::SessionRegistry;
use crate::state::{Relay, RelayConfig};
use crate::task_store::TaskStore;
use crate::vessel::VesselRegistry;

#[derive(Default)]
struct FakeApexState {
    holdings: HashMap<String, WorkerHoldings>,
    sell_result: Option<SellResult>,
    sells: Vec<SellRequest>,
    transfer_sols: Vec<TransferSolRequest>,
    fail_status: bool,
}

/// In-memory `ApexClient` double whose responses are set up by the test before the server
/// starts. Unconfigured calls answer with harmless defaults rather than panicking, since most
/// scenario tests only care about one or two of the six proxy methods.
pub struct FakeApexClient {
    state: AsyncMutex<FakeApexState>,
}

impl FakeApexClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: AsyncMutex::new(FakeApexState::default()),
        })
    }

    pub async fn set_holdings(&self, worker: &str, holdings: WorkerHoldings) {
        self.state
            .lock()
            .await
            .holdings
            .insert(worker.to_string(), holdings);
    }

    pub async fn set_sell_result(&self, result: SellResult) {
        self.state.lock().await.sell_result = Some(result);
    }

    /// Every subsequent `status` call returns an apex-unreachable error, for exercising the
    /// "status probe failed" branch of capital-flow.
    pub async fn fail_status(&self) {
        self.state.lock().await.fail_status = true;
    }

    pub async fn transfer_sol_calls(&self) -> Vec<TransferSolRequest> {
        self.state.lock().await.transfer_sols.clone()
    }

    pub async fn sell_calls(&self) -> Vec<SellRequest> {
        self.state.lock().await.sells.clone()
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

impl Clone for SellRequest {
    fn clone(&self) -> Self {
        SellRequest {
            worker: self.worker.clone(),
            mint: self.mint.clone(),
            percent: self.percent,
            slippage_bps: self.slippage_bps,
        }
    }
}

impl Clone for TransferSolRequest {
    fn clone(&self) -> Self {
        TransferSolRequest {
            from_worker: self.from_worker.clone(),
            to_worker: self.to_worker.clone(),
            amount_sol: self.amount_sol,
        }
    }
}

#[async_trait]
impl ApexClient for FakeApexClient {
    async fn status(&self, worker: &str) -> relay_core::Result<WorkerHoldings> {
        let state = self.state.lock().await;
        if state.fail_status {
            return Err(relay_core::Error::apex_status(503, "status probe down"));
        }
        Ok(state
            .holdings
            .get(worker)
            .cloned()
            .unwrap_or(WorkerHoldings { sol_balance: 0.0, tokens: vec![] }))
    }

    async fn buy(&self, _req: &BuyRequest) -> relay_core::Result<serde_json::Value> {
        Ok(serde_json::json!({"ok": true}))
    }

    async fn sell(&self, req: &SellRequest) -> relay_core::Result<SellResult> {
        let mut state = self.state.lock().await;
        state.sells.push(req.clone());
        Ok(state.sell_result.clone().unwrap_or(SellResult {
            success: true,
            percent_sold: req.percent,
            tx_signature: Some("fake-sig".to_string()),
        }))
    }

    async fn transfer_token(&self, _req: &TransferTokenRequest) -> relay_core::Result<serde_json::Value> {
        Ok(serde_json::json!({"ok": true}))
    }

    async fn transfer_sol(&self, req: &TransferSolRequest) -> relay_core::Result<serde_json::Value> {
        self.state.lock().await.transfer_sols.push(req.clone());
        Ok(serde_json::json!({"ok": true}))
    }

    async fn read_proxy(&self, _path: &str) -> relay_core::Result<serde_json::Value> {
        Ok(serde_json::json!({}))
    }
}

impl Clone for SellResult {
    fn clone(&self) -> Self {
        SellResult {
            success: self.success,
            percent_sold: self.percent_sold,
            tx_signature: self.tx_signature.clone(),
        }
    }
}

/// Everything a scenario test needs to drive a real `Relay` over HTTP: the shared secret, a
/// temp directory doubling as the gate dir / config dir / audit log location, and the fake
/// apex client so calls can be asserted on after the fact.
pub struct Harness {
    pub dir: tempfile::TempDir,
    pub token: String,
    pub gate_secret: Vec<u8>,
    pub apex: Arc<FakeApexClient>,
    pub relay: Arc<Relay>,
}

pub struct HarnessConfig {
    pub session_timeout_hours: i64,
    pub manager_timeout_hours: i64,
    pub watchdog_interval_secs: u64,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            session_timeout_hours: 5,
            manager_timeout_hours: 5,
            watchdog_interval_secs: 300,
        }
    }
}

impl Harness {
    pub async fn build(cfg: HarnessConfig) -> Self {
        let dir = tempfile::tempdir().expect("create temp dir");
        let token = "test-relay-token".to_string();
        let gate_secret = b"test-gate-secret".to_vec();
        let apex = FakeApexClient::new();

        let tasks = TaskStore::connect("sqlite::memory:")
            .await
            .expect("connect in-memory task store");

        let relay = Arc::new(Relay {
            cfg: RelayConfig {
                relay_token: token.clone(),
                local_executor_bin: "true".to_string(),
                local_config_dir: dir.path().to_path_buf(),
                session_timeout_hours: cfg.session_timeout_hours,
                manager_timeout_hours: cfg.manager_timeout_hours,
                watchdog_interval_secs: cfg.watchdog_interval_secs,
                position_state_path: dir.path().join("position-state.json"),
            },
            audit: AuditLog::new(dir.path().join("audit.jsonl")),
            gate: GateVerifier::new(Some(gate_secret.clone()), dir.path()),
            rate_limiter: RateLimiter::new(),
            availability: AvailabilityRegistry::new(dir.path().join("availability.json")),
            sessions: SessionRegistry::new(),
            tasks,
            vessels: VesselRegistry::new(),
            apex: apex.clone(),
            notifier: Arc::new(NullNotifier),
            local_processes: tokio::sync::Mutex::new(HashMap::new()),
        });

        Self { dir, token, gate_secret, apex, relay }
    }

    /// Issues a valid, long-lived gate artifact for `worker` so spawn/buy/sell/transfer
    /// endpoints pass the gate check.
    pub fn issue_gate(&self, worker: &str) {
        let artifact = relay_core::gate::GateArtifact::signed(
            worker,
            chrono::Duration::hours(1),
            &self.gate_secret,
        );
        artifact.write_to(self.dir.path()).expect("write gate artifact");
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.dir.path().join("audit.jsonl")
    }

    /// Reads back every recorded audit action, in order, for assertions like "exactly one
    /// `gate_denied` event was recorded".
    pub async fn audit_actions(&self) -> Vec<String> {
        let Ok(contents) = tokio::fs::read_to_string(self.audit_log_path()).await else {
            return Vec::new();
        };
        contents
            .lines()
            .filter_map(|line| serde_json::from_str::<serde_json::Value>(line).ok())
            .filter_map(|event| event["action"].as_str().map(str::to_string))
            .collect()
    }
}

/// A running instance of the router bound to an ephemeral port, torn down on drop-then-await
/// via `shutdown`.
pub struct RunningServer {
    pub base_url: String,
    shutdown_tx: tokio::sync::oneshot::Sender<()>,
    join: tokio::task::JoinHandle<()>,
}

impl RunningServer {
    pub async fn start(relay: Arc<Relay>) -> Self {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().expect("listener local_addr");
        let app = crate::router(relay);

        let (shutdown_tx, shutdown_rx) = tokio::sync::oneshot::channel::<()>();
        let join = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service())
                .with_graceful_shutdown(async move {
                    let _ = shutdown_rx.await;
                })
                .await
                .expect("serve relay router");
        });

        Self { base_url: format!("http://{addr}"), shutdown_tx, join }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        let _ = self.join.await;
    }
}
