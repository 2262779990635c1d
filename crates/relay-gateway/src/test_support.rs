//! Shared construction of a throwaway `Relay` for unit tests that live outside
//! `capital_flow`'s own in-module builder.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

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

/// Apex stand-in for tests that never actually reach the apex client.
struct UnreachableApex;

#[async_trait]
impl ApexClient for UnreachableApex {
    async fn status(&self, _worker: &str) -> relay_core::Result<WorkerHoldings> {
        unimplemented!("test_support apex is a placeholder")
    }
    async fn buy(&self, _req: &BuyRequest) -> relay_core::Result<serde_json::Value> {
        unimplemented!("test_support apex is a placeholder")
    }
    async fn sell(&self, _req: &SellRequest) -> relay_core::Result<SellResult> {
        unimplemented!("test_support apex is a placeholder")
    }
    async fn transfer_token(&self, _req: &TransferTokenRequest) -> relay_core::Result<serde_json::Value> {
        unimplemented!("test_support apex is a placeholder")
    }
    async fn transfer_sol(&self, _req: &TransferSolRequest) -> relay_core::Result<serde_json::Value> {
        unimplemented!("test_support apex is a placeholder")
    }
    async fn read_proxy(&self, _path: &str) -> relay_core::Result<serde_json::Value> {
        unimplemented!("test_support apex is a placeholder")
    }
}

/// Builds a `Relay` wired to an in-memory task store and a placeholder apex client. Callers
/// that exercise apex proxy behavior should build their own `Relay` with a fake `ApexClient`
/// (see `capital_flow`'s test module) instead of this helper.
pub fn build_test_relay(dir: &Path, token: &str) -> Relay {
    let tasks = tokio::runtime::Runtime::new()
        .expect("build a runtime for test setup")
        .block_on(TaskStore::connect("sqlite::memory:"))
        .expect("connect in-memory task store");

    Relay {
        cfg: RelayConfig {
            relay_token: token.to_string(),
            local_executor_bin: "true".to_string(),
            local_config_dir: dir.to_path_buf(),
            session_timeout_hours: 5,
            manager_timeout_hours: 5,
            watchdog_interval_secs: 300,
            position_state_path: dir.join("position-state.json"),
        },
        audit: AuditLog::new(dir.join("audit.jsonl")),
        gate: GateVerifier::new(None, dir),
        rate_limiter: RateLimiter::new(),
        availability: AvailabilityRegistry::new(dir.join("availability.json")),
        sessions: SessionRegistry::new(),
        tasks,
        vessels: VesselRegistry::new(),
        apex: Arc::new(UnreachableApex),
        notifier: Arc::new(NullNotifier),
        local_processes: tokio::sync::Mutex::new(HashMap::new()),
    }
}
