//! The process-wide `Relay` state, constructed once at startup and threaded into every handler
//! via `State<Arc<Relay>>`.

use relay_core::apex::ApexClient;
use relay_core::availability::AvailabilityRegistry;
use relay_core::audit::AuditLog;
use relay_core::gate::GateVerifier;
use relay_core::notify::OperatorNotifier;
use relay_core::rate_limit::RateLimiter;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use crate::session_registry::SessionRegistry;
use crate::task_store::TaskStore;
use crate::vessel::VesselRegistry;

pub struct RelayConfig {
    pub relay_token: String,
    pub local_executor_bin: String,
    pub local_config_dir: std::path::PathBuf,
    pub session_timeout_hours: i64,
    pub manager_timeout_hours: i64,
    pub watchdog_interval_secs: u64,
    /// Read-only snapshot of trading state maintained by another process; the relay only ever
    /// reads this file, never writes it.
    pub position_state_path: std::path::PathBuf,
}

pub struct Relay {
    pub cfg: RelayConfig,
    pub audit: AuditLog,
    pub gate: GateVerifier,
    pub rate_limiter: RateLimiter,
    pub availability: AvailabilityRegistry,
    pub sessions: SessionRegistry,
    pub tasks: TaskStore,
    pub vessels: VesselRegistry,
    pub apex: Arc<dyn ApexClient>,
    pub notifier: Arc<dyn OperatorNotifier>,
    pub local_processes: tokio::sync::Mutex<HashMap<Uuid, tokio::process::Child>>,
}

impl Relay {
    /// Caller attribution: looks up the `X-Requester` header value against the
    /// whitelist. Missing/unknown values are treated as anonymous by callers of this helper.
    pub fn attribute(requester: Option<&str>) -> Option<&str> {
        let name = requester?;
        if relay_core::worker::is_apex(name) || relay_core::worker::is_whitelisted(name) {
            Some(name)
        } else {
            None
        }
    }
}
