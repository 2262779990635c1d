//! Three coarse periodic background sweeps: session timeout, orphan detection, manager
//! heartbeat timeout. Each is its own `tokio::spawn`ed loop with a `watch` shutdown signal so
//! the whole group can be stopped from one place during graceful shutdown.

use relay_core::audit;
use relay_core::session::SessionMode;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::local_runner;
use crate::state::Relay;

pub const WATCHDOG_INTERVAL: Duration = Duration::from_secs(300);

pub struct Watchdogs {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl Watchdogs {
    pub fn start(relay: Arc<Relay>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let interval = Duration::from_secs(relay.cfg.watchdog_interval_secs.max(1));

        let handles = vec![
            tokio::spawn(session_timeout_loop(relay.clone(), shutdown_rx.clone(), interval)),
            tokio::spawn(orphan_sweep_loop(relay.clone(), shutdown_rx.clone(), interval)),
            tokio::spawn(manager_timeout_loop(relay, shutdown_rx, interval)),
        ];

        Self { shutdown_tx, handles }
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
    }
}

async fn session_timeout_loop(relay: Arc<Relay>, mut shutdown_rx: watch::Receiver<bool>, interval: Duration) {
    let horizon = chrono::Duration::hours(relay.cfg.session_timeout_hours);
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        for session in relay.sessions.timeout_sweep(horizon).await {
            match &session.mode {
                SessionMode::Local { .. } => {
                    local_runner::kill(&relay, session.session_id).await;
                }
                SessionMode::Remote { task_id, vessel_id } => {
                    relay
                        .vessels
                        .send(
                            vessel_id,
                            relay_core::task::VesselOutbound::CancelTask { task_id: *task_id },
                        )
                        .await;
                }
            }
            relay.availability.mark_idle(&session.worker);
            relay
                .audit
                .record(
                    audit::SESSION_TIMED_OUT,
                    json!({"session_id": session.session_id, "worker": session.worker}),
                )
                .await;
            let _ = relay
                .notifier
                .notify(relay_core::notify::Notification {
                    worker: session.worker.clone(),
                    message: format!("session {} timed out", session.session_id),
                })
                .await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn orphan_sweep_loop(relay: Arc<Relay>, mut shutdown_rx: watch::Receiver<bool>, interval: Duration) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        let connected = relay.vessels.connected_ids().await;
        for session in relay.sessions.orphan_sweep(&connected).await {
            relay.availability.mark_idle(&session.worker);
            relay
                .audit
                .record(
                    audit::SESSION_ORPHANED,
                    json!({"session_id": session.session_id, "worker": session.worker}),
                )
                .await;
            let _ = relay
                .notifier
                .notify(relay_core::notify::Notification {
                    worker: session.worker.clone(),
                    message: format!("session {} orphaned: vessel disconnected", session.session_id),
                })
                .await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn manager_timeout_loop(relay: Arc<Relay>, mut shutdown_rx: watch::Receiver<bool>, interval: Duration) {
    let horizon = chrono::Duration::hours(relay.cfg.manager_timeout_hours);
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        for worker in relay.availability.timeout_sweep(horizon) {
            relay
                .audit
                .record(audit::MANAGER_TIMEOUT, json!({"worker": worker}))
                .await;
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}
