//! Process entry point: parses config, wires the `Relay` as explicit state (no globals), starts
//! the watchdog loops and the periodic availability-snapshot writer, and serves the HTTP/WS
//! surface with graceful shutdown on SIGINT/SIGTERM.

mod config;

use anyhow::Context;
use clap::Parser;
use relay_core::apex::HttpApexClient;
use relay_core::audit::AuditLog;
use relay_core::availability::AvailabilityRegistry;
use relay_core::gate::GateVerifier;
use relay_core::notify::{NullNotifier, OperatorNotifier, WebhookNotifier};
use relay_core::rate_limit::RateLimiter;
use relay_gateway::session_registry::SessionRegistry;
use relay_gateway::state::{Relay, RelayConfig};
use relay_gateway::task_store::TaskStore;
use relay_gateway::vessel::VesselRegistry;
use relay_gateway::watchdog::Watchdogs;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let cfg = Config::parse();
    let relay = Arc::new(build_relay(&cfg).await?);

    let listener = TcpListener::bind(&cfg.bind)
        .await
        .with_context(|| format!("bind relay to {}", cfg.bind))?;
    let local_addr = listener.local_addr().context("relay local_addr")?;
    tracing::info!(event = "relay.startup.bound", addr = %local_addr);

    let watchdogs = Watchdogs::start(relay.clone());
    let (snapshot_shutdown_tx, snapshot_shutdown_rx) = watch::channel(false);
    let snapshot_task = tokio::spawn(snapshot_loop(
        relay.clone(),
        Duration::from_secs(cfg.snapshot_interval_secs.max(1)),
        snapshot_shutdown_rx,
    ));

    let app = relay_gateway::router(relay.clone());
    let server = axum::serve(listener, app.into_make_service()).with_graceful_shutdown(shutdown_signal());
    let result = server.await;

    let _ = snapshot_shutdown_tx.send(true);
    let _ = snapshot_task.await;
    watchdogs.shutdown().await;

    result.context("relay serve")?;
    Ok(())
}

/// Periodically flushes the in-memory availability registry to its on-disk snapshot
/// — the authoritative copy lives in memory; this keeps the externally readable
/// file from going stale between mutations without making every `mark_*` call async.
async fn snapshot_loop(relay: Arc<Relay>, interval: Duration, mut shutdown_rx: watch::Receiver<bool>) {
    loop {
        if *shutdown_rx.borrow() {
            return;
        }
        if let Err(err) = relay.availability.write_snapshot().await {
            tracing::error!(event = "relay.availability.snapshot_failed", error = %err);
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown_rx.changed() => {}
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        let mut sig = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler");
        sig.recv().await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!(event = "relay.shutdown.signal_received");
}

async fn build_relay(cfg: &Config) -> anyhow::Result<Relay> {
    for dir in [&cfg.gate_dir, &cfg.local_config_dir] {
        tokio::fs::create_dir_all(dir)
            .await
            .with_context(|| format!("create directory {}", dir.display()))?;
    }
    for path in [&cfg.availability_snapshot_path, &cfg.audit_log_path] {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("create directory {}", parent.display()))?;
        }
    }

    let gate_secret = cfg.gate_secret.as_ref().map(|s| s.as_bytes().to_vec());
    if gate_secret.is_none() {
        tracing::warn!(event = "relay.startup.gate_fail_closed", "no RELAY_GATE_SECRET set; spawn-gate checks will fail closed");
    }

    let apex = Arc::new(HttpApexClient::new(cfg.apex_base_url.clone()).context("build apex client")?);
    let notifier: Arc<dyn OperatorNotifier> = match &cfg.notify_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone())),
        None => Arc::new(NullNotifier),
    };

    let tasks = TaskStore::connect(&cfg.task_database_url)
        .await
        .context("connect task store")?;

    Ok(Relay {
        cfg: RelayConfig {
            relay_token: cfg.relay_token.clone(),
            local_executor_bin: cfg.local_executor_bin.clone(),
            local_config_dir: cfg.local_config_dir.clone(),
            session_timeout_hours: cfg.session_timeout_hours,
            manager_timeout_hours: cfg.manager_timeout_hours,
            watchdog_interval_secs: cfg.watchdog_interval_secs,
            position_state_path: cfg.position_state_path.clone(),
        },
        audit: AuditLog::new(cfg.audit_log_path.clone()),
        gate: GateVerifier::new(gate_secret, cfg.gate_dir.clone()),
        rate_limiter: RateLimiter::new(),
        availability: AvailabilityRegistry::new(cfg.availability_snapshot_path.clone()),
        sessions: SessionRegistry::new(),
        tasks,
        vessels: VesselRegistry::new(),
        apex,
        notifier,
        local_processes: tokio::sync::Mutex::new(HashMap::new()),
    })
}

