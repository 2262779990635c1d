//! Local Runner: spawns a confined child process with a per-session tool-broker config.
//!
//! Asynchronous `Command` spawn with piped stdout/stderr, `env_clear()` plus an explicit env
//! allow-list, a `tokio::time::timeout`-guarded `child.wait()` that kills the child on expiry,
//! and bounded stdout/stderr capture. Structured stdout is attempted as JSON first; raw text is
//! recorded instead on parse failure rather than treating it as an error.

use relay_core::session::{Session, SessionStatus};
use serde_json::json;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use uuid::Uuid;

use crate::dispatcher::{SpawnRequest, SpawnResponse};
use crate::errors::RelayError;
use crate::state::Relay;

const MAX_STDOUT_BYTES: usize = 1024 * 1024;
const MAX_STDERR_BYTES: usize = 64 * 1024;
const HARD_KILL_GRACE: Duration = Duration::from_secs(5);

pub async fn spawn_local(
    relay: &Arc<Relay>,
    req: &SpawnRequest,
    role: relay_core::worker::Role,
) -> Result<SpawnResponse, RelayError> {
    let session_id = Uuid::new_v4();
    let config_path = relay
        .cfg
        .local_config_dir
        .join(format!("{session_id}.broker.json"));

    let config = json!({
        "worker_identity": req.worker,
        "session_id": session_id,
        "max_turns": req.max_turns,
    });
    let config_bytes = serde_json::to_vec(&config).map_err(|e| RelayError::Internal(e.to_string()))?;
    tokio::fs::write(&config_path, &config_bytes)
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))?;

    let mut cmd = Command::new(&relay.cfg.local_executor_bin);
    cmd.arg("--broker-config")
        .arg(&config_path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .env_clear();
    if let Ok(path) = std::env::var("PATH") {
        cmd.env("PATH", path);
    }
    cmd.env("RELAY_TOOL_BROKER_CONFIG", &config_path);
    cmd.env("RELAY_WORKER_IDENTITY", &req.worker);

    let child = cmd.spawn().map_err(|e| {
        let _ = std::fs::remove_file(&config_path);
        RelayError::Internal(format!("spawn local executor: {e}"))
    })?;

    relay.local_processes.lock().await.insert(session_id, child);
    relay
        .availability
        .mark_busy(&req.worker, role, session_id.to_string());

    let session = Session::new_local(
        session_id,
        req.worker.clone(),
        req.job_type.clone(),
        config_path.to_string_lossy().to_string(),
        req.prompt.chars().take(200).collect::<String>(),
    );
    relay.sessions.insert(session).await;

    let timeout = Duration::from_secs((relay.cfg.session_timeout_hours.max(0) as u64) * 3600);
    let relay_for_task = Arc::clone(relay);
    tokio::spawn(await_local_exit(relay_for_task, session_id, config_path, timeout));

    Ok(SpawnResponse {
        session_id,
        status: SessionStatus::Running,
    })
}

async fn await_local_exit(
    relay: Arc<Relay>,
    session_id: Uuid,
    config_path: std::path::PathBuf,
    timeout: Duration,
) {
    let (stdout, stderr) = {
        let mut processes = relay.local_processes.lock().await;
        let Some(child) = processes.get_mut(&session_id) else {
            return;
        };
        (child.stdout.take(), child.stderr.take())
    };
    let stdout_task = stdout.map(|s| tokio::spawn(read_stream_limited(s, MAX_STDOUT_BYTES)));
    let stderr_task = stderr.map(|s| tokio::spawn(read_stream_limited(s, MAX_STDERR_BYTES)));

    let wait_result = match tokio::time::timeout(timeout, wait_for_exit(&relay, session_id)).await
    {
        Ok(status) => {
            let stdout_bytes = match stdout_task {
                Some(t) => t.await.ok().and_then(|r| r.ok()).unwrap_or_default(),
                None => Vec::new(),
            };
            let stderr_bytes = match stderr_task {
                Some(t) => t.await.ok().and_then(|r| r.ok()).unwrap_or_default(),
                None => Vec::new(),
            };
            Some((status, stdout_bytes, stderr_bytes))
        }
        Err(_) => {
            kill(&relay, session_id).await;
            None
        }
    };

    let _ = tokio::fs::remove_file(&config_path).await;
    relay.local_processes.lock().await.remove(&session_id);

    let Some(session) = relay.sessions.get(session_id).await else {
        return;
    };

    match wait_result {
        None => {
            relay
                .sessions
                .finish(session_id, SessionStatus::TimedOut, None)
                .await;
            relay
                .audit
                .record(
                    relay_core::audit::SESSION_TIMED_OUT,
                    json!({"session_id": session_id, "worker": session.worker}),
                )
                .await;
        }
        Some((status, stdout_bytes, stderr_bytes)) => {
            let success = status.map(|s| s.success()).unwrap_or(false);
            if success {
                let result = serde_json::from_slice::<serde_json::Value>(&stdout_bytes)
                    .unwrap_or_else(|_| json!({"raw_stdout": String::from_utf8_lossy(&stdout_bytes)}));
                relay
                    .sessions
                    .finish(session_id, SessionStatus::Completed, Some(result))
                    .await;
            } else {
                let stderr_trunc = String::from_utf8_lossy(&stderr_bytes);
                relay
                    .sessions
                    .finish(
                        session_id,
                        SessionStatus::Error,
                        Some(json!({"stderr": stderr_trunc})),
                    )
                    .await;
            }
        }
    }

    relay.availability.mark_idle(&session.worker);
}

/// Polls `try_wait()` rather than holding the child lock across an `.await` for the whole
/// process lifetime, since the lock is shared with the kill path.
async fn wait_for_exit(relay: &Relay, session_id: Uuid) -> Option<std::process::ExitStatus> {
    loop {
        {
            let mut processes = relay.local_processes.lock().await;
            let child = processes.get_mut(&session_id)?;
            if let Ok(Some(status)) = child.try_wait() {
                return Some(status);
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

async fn read_stream_limited<R: AsyncRead + Unpin>(
    mut reader: R,
    max_bytes: usize,
) -> anyhow::Result<Vec<u8>> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 8192];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        let take = n.min(max_bytes.saturating_sub(buf.len()));
        buf.extend_from_slice(&chunk[..take]);
        if buf.len() >= max_bytes {
            break;
        }
    }
    Ok(buf)
}

/// Kill-session for a local child. `tokio::process::Child` exposes
/// only a single unconditional kill signal (no portable SIGTERM without an extra dependency),
/// so the "graceful first, hard-kill after 5s" shape is expressed as kill-then-confirm: issue
/// the kill, wait out the grace window, and issue it again if the process is still alive.
pub async fn kill(relay: &Relay, session_id: Uuid) {
    {
        let mut processes = relay.local_processes.lock().await;
        let Some(child) = processes.get_mut(&session_id) else {
            return;
        };
        let _ = child.start_kill();
    }
    tokio::time::sleep(HARD_KILL_GRACE).await;
    let mut processes = relay.local_processes.lock().await;
    if let Some(child) = processes.get_mut(&session_id) {
        if matches!(child.try_wait(), Ok(None)) {
            let _ = child.start_kill();
        }
    }
}
