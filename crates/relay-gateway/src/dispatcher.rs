//! Agent Dispatcher: sequenced authorization checks, then branches into local or remote spawn
//!.

use relay_core::audit;
use relay_core::session::{role_for_job_type, Session, SessionMode, SessionStatus};
use relay_core::task::{Task, TaskType, VesselOutbound};
use relay_core::worker::{is_apex, is_whitelisted};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::errors::RelayError;
use crate::local_runner;
use crate::state::Relay;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnMode {
    Local,
    Remote,
}

pub struct SpawnRequest {
    pub requester: String,
    pub worker: String,
    pub job_type: String,
    pub prompt: String,
    pub mode: SpawnMode,
    pub max_turns: u32,
}

pub struct SpawnResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
}

/// `spawn(worker, job_type, prompt, mode, budget) -> {session_id, status}`
/// Every failure aborts with an error and an audit event; on pass, branches by mode.
pub async fn spawn(relay: &Arc<Relay>, req: SpawnRequest) -> Result<SpawnResponse, RelayError> {
    if !is_apex(&req.requester) {
        relay
            .audit
            .record(audit::DISPATCH_DENIED, json!({"reason": "not apex", "requester": req.requester}))
            .await;
        return Err(RelayError::CrossAgentViolation);
    }
    if is_apex(&req.worker) || !is_whitelisted(&req.worker) {
        relay
            .audit
            .record(audit::DISPATCH_DENIED, json!({"reason": "not whitelisted", "worker": req.worker}))
            .await;
        return Err(RelayError::InvalidInput("unknown worker".to_string()));
    }
    if !relay.gate.verify(&req.worker) {
        relay
            .audit
            .record(audit::GATE_DENIED, json!({"worker": req.worker}))
            .await;
        notify_operator_gate_denied(relay, &req.worker).await;
        return Err(RelayError::GateDenied);
    }
    if relay.availability.is_busy(&req.worker) {
        relay
            .audit
            .record(audit::DISPATCH_DENIED, json!({"reason": "busy", "worker": req.worker}))
            .await;
        return Err(RelayError::Capacity("worker busy".to_string()));
    }

    relay
        .audit
        .record(audit::DISPATCH_REQUESTED, json!({"worker": req.worker, "job_type": req.job_type, "mode": format!("{:?}", req.mode)}))
        .await;

    let role = role_for_job_type(&req.job_type)
        .ok_or_else(|| RelayError::InvalidInput("unknown job_type".to_string()))?;

    let response = match req.mode {
        SpawnMode::Remote => spawn_remote(relay, &req, role).await?,
        SpawnMode::Local => local_runner::spawn_local(relay, &req, role).await?,
    };

    relay
        .audit
        .record(audit::DISPATCH_SPAWNED, json!({"worker": req.worker, "session_id": response.session_id}))
        .await;
    Ok(response)
}

async fn spawn_remote(
    relay: &Relay,
    req: &SpawnRequest,
    role: relay_core::worker::Role,
) -> Result<SpawnResponse, RelayError> {
    if !relay.vessels.is_connected(&req.worker).await {
        return Err(RelayError::Capacity("no vessel connected for worker".to_string()));
    }

    let session_id = Uuid::new_v4();
    let payload = json!({
        "prompt": req.prompt,
        "worker": req.worker,
        "job_type": req.job_type,
        "session_id": session_id,
        "max_turns": req.max_turns,
    });
    let task = Task::new(req.worker.clone(), TaskType::Agent, payload, 0, req.max_turns as u64 * 60);
    let task_id = task.task_id;

    relay
        .tasks
        .submit(task.clone())
        .await
        .map_err(|e| RelayError::Internal(e.to_string()))?;
    relay.vessels.send(&req.worker, VesselOutbound::Task { data: task }).await;

    relay
        .availability
        .mark_busy(&req.worker, role, session_id.to_string());

    let session = Session::new_remote(
        session_id,
        req.worker.clone(),
        req.job_type.clone(),
        task_id,
        req.worker.clone(),
        req.prompt.chars().take(200).collect::<String>(),
    );
    let status = session.status;
    relay.sessions.insert(session).await;

    Ok(SpawnResponse { session_id, status })
}

async fn notify_operator_gate_denied(relay: &Relay, worker: &str) {
    let _ = relay
        .notifier
        .notify(relay_core::notify::Notification {
            worker: worker.to_string(),
            message: format!("spawn denied for {worker}: gate invalid or missing"),
        })
        .await;
}

/// Handles an incoming `result` frame from a vessel: correlates to the task, updates the store,
/// and if the result carries a known session-id, finishes the session and releases the worker.
pub async fn handle_remote_result(
    relay: &Relay,
    task_id: Uuid,
    status: relay_core::task::TaskStatus,
    result: Option<serde_json::Value>,
) {
    let _ = relay.tasks.update_status(task_id, status, result.clone()).await;

    let Some(session_id) = relay.sessions.find_by_task_id(task_id).await else {
        return;
    };
    let Some(session) = relay.sessions.get(session_id).await else {
        return;
    };

    let session_status = match status {
        relay_core::task::TaskStatus::Completed => SessionStatus::Completed,
        relay_core::task::TaskStatus::Error => SessionStatus::Error,
        relay_core::task::TaskStatus::Cancelled => SessionStatus::Killed,
        _ => return,
    };
    relay.sessions.finish(session_id, session_status, result).await;
    relay.availability.mark_idle(&session.worker);
    relay
        .audit
        .record(audit::SESSION_COMPLETED, json!({"session_id": session_id, "worker": session.worker}))
        .await;
}

/// Kill-session request. No-op returning success if the session is
/// not currently running.
pub async fn kill_session(relay: &Relay, session_id: Uuid) -> Result<(), RelayError> {
    let Some(session) = relay.sessions.get(session_id).await else {
        return Err(RelayError::NotFound);
    };
    if !session.status.is_running() {
        return Ok(());
    }

    match &session.mode {
        SessionMode::Local { .. } => {
            local_runner::kill(relay, session_id).await;
        }
        SessionMode::Remote { task_id, vessel_id } => {
            relay
                .vessels
                .send(vessel_id, VesselOutbound::CancelTask { task_id: *task_id })
                .await;
        }
    }

    relay.sessions.finish(session_id, SessionStatus::Killed, None).await;
    relay.availability.mark_idle(&session.worker);
    relay
        .audit
        .record(audit::SESSION_KILLED, json!({"session_id": session_id, "worker": session.worker}))
        .await;
    Ok(())
}
