//! The agent session: one run of a spawned agent, bound to exactly one worker.
//!
//! Modeled as a tagged sum type (shared envelope + variant body) rather than a duck-typed
//! dictionary carrying either a process handle or a task id.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Completed,
    Error,
    TimedOut,
    Killed,
    Orphaned,
}

impl SessionStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }

    pub fn is_terminal(&self) -> bool {
        !self.is_running()
    }
}

/// The variant body distinguishing a local child-process session from a remote vessel-routed
/// one. Local sessions own a config-file cleanup path; remote sessions own a task id to
/// correlate results against.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum SessionMode {
    Local { config_cleanup_path: String },
    Remote { task_id: Uuid, vessel_id: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: Uuid,
    pub worker: String,
    pub job_type: String,
    pub mode: SessionMode,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: SessionStatus,
    pub result: Option<Value>,
    pub prompt_preview: String,
}

impl Session {
    /// `session_id` is minted by the caller (the dispatcher) and threaded through the task
    /// payload / availability assignment / process-table key as well, so every view of a
    /// session agrees on its id.
    pub fn new_remote(
        session_id: Uuid,
        worker: impl Into<String>,
        job_type: impl Into<String>,
        task_id: Uuid,
        vessel_id: impl Into<String>,
        prompt_preview: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            worker: worker.into(),
            job_type: job_type.into(),
            mode: SessionMode::Remote {
                task_id,
                vessel_id: vessel_id.into(),
            },
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            result: None,
            prompt_preview: prompt_preview.into(),
        }
    }

    /// See `new_remote` on why `session_id` is caller-supplied.
    pub fn new_local(
        session_id: Uuid,
        worker: impl Into<String>,
        job_type: impl Into<String>,
        config_cleanup_path: impl Into<String>,
        prompt_preview: impl Into<String>,
    ) -> Self {
        Self {
            session_id,
            worker: worker.into(),
            job_type: job_type.into(),
            mode: SessionMode::Local {
                config_cleanup_path: config_cleanup_path.into(),
            },
            started_at: Utc::now(),
            completed_at: None,
            status: SessionStatus::Running,
            result: None,
            prompt_preview: prompt_preview.into(),
        }
    }

    pub fn remote_task_id(&self) -> Option<Uuid> {
        match &self.mode {
            SessionMode::Remote { task_id, .. } => Some(*task_id),
            SessionMode::Local { .. } => None,
        }
    }

    pub fn vessel_id(&self) -> Option<&str> {
        match &self.mode {
            SessionMode::Remote { vessel_id, .. } => Some(vessel_id.as_str()),
            SessionMode::Local { .. } => None,
        }
    }

    pub fn finish(&mut self, status: SessionStatus, result: Option<Value>) {
        self.status = status;
        self.result = result;
        self.completed_at = Some(Utc::now());
    }
}

/// Static job-type -> availability-registry role mapping kept by the dispatcher.
pub fn role_for_job_type(job_type: &str) -> Option<crate::worker::Role> {
    use crate::worker::Role;
    match job_type {
        "trade" => Some(Role::Trader),
        "manage" => Some(Role::Manager),
        "scan" => Some(Role::Scanner),
        "health_check" => Some(Role::Health),
        "content" => Some(Role::Content),
        "counsel" => Some(Role::Counsel),
        "scout" => Some(Role::Scout),
        _ => None,
    }
}
