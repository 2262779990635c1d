//! The durable task record, queued per vessel and consumed by the vessel channel.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Shell,
    Code,
    Agent,
    Generic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Sent,
    Completed,
    Error,
    Timeout,
    Cancelled,
    Orphaned,
}

impl TaskStatus {
    /// Whether this status is one of the DAG's terminal states.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, TaskStatus::Queued | TaskStatus::Sent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: Uuid,
    pub vessel_id: String,
    pub task_type: TaskType,
    pub payload: Value,
    pub priority: i32,
    pub timeout_seconds: u64,
    pub status: TaskStatus,
    pub submitted_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
}

impl Task {
    pub fn new(
        vessel_id: impl Into<String>,
        task_type: TaskType,
        payload: Value,
        priority: i32,
        timeout_seconds: u64,
    ) -> Self {
        Self {
            task_id: Uuid::new_v4(),
            vessel_id: vessel_id.into(),
            task_type,
            payload,
            priority,
            timeout_seconds,
            status: TaskStatus::Queued,
            submitted_at: Utc::now(),
            completed_at: None,
            result: None,
        }
    }
}

/// Wire envelope sent to a vessel over the persistent channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VesselOutbound {
    Task { data: Task },
    CancelTask { task_id: Uuid },
    HeartbeatAck,
}

/// Wire envelope received from a vessel over the persistent channel.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VesselInbound {
    Result {
        task_id: Uuid,
        status: TaskStatus,
        result: Option<Value>,
    },
    CancelAck {
        task_id: Uuid,
        cancelled: bool,
    },
    Heartbeat,
}
