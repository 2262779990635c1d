//! Worker identity and the closed whitelist.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The privileged identity. Never whitelist-gated, never rate-limited, never marked busy.
pub const APEX: &str = "Apex";

/// Job class assigned to a worker while busy; controls cross-worker read visibility and
/// whether a heartbeat is required (manager only).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Trader,
    Manager,
    Scanner,
    Health,
    Content,
    Counsel,
    Scout,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Trader => "trader",
            Role::Manager => "manager",
            Role::Scanner => "scanner",
            Role::Health => "health",
            Role::Content => "content",
            Role::Counsel => "counsel",
            Role::Scout => "scout",
        }
    }

    /// Roles permitted to read other workers' state.
    pub fn can_read_cross_worker(&self) -> bool {
        matches!(self, Role::Health)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
}

/// The static, compile-time whitelist of worker identities. `Apex` is deliberately excluded —
/// she authorizes others and is never a dispatch target.
pub const WHITELIST: &[&str] = &[
    "Atlas", "Bishop", "Corsair", "Delta", "Echo", "Foxtrot", "Garnet", "Harlow",
];

pub fn is_whitelisted(name: &str) -> bool {
    WHITELIST.contains(&name)
}

pub fn is_apex(name: &str) -> bool {
    name == APEX
}

/// In-memory row of the availability registry. An invariant enforced by the registry (not by
/// this type alone): `status = Busy` implies `role` and `assigned_at` are both `Some`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerRecord {
    pub name: String,
    pub status: WorkerStatus,
    pub role: Option<Role>,
    pub assignment: Option<String>,
    pub assigned_at: Option<DateTime<Utc>>,
    pub last_heartbeat: Option<DateTime<Utc>>,
}

impl WorkerRecord {
    pub fn idle(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: WorkerStatus::Idle,
            role: None,
            assignment: None,
            assigned_at: None,
            last_heartbeat: None,
        }
    }

    pub fn is_manager_stale(&self, horizon: chrono::Duration, now: DateTime<Utc>) -> bool {
        self.role == Some(Role::Manager)
            && self
                .last_heartbeat
                .is_some_and(|hb| now - hb > horizon)
    }
}
