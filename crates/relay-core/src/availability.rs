//! In-memory worker availability registry with an atomically-written on-disk snapshot.
//!
//! The in-memory map is authoritative; the on-disk file is the externally readable
//! representation only and is not reloaded at startup.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use uuid::Uuid;

use crate::worker::{Role, WorkerRecord, WorkerStatus, WHITELIST};

/// Manager workers idle out after this many hours without a heartbeat (reference config).
pub const MANAGER_TIMEOUT_HOURS: i64 = 5;

#[derive(Debug, Serialize, Deserialize)]
struct AgentSnapshotEntry {
    status: WorkerStatus,
    position: Option<String>,
    assigned_at: Option<DateTime<Utc>>,
    #[serde(rename = "type")]
    role: Option<Role>,
    last_checkin: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct AvailabilitySnapshot {
    agents: HashMap<String, AgentSnapshotEntry>,
    timestamp: DateTime<Utc>,
}

pub struct AvailabilityRegistry {
    workers: parking_lot::Mutex<HashMap<String, WorkerRecord>>,
    snapshot_path: PathBuf,
}

impl AvailabilityRegistry {
    pub fn new(snapshot_path: impl Into<PathBuf>) -> Self {
        let mut workers = HashMap::new();
        for name in WHITELIST {
            workers.insert(name.to_string(), WorkerRecord::idle(*name));
        }
        Self {
            workers: parking_lot::Mutex::new(workers),
            snapshot_path: snapshot_path.into(),
        }
    }

    pub fn get(&self, worker: &str) -> Option<WorkerRecord> {
        self.workers.lock().get(worker).cloned()
    }

    pub fn is_busy(&self, worker: &str) -> bool {
        self.workers
            .lock()
            .get(worker)
            .map(|w| w.status == WorkerStatus::Busy)
            .unwrap_or(false)
    }

    pub fn mark_busy(&self, worker: &str, role: Role, assignment: impl Into<String>) {
        let mut workers = self.workers.lock();
        if let Some(record) = workers.get_mut(worker) {
            let now = Utc::now();
            record.status = WorkerStatus::Busy;
            record.role = Some(role);
            record.assignment = Some(assignment.into());
            record.assigned_at = Some(now);
            // Seed the heartbeat at assignment so a manager that is dispatched but never
            // checks in still ages out of the timeout sweep instead of sticking busy forever.
            record.last_heartbeat = Some(now);
        }
    }

    pub fn mark_idle(&self, worker: &str) {
        let mut workers = self.workers.lock();
        if let Some(record) = workers.get_mut(worker) {
            record.status = WorkerStatus::Idle;
            record.role = None;
            record.assignment = None;
            record.assigned_at = None;
        }
    }

    /// Heartbeat is only meaningful for manager-role workers.
    pub fn heartbeat(&self, worker: &str) {
        let mut workers = self.workers.lock();
        if let Some(record) = workers.get_mut(worker) {
            record.last_heartbeat = Some(Utc::now());
        }
    }

    /// Releases every manager-role worker whose heartbeat is older than the timeout horizon.
    /// Returns the names released, for the caller to emit `MANAGER_TIMEOUT` audit events.
    pub fn timeout_sweep(&self, horizon: chrono::Duration) -> Vec<String> {
        let now = Utc::now();
        let mut released = Vec::new();
        let mut workers = self.workers.lock();
        for record in workers.values_mut() {
            if record.is_manager_stale(horizon, now) {
                released.push(record.name.clone());
                record.status = WorkerStatus::Idle;
                record.role = None;
                record.assignment = None;
                record.assigned_at = None;
            }
        }
        released
    }

    /// Returns every worker record, for the `/availability` read endpoint.
    pub fn all(&self) -> Vec<WorkerRecord> {
        self.workers.lock().values().cloned().collect()
    }

    fn snapshot_locked(workers: &HashMap<String, WorkerRecord>) -> AvailabilitySnapshot {
        let agents = workers
            .iter()
            .map(|(name, record)| {
                (
                    name.clone(),
                    AgentSnapshotEntry {
                        status: record.status,
                        position: record.assignment.clone(),
                        assigned_at: record.assigned_at,
                        role: record.role,
                        last_checkin: record.last_heartbeat,
                    },
                )
            })
            .collect();
        AvailabilitySnapshot {
            agents,
            timestamp: Utc::now(),
        }
    }

    /// Writes the current state to disk via write-temp-then-rename so a crash mid-write never
    /// leaves a partial file observable to external readers.
    pub async fn write_snapshot(&self) -> std::io::Result<()> {
        let snapshot = {
            let workers = self.workers.lock();
            Self::snapshot_locked(&workers)
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;

        let parent = self
            .snapshot_path
            .parent()
            .map(|p| p.to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        let temp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));

        let file = tokio::fs::File::create(&temp_path).await?;
        {
            use tokio::io::AsyncWriteExt;
            let mut file = file;
            file.write_all(&bytes).await?;
            file.sync_all().await?;
        }
        tokio::fs::rename(&temp_path, &self.snapshot_path).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_busy_requires_role_and_assignment() {
        let registry = AvailabilityRegistry::new("/tmp/does-not-matter.json");
        registry.mark_busy("Atlas", Role::Scanner, "tok-1");
        let record = registry.get("Atlas").unwrap();
        assert_eq!(record.status, WorkerStatus::Busy);
        assert!(record.role.is_some());
        assert!(record.assigned_at.is_some());
    }

    #[test]
    fn mark_idle_clears_role_and_assignment() {
        let registry = AvailabilityRegistry::new("/tmp/does-not-matter.json");
        registry.mark_busy("Atlas", Role::Scanner, "tok-1");
        registry.mark_idle("Atlas");
        let record = registry.get("Atlas").unwrap();
        assert_eq!(record.status, WorkerStatus::Idle);
        assert!(record.role.is_none());
    }

    #[test]
    fn manager_timeout_releases_stale_managers_only() {
        let registry = AvailabilityRegistry::new("/tmp/does-not-matter.json");
        registry.mark_busy("Atlas", Role::Manager, "tok-1");
        registry.mark_busy("Bishop", Role::Scanner, "tok-2");
        {
            let mut workers = registry.workers.lock();
            workers.get_mut("Atlas").unwrap().last_heartbeat =
                Some(Utc::now() - chrono::Duration::hours(6));
        }
        let released = registry.timeout_sweep(chrono::Duration::hours(MANAGER_TIMEOUT_HOURS));
        assert_eq!(released, vec!["Atlas".to_string()]);
        assert_eq!(registry.get("Bishop").unwrap().status, WorkerStatus::Busy);
    }

    #[tokio::test]
    async fn snapshot_write_produces_valid_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("availability.json");
        let registry = AvailabilityRegistry::new(&path);
        registry.mark_busy("Atlas", Role::Trader, "tok-1");
        registry.write_snapshot().await.unwrap();

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&contents).unwrap();
        assert!(parsed["agents"]["Atlas"]["status"] == "busy");
        assert!(parsed["timestamp"].is_string());
    }
}
