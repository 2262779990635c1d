//! In-memory session registry keyed by session-id, mirroring the availability registry's
//! locking shape. Two bulk sweeps: timeout and orphan detection.

use chrono::Utc;
use relay_core::session::{Session, SessionStatus};
use std::collections::HashMap;
use uuid::Uuid;

pub const SESSION_TIMEOUT_HOURS: i64 = 5;

pub struct SessionRegistry {
    sessions: tokio::sync::Mutex<HashMap<Uuid, Session>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self {
            sessions: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, session: Session) {
        self.sessions.lock().await.insert(session.session_id, session);
    }

    pub async fn get(&self, session_id: Uuid) -> Option<Session> {
        self.sessions.lock().await.get(&session_id).cloned()
    }

    pub async fn finish(&self, session_id: Uuid, status: SessionStatus, result: Option<serde_json::Value>) {
        if let Some(session) = self.sessions.lock().await.get_mut(&session_id) {
            session.finish(status, result);
        }
    }

    /// All sessions belonging to a worker, newest first, for the per-worker sessions read
    /// endpoint.
    pub async fn list_for_worker(&self, worker: &str) -> Vec<Session> {
        let mut sessions: Vec<Session> = self
            .sessions
            .lock()
            .await
            .values()
            .filter(|s| s.worker == worker)
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        sessions
    }

    /// Finds the running session (if any) whose remote task id matches, used to correlate an
    /// incoming vessel `result` message back to its session.
    pub async fn find_by_task_id(&self, task_id: Uuid) -> Option<Uuid> {
        self.sessions
            .lock()
            .await
            .values()
            .find(|s| s.status.is_running() && s.remote_task_id() == Some(task_id))
            .map(|s| s.session_id)
    }

    /// For every running session older than `horizon`, mark it timed out and return it so the
    /// caller can kill the process / send a cancel frame and release the worker.
    pub async fn timeout_sweep(&self, horizon: chrono::Duration) -> Vec<Session> {
        let now = Utc::now();
        let mut expired = Vec::new();
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values_mut() {
            if session.status.is_running() && now - session.started_at > horizon {
                session.finish(SessionStatus::TimedOut, None);
                expired.push(session.clone());
            }
        }
        expired
    }

    /// For every running remote session whose vessel is no longer connected, mark it orphaned.
    /// Local sessions are skipped; they manage their own lifecycle.
    pub async fn orphan_sweep(&self, connected_vessels: &[String]) -> Vec<Session> {
        let mut orphaned = Vec::new();
        let mut sessions = self.sessions.lock().await;
        for session in sessions.values_mut() {
            if !session.status.is_running() {
                continue;
            }
            let Some(vessel_id) = session.vessel_id() else {
                continue;
            };
            if !connected_vessels.iter().any(|v| v == vessel_id) {
                session.finish(SessionStatus::Orphaned, None);
                orphaned.push(session.clone());
            }
        }
        orphaned
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_core::session::Session;

    #[tokio::test]
    async fn timeout_sweep_only_catches_running_sessions_past_horizon() {
        let registry = SessionRegistry::new();
        let mut stale = Session::new_local(Uuid::new_v4(), "Atlas", "trade", "/tmp/cfg.json", "prompt");
        stale.started_at = Utc::now() - chrono::Duration::hours(6);
        let fresh = Session::new_local(Uuid::new_v4(), "Bishop", "trade", "/tmp/cfg2.json", "prompt");

        registry.insert(stale.clone()).await;
        registry.insert(fresh.clone()).await;

        let expired = registry
            .timeout_sweep(chrono::Duration::hours(SESSION_TIMEOUT_HOURS))
            .await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].session_id, stale.session_id);
    }

    #[tokio::test]
    async fn orphan_sweep_skips_local_sessions() {
        let registry = SessionRegistry::new();
        let local = Session::new_local(Uuid::new_v4(), "Atlas", "trade", "/tmp/cfg.json", "prompt");
        registry.insert(local).await;

        let orphaned = registry.orphan_sweep(&[]).await;
        assert!(orphaned.is_empty());
    }

    #[tokio::test]
    async fn orphan_sweep_catches_disconnected_vessel_sessions() {
        let registry = SessionRegistry::new();
        let remote = Session::new_remote(Uuid::new_v4(), "Atlas", "trade", Uuid::new_v4(), "vessel-1", "prompt");
        registry.insert(remote.clone()).await;

        let orphaned = registry.orphan_sweep(&["vessel-2".to_string()]).await;
        assert_eq!(orphaned.len(), 1);
        assert_eq!(orphaned[0].session_id, remote.session_id);
    }
}
