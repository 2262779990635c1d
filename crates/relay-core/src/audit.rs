//! Append-only structured JSON-line audit log of every authorization decision, dispatch, and
//! state transition.

use chrono::Utc;
use serde_json::Value;
use std::path::PathBuf;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub const GATE_FAIL_CLOSED: &str = "GATE_FAIL_CLOSED";
pub const GATE_DENIED: &str = "GATE_DENIED";
pub const VERIFY_OK: &str = "VERIFY_OK";
pub const VERIFY_FAIL: &str = "VERIFY_FAIL";
pub const RATE_LIMITED: &str = "RATE_LIMITED";
pub const CROSS_AGENT_DENIED: &str = "CROSS_AGENT_DENIED";
pub const REJECTED: &str = "REJECTED";
pub const DISPATCH_REQUESTED: &str = "DISPATCH_REQUESTED";
pub const DISPATCH_DENIED: &str = "DISPATCH_DENIED";
pub const DISPATCH_SPAWNED: &str = "DISPATCH_SPAWNED";
pub const SESSION_COMPLETED: &str = "SESSION_COMPLETED";
pub const SESSION_TIMED_OUT: &str = "SESSION_TIMED_OUT";
pub const SESSION_ORPHANED: &str = "SESSION_ORPHANED";
pub const SESSION_KILLED: &str = "SESSION_KILLED";
pub const MANAGER_TIMEOUT: &str = "MANAGER_TIMEOUT";
pub const CAPITAL_PARTIAL_RETURN: &str = "CAPITAL_PARTIAL_RETURN";
pub const CAPITAL_FINAL_RETURN: &str = "CAPITAL_FINAL_RETURN";
pub const CAPITAL_RELEASED: &str = "CAPITAL_RELEASED";
pub const CAPITAL_STRANDED: &str = "CAPITAL_STRANDED";
pub const SELL_REQUESTED: &str = "SELL_REQUESTED";
pub const SELL_RESULT: &str = "SELL_RESULT";
pub const NOTIFY_SENT: &str = "NOTIFY_SENT";
pub const NOTIFY_FAILED: &str = "NOTIFY_FAILED";
pub const VESSEL_CONNECTED: &str = "VESSEL_CONNECTED";
pub const VESSEL_DISCONNECTED: &str = "VESSEL_DISCONNECTED";
pub const VESSEL_REJECTED: &str = "VESSEL_REJECTED";
pub const COMPLIANCE_LOG: &str = "COMPLIANCE_LOG";

/// Append-only sink. Write failure never aborts the calling request — it is
/// logged via `tracing::error!` as a secondary channel and otherwise swallowed.
pub struct AuditLog {
    path: PathBuf,
    file: Mutex<Option<tokio::fs::File>>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub async fn record(&self, action: &'static str, details: Value) {
        let event = serde_json::json!({
            "timestamp": Utc::now().to_rfc3339(),
            "action": action,
            "details": details,
        });
        tracing::info!(event = "relay.audit.record", action, details = %event);

        if let Err(err) = self.write_line(&event).await {
            tracing::error!(event = "relay.audit.write_failed", action, error = %err);
        }
    }

    /// Returns the last `n` recorded events, most recent last, for the activity-tail and
    /// compliance-report read endpoints. Reads the whole file back; the audit log
    /// is not expected to grow large enough within a process lifetime to need an index.
    pub async fn tail(&self, n: usize) -> Vec<Value> {
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };
        let lines: Vec<&str> = contents.lines().collect();
        let start = lines.len().saturating_sub(n);
        lines[start..]
            .iter()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    async fn write_line(&self, event: &Value) -> std::io::Result<()> {
        let mut guard = self.file.lock().await;
        if guard.is_none() {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .await?;
            *guard = Some(file);
        }
        let file = guard.as_mut().expect("file just opened");
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        file.write_all(&line).await?;
        file.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn record_appends_newline_delimited_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let log = AuditLog::new(&path);

        log.record(GATE_DENIED, serde_json::json!({"worker": "Atlas"}))
            .await;
        log.record(RATE_LIMITED, serde_json::json!({"worker": "Atlas"}))
            .await;

        let contents = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first["action"], GATE_DENIED);
    }
}
