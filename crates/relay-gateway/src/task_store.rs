//! Durable task record store with an in-memory FIFO queue per vessel.
//!
//! Backed by `sqlx` against an embedded SQLite database: a task record is a single flat table
//! with upsert semantics and no multi-writer coordination requirement, so an embedded database
//! is enough and keeps tests self-contained against `sqlite::memory:`.

use chrono::{DateTime, Utc};
use relay_core::task::{Task, TaskStatus, TaskType};
use sqlx::{Row, SqlitePool};
use std::collections::{HashMap, VecDeque};
use uuid::Uuid;

pub struct TaskStore {
    pool: SqlitePool,
    queues: tokio::sync::Mutex<HashMap<String, VecDeque<Task>>>,
}

impl TaskStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                task_id TEXT PRIMARY KEY,
                vessel_id TEXT NOT NULL,
                task_type TEXT NOT NULL,
                payload TEXT NOT NULL,
                priority INTEGER NOT NULL,
                timeout_seconds INTEGER NOT NULL,
                status TEXT NOT NULL,
                submitted_at TEXT NOT NULL,
                completed_at TEXT,
                result TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;
        Ok(Self {
            pool,
            queues: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    /// Creates, persists, and enqueues a task on its vessel's FIFO queue.
    pub async fn submit(&self, task: Task) -> anyhow::Result<()> {
        self.persist(&task).await?;
        self.queues
            .lock()
            .await
            .entry(task.vessel_id.clone())
            .or_default()
            .push_back(task);
        Ok(())
    }

    /// Pops the next queued task for a vessel, in FIFO order, marking it `sent`.
    pub async fn next_for_vessel(&self, vessel_id: &str) -> anyhow::Result<Option<Task>> {
        let popped = {
            let mut queues = self.queues.lock().await;
            queues.get_mut(vessel_id).and_then(|q| q.pop_front())
        };
        let Some(mut task) = popped else {
            return Ok(None);
        };
        task.status = TaskStatus::Sent;
        self.persist(&task).await?;
        Ok(Some(task))
    }

    pub async fn get(&self, task_id: Uuid) -> anyhow::Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE task_id = ?")
            .bind(task_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| Self::from_row(&r)).transpose()
    }

    pub async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        result: Option<serde_json::Value>,
    ) -> anyhow::Result<()> {
        let Some(mut task) = self.get(task_id).await? else {
            return Ok(());
        };
        task.status = status;
        task.result = result;
        if status.is_terminal() {
            task.completed_at = Some(Utc::now());
        }
        self.persist(&task).await
    }

    async fn persist(&self, task: &Task) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (
                task_id, vessel_id, task_type, payload, priority, timeout_seconds,
                status, submitted_at, completed_at, result
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(task_id) DO UPDATE SET
                status = excluded.status,
                completed_at = excluded.completed_at,
                result = excluded.result
            "#,
        )
        .bind(task.task_id.to_string())
        .bind(&task.vessel_id)
        .bind(serde_json::to_string(&task.task_type)?)
        .bind(serde_json::to_string(&task.payload)?)
        .bind(task.priority)
        .bind(task.timeout_seconds as i64)
        .bind(serde_json::to_string(&task.status)?)
        .bind(task.submitted_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(task.result.as_ref().map(|r| r.to_string()))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    fn from_row(row: &sqlx::sqlite::SqliteRow) -> anyhow::Result<Task> {
        let task_id: String = row.try_get("task_id")?;
        let task_type: String = row.try_get("task_type")?;
        let payload: String = row.try_get("payload")?;
        let status: String = row.try_get("status")?;
        let submitted_at: String = row.try_get("submitted_at")?;
        let completed_at: Option<String> = row.try_get("completed_at")?;
        let result: Option<String> = row.try_get("result")?;

        Ok(Task {
            task_id: Uuid::parse_str(&task_id)?,
            vessel_id: row.try_get("vessel_id")?,
            task_type: serde_json::from_str::<TaskType>(&task_type)?,
            payload: serde_json::from_str(&payload)?,
            priority: row.try_get("priority")?,
            timeout_seconds: row.try_get::<i64, _>("timeout_seconds")? as u64,
            status: serde_json::from_str::<TaskStatus>(&status)?,
            submitted_at: submitted_at.parse::<DateTime<Utc>>()?,
            completed_at: completed_at
                .map(|s| s.parse::<DateTime<Utc>>())
                .transpose()?,
            result: result.map(|s| serde_json::from_str(&s)).transpose()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn store() -> TaskStore {
        TaskStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn submit_then_get_round_trips() {
        let store = store().await;
        let task = Task::new("vessel-1", TaskType::Agent, json!({"prompt": "hi"}), 0, 300);
        let task_id = task.task_id;
        store.submit(task).await.unwrap();

        let fetched = store.get(task_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Queued);
    }

    #[tokio::test]
    async fn next_for_vessel_is_fifo_and_marks_sent() {
        let store = store().await;
        let t1 = Task::new("vessel-1", TaskType::Generic, json!({}), 0, 60);
        let t2 = Task::new("vessel-1", TaskType::Generic, json!({}), 0, 60);
        let (id1, id2) = (t1.task_id, t2.task_id);
        store.submit(t1).await.unwrap();
        store.submit(t2).await.unwrap();

        let first = store.next_for_vessel("vessel-1").await.unwrap().unwrap();
        assert_eq!(first.task_id, id1);
        assert_eq!(first.status, TaskStatus::Sent);

        let second = store.next_for_vessel("vessel-1").await.unwrap().unwrap();
        assert_eq!(second.task_id, id2);

        assert!(store.next_for_vessel("vessel-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn update_status_persists_terminal_state() {
        let store = store().await;
        let task = Task::new("vessel-1", TaskType::Shell, json!({}), 0, 60);
        let task_id = task.task_id;
        store.submit(task).await.unwrap();

        store
            .update_status(task_id, TaskStatus::Completed, Some(json!({"ok": true})))
            .await
            .unwrap();

        let fetched = store.get(task_id).await.unwrap().unwrap();
        assert_eq!(fetched.status, TaskStatus::Completed);
        assert!(fetched.completed_at.is_some());
        assert_eq!(fetched.result, Some(json!({"ok": true})));
    }
}
