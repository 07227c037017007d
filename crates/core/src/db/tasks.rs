use anyhow::{Context, Result};
use rand::RngCore;
use serde_json::Value;
use sqlx::SqlitePool;

/// Status string surfaced at `GET /task/<id>`, mirroring Celery's `PENDING`/`SUCCESS`/`FAILURE`
/// vocabulary closely enough that existing Keeper polling logic needs no changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    Success,
    Failure,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "PENDING",
            TaskStatus::Success => "SUCCESS",
            TaskStatus::Failure => "FAILURE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct TaskRecord {
    pub id: String,
    pub status: TaskStatus,
    pub result: Option<Value>,
}

/// Durable replacement for Celery's in-broker `AsyncResult`: a task row is created synchronously
/// by the HTTP handler that enqueues work, then updated by the executor once the job finishes, so
/// `/task/<id>` survives a process restart between enqueue and completion.
pub struct TaskStore {
    pool: SqlitePool,
}

impl TaskStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Generates an opaque task id and inserts it as `PENDING`.
    pub async fn create(&self) -> Result<String> {
        let mut raw = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut raw);
        let id = hex::encode(raw);

        sqlx::query("INSERT INTO tasks (id, status) VALUES (?, 'PENDING')")
            .bind(&id)
            .execute(&self.pool)
            .await
            .context("inserting task row")?;
        Ok(id)
    }

    pub async fn complete(&self, id: &str, status: TaskStatus, result: &Value) -> Result<()> {
        sqlx::query(
            "UPDATE tasks SET status = ?, result = ?, updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now') WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(result.to_string())
        .bind(id)
        .execute(&self.pool)
        .await
        .context("completing task row")?;
        Ok(())
    }

    pub async fn get(&self, id: &str) -> Result<Option<TaskRecord>> {
        let row = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, status, result FROM tasks WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .context("reading task row")?;

        row.map(|(id, status, result)| {
            let status = match status.as_str() {
                "SUCCESS" => TaskStatus::Success,
                "FAILURE" => TaskStatus::Failure,
                _ => TaskStatus::Pending,
            };
            let result = result.map(|r| serde_json::from_str(&r)).transpose().context("parsing stored task result")?;
            Ok(TaskRecord { id, status, result })
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn memory_pool() -> SqlitePool {
        let pool = crate::db::connect("sqlite::memory:", 1).await.unwrap();
        crate::db::migrate(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn create_then_complete_roundtrips() {
        let store = TaskStore::new(memory_pool().await);
        let id = store.create().await.unwrap();

        let pending = store.get(&id).await.unwrap().unwrap();
        assert_eq!(pending.status, TaskStatus::Pending);
        assert!(pending.result.is_none());

        store.complete(&id, TaskStatus::Success, &serde_json::json!({"task_id": "abc"})).await.unwrap();
        let done = store.get(&id).await.unwrap().unwrap();
        assert_eq!(done.status, TaskStatus::Success);
        assert_eq!(done.result.unwrap()["task_id"], "abc");
    }
}
