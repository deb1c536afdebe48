//! SQLite-backed `JobDb`: a single `jobs` table with a JSON-serialized body
//! column plus indexed columns for the list/filter paths the API façade
//! needs. Connection access is funneled through `spawn_blocking`, matching
//! the pattern used for local shell execution — `rusqlite` is synchronous
//! and must never run directly on the async executor.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use uuid::Uuid;

use crate::error::DbError;
use crate::job::JobView;

use super::JobDb;

pub struct SqliteDb {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteDb {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, DbError> {
        let conn = Connection::open(path).map_err(|e| DbError::Backend(e.to_string()))?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                group_name TEXT,
                deleted INTEGER NOT NULL DEFAULT 0,
                body TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS jobs_group_name ON jobs(group_name);
            CREATE INDEX IF NOT EXISTS jobs_deleted ON jobs(deleted);",
        )
        .map_err(|e| DbError::Backend(e.to_string()))?;

        Ok(SqliteDb { conn: Arc::new(Mutex::new(conn)) })
    }

    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::open(":memory:")
    }
}

#[async_trait]
impl JobDb for SqliteDb {
    async fn get_all(&self) -> Result<Vec<JobView>, DbError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let mut stmt = conn
                .prepare("SELECT body FROM jobs")
                .map_err(|e| DbError::Backend(e.to_string()))?;
            let rows = stmt
                .query_map([], |row| row.get::<_, String>(0))
                .map_err(|e| DbError::Backend(e.to_string()))?;

            let mut out = Vec::new();
            for row in rows {
                let body = row.map_err(|e| DbError::Backend(e.to_string()))?;
                out.push(serde_json::from_str(&body).map_err(|e| DbError::Serde(e.to_string()))?);
            }
            Ok(out)
        })
        .await
        .map_err(|e| DbError::Backend(e.to_string()))?
    }

    async fn get(&self, id: Uuid) -> Result<JobView, DbError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            let body: String = conn
                .query_row("SELECT body FROM jobs WHERE id = ?1", params![id.to_string()], |row| row.get(0))
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => DbError::NotFound(id),
                    other => DbError::Backend(other.to_string()),
                })?;
            serde_json::from_str(&body).map_err(|e| DbError::Serde(e.to_string()))
        })
        .await
        .map_err(|e| DbError::Backend(e.to_string()))?
    }

    async fn save(&self, job: &JobView) -> Result<(), DbError> {
        let conn = self.conn.clone();
        let body = serde_json::to_string(job).map_err(|e| DbError::Serde(e.to_string()))?;
        let id = job.id.to_string();
        let group = job.group_name.clone();
        let deleted = job.deleted as i64;

        tokio::task::spawn_blocking(move || {
            let conn = conn.lock();
            conn.execute(
                "INSERT INTO jobs (id, group_name, deleted, body) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO UPDATE SET group_name = excluded.group_name,
                     deleted = excluded.deleted, body = excluded.body",
                params![id, group, deleted, body],
            )
            .map_err(|e| DbError::Backend(e.to_string()))
            .map(|_| ())
        })
        .await
        .map_err(|e| DbError::Backend(e.to_string()))?
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            conn.lock()
                .execute("DELETE FROM jobs WHERE id = ?1", params![id.to_string()])
                .map_err(|e| DbError::Backend(e.to_string()))
                .map(|_| ())
        })
        .await
        .map_err(|e| DbError::Backend(e.to_string()))?
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobMetadata, JobType};

    fn sample(id: Uuid) -> JobView {
        JobView {
            id,
            name: "n".to_string(),
            owner: "o".to_string(),
            group_name: Some("g".to_string()),
            content: None,
            job_type: JobType::Local,
            command: Some("echo hi".to_string()),
            remote: None,
            schedule_str: None,
            epsilon: None,
            retries: 0,
            resume_at_next_scheduled_time: false,
            template_delimiters: None,
            parent_jobs: vec![],
            dependent_jobs: vec![],
            on_failure_job: None,
            disabled: false,
            deleted: false,
            is_done: false,
            next_run_at: None,
            metadata: JobMetadata::default(),
            stats: vec![],
            is_running: false,
        }
    }

    #[tokio::test]
    async fn round_trips_through_sqlite() {
        let db = SqliteDb::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.save(&sample(id)).await.unwrap();
        let loaded = db.get(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.group_name.as_deref(), Some("g"));
    }

    #[tokio::test]
    async fn save_upserts_existing_row() {
        let db = SqliteDb::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        let mut job = sample(id);
        db.save(&job).await.unwrap();
        job.disabled = true;
        db.save(&job).await.unwrap();

        let loaded = db.get(id).await.unwrap();
        assert!(loaded.disabled);
        assert_eq!(db.get_all().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn delete_then_get_is_not_found() {
        let db = SqliteDb::open_in_memory().unwrap();
        let id = Uuid::new_v4();
        db.save(&sample(id)).await.unwrap();
        db.delete(id).await.unwrap();
        assert!(matches!(db.get(id).await, Err(DbError::NotFound(_))));
    }
}
