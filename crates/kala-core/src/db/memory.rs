//! In-memory `JobDb`, used by tests and by configurations with no
//! persistence backend configured.

use async_trait::async_trait;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::DbError;
use crate::job::JobView;

use super::JobDb;

#[derive(Default)]
pub struct MemoryDb {
    jobs: DashMap<Uuid, JobView>,
}

impl MemoryDb {
    pub fn new() -> Self {
        MemoryDb::default()
    }
}

#[async_trait]
impl JobDb for MemoryDb {
    async fn get_all(&self) -> Result<Vec<JobView>, DbError> {
        Ok(self.jobs.iter().map(|e| e.value().clone()).collect())
    }

    async fn get(&self, id: Uuid) -> Result<JobView, DbError> {
        self.jobs.get(&id).map(|e| e.value().clone()).ok_or(DbError::NotFound(id))
    }

    async fn save(&self, job: &JobView) -> Result<(), DbError> {
        self.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<(), DbError> {
        self.jobs.remove(&id);
        Ok(())
    }

    async fn close(&self) -> Result<(), DbError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(id: Uuid) -> JobView {
        JobView {
            id,
            name: "n".to_string(),
            owner: "o".to_string(),
            group_name: None,
            content: None,
            job_type: crate::job::JobType::Local,
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
            metadata: Default::default(),
            stats: vec![],
            is_running: false,
        }
    }

    #[tokio::test]
    async fn round_trips_a_job() {
        let db = MemoryDb::new();
        let id = Uuid::new_v4();
        db.save(&sample(id)).await.unwrap();
        let loaded = db.get(id).await.unwrap();
        assert_eq!(loaded.id, id);
        assert_eq!(loaded.name, "n");
    }

    #[tokio::test]
    async fn missing_job_is_not_found() {
        let db = MemoryDb::new();
        let err = db.get(Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, DbError::NotFound(_)));
    }

    #[tokio::test]
    async fn delete_removes_from_get_all() {
        let db = MemoryDb::new();
        let id = Uuid::new_v4();
        db.save(&sample(id)).await.unwrap();
        db.delete(id).await.unwrap();
        assert!(db.get_all().await.unwrap().is_empty());
    }
}
