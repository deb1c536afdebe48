//! The in-memory job registry: drives every job's timer, reloads from
//! `JobDb` at startup, periodically persists, and periodically compacts
//! old stats.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::db::JobDb;
use crate::error::CacheError;
use crate::gate::{GateSubject, RunningGate};
use crate::job::{Job, NewJob, TimerHandle};
use crate::runner::{RunOutcome, Runner};
use crate::stats::{self, StatsSnapshot};

#[derive(Debug, Clone)]
pub struct JobCacheConfig {
    pub default_concurrency: u32,
    /// `None` means persist on every write instead of on a timer.
    pub persist_every: Option<StdDuration>,
    pub retention: Option<chrono::Duration>,
}

impl Default for JobCacheConfig {
    fn default() -> Self {
        JobCacheConfig {
            default_concurrency: crate::gate::DEFAULT_CONCURRENCY,
            persist_every: None,
            retention: None,
        }
    }
}

pub struct JobCache {
    registry: RwLock<HashMap<Uuid, Arc<Job>>>,
    db: Arc<dyn JobDb>,
    gate: Arc<dyn RunningGate>,
    runner: Arc<Runner>,
    config: JobCacheConfig,
    persist_on_write: AtomicBool,
}

impl JobCache {
    pub fn new(db: Arc<dyn JobDb>, gate: Arc<dyn RunningGate>, config: JobCacheConfig) -> Self {
        JobCache {
            registry: RwLock::new(HashMap::new()),
            db,
            runner: Arc::new(Runner::new(gate.clone())),
            gate,
            config,
            persist_on_write: AtomicBool::new(true),
        }
    }

    pub fn get(&self, id: Uuid) -> Option<Arc<Job>> {
        self.registry.read().get(&id).cloned()
    }

    pub fn get_all(&self) -> Vec<Arc<Job>> {
        self.registry.read().values().cloned().collect()
    }

    /// All jobs as wire views, annotated with their live `is_running` state.
    pub async fn list_views(&self) -> Vec<crate::job::JobView> {
        let jobs = self.get_all();
        let subjects: Vec<GateSubject> =
            jobs.iter().map(|j| GateSubject { id: j.id, group: j.group_name.clone() }).collect();
        let running = self.gate.scan_running(&subjects).await.unwrap_or_default();

        jobs.into_iter()
            .map(|j| {
                let mut view = j.view();
                view.is_running = running.get(&j.id).copied().unwrap_or(false);
                view
            })
            .collect()
    }

    pub async fn system_stats(&self) -> StatsSnapshot {
        stats::aggregate(&self.list_views().await)
    }

    fn dependency_snapshot(&self) -> HashMap<Uuid, Vec<Uuid>> {
        self.registry
            .read()
            .iter()
            .map(|(id, job)| (*id, job.dependent_jobs()))
            .collect()
    }

    #[instrument(skip(self, input))]
    pub async fn create(self: &Arc<Self>, input: NewJob) -> Result<Arc<Job>, CacheError> {
        let id = Uuid::new_v4();
        let parents = input.parent_jobs.clone();
        let has_schedule = input.schedule_str.as_deref().map(|s| !s.trim().is_empty()).unwrap_or(false);

        let existing = self.dependency_snapshot();
        let job = Arc::new(Job::new(id, input, &existing)?);

        {
            let mut reg = self.registry.write();
            reg.insert(id, job.clone());
        }

        for parent_id in &parents {
            if let Some(parent) = self.get(*parent_id) {
                parent.add_dependent(id);
            }
        }
        for dep_id in job.dependent_jobs() {
            if let Some(dep) = self.get(dep_id) {
                dep.add_parent(id);
            }
        }

        self.persist_one(&job).await?;

        if !parents.is_empty() {
            info!(job_id = %id, "job has parents, not arming its own timer");
        } else if !has_schedule {
            self.run_once_async(job.clone());
        } else {
            self.arm_timer(job.clone(), None);
        }

        Ok(job)
    }

    async fn persist_one(&self, job: &Arc<Job>) -> Result<(), CacheError> {
        if self.persist_on_write.load(Ordering::Relaxed) {
            self.db.save(&job.view()).await?;
        }
        Ok(())
    }

    pub async fn persist_all(&self) -> Result<(), CacheError> {
        for job in self.get_all() {
            self.db.save(&job.view()).await?;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn disable(&self, id: Uuid) -> Result<(), CacheError> {
        let job = self.get(id).ok_or(CacheError::DoesntExist(id))?;
        if job.is_done() {
            return Err(CacheError::DoneJobDisable(id));
        }
        job.set_disabled(true);
        if let Err(e) = self.persist_one(&job).await {
            job.set_disabled(false);
            return Err(e);
        }
        job.cancel_timer();
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn enable(self: &Arc<Self>, id: Uuid) -> Result<(), CacheError> {
        let job = self.get(id).ok_or(CacheError::DoesntExist(id))?;
        job.set_disabled(false);
        self.persist_one(&job).await?;
        if job.schedule().is_some() && job.should_start_waiting() {
            self.arm_timer(job, None);
        }
        Ok(())
    }

    #[instrument(skip(self))]
    pub async fn delete(self: &Arc<Self>, id: Uuid, logical: bool) -> Result<(), CacheError> {
        let job = self.get(id).ok_or(CacheError::DoesntExist(id))?;

        if self.gate.is_running(id, job.group_name.as_deref()).await.unwrap_or(false) {
            return Err(CacheError::RunningJobDelete(id));
        }

        if logical && job.has_stats() {
            job.set_deleted(true);
            job.cancel_timer();
            self.persist_one(&job).await?;
        } else {
            self.db.delete(id).await?;
            job.cancel_timer();
            self.registry.write().remove(&id);
        }

        let parents = job.parent_jobs();
        let children = job.dependent_jobs();
        let cache = self.clone();
        tokio::spawn(cache.detach(id, parents, children, logical));

        Ok(())
    }

    fn detach(
        self: Arc<Self>,
        id: Uuid,
        parents: Vec<Uuid>,
        children: Vec<Uuid>,
        logical: bool,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'static>> {
        Box::pin(async move {
            for parent_id in &parents {
                match self.get(*parent_id) {
                    Some(parent) => parent.remove_dependent(id),
                    None => warn!(parent = %parent_id, "parent job missing during detach"),
                }
            }

            for child_id in &children {
                let Some(child) = self.get(*child_id) else {
                    warn!(child = %child_id, "child job missing during detach");
                    continue;
                };
                child.remove_parent(id);
                if child.parent_jobs().is_empty() {
                    info!(child = %child_id, "child orphaned, cascading delete");
                    if let Err(e) = self.delete(*child_id, logical).await {
                        warn!(child = %child_id, error = %e, "failed to cascade-delete orphaned child");
                    }
                }
            }
        })
    }

    pub async fn delete_all(self: &Arc<Self>) -> Result<(), CacheError> {
        let ids: Vec<Uuid> = self.get_all().iter().map(|j| j.id).collect();
        for id in ids {
            if self.get(id).is_some() {
                self.delete(id, false).await?;
            }
        }
        Ok(())
    }

    fn run_once_async(self: &Arc<Self>, job: Arc<Job>) {
        let cache = self.clone();
        tokio::spawn(async move {
            cache.run_job(job).await;
        });
    }

    /// Cancel any existing timer and run this job immediately (manual start
    /// and dependency/on-failure cascades both go through this path).
    pub async fn run_job_now(self: &Arc<Self>, job: Arc<Job>) {
        job.cancel_timer();
        self.run_job(job).await;
    }

    #[instrument(skip(self, job), fields(job_id = %job.id))]
    async fn run_job(self: &Arc<Self>, job: Arc<Job>) {
        let outcome = self.runner.run(&job, self, self.config.default_concurrency).await;

        match outcome {
            RunOutcome::BeyondConcurrency => {
                if let Some(schedule) = job.schedule() {
                    let wait = schedule.interval.relative_to(Utc::now()).to_std().unwrap_or(StdDuration::ZERO);
                    self.arm_timer(job, Some(wait));
                }
            }
            RunOutcome::Skipped => {}
            RunOutcome::Completed => {
                if job.should_start_waiting() {
                    self.arm_timer(job, None);
                } else {
                    job.set_is_done(true);
                }
            }
        }
    }

    /// Arm a job's timer. `wait_override` bypasses the schedule's own
    /// next-fire computation (used for the concurrency-cap backoff).
    fn arm_timer(self: &Arc<Self>, job: Arc<Job>, wait_override: Option<StdDuration>) {
        let Some(schedule) = job.schedule() else { return };

        let wait = match wait_override {
            Some(w) => w,
            None => {
                let now = Utc::now();
                let last = job.metadata().last_attempted_run;
                schedule
                    .wait_duration(now, last, job.resume_at_next_scheduled_time)
                    .to_std()
                    .unwrap_or(StdDuration::ZERO)
            }
        };
        job.set_next_run_at(Some(Utc::now() + chrono::Duration::from_std(wait).unwrap_or_default()));

        let (tx, mut rx) = watch::channel(false);
        let cache = self.clone();
        let timer_job = job.clone();
        let task = tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    cache.run_job(timer_job).await;
                }
                _ = rx.changed() => {}
            }
        });
        job.set_timer(Some(TimerHandle::new(tx, task)));
    }

    #[instrument(skip(self))]
    pub async fn start(self: &Arc<Self>) -> Result<(), CacheError> {
        let views = self.db.get_all().await?;
        let subjects: Vec<GateSubject> =
            views.iter().map(|v| GateSubject { id: v.id, group: v.group_name.clone() }).collect();
        if let Err(e) = self.gate.clear_all(&subjects).await {
            warn!(error = %e, "failed to clear stale gate keys at startup");
        }

        for view in views {
            let job = Arc::new(Job::from_view(view));
            self.registry.write().insert(job.id, job.clone());
            if job.schedule().is_some() && job.should_start_waiting() {
                self.arm_timer(job, None);
            }
        }

        if let Some(every) = self.config.persist_every {
            self.persist_on_write.store(false, Ordering::Relaxed);
            self.spawn_persister(every);
        } else {
            self.persist_on_write.store(true, Ordering::Relaxed);
        }

        if let Some(retention) = self.config.retention {
            self.spawn_retention_compactor(retention);
        }

        info!(jobs = self.get_all().len(), "job cache started");
        Ok(())
    }

    fn spawn_persister(self: &Arc<Self>, every: StdDuration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            loop {
                ticker.tick().await;
                if let Err(e) = cache.persist_all().await {
                    warn!(error = %e, "periodic persist failed");
                }
            }
        });
    }

    fn spawn_retention_compactor(self: &Arc<Self>, retention: chrono::Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(StdDuration::from_secs(60));
            loop {
                ticker.tick().await;
                let cutoff = Utc::now() - retention;
                for job in cache.get_all() {
                    job.retention_compact(cutoff);
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;
    use crate::gate::memory::MemoryGate;

    fn test_cache() -> Arc<JobCache> {
        Arc::new(JobCache::new(Arc::new(MemoryDb::new()), Arc::new(MemoryGate::new()), JobCacheConfig::default()))
    }

    #[tokio::test]
    async fn create_without_schedule_runs_once_and_finishes_done() {
        let cache = test_cache();
        let job = cache
            .create(NewJob {
                name: "j".to_string(),
                owner: "o".to_string(),
                command: Some("echo hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        for _ in 0..20 {
            if job.is_done() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
        assert!(job.is_done());
        assert_eq!(job.metadata().success_count, 1);
        assert!(!job.has_timer());
    }

    #[tokio::test]
    async fn disable_done_job_is_rejected() {
        let cache = test_cache();
        let job = cache
            .create(NewJob {
                name: "j".to_string(),
                owner: "o".to_string(),
                command: Some("echo hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        for _ in 0..20 {
            if job.is_done() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }
        let err = cache.disable(job.id).await.unwrap_err();
        assert!(matches!(err, CacheError::DoneJobDisable(_)));
    }

    #[tokio::test]
    async fn logical_delete_keeps_record_when_stats_exist() {
        let cache = test_cache();
        let job = cache
            .create(NewJob {
                name: "j".to_string(),
                owner: "o".to_string(),
                command: Some("echo hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        for _ in 0..20 {
            if job.has_stats() {
                break;
            }
            tokio::time::sleep(StdDuration::from_millis(50)).await;
        }

        cache.delete(job.id, true).await.unwrap();
        assert!(cache.get(job.id).is_some());
        assert!(cache.get(job.id).unwrap().is_deleted());
    }

    #[tokio::test]
    async fn physical_delete_removes_from_registry() {
        let cache = test_cache();
        let job = cache
            .create(NewJob {
                name: "j".to_string(),
                owner: "o".to_string(),
                command: Some("echo hi".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        cache.delete(job.id, false).await.unwrap();
        assert!(cache.get(job.id).is_none());
    }

    #[tokio::test]
    async fn dependency_cascade_runs_child_after_parent_success() {
        let cache = test_cache();

        let future_schedule =
            format!("R0/{}/PT0S", (Utc::now() + chrono::Duration::hours(1)).to_rfc3339());
        let parent = cache
            .create(NewJob {
                name: "parent".to_string(),
                owner: "o".to_string(),
                command: Some("echo parent".to_string()),
                schedule_str: Some(future_schedule),
                ..Default::default()
            })
            .await
            .unwrap();

        let child = cache
            .create(NewJob {
                name: "child".to_string(),
                owner: "o".to_string(),
                command: Some("echo child".to_string()),
                parent_jobs: vec![parent.id],
                ..Default::default()
            })
            .await
            .unwrap();
        parent.add_dependent(child.id);

        cache.run_job_now(parent.clone()).await;

        assert_eq!(child.metadata().success_count, 1);
    }
}
