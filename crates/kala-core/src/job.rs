//! The scheduled unit: identity, execution config, graph links, and the
//! mutable runtime state (flags, metadata, stats, timer handle) guarded by
//! one per-job lock.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::duration::IsoDuration;
use crate::error::CacheError;
use crate::schedule::Schedule;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Local,
    Remote,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub body: String,
    #[serde(default)]
    pub headers: HashMap<String, Vec<String>>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_seconds: u64,
    #[serde(default = "default_expected_codes")]
    pub expected_response_codes: Vec<u16>,
}

fn default_method() -> String {
    "GET".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_expected_codes() -> Vec<u16> {
    vec![200]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobStat {
    pub job_id: Uuid,
    pub ran_at: DateTime<Utc>,
    pub finish_at: Option<DateTime<Utc>>,
    pub execution_duration_ms: u64,
    pub success: bool,
    pub error: Option<String>,
    pub response: Option<String>,
    pub number_of_retries: u32,
}

impl JobStat {
    pub fn seed(job_id: Uuid, ran_at: DateTime<Utc>) -> Self {
        JobStat {
            job_id,
            ran_at,
            finish_at: None,
            execution_duration_ms: 0,
            success: false,
            error: None,
            response: None,
            number_of_retries: 0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMetadata {
    pub success_count: u64,
    pub error_count: u64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<DateTime<Utc>>,
    pub last_attempted_run: Option<DateTime<Utc>>,
    pub number_of_finished_runs: u64,
}

/// The fully owned, serializable snapshot of a job: static descriptors plus
/// a point-in-time copy of its mutable state. This is what `JobDB` persists
/// and what the API façade returns; it carries no lock or timer handle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobView {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub group_name: Option<String>,
    pub content: Option<String>,
    pub job_type: JobType,
    pub command: Option<String>,
    pub remote: Option<RemoteConfig>,
    pub schedule_str: Option<String>,
    pub epsilon: Option<IsoDuration>,
    pub retries: u32,
    pub resume_at_next_scheduled_time: bool,
    pub template_delimiters: Option<String>,
    pub parent_jobs: Vec<Uuid>,
    pub dependent_jobs: Vec<Uuid>,
    pub on_failure_job: Option<Uuid>,
    pub disabled: bool,
    pub deleted: bool,
    pub is_done: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub metadata: JobMetadata,
    pub stats: Vec<JobStat>,
    #[serde(default)]
    pub is_running: bool,
}

/// Input accepted when creating a new job; everything derived (id, metadata,
/// stats, lifecycle flags) is filled in by [`Job::new`].
#[derive(Debug, Clone, Default)]
pub struct NewJob {
    pub name: String,
    pub owner: String,
    pub group_name: Option<String>,
    pub content: Option<String>,
    pub job_type: Option<JobType>,
    pub command: Option<String>,
    pub remote: Option<RemoteConfig>,
    pub schedule_str: Option<String>,
    pub epsilon: Option<IsoDuration>,
    pub retries: u32,
    pub resume_at_next_scheduled_time: bool,
    pub template_delimiters: Option<String>,
    pub parent_jobs: Vec<Uuid>,
    pub dependent_jobs: Vec<Uuid>,
    pub on_failure_job: Option<Uuid>,
}

#[derive(Debug)]
pub struct TimerHandle {
    cancel: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn new(cancel: watch::Sender<bool>, task: JoinHandle<()>) -> Self {
        TimerHandle { cancel, task }
    }

    fn cancel(&self) {
        let _ = self.cancel.send(true);
        self.task.abort();
    }
}

#[derive(Debug)]
struct JobState {
    schedule: Option<Schedule>,
    parent_jobs: Vec<Uuid>,
    dependent_jobs: Vec<Uuid>,
    on_failure_job: Option<Uuid>,
    disabled: bool,
    deleted: bool,
    is_done: bool,
    next_run_at: Option<DateTime<Utc>>,
    metadata: JobMetadata,
    stats: Vec<JobStat>,
    timer: Option<TimerHandle>,
}

#[derive(Debug)]
pub struct Job {
    pub id: Uuid,
    pub name: String,
    pub owner: String,
    pub group_name: Option<String>,
    pub content: Option<String>,
    pub job_type: JobType,
    pub command: Option<String>,
    pub remote: Option<RemoteConfig>,
    pub schedule_str: Option<String>,
    pub epsilon: Option<IsoDuration>,
    pub retries: u32,
    pub resume_at_next_scheduled_time: bool,
    pub template_delimiters: Option<String>,
    state: RwLock<JobState>,
}

impl Job {
    /// Validate and construct a new job, including the cycle check over the
    /// declared parent/dependent set (`existing` is the rest of the registry).
    pub fn new(id: Uuid, input: NewJob, existing: &HashMap<Uuid, Vec<Uuid>>) -> Result<Self, CacheError> {
        if input.name.trim().is_empty() {
            return Err(CacheError::InvalidJob("name must not be empty".to_string()));
        }

        let job_type = input.job_type.unwrap_or(JobType::Local);
        match job_type {
            JobType::Local => {
                if input.command.as_deref().unwrap_or("").trim().is_empty() {
                    return Err(CacheError::InvalidJob("local job requires a command".to_string()));
                }
            }
            JobType::Remote => {
                if input.remote.is_none() {
                    return Err(CacheError::InvalidJob("remote job requires remote properties".to_string()));
                }
            }
        }

        let schedule = match &input.schedule_str {
            Some(s) if !s.trim().is_empty() => {
                Some(Schedule::parse(s, false).map_err(|e| CacheError::InvalidJob(e.to_string()))?)
            }
            _ => None,
        };

        if would_cycle(id, &input.parent_jobs, &input.dependent_jobs, existing) {
            return Err(CacheError::CyclicDependency);
        }

        Ok(Job {
            id,
            name: input.name,
            owner: input.owner,
            group_name: input.group_name,
            content: input.content,
            job_type,
            command: input.command,
            remote: input.remote,
            schedule_str: input.schedule_str,
            epsilon: input.epsilon,
            retries: input.retries,
            resume_at_next_scheduled_time: input.resume_at_next_scheduled_time,
            template_delimiters: input.template_delimiters,
            state: RwLock::new(JobState {
                schedule,
                parent_jobs: input.parent_jobs,
                dependent_jobs: input.dependent_jobs,
                on_failure_job: input.on_failure_job,
                disabled: false,
                deleted: false,
                is_done: false,
                next_run_at: None,
                metadata: JobMetadata::default(),
                stats: Vec::new(),
                timer: None,
            }),
        })
    }

    /// Reconstruct a job from a persisted/transmitted [`JobView`], with no
    /// timer armed (the cache arms one after load if appropriate).
    pub fn from_view(view: JobView) -> Self {
        Job {
            id: view.id,
            name: view.name,
            owner: view.owner,
            group_name: view.group_name,
            content: view.content,
            job_type: view.job_type,
            command: view.command,
            remote: view.remote,
            schedule_str: view.schedule_str.clone(),
            epsilon: view.epsilon,
            retries: view.retries,
            resume_at_next_scheduled_time: view.resume_at_next_scheduled_time,
            template_delimiters: view.template_delimiters,
            state: RwLock::new(JobState {
                schedule: view
                    .schedule_str
                    .as_deref()
                    .filter(|s| !s.trim().is_empty())
                    .and_then(|s| Schedule::parse(s, false).ok()),
                parent_jobs: view.parent_jobs,
                dependent_jobs: view.dependent_jobs,
                on_failure_job: view.on_failure_job,
                disabled: view.disabled,
                deleted: view.deleted,
                is_done: view.is_done,
                next_run_at: view.next_run_at,
                metadata: view.metadata,
                stats: view.stats,
                timer: None,
            }),
        }
    }

    pub fn view(&self) -> JobView {
        let s = self.state.read();
        JobView {
            id: self.id,
            name: self.name.clone(),
            owner: self.owner.clone(),
            group_name: self.group_name.clone(),
            content: self.content.clone(),
            job_type: self.job_type,
            command: self.command.clone(),
            remote: self.remote.clone(),
            schedule_str: self.schedule_str.clone(),
            epsilon: self.epsilon,
            retries: self.retries,
            resume_at_next_scheduled_time: self.resume_at_next_scheduled_time,
            template_delimiters: self.template_delimiters.clone(),
            parent_jobs: s.parent_jobs.clone(),
            dependent_jobs: s.dependent_jobs.clone(),
            on_failure_job: s.on_failure_job,
            disabled: s.disabled,
            deleted: s.deleted,
            is_done: s.is_done,
            next_run_at: s.next_run_at,
            metadata: s.metadata.clone(),
            stats: s.stats.clone(),
            is_running: false,
        }
    }

    pub fn schedule(&self) -> Option<Schedule> {
        self.state.read().schedule
    }

    pub fn is_disabled(&self) -> bool {
        self.state.read().disabled
    }

    pub fn is_deleted(&self) -> bool {
        self.state.read().deleted
    }

    pub fn is_done(&self) -> bool {
        self.state.read().is_done
    }

    pub fn has_stats(&self) -> bool {
        !self.state.read().stats.is_empty()
    }

    pub fn stats(&self) -> Vec<JobStat> {
        self.state.read().stats.clone()
    }

    pub fn metadata(&self) -> JobMetadata {
        self.state.read().metadata.clone()
    }

    pub fn next_run_at(&self) -> Option<DateTime<Utc>> {
        self.state.read().next_run_at
    }

    pub fn parent_jobs(&self) -> Vec<Uuid> {
        self.state.read().parent_jobs.clone()
    }

    pub fn dependent_jobs(&self) -> Vec<Uuid> {
        self.state.read().dependent_jobs.clone()
    }

    pub fn on_failure_job(&self) -> Option<Uuid> {
        self.state.read().on_failure_job
    }

    pub fn set_disabled(&self, disabled: bool) {
        self.state.write().disabled = disabled;
    }

    pub fn set_deleted(&self, deleted: bool) {
        self.state.write().deleted = deleted;
    }

    pub fn set_is_done(&self, is_done: bool) {
        self.state.write().is_done = is_done;
    }

    pub fn set_next_run_at(&self, at: Option<DateTime<Utc>>) {
        self.state.write().next_run_at = at;
    }

    pub fn add_parent(&self, id: Uuid) {
        let mut s = self.state.write();
        if !s.parent_jobs.contains(&id) {
            s.parent_jobs.push(id);
        }
    }

    pub fn remove_parent(&self, id: Uuid) {
        self.state.write().parent_jobs.retain(|p| *p != id);
    }

    pub fn add_dependent(&self, id: Uuid) {
        let mut s = self.state.write();
        if !s.dependent_jobs.contains(&id) {
            s.dependent_jobs.push(id);
        }
    }

    pub fn remove_dependent(&self, id: Uuid) {
        self.state.write().dependent_jobs.retain(|d| *d != id);
    }

    /// Record the start of an attempt and return a freshly seeded stat.
    pub fn record_attempt_start(&self, now: DateTime<Utc>) -> JobStat {
        self.state.write().metadata.last_attempted_run = Some(now);
        JobStat::seed(self.id, now)
    }

    /// Append the finished stat and update metadata/counters in one critical
    /// section (copy-out/apply-in rather than re-entering the lock).
    pub fn finalize_run(&self, stat: JobStat) {
        let mut s = self.state.write();
        if stat.success {
            s.metadata.success_count += 1;
            s.metadata.last_success = stat.finish_at;
        } else {
            s.metadata.error_count += 1;
            s.metadata.last_error = stat.finish_at;
        }
        s.metadata.number_of_finished_runs += 1;
        s.stats.push(stat);
    }

    /// `true` iff `!disabled` and the repeat budget has not been exhausted.
    pub fn should_start_waiting(&self) -> bool {
        let s = self.state.read();
        if s.disabled {
            return false;
        }
        match s.schedule {
            None => false,
            Some(sched) => {
                sched.times_to_repeat == crate::schedule::REPEAT_FOREVER
                    || (s.stats.len() as i64) <= sched.times_to_repeat
            }
        }
    }

    /// `true` when retries remain and, if an epsilon window is configured,
    /// the elapsed time since the scheduled fire is still within it.
    pub fn should_retry(&self, current_retries: u32, now: DateTime<Utc>) -> bool {
        if current_retries == 0 {
            return false;
        }
        match self.epsilon {
            None => true,
            Some(eps) => {
                let target = self.state.read().next_run_at.unwrap_or(now);
                let elapsed = now - target;
                elapsed < eps.relative_to(now)
            }
        }
    }

    /// Replace the timer handle, cancelling whatever was previously armed.
    pub fn set_timer(&self, handle: Option<TimerHandle>) {
        let mut s = self.state.write();
        if let Some(old) = s.timer.take() {
            old.cancel();
        }
        s.timer = handle;
    }

    pub fn cancel_timer(&self) {
        self.set_timer(None);
    }

    pub fn has_timer(&self) -> bool {
        self.state.read().timer.is_some()
    }

    /// Drop every stat whose `ran_at` predates `cutoff`.
    pub fn retention_compact(&self, cutoff: DateTime<Utc>) {
        let mut s = self.state.write();
        if let Some(i) = s.stats.iter().rposition(|st| st.ran_at < cutoff) {
            s.stats.drain(0..=i);
        }
    }
}

fn would_cycle(
    new_id: Uuid,
    parents: &[Uuid],
    dependents: &[Uuid],
    existing: &HashMap<Uuid, Vec<Uuid>>,
) -> bool {
    // existing maps job id -> its dependent_jobs. A cycle exists if, starting
    // from any node this job points at (its dependents), we can reach back
    // to new_id or to one of new_id's own parents (who would then be
    // downstream of a node that is upstream of them).
    let mut start: Vec<Uuid> = dependents.to_vec();
    start.extend(parents.iter().flat_map(|p| existing.get(p).cloned().unwrap_or_default()));

    let mut seen: std::collections::HashSet<Uuid> = std::collections::HashSet::new();
    let mut stack = start;
    while let Some(node) = stack.pop() {
        if node == new_id || parents.contains(&node) {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(next) = existing.get(&node) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(name: &str) -> NewJob {
        NewJob {
            name: name.to_string(),
            owner: "owner".to_string(),
            command: Some("echo hi".to_string()),
            retries: 0,
            ..Default::default()
        }
    }

    #[test]
    fn rejects_empty_name() {
        let mut input = sample("");
        input.name = String::new();
        let existing = HashMap::new();
        let err = Job::new(Uuid::new_v4(), input, &existing).unwrap_err();
        assert!(matches!(err, CacheError::InvalidJob(_)));
    }

    #[test]
    fn rejects_local_job_without_command() {
        let mut input = sample("j");
        input.command = None;
        let existing = HashMap::new();
        let err = Job::new(Uuid::new_v4(), input, &existing).unwrap_err();
        assert!(matches!(err, CacheError::InvalidJob(_)));
    }

    #[test]
    fn rejects_remote_job_without_remote_config() {
        let mut input = sample("j");
        input.job_type = Some(JobType::Remote);
        input.command = None;
        let existing = HashMap::new();
        let err = Job::new(Uuid::new_v4(), input, &existing).unwrap_err();
        assert!(matches!(err, CacheError::InvalidJob(_)));
    }

    #[test]
    fn detects_direct_cycle() {
        let a = Uuid::new_v4();
        let mut existing = HashMap::new();
        existing.insert(a, vec![]);

        let new_id = Uuid::new_v4();
        let mut input = sample("child");
        input.parent_jobs = vec![a];
        input.dependent_jobs = vec![a];
        let err = Job::new(new_id, input, &existing).unwrap_err();
        assert!(matches!(err, CacheError::CyclicDependency));
    }

    #[test]
    fn no_false_positive_on_diamond_shape() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let mut existing = HashMap::new();
        existing.insert(a, vec![b]);
        existing.insert(b, vec![]);

        let new_id = Uuid::new_v4();
        let mut input = sample("d");
        input.parent_jobs = vec![a, b];
        let job = Job::new(new_id, input, &existing).unwrap();
        assert_eq!(job.parent_jobs(), vec![a, b]);
    }

    #[test]
    fn should_start_waiting_respects_repeat_budget() {
        let mut input = sample("r");
        input.schedule_str = Some(format!("R2/{}/PT1S", Utc::now().to_rfc3339()));
        let existing = HashMap::new();
        let job = Job::new(Uuid::new_v4(), input, &existing).unwrap();
        assert!(job.should_start_waiting());

        for _ in 0..3 {
            job.finalize_run(JobStat::seed(job.id, Utc::now()));
        }
        assert!(!job.should_start_waiting());
    }

    #[test]
    fn retention_compact_drops_old_stats_only() {
        let input = sample("c");
        let existing = HashMap::new();
        let job = Job::new(Uuid::new_v4(), input, &existing).unwrap();
        let old = Utc::now() - chrono::Duration::days(10);
        let recent = Utc::now();
        job.finalize_run(JobStat::seed(job.id, old));
        job.finalize_run(JobStat::seed(job.id, recent));

        job.retention_compact(Utc::now() - chrono::Duration::days(1));
        let stats = job.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].ran_at, recent);
    }
}
