//! System-wide stats snapshot: counts, next/last-run timestamps, totals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::job::JobView;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub total_jobs: u64,
    pub enabled_jobs: u64,
    pub disabled_jobs: u64,
    pub done_jobs: u64,
    pub running_jobs: u64,
    pub total_success: u64,
    pub total_error: u64,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_run_at: Option<DateTime<Utc>>,
}

pub fn aggregate(jobs: &[JobView]) -> StatsSnapshot {
    let mut snapshot = StatsSnapshot::default();
    for job in jobs {
        if job.deleted {
            continue;
        }
        snapshot.total_jobs += 1;
        if job.disabled {
            snapshot.disabled_jobs += 1;
        } else {
            snapshot.enabled_jobs += 1;
        }
        if job.is_done {
            snapshot.done_jobs += 1;
        }
        if job.is_running {
            snapshot.running_jobs += 1;
        }
        snapshot.total_success += job.metadata.success_count;
        snapshot.total_error += job.metadata.error_count;

        snapshot.next_run_at = pick_earliest(snapshot.next_run_at, job.next_run_at);
        snapshot.last_run_at = pick_latest(snapshot.last_run_at, job.metadata.last_attempted_run);
    }
    snapshot
}

fn pick_earliest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

fn pick_latest(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
    match (a, b) {
        (Some(a), Some(b)) => Some(a.max(b)),
        (Some(a), None) => Some(a),
        (None, Some(b)) => Some(b),
        (None, None) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::{JobMetadata, JobType};
    use uuid::Uuid;

    fn base() -> JobView {
        JobView {
            id: Uuid::new_v4(),
            name: "n".to_string(),
            owner: "o".to_string(),
            group_name: None,
            content: None,
            job_type: JobType::Local,
            command: Some("echo".to_string()),
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

    #[test]
    fn excludes_deleted_jobs_from_totals() {
        let mut deleted = base();
        deleted.deleted = true;
        let snapshot = aggregate(&[deleted, base()]);
        assert_eq!(snapshot.total_jobs, 1);
    }

    #[test]
    fn counts_enabled_disabled_and_running() {
        let mut disabled = base();
        disabled.disabled = true;
        let mut running = base();
        running.is_running = true;
        let snapshot = aggregate(&[disabled, running, base()]);
        assert_eq!(snapshot.total_jobs, 3);
        assert_eq!(snapshot.disabled_jobs, 1);
        assert_eq!(snapshot.enabled_jobs, 2);
        assert_eq!(snapshot.running_jobs, 1);
    }

    #[test]
    fn next_run_at_is_the_earliest() {
        let now = Utc::now();
        let mut a = base();
        a.next_run_at = Some(now + chrono::Duration::hours(2));
        let mut b = base();
        b.next_run_at = Some(now + chrono::Duration::hours(1));
        let snapshot = aggregate(&[a, b]);
        assert_eq!(snapshot.next_run_at, Some(now + chrono::Duration::hours(1)));
    }
}
