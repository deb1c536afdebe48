//! Executes one scheduled occurrence of a job: templating, the attempt
//! loop with epsilon-bounded retries, the running gate, and the
//! dependent/on-failure cascades.

use std::process::Output;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::Utc;
use minijinja::syntax::SyntaxConfig;
use minijinja::Environment;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::cache::JobCache;
use crate::error::{GateError, RunnerError};
use crate::gate::RunningGate;
use crate::job::{Job, JobStat, JobType, JobView};

/// What the caller (the timer task, via [`JobCache::run_job`]) should do
/// once a run attempt returns.
#[derive(Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// A stat was appended; the caller decides whether to rearm based on
    /// `Job::should_start_waiting`.
    Completed,
    /// The job's group was at its concurrency cap; rearm for one interval.
    BeyondConcurrency,
    /// Dropped silently: already running, deleted, or disabled.
    Skipped,
}

pub struct Runner {
    gate: Arc<dyn RunningGate>,
    http: reqwest::Client,
    /// Test hook: when set, every attempt succeeds without doing real work.
    succeed_instantly: bool,
}

impl Runner {
    pub fn new(gate: Arc<dyn RunningGate>) -> Self {
        Runner {
            gate,
            http: reqwest::Client::new(),
            succeed_instantly: false,
        }
    }

    #[cfg(test)]
    pub fn with_succeed_instantly(gate: Arc<dyn RunningGate>) -> Self {
        Runner { succeed_instantly: true, ..Runner::new(gate) }
    }

    #[instrument(skip(self, job, cache), fields(job_id = %job.id, job_name = %job.name))]
    pub async fn run(
        self: &Arc<Self>,
        job: &Arc<Job>,
        cache: &Arc<JobCache>,
        concurrency: u32,
    ) -> RunOutcome {
        let now = Utc::now();
        job.record_attempt_start(now);

        if job.is_deleted() {
            info!("job deleted mid-wait, dropping this fire");
            return RunOutcome::Skipped;
        }
        if job.is_disabled() {
            info!("job disabled, dropping this fire");
            return RunOutcome::Skipped;
        }

        let group = job.group_name.clone();
        match self.gate.start(job.id, group.as_deref(), concurrency).await {
            Err(GateError::BeyondConcurrency(_, _)) => {
                warn!("group at concurrency cap, rearming for next interval");
                return RunOutcome::BeyondConcurrency;
            }
            Err(GateError::IsRunning(_)) => {
                info!("job already running, dropping this fire");
                return RunOutcome::Skipped;
            }
            Err(GateError::Backend(e)) => {
                warn!(error = %e, "gate backend unreachable, leaving job scheduled");
                return RunOutcome::Skipped;
            }
            Ok(()) => {}
        }

        let stat = self.attempt_loop(job, now).await;

        if let Err(e) = self.gate.finish(job.id, group.as_deref()).await {
            warn!(error = %e, "failed to release running gate key");
        }

        let success = stat.success;
        job.finalize_run(stat);

        if success {
            for dep_id in job.dependent_jobs() {
                self.cascade_dependent(cache, dep_id).await;
            }
        } else if let Some(hook_id) = job.on_failure_job() {
            self.cascade_on_failure(cache, hook_id).await;
        }

        RunOutcome::Completed
    }

    async fn cascade_dependent(self: &Arc<Self>, cache: &Arc<JobCache>, dep_id: Uuid) {
        match cache.get(dep_id) {
            Some(dep) => {
                info!(dependent = %dep_id, "cascading to dependent job");
                Box::pin(cache.run_job_now(dep)).await;
            }
            None => warn!(dependent = %dep_id, "dependent job missing, skipping cascade"),
        }
    }

    async fn cascade_on_failure(self: &Arc<Self>, cache: &Arc<JobCache>, hook_id: Uuid) {
        match cache.get(hook_id) {
            Some(hook) => {
                info!(hook = %hook_id, "running on-failure hook");
                Box::pin(cache.run_job_now(hook)).await;
            }
            None => warn!(hook = %hook_id, "on-failure hook missing, skipping"),
        }
    }

    async fn attempt_loop(&self, job: &Arc<Job>, ran_at: chrono::DateTime<Utc>) -> JobStat {
        let mut stat = JobStat::seed(job.id, ran_at);
        let mut current_retries = job.retries;
        let view = job.view();

        loop {
            let attempt = if self.succeed_instantly {
                Ok("...".to_string())
            } else {
                match job.job_type {
                    JobType::Local => self.attempt_local(&view).await,
                    JobType::Remote => self.attempt_remote(&view).await,
                }
            };

            match attempt {
                Ok(response) => {
                    stat.response = Some(response);
                    stat.success = true;
                    break;
                }
                Err(e) => {
                    stat.error = Some(e.to_string());
                    if job.should_retry(current_retries, Utc::now()) {
                        current_retries -= 1;
                        continue;
                    }
                    stat.success = false;
                    break;
                }
            }
        }

        let finish_at = Utc::now();
        stat.finish_at = Some(finish_at);
        stat.execution_duration_ms = (finish_at - stat.ran_at).num_milliseconds().max(0) as u64;
        stat.number_of_retries = job.retries - current_retries;
        stat
    }

    async fn attempt_local(&self, view: &JobView) -> Result<String, RunnerError> {
        let raw = view.command.as_deref().unwrap_or("");
        let command = render(raw, view, view.template_delimiters.as_deref())?;
        if command.trim().is_empty() {
            return Err(RunnerError::CmdIsEmpty);
        }

        let output = tokio::task::spawn_blocking(move || {
            std::process::Command::new("sh").arg("-c").arg(&command).output()
        })
        .await
        .map_err(|e| RunnerError::ShellFailed(e.to_string()))?
        .map_err(|e| RunnerError::ShellFailed(e.to_string()))?;

        combined_output(&output)
    }

    async fn attempt_remote(&self, view: &JobView) -> Result<String, RunnerError> {
        let remote = view.remote.as_ref().ok_or(RunnerError::CmdIsEmpty)?;

        let url = render(&remote.url, view, view.template_delimiters.as_deref())?;
        let body = render(&remote.body, view, view.template_delimiters.as_deref())?;

        let mut url = reqwest::Url::parse(&url).map_err(|e| RunnerError::RequestFailed(e.to_string()))?;
        url.query_pairs_mut().append_pair("jobId", &view.id.to_string());

        let method = reqwest::Method::from_bytes(remote.method.to_uppercase().as_bytes())
            .map_err(|e| RunnerError::RequestFailed(e.to_string()))?;

        let mut req = self
            .http
            .request(method, url)
            .timeout(StdDuration::from_secs(remote.timeout_seconds))
            .header("Content-Type", "application/json");
        for (k, values) in &remote.headers {
            for v in values {
                req = req.header(k, v);
            }
        }
        if !body.is_empty() {
            req = req.body(body);
        }

        let resp = req.send().await.map_err(|e| RunnerError::RequestFailed(e.to_string()))?;
        let status = resp.status().as_u16();
        let expected = if remote.expected_response_codes.is_empty() {
            vec![200]
        } else {
            remote.expected_response_codes.clone()
        };
        let text = resp.text().await.unwrap_or_default();

        if !expected.contains(&status) {
            return Err(RunnerError::UnexpectedStatus(status, expected));
        }
        Ok(text)
    }
}

fn combined_output(output: &Output) -> Result<String, RunnerError> {
    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    combined.push_str(&String::from_utf8_lossy(&output.stderr));
    if output.status.success() {
        Ok(combined)
    } else {
        Err(RunnerError::ShellFailed(combined))
    }
}

fn render(raw: &str, view: &JobView, delimiters: Option<&str>) -> Result<String, RunnerError> {
    if raw.is_empty() {
        return Ok(String::new());
    }
    let Some(delims) = delimiters.filter(|d| !d.trim().is_empty()) else {
        return Ok(raw.to_string());
    };

    let parts: Vec<&str> = delims.split_whitespace().collect();
    if parts.len() != 2 {
        return Err(RunnerError::InvalidDelimiters(delims.to_string()));
    }

    let mut env = Environment::new();
    let syntax = SyntaxConfig::builder()
        .variable_delimiters(parts[0].to_string(), parts[1].to_string())
        .build()
        .map_err(|e| RunnerError::InvalidDelimiters(e.to_string()))?;
    env.set_syntax(syntax);

    let tmpl = env
        .template_from_str(raw)
        .map_err(|e| RunnerError::TemplateFailed(e.to_string()))?;
    tmpl.render(minijinja::context!(job => view))
        .map_err(|e| RunnerError::TemplateFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryDb;
    use crate::gate::memory::MemoryGate;
    use crate::job::NewJob;
    use std::collections::HashMap;

    fn local_job(command: &str) -> Arc<Job> {
        let input = NewJob {
            name: "t".to_string(),
            owner: "o".to_string(),
            command: Some(command.to_string()),
            ..Default::default()
        };
        Arc::new(Job::new(Uuid::new_v4(), input, &HashMap::new()).unwrap())
    }

    fn test_cache() -> Arc<JobCache> {
        Arc::new(JobCache::new(Arc::new(MemoryDb::new()), Arc::new(MemoryGate::new()), Default::default()))
    }

    #[tokio::test]
    async fn successful_local_command_records_success() {
        let gate = Arc::new(MemoryGate::new());
        let runner = Arc::new(Runner::new(gate));
        let job = local_job("echo hi");
        let cache = test_cache();

        let outcome = runner.run(&job, &cache, 2).await;
        assert_eq!(outcome, RunOutcome::Completed);
        assert_eq!(job.metadata().success_count, 1);
    }

    #[tokio::test]
    async fn failing_command_exhausts_retries() {
        let gate = Arc::new(MemoryGate::new());
        let runner = Arc::new(Runner::new(gate));
        let input = NewJob {
            name: "f".to_string(),
            owner: "o".to_string(),
            command: Some("false".to_string()),
            retries: 2,
            ..Default::default()
        };
        let job = Arc::new(Job::new(Uuid::new_v4(), input, &HashMap::new()).unwrap());
        let cache = test_cache();

        runner.run(&job, &cache, 2).await;
        let stats = job.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].number_of_retries, 2);
        assert!(!stats[0].success);
    }

    #[tokio::test]
    async fn empty_command_fails_with_cmd_is_empty() {
        let gate = Arc::new(MemoryGate::new());
        let runner = Arc::new(Runner::new(gate));
        let input = NewJob {
            name: "t".to_string(),
            owner: "o".to_string(),
            // Non-blank at creation time, but `job.nope` is undefined, which
            // minijinja renders as an empty string — this only fails at run
            // time, once templating has collapsed it to nothing.
            command: Some("<< job.nope >>".to_string()),
            template_delimiters: Some("<< >>".to_string()),
            ..Default::default()
        };
        let job = Arc::new(Job::new(Uuid::new_v4(), input, &HashMap::new()).unwrap());
        let cache = test_cache();

        runner.run(&job, &cache, 2).await;
        let stats = job.stats();
        assert_eq!(stats[0].error.as_deref(), Some(RunnerError::CmdIsEmpty.to_string().as_str()));
    }

    #[tokio::test]
    async fn deleted_job_is_skipped_without_gate_interaction() {
        let gate = Arc::new(MemoryGate::new());
        let runner = Arc::new(Runner::new(gate));
        let job = local_job("echo hi");
        job.set_deleted(true);
        let cache = test_cache();

        let outcome = runner.run(&job, &cache, 2).await;
        assert_eq!(outcome, RunOutcome::Skipped);
        assert!(job.stats().is_empty());
    }
}
