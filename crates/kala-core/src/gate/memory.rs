//! In-process fake backing [`RunningGate`], used both in tests and as the
//! default single-node deployment mode.

use std::collections::HashMap;

use async_trait::async_trait;
use dashmap::DashSet;
use uuid::Uuid;

use crate::error::GateError;

use super::{group_prefix, job_key, GateSubject, RunningGate};

#[derive(Default)]
pub struct MemoryGate {
    keys: DashSet<String>,
}

impl MemoryGate {
    pub fn new() -> Self {
        MemoryGate { keys: DashSet::new() }
    }
}

#[async_trait]
impl RunningGate for MemoryGate {
    async fn start(&self, id: Uuid, group: Option<&str>, concurrency: u32) -> Result<(), GateError> {
        if let Some(g) = group {
            let prefix = group_prefix(g);
            let running = self.keys.iter().filter(|k| k.starts_with(&prefix)).count();
            if running as u32 >= concurrency {
                return Err(GateError::BeyondConcurrency(g.to_string(), concurrency));
            }
        }

        let key = job_key(id, group);
        if !self.keys.insert(key) {
            return Err(GateError::IsRunning(id));
        }
        Ok(())
    }

    async fn finish(&self, id: Uuid, group: Option<&str>) -> Result<(), GateError> {
        self.keys.remove(&job_key(id, group));
        Ok(())
    }

    async fn clear_all(&self, subjects: &[GateSubject]) -> Result<(), GateError> {
        for s in subjects {
            self.keys.remove(&job_key(s.id, s.group.as_deref()));
        }
        Ok(())
    }

    async fn is_running(&self, id: Uuid, group: Option<&str>) -> Result<bool, GateError> {
        Ok(self.keys.contains(&job_key(id, group)))
    }

    async fn scan_running(&self, subjects: &[GateSubject]) -> Result<HashMap<Uuid, bool>, GateError> {
        let mut out = HashMap::with_capacity(subjects.len());
        for s in subjects {
            out.insert(s.id, self.keys.contains(&job_key(s.id, s.group.as_deref())));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn start_then_start_again_is_rejected() {
        let gate = MemoryGate::new();
        let id = Uuid::new_v4();
        gate.start(id, None, 2).await.unwrap();
        let err = gate.start(id, None, 2).await.unwrap_err();
        assert!(matches!(err, GateError::IsRunning(_)));
    }

    #[tokio::test]
    async fn finish_allows_restart() {
        let gate = MemoryGate::new();
        let id = Uuid::new_v4();
        gate.start(id, None, 2).await.unwrap();
        gate.finish(id, None).await.unwrap();
        gate.start(id, None, 2).await.unwrap();
    }

    #[tokio::test]
    async fn group_concurrency_cap_is_enforced() {
        let gate = MemoryGate::new();
        gate.start(Uuid::new_v4(), Some("g"), 2).await.unwrap();
        gate.start(Uuid::new_v4(), Some("g"), 2).await.unwrap();
        let err = gate.start(Uuid::new_v4(), Some("g"), 2).await.unwrap_err();
        assert!(matches!(err, GateError::BeyondConcurrency(g, 2) if g == "g"));
    }

    #[tokio::test]
    async fn clear_all_removes_stale_keys() {
        let gate = MemoryGate::new();
        let id = Uuid::new_v4();
        gate.start(id, Some("g"), 2).await.unwrap();
        gate.clear_all(&[GateSubject { id, group: Some("g".to_string()) }]).await.unwrap();
        assert!(!gate.is_running(id, Some("g")).await.unwrap());
    }

    #[tokio::test]
    async fn scan_running_reports_each_subject() {
        let gate = MemoryGate::new();
        let running = Uuid::new_v4();
        let idle = Uuid::new_v4();
        gate.start(running, None, 2).await.unwrap();

        let result = gate
            .scan_running(&[
                GateSubject { id: running, group: None },
                GateSubject { id: idle, group: None },
            ])
            .await
            .unwrap();
        assert_eq!(result[&running], true);
        assert_eq!(result[&idle], false);
    }
}
