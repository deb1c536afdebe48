//! Distributed advisory lock over a shared key-value store: enforces
//! per-group max concurrency and "no overlapping runs of the same job".
//!
//! The contract is intentionally narrow — `SET NX` / `DEL` / `EXISTS` /
//! `KEYS prefix*` / `MGET` — so it can be backed by an in-process fake
//! ([`memory::MemoryGate`]) or a real shared server ([`redis::RedisGate`],
//! behind the `redis-gate` feature) without either caller noticing.

pub mod memory;
#[cfg(feature = "redis-gate")]
pub mod redis;

use std::collections::HashMap;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::GateError;

pub const DEFAULT_CONCURRENCY: u32 = 2;

/// The set of jobs a `clear_all`/`scan_running` call needs to know about:
/// just enough identity to build the right keys.
#[derive(Debug, Clone)]
pub struct GateSubject {
    pub id: Uuid,
    pub group: Option<String>,
}

#[async_trait]
pub trait RunningGate: Send + Sync {
    /// Acquire the per-job key, failing `IsRunning` if already held or
    /// `BeyondConcurrency` if the job's group is already at its cap.
    async fn start(&self, id: Uuid, group: Option<&str>, concurrency: u32) -> Result<(), GateError>;

    /// Release the per-job key. Idempotent.
    async fn finish(&self, id: Uuid, group: Option<&str>) -> Result<(), GateError>;

    /// Remove every per-job key for the given subjects (crash recovery).
    async fn clear_all(&self, subjects: &[GateSubject]) -> Result<(), GateError>;

    async fn is_running(&self, id: Uuid, group: Option<&str>) -> Result<bool, GateError>;

    /// Bulk membership check, keyed by job id.
    async fn scan_running(&self, subjects: &[GateSubject]) -> Result<HashMap<Uuid, bool>, GateError>;
}

pub(crate) fn job_key(id: Uuid, group: Option<&str>) -> String {
    match group {
        Some(g) => format!("kala-job-running-{g}-{id}"),
        None => format!("kala-job-running-{id}"),
    }
}

pub(crate) fn group_prefix(group: &str) -> String {
    format!("kala-job-running-{group}-")
}

#[cfg(test)]
mod key_tests {
    use super::*;

    #[test]
    fn grouped_key_includes_group_and_id() {
        let id = Uuid::nil();
        assert_eq!(job_key(id, Some("g")), format!("kala-job-running-g-{id}"));
    }

    #[test]
    fn ungrouped_key_omits_group_segment() {
        let id = Uuid::nil();
        assert_eq!(job_key(id, None), format!("kala-job-running-{id}"));
    }

    #[test]
    fn group_prefix_is_a_strict_prefix_of_its_keys() {
        let id = Uuid::nil();
        assert!(job_key(id, Some("g")).starts_with(&group_prefix("g")));
    }
}
