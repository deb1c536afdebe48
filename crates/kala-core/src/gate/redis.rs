//! Redis-backed [`RunningGate`] for the "pool to a shared server" deployment
//! mode (`KALA_GATE_KIND=redis`).

use std::collections::HashMap;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::GateError;

use super::{group_prefix, job_key, GateSubject, RunningGate};

pub struct RedisGate {
    conn: ConnectionManager,
}

impl RedisGate {
    pub async fn connect(url: &str) -> Result<Self, GateError> {
        let client = redis::Client::open(url).map_err(|e| GateError::Backend(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| GateError::Backend(e.to_string()))?;
        Ok(RedisGate { conn })
    }
}

#[async_trait]
impl RunningGate for RedisGate {
    async fn start(&self, id: Uuid, group: Option<&str>, concurrency: u32) -> Result<(), GateError> {
        let mut conn = self.conn.clone();

        if let Some(g) = group {
            let pattern = format!("{}*", group_prefix(g));
            let keys: Vec<String> = conn.keys(&pattern).await.map_err(|e| GateError::Backend(e.to_string()))?;
            if keys.len() as u32 >= concurrency {
                return Err(GateError::BeyondConcurrency(g.to_string(), concurrency));
            }
        }

        let key = job_key(id, group);
        let set: bool = conn.set_nx(&key, "1").await.map_err(|e| GateError::Backend(e.to_string()))?;
        if !set {
            return Err(GateError::IsRunning(id));
        }
        Ok(())
    }

    async fn finish(&self, id: Uuid, group: Option<&str>) -> Result<(), GateError> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(job_key(id, group)).await.map_err(|e| GateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn clear_all(&self, subjects: &[GateSubject]) -> Result<(), GateError> {
        if subjects.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = subjects.iter().map(|s| job_key(s.id, s.group.as_deref())).collect();
        let _: () = conn.del(keys).await.map_err(|e| GateError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn is_running(&self, id: Uuid, group: Option<&str>) -> Result<bool, GateError> {
        let mut conn = self.conn.clone();
        conn.exists(job_key(id, group)).await.map_err(|e| GateError::Backend(e.to_string()))
    }

    async fn scan_running(&self, subjects: &[GateSubject]) -> Result<HashMap<Uuid, bool>, GateError> {
        if subjects.is_empty() {
            return Ok(HashMap::new());
        }
        let mut conn = self.conn.clone();
        let keys: Vec<String> = subjects.iter().map(|s| job_key(s.id, s.group.as_deref())).collect();
        let values: Vec<Option<String>> =
            conn.mget(keys).await.map_err(|e| GateError::Backend(e.to_string()))?;

        Ok(subjects
            .iter()
            .zip(values)
            .map(|(s, v)| (s.id, v.is_some()))
            .collect())
    }
}
