//! Persistence trait plus its two implementations: an in-memory map for
//! tests and a SQLite-backed store for production.

pub mod memory;
#[cfg(feature = "sqlite")]
pub mod sqlite;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::DbError;
use crate::job::JobView;

#[async_trait]
pub trait JobDb: Send + Sync {
    async fn get_all(&self) -> Result<Vec<JobView>, DbError>;
    async fn get(&self, id: Uuid) -> Result<JobView, DbError>;
    async fn save(&self, job: &JobView) -> Result<(), DbError>;
    async fn delete(&self, id: Uuid) -> Result<(), DbError>;
    async fn close(&self) -> Result<(), DbError>;
}
