//! Scheduling and execution engine for the Kala job scheduler: ISO-8601
//! recurrence scheduling, local-shell/HTTP execution, retries, a
//! group-concurrency gate, dependency cascades, and persistence.

pub mod cache;
pub mod config;
pub mod db;
pub mod duration;
pub mod error;
pub mod gate;
pub mod job;
pub mod runner;
pub mod schedule;
pub mod stats;

pub use cache::{JobCache, JobCacheConfig};
pub use duration::IsoDuration;
pub use error::KalaError;
pub use job::{Job, JobStat, JobType, JobView, NewJob, RemoteConfig};
pub use runner::Runner;
pub use schedule::Schedule;
