//! Error taxonomy for the scheduling engine.
//!
//! Each layer gets its own `thiserror` enum; [`KalaError`] composes them via
//! `#[from]` so callers at the edges (the API façade, the CLI) can propagate
//! with a single `?`.

use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DurationError {
    #[error("duration must start with 'P': {0:?}")]
    MissingPPrefix(String),
    #[error("duration has no components: {0:?}")]
    Empty(String),
    #[error("'T' designator present with no time components: {0:?}")]
    EmptyTimeSection(String),
    #[error("weeks cannot be combined with other components: {0:?}")]
    MixedWeeks(String),
    #[error("invalid numeric component {0:?} in duration {1:?}")]
    InvalidNumber(String, String),
    #[error("unrecognized duration format: {0:?}")]
    Malformed(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum ScheduleError {
    #[error("schedule string must have exactly three '/'-separated parts: {0:?}")]
    WrongPartCount(String),
    #[error("invalid repeat segment {0:?} (expected 'R' or 'Rn')")]
    InvalidRepeat(String),
    #[error("invalid start time {0:?}: {1}")]
    InvalidStartTime(String, String),
    #[error("start time {0} is already in the past")]
    PastStartTime(chrono::DateTime<chrono::Utc>),
    #[error(transparent)]
    InvalidInterval(#[from] DurationError),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum GateError {
    #[error("job {0} is already running")]
    IsRunning(Uuid),
    #[error("group {0:?} has reached its concurrency limit of {1}")]
    BeyondConcurrency(String, u32),
    #[error("running gate backend error: {0}")]
    Backend(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum RunnerError {
    #[error("job command is empty")]
    CmdIsEmpty,
    #[error("invalid template delimiters {0:?}")]
    InvalidDelimiters(String),
    #[error("templating failed: {0}")]
    TemplateFailed(String),
    #[error("local command failed: {0}")]
    ShellFailed(String),
    #[error("remote request failed: {0}")]
    RequestFailed(String),
    #[error("remote response status {0} not in expected codes {1:?}")]
    UnexpectedStatus(u16, Vec<u16>),
    #[error("job was deleted")]
    Deleted,
    #[error("job is disabled")]
    Disabled,
    #[error(transparent)]
    Gate(#[from] GateError),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum DbError {
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("database backend error: {0}")]
    Backend(String),
    #[error("serialization error: {0}")]
    Serde(String),
}

#[derive(Debug, thiserror::Error, PartialEq, Eq, Clone)]
pub enum CacheError {
    #[error("job {0} does not exist")]
    DoesntExist(Uuid),
    #[error("job {0} is currently running and cannot be deleted")]
    RunningJobDelete(Uuid),
    #[error("job {0} has already finished its schedule and cannot be disabled")]
    DoneJobDisable(Uuid),
    #[error("job is invalid: {0}")]
    InvalidJob(String),
    #[error("job would introduce a dependency cycle")]
    CyclicDependency,
    #[error(transparent)]
    Db(#[from] DbError),
}

#[derive(Debug, thiserror::Error)]
pub enum KalaError {
    #[error(transparent)]
    Duration(#[from] DurationError),
    #[error(transparent)]
    Schedule(#[from] ScheduleError),
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Runner(#[from] RunnerError),
    #[error(transparent)]
    Db(#[from] DbError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error("configuration error: {0}")]
    Config(String),
}
