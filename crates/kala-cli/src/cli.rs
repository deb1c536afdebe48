//! `kala`'s subcommand shape: `daemon {start|stop|status}`, `job
//! {list|create|get|delete|enable|disable|stats}`, `stats`. Every `job`
//! and `stats` subcommand is a thin HTTP client call against the façade.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "kala", about = "A persistent, single-node job scheduler")]
pub struct Cli {
    /// Base URL of the HTTP API façade.
    #[arg(long, env = "KALA_API", default_value = "http://127.0.0.1:8420")]
    pub api: String,

    /// Bearer token for the HTTP API façade.
    #[arg(long, env = "KALA_HTTP_TOKEN")]
    pub token: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Manage the scheduler daemon process.
    Daemon {
        #[command(subcommand)]
        action: DaemonAction,
    },
    /// Manage individual jobs via the HTTP API.
    Job {
        #[command(subcommand)]
        action: JobAction,
    },
    /// Fetch the system-wide stats snapshot.
    Stats,
}

#[derive(Debug, Subcommand)]
pub enum DaemonAction {
    /// Run the daemon in the foreground: loads config, wires the engine,
    /// and serves the HTTP API until SIGINT/SIGTERM.
    Start,
    /// Signal a running daemon (found via its pidfile) to stop.
    Stop,
    /// Check daemon liveness via `GET /api/v1/health`.
    Status,
}

#[derive(Debug, Subcommand)]
pub enum JobAction {
    /// List every job.
    List,
    /// Fetch one job by id.
    Get { id: Uuid },
    /// Create a job from a JSON body (pre-built schedule string expected).
    Create {
        /// Path to a JSON file; reads stdin when omitted.
        #[arg(long)]
        file: Option<PathBuf>,
    },
    /// Delete a job (logical unless `--force`).
    Delete {
        id: Uuid,
        #[arg(long)]
        force: bool,
    },
    Enable { id: Uuid },
    Disable { id: Uuid },
    /// Fetch one job's stat history.
    Stats { id: Uuid },
}
