mod cli;
mod logging;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use clap::Parser;
use cli::{Cli, Command, DaemonAction, JobAction};
use kala_core::config::{self, GateKind};
use kala_core::db::sqlite::SqliteDb;
use kala_core::db::JobDb;
use kala_core::error::KalaError;
use kala_core::gate::memory::MemoryGate;
use kala_core::gate::RunningGate;
use kala_core::{JobCache, JobCacheConfig};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Daemon { action } => run_daemon_command(action, &cli.api).await,
        Command::Job { action } => run_job_command(action, &cli.api, cli.token.as_deref()).await,
        Command::Stats => print_stats(&cli.api, cli.token.as_deref()).await,
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run_daemon_command(action: DaemonAction, api: &str) -> Result<(), String> {
    match action {
        DaemonAction::Start => start_daemon().await.map_err(|e| e.to_string()),
        DaemonAction::Stop => stop_daemon(),
        DaemonAction::Status => {
            let client = reqwest::Client::new();
            let url = format!("{}/api/v1/health", api.trim_end_matches('/'));
            match client.get(&url).send().await {
                Ok(resp) if resp.status().is_success() => {
                    println!("daemon is healthy");
                    Ok(())
                }
                Ok(resp) => Err(format!("daemon responded with status {}", resp.status())),
                Err(e) => Err(format!("daemon unreachable: {e}")),
            }
        }
    }
}

fn pidfile_path() -> std::path::PathBuf {
    directories::ProjectDirs::from("dev", "kala-rs", "kala")
        .map(|d| d.runtime_dir().unwrap_or_else(|| d.data_dir()).join("kala.pid"))
        .unwrap_or_else(|| std::path::PathBuf::from(".kala/kala.pid"))
}

fn stop_daemon() -> Result<(), String> {
    let path = pidfile_path();
    let pid = std::fs::read_to_string(&path)
        .map_err(|e| format!("reading pidfile {}: {e}", path.display()))?;
    let pid = pid.trim();

    let status = std::process::Command::new("kill")
        .arg("-TERM")
        .arg(pid)
        .status()
        .map_err(|e| format!("sending SIGTERM to pid {pid}: {e}"))?;
    if !status.success() {
        return Err(format!("kill -TERM {pid} exited with {status}"));
    }
    Ok(())
}

async fn start_daemon() -> Result<(), KalaError> {
    let _log_guard = logging::init();
    let config = config::load()?;

    let db: Arc<dyn JobDb> = build_db(&config)?;
    let gate: Arc<dyn RunningGate> = build_gate(&config).await;

    let cache_config = JobCacheConfig {
        default_concurrency: config.default_concurrency,
        persist_every: if config.persist_every_secs > 0 {
            Some(StdDuration::from_secs(config.persist_every_secs))
        } else {
            None
        },
        retention: if config.retention_secs > 0 {
            Some(chrono::Duration::seconds(config.retention_secs as i64))
        } else {
            None
        },
    };

    let cache = Arc::new(JobCache::new(db.clone(), gate, cache_config));
    cache.start().await?;

    if let Some(parent) = pidfile_path().parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    let _ = std::fs::write(pidfile_path(), std::process::id().to_string());

    let api_cache = cache.clone();
    let bind = config.http.bind.clone();
    let token = config.http.token.clone();
    let server = tokio::spawn(async move {
        if let Err(e) = kala_api::serve(api_cache, &bind, token).await {
            error!(error = %e, "HTTP API server exited with an error");
        }
    });

    wait_for_shutdown_signal().await;
    info!("shutdown signal received, flushing cache and exiting");

    server.abort();
    if let Err(e) = cache.persist_all().await {
        warn!(error = %e, "failed to persist jobs during shutdown");
    }
    db.close().await?;
    let _ = std::fs::remove_file(pidfile_path());

    Ok(())
}

fn build_db(config: &kala_core::config::AppConfig) -> Result<Arc<dyn JobDb>, KalaError> {
    SqliteDb::open(&config.db.path).map(|db| Arc::new(db) as Arc<dyn JobDb>).map_err(KalaError::from)
}

async fn build_gate(config: &kala_core::config::AppConfig) -> Arc<dyn RunningGate> {
    if config.gate.kind == GateKind::Redis {
        #[cfg(feature = "redis-gate")]
        {
            if let Some(url) = &config.gate.redis_url {
                match kala_core::gate::redis::RedisGate::connect(url).await {
                    Ok(g) => return Arc::new(g),
                    Err(e) => warn!(error = %e, "falling back to in-memory gate"),
                }
            } else {
                warn!("gate.kind = redis but no redis_url configured, falling back to in-memory gate");
            }
        }
        #[cfg(not(feature = "redis-gate"))]
        warn!("gate.kind = redis but this build has no redis-gate feature, falling back to in-memory gate");
    }
    Arc::new(MemoryGate::new())
}

async fn wait_for_shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate()).expect("installing SIGTERM handler");
        let mut sigint = signal(SignalKind::interrupt()).expect("installing SIGINT handler");
        tokio::select! {
            _ = sigterm.recv() => {}
            _ = sigint.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
}

fn http_client(token: Option<&str>) -> Result<reqwest::Client, String> {
    let mut headers = reqwest::header::HeaderMap::new();
    if let Some(t) = token {
        let value = format!("Bearer {t}");
        headers.insert(
            reqwest::header::AUTHORIZATION,
            value.parse().map_err(|e| format!("invalid token: {e}"))?,
        );
    }
    reqwest::Client::builder().default_headers(headers).build().map_err(|e| e.to_string())
}

async fn run_job_command(action: JobAction, api: &str, token: Option<&str>) -> Result<(), String> {
    let client = http_client(token)?;
    let base = api.trim_end_matches('/');

    match action {
        JobAction::List => print_get(&client, &format!("{base}/api/v1/job")).await,
        JobAction::Get { id } => print_get(&client, &format!("{base}/api/v1/job/{id}")).await,
        JobAction::Stats { id } => print_get(&client, &format!("{base}/api/v1/job/stats/{id}")).await,
        JobAction::Create { file } => {
            let body = match file {
                Some(path) => std::fs::read_to_string(&path).map_err(|e| format!("reading {}: {e}", path.display()))?,
                None => std::io::read_to_string(std::io::stdin()).map_err(|e| e.to_string())?,
            };
            let json: serde_json::Value = serde_json::from_str(&body).map_err(|e| e.to_string())?;
            let resp = client
                .post(format!("{base}/api/v1/job"))
                .json(&json)
                .send()
                .await
                .map_err(|e| e.to_string())?;
            print_response(resp).await
        }
        JobAction::Delete { id, force } => {
            let resp = client
                .delete(format!("{base}/api/v1/job/{id}?force={force}"))
                .send()
                .await
                .map_err(|e| e.to_string())?;
            print_response(resp).await
        }
        JobAction::Enable { id } => {
            let resp = client.post(format!("{base}/api/v1/job/enable/{id}")).send().await.map_err(|e| e.to_string())?;
            print_response(resp).await
        }
        JobAction::Disable { id } => {
            let resp =
                client.post(format!("{base}/api/v1/job/disable/{id}")).send().await.map_err(|e| e.to_string())?;
            print_response(resp).await
        }
    }
}

async fn print_stats(api: &str, token: Option<&str>) -> Result<(), String> {
    let client = http_client(token)?;
    print_get(&client, &format!("{}/api/v1/stats", api.trim_end_matches('/'))).await
}

async fn print_get(client: &reqwest::Client, url: &str) -> Result<(), String> {
    let resp = client.get(url).send().await.map_err(|e| e.to_string())?;
    print_response(resp).await
}

async fn print_response(resp: reqwest::Response) -> Result<(), String> {
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    if !status.is_success() {
        return Err(format!("{status}: {body}"));
    }
    println!("{body}");
    Ok(())
}
