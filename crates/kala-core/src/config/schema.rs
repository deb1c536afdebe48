//! Shape of the on-disk/`KALA_*`-overridable configuration.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GateKind {
    Memory,
    Redis,
}

impl Default for GateKind {
    fn default() -> Self {
        GateKind::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    pub bind: String,
    pub token: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        HttpConfig { bind: "127.0.0.1:8420".to_string(), token: String::new() }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbConfig {
    pub path: String,
}

impl Default for DbConfig {
    fn default() -> Self {
        DbConfig { path: "kala.sqlite3".to_string() }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GateConfig {
    #[serde(default)]
    pub kind: GateKind,
    #[serde(default)]
    pub redis_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub gate: GateConfig,
    #[serde(default = "default_concurrency")]
    pub default_concurrency: u32,
    #[serde(default)]
    pub persist_every_secs: u64,
    #[serde(default)]
    pub retention_secs: u64,
}

fn default_concurrency() -> u32 {
    crate::gate::DEFAULT_CONCURRENCY
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            http: HttpConfig::default(),
            db: DbConfig::default(),
            gate: GateConfig::default(),
            default_concurrency: default_concurrency(),
            persist_every_secs: 0,
            retention_secs: 0,
        }
    }
}
