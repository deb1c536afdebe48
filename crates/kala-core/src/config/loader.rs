//! Layered TOML configuration: file, then `KALA_*` environment overrides,
//! falling back to defaults when the file is missing. Saves are atomic
//! (`.tmp` write + `.bak` backup + rename).

use std::path::{Path, PathBuf};

use crate::error::KalaError;

use super::schema::{AppConfig, GateKind};

pub fn default_config_path() -> PathBuf {
    if let Ok(p) = std::env::var("KALA_CONFIG") {
        return PathBuf::from(p);
    }
    directories::ProjectDirs::from("dev", "kala-rs", "kala")
        .map(|dirs| dirs.config_dir().join("config.toml"))
        .unwrap_or_else(|| PathBuf::from(".kala/config.toml"))
}

pub fn load() -> Result<AppConfig, KalaError> {
    load_from(&default_config_path())
}

pub fn load_from(path: &Path) -> Result<AppConfig, KalaError> {
    let mut config = if path.exists() {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| KalaError::Config(format!("reading {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| KalaError::Config(format!("parsing {}: {e}", path.display())))?
    } else {
        AppConfig::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}

fn apply_env_overrides(config: &mut AppConfig) {
    if let Ok(v) = std::env::var("KALA_HTTP_BIND") {
        config.http.bind = v;
    }
    if let Ok(v) = std::env::var("KALA_HTTP_TOKEN") {
        config.http.token = v;
    }
    if let Ok(v) = std::env::var("KALA_DB_PATH") {
        config.db.path = v;
    }
    if let Ok(v) = std::env::var("KALA_GATE_KIND") {
        config.gate.kind = match v.to_lowercase().as_str() {
            "redis" => GateKind::Redis,
            _ => GateKind::Memory,
        };
    }
    if let Ok(v) = std::env::var("KALA_GATE_REDIS_URL") {
        config.gate.redis_url = Some(v);
    }
    if let Ok(v) = std::env::var("KALA_DEFAULT_CONCURRENCY") {
        if let Ok(n) = v.parse() {
            config.default_concurrency = n;
        }
    }
    if let Ok(v) = std::env::var("KALA_PERSIST_EVERY_SECS") {
        if let Ok(n) = v.parse() {
            config.persist_every_secs = n;
        }
    }
    if let Ok(v) = std::env::var("KALA_RETENTION_SECS") {
        if let Ok(n) = v.parse() {
            config.retention_secs = n;
        }
    }
}

pub fn save(config: &AppConfig, path: &Path) -> Result<(), KalaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| KalaError::Config(format!("creating {}: {e}", parent.display())))?;
    }

    let serialized =
        toml::to_string_pretty(config).map_err(|e| KalaError::Config(format!("serializing config: {e}")))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, serialized)
        .map_err(|e| KalaError::Config(format!("writing {}: {e}", tmp_path.display())))?;

    if path.exists() {
        let bak_path = path.with_extension("toml.bak");
        std::fs::copy(path, &bak_path)
            .map_err(|e| KalaError::Config(format!("backing up {}: {e}", path.display())))?;
    }

    std::fs::rename(&tmp_path, path)
        .map_err(|e| KalaError::Config(format!("renaming into {}: {e}", path.display())))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let config = load_from(Path::new("/nonexistent/kala/config.toml")).unwrap();
        assert_eq!(config.http.bind, "127.0.0.1:8420");
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = AppConfig::default();
        config.http.bind = "0.0.0.0:9000".to_string();
        save(&config, &path).unwrap();

        let loaded = load_from(&path).unwrap();
        assert_eq!(loaded.http.bind, "0.0.0.0:9000");
    }

    #[test]
    fn save_twice_creates_backup_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        save(&AppConfig::default(), &path).unwrap();
        save(&AppConfig::default(), &path).unwrap();

        assert!(path.with_extension("toml.bak").exists());
    }
}
