//! Configuration loader for semem.
//!
//! Reads `config.toml` from the data directory (`~/.semem/` by default) and
//! deserializes it into [`MemoryConfig`]. Falls back to defaults when the file
//! is missing or malformed. Triple-store credentials can be supplied through
//! the environment instead of the file.

use std::path::{Path, PathBuf};

use semem_types::backend::BackendKind;
use semem_types::config::MemoryConfig;
use tracing::{debug, warn};

/// Environment variable naming the data directory.
pub const DATA_DIR_ENV: &str = "SEMEM_HOME";

/// Environment variable overriding `triple_store.username`.
pub const SPARQL_USER_ENV: &str = "SEMEM_SPARQL_USER";

/// Environment variable overriding `triple_store.password`.
pub const SPARQL_PASSWORD_ENV: &str = "SEMEM_SPARQL_PASSWORD";

/// Resolve the data directory.
///
/// Priority:
/// 1. `SEMEM_HOME` environment variable
/// 2. `~/.semem`
/// 3. `.semem` in the current directory
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(DATA_DIR_ENV) {
        return PathBuf::from(dir);
    }
    if let Some(home) = dirs::home_dir() {
        return home.join(".semem");
    }
    PathBuf::from(".semem")
}

/// Load configuration from `{data_dir}/config.toml`, then apply environment
/// overrides.
///
/// - If the file does not exist, starts from [`MemoryConfig::default()`].
/// - If the file exists but fails to parse, logs a warning and starts from
///   the default.
pub async fn load_config(data_dir: &Path) -> MemoryConfig {
    let mut config = read_config_file(data_dir).await;
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config
}

async fn read_config_file(data_dir: &Path) -> MemoryConfig {
    let config_path = data_dir.join("config.toml");

    let content = match tokio::fs::read_to_string(&config_path).await {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
            debug!("No config.toml found at {}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
        Err(err) => {
            warn!("Failed to read {}: {err}, using defaults", config_path.display());
            return MemoryConfig::default();
        }
    };

    match toml::from_str::<MemoryConfig>(&content) {
        Ok(config) => config,
        Err(err) => {
            warn!(
                "Failed to parse {}: {err}, using defaults",
                config_path.display()
            );
            MemoryConfig::default()
        }
    }
}

/// Apply credential overrides read through `lookup`.
pub fn apply_env_overrides(config: &mut MemoryConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(user) = lookup(SPARQL_USER_ENV).filter(|v| !v.is_empty()) {
        config.triple_store.username = Some(user);
    }
    if let Some(password) = lookup(SPARQL_PASSWORD_ENV).filter(|v| !v.is_empty()) {
        config.triple_store.password = Some(password);
    }
}

/// Write `config` to `{data_dir}/config.toml`. The password is never written.
pub async fn save_config(data_dir: &Path, config: &MemoryConfig) -> Result<PathBuf, std::io::Error> {
    let text = toml::to_string_pretty(config)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    tokio::fs::create_dir_all(data_dir).await?;
    let path = data_dir.join("config.toml");
    tokio::fs::write(&path, text).await?;
    Ok(path)
}

/// Point `{data_dir}/config.toml` at `kind`, keeping every other key as
/// written (including a password the file may hold).
pub async fn set_backend(data_dir: &Path, kind: BackendKind) -> Result<PathBuf, std::io::Error> {
    let path = data_dir.join("config.toml");
    let mut table = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content
            .parse::<toml::Table>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => toml::Table::new(),
        Err(err) => return Err(err),
    };
    table.insert("backend".into(), toml::Value::String(kind.to_string()));
    tokio::fs::create_dir_all(data_dir).await?;
    tokio::fs::write(&path, table.to_string()).await?;
    Ok(path)
}
