//! Configuration Vault – reads/writes `~/.hippocampus/config.toml`.

use hippo_memory::HippocampusConfig;
use hippo_types::HippoError;
use hippo_runtime::MaintenanceSchedule;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Persisted user configuration stored in `~/.hippocampus/config.toml`.
#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the OpenAI-compatible model server.
    #[serde(default = "default_llm_url")]
    pub llm_url: String,

    /// Model used for topic extraction and summarization (e.g. "llama3").
    #[serde(default = "default_model")]
    pub model: String,

    /// Bearer token for hosted APIs (stored as plain text – the file is
    /// written owner-only).
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub api_key: String,

    /// SQLite file holding messages and the persisted graph.
    #[serde(default = "default_db_path")]
    pub db_path: String,

    /// Memory engine tunables.
    #[serde(default)]
    pub memory: HippocampusConfig,

    /// Background job intervals for `hippocampus daemon`.
    #[serde(default)]
    pub schedule: MaintenanceSchedule,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("llm_url", &self.llm_url)
            .field("model", &self.model)
            .field("api_key", if self.api_key.is_empty() { &"<not set>" } else { &"<redacted>" })
            .field("db_path", &self.db_path)
            .field("memory", &self.memory)
            .field("schedule", &self.schedule)
            .finish()
    }
}

fn default_llm_url() -> String {
    "http://localhost:11434".to_string()
}
fn default_model() -> String {
    "llama3".to_string()
}
fn default_db_path() -> String {
    config_dir_for_home(&home_dir()).join("memory.db").to_string_lossy().into_owned()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            llm_url: default_llm_url(),
            model: default_model(),
            api_key: String::new(),
            db_path: default_db_path(),
            memory: HippocampusConfig::default(),
            schedule: MaintenanceSchedule::default(),
        }
    }
}

impl Config {
    /// The API key, if one is configured.
    pub fn api_key(&self) -> Option<String> {
        (!self.api_key.is_empty()).then(|| self.api_key.clone())
    }
}

fn home_dir() -> String {
    std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .unwrap_or_else(|_| ".".to_string())
}

/// Return the path to `~/.hippocampus/config.toml`.
pub fn config_path() -> PathBuf {
    config_path_for_home(&home_dir())
}

fn config_dir_for_home(home: &str) -> PathBuf {
    PathBuf::from(home).join(".hippocampus")
}

/// Build the config path relative to the given home directory.
pub(crate) fn config_path_for_home(home: &str) -> PathBuf {
    config_dir_for_home(home).join("config.toml")
}

/// Load the config from disk.  Returns `None` if the file does not exist.
pub fn load() -> Result<Option<Config>, HippoError> {
    load_from(&config_path())
}

/// Defaults with `HIPPO_*` overrides applied, for when no file is usable.
pub fn defaults_with_env() -> Config {
    let mut cfg = Config::default();
    apply_env_overrides(&mut cfg);
    cfg
}

/// Load the config from a specific path.
pub(crate) fn load_from(path: &Path) -> Result<Option<Config>, HippoError> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .map_err(|e| HippoError::Config(format!("Failed to read config at {}: {}", path.display(), e)))?;
    let mut cfg: Config = toml::from_str(&raw).map_err(|e| HippoError::Config(format!("Failed to parse config: {}", e)))?;
    apply_env_overrides(&mut cfg);
    Ok(Some(cfg))
}

/// Apply `HIPPO_*` environment variable overrides to `cfg`.
///
/// | Variable | Config field |
/// |---|---|
/// | `HIPPO_LLM_URL` | `llm_url` |
/// | `HIPPO_MODEL` | `model` |
/// | `HIPPO_DB_PATH` | `db_path` |
/// | `HIPPO_API_KEY` | `api_key` |
/// | `HIPPO_REQUEST_TIMEOUT_SECS` | `memory.request_timeout_secs` |
pub fn apply_env_overrides(cfg: &mut Config) {
    if let Ok(v) = std::env::var("HIPPO_LLM_URL") {
        cfg.llm_url = v;
    }
    if let Ok(v) = std::env::var("HIPPO_MODEL") {
        cfg.model = v;
    }
    if let Ok(v) = std::env::var("HIPPO_DB_PATH") {
        cfg.db_path = v;
    }
    if let Ok(v) = std::env::var("HIPPO_API_KEY") {
        cfg.api_key = v;
    }
    if let Ok(v) = std::env::var("HIPPO_REQUEST_TIMEOUT_SECS")
        && let Ok(secs) = v.parse::<u64>()
    {
        cfg.memory.request_timeout_secs = secs;
    }
}

/// Save the config to disk, creating `~/.hippocampus/` if necessary.
pub fn save(cfg: &Config) -> Result<(), HippoError> {
    save_to(cfg, &config_path())
}

/// Save the config to a specific path.
pub(crate) fn save_to(cfg: &Config, path: &Path) -> Result<(), HippoError> {
    if let Some(parent) = path.parent() {
        ensure_private_dir(parent)?;
    }
    let raw = toml::to_string_pretty(cfg).map_err(|e| HippoError::Config(format!("Failed to serialize config: {}", e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o600)
            .open(path)
            .and_then(|mut f| {
                use std::io::Write;
                f.write_all(raw.as_bytes())
            })
            .map_err(|e| HippoError::Config(format!("Failed to write config at {}: {}", path.display(), e)))?;
    }
    #[cfg(not(unix))]
    fs::write(path, raw).map_err(|e| HippoError::Config(format!("Failed to write config at {}: {}", path.display(), e)))?;
    Ok(())
}

/// Create `dir` (owner-only on Unix) if it is missing.
pub(crate) fn ensure_private_dir(dir: &Path) -> Result<(), HippoError> {
    if dir.as_os_str().is_empty() || dir.exists() {
        return Ok(());
    }
    fs::create_dir_all(dir).map_err(|e| HippoError::Config(format!("Failed to create directory {}: {}", dir.display(), e)))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(dir, fs::Permissions::from_mode(0o700))
            .map_err(|e| HippoError::Config(format!("Failed to set permissions on {}: {}", dir.display(), e)))?;
    }
    Ok(())
}
