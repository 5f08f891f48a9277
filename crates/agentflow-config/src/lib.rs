use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON5 parse error: {0}")]
    Json5(#[from] json5::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Scheduler loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSettings {
    /// Seconds between due-task checks.
    #[serde(default = "default_tick_interval_secs")]
    pub tick_interval_secs: u64,
    /// Upper bound on a single scheduled flow run.
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,
    /// Execution records kept per task by the retention pass.
    #[serde(default = "default_max_executions_per_task")]
    pub max_executions_per_task: usize,
    /// Seconds between retention passes.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
}

fn default_tick_interval_secs() -> u64 {
    60
}

fn default_execution_timeout_secs() -> u64 {
    300
}

fn default_max_executions_per_task() -> usize {
    100
}

fn default_cleanup_interval_secs() -> u64 {
    3600
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick_interval_secs: default_tick_interval_secs(),
            execution_timeout_secs: default_execution_timeout_secs(),
            max_executions_per_task: default_max_executions_per_task(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
        }
    }
}

/// Local database settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// SQLite file path. Defaults to `~/.agentflow/scheduler.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
}

/// Flow runner endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineSettings {
    /// URL the exported flow is POSTed to.
    #[serde(default = "default_engine_url")]
    pub url: String,
    /// HTTP request timeout. Should exceed the scheduler's execution timeout.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_engine_url() -> String {
    "http://127.0.0.1:8091/execute".to_string()
}

fn default_request_timeout_secs() -> u64 {
    310
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            url: default_engine_url(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Top-level agentflow configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentFlowConfig {
    #[serde(default)]
    pub scheduler: SchedulerSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl AgentFlowConfig {
    /// Resolve the database path, falling back to the config directory.
    pub fn database_path(&self) -> Result<PathBuf, ConfigError> {
        match &self.storage.database_path {
            Some(path) => Ok(path.clone()),
            None => Ok(config_dir()?.join("scheduler.db")),
        }
    }
}

/// Resolve the agentflow config directory (~/.agentflow/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".agentflow"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the config file path (~/.agentflow/config.json5).
pub fn config_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("config.json5"))
}

/// Load configuration from the default path, falling back to defaults.
pub fn load_config() -> Result<AgentFlowConfig, ConfigError> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    let path = config_file_path()?;
    load_config_from(&path)
}

/// Load configuration from a specific path, falling back to defaults if not found.
pub fn load_config_from(path: &Path) -> Result<AgentFlowConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!("Config file not found at {}, using defaults", path.display());
        return Ok(AgentFlowConfig::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config: AgentFlowConfig = json5::from_str(&content)?;
    Ok(config)
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

/// Save configuration to the default path.
pub fn save_config(config: &AgentFlowConfig) -> Result<(), ConfigError> {
    let dir = ensure_config_dir()?;
    let path = dir.join("config.json5");
    let content = serde_json::to_string_pretty(config)
        .map_err(|e| ConfigError::Io(std::io::Error::other(e)))?;
    std::fs::write(path, content)?;
    Ok(())
}
