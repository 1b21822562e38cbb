use crate::{Error, Result};
use agentum_core::expand_tilde;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Resolve the configuration directory based on priority:
/// 1. Explicit path (with tilde expansion)
/// 2. AGENTUM_PATH environment variable (config lives beside the data)
/// 3. System config directory
/// 4. ~/.agentum
pub fn resolve_config_dir(explicit_path: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit_path {
        return Ok(expand_tilde(path));
    }

    if let Ok(env_path) = std::env::var("AGENTUM_PATH") {
        return Ok(expand_tilde(&env_path).join("config"));
    }

    if let Some(config_dir) = dirs::config_dir() {
        return Ok(config_dir.join("agentum"));
    }

    if let Some(home) = std::env::var_os("HOME") {
        return Ok(PathBuf::from(home).join(".agentum").join("config"));
    }

    Err(Error::Internal(
        "Could not determine config directory: no HOME or system config directory found"
            .to_string(),
    ))
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_port")]
    pub external_port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            external_port: default_api_port(),
        }
    }
}

fn default_api_port() -> u16 {
    8807
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebConfig {
    #[serde(default = "default_web_port")]
    pub external_port: u16,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            external_port: default_web_port(),
        }
    }
}

fn default_web_port() -> u16 {
    8806
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// SQLite file path; defaults to `<data_dir>/agentum.db`
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CorsConfig {
    #[serde(default)]
    pub origins: Vec<String>,
}

/// How the agent child process is invoked. The program is opaque to the
/// service; the supervisor appends the per-run arguments.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default = "default_agent_program")]
    pub program: String,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_max_turns")]
    pub max_turns: u32,

    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,

    #[serde(default = "default_grace_period_seconds")]
    pub grace_period_seconds: u64,

    #[serde(default = "default_model")]
    pub default_model: String,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            program: default_agent_program(),
            args: Vec::new(),
            max_turns: default_max_turns(),
            timeout_seconds: default_timeout_seconds(),
            grace_period_seconds: default_grace_period_seconds(),
            default_model: default_model(),
        }
    }
}

fn default_agent_program() -> String {
    "agentum-agent".to_string()
}

fn default_max_turns() -> u32 {
    50
}

fn default_timeout_seconds() -> u64 {
    1800
}

fn default_grace_period_seconds() -> u64 {
    10
}

fn default_model() -> String {
    "default".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    #[serde(default = "default_max_concurrent_sessions")]
    pub max_concurrent_sessions: usize,

    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    #[serde(default = "default_heartbeat_interval_seconds")]
    pub heartbeat_interval_seconds: u64,

    /// Cap on one stdout line from the agent; longer lines are dropped
    #[serde(default = "default_max_line_bytes")]
    pub max_line_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sessions: default_max_concurrent_sessions(),
            subscriber_buffer: default_subscriber_buffer(),
            heartbeat_interval_seconds: default_heartbeat_interval_seconds(),
            max_line_bytes: default_max_line_bytes(),
        }
    }
}

fn default_max_concurrent_sessions() -> usize {
    16
}

fn default_subscriber_buffer() -> usize {
    256
}

fn default_heartbeat_interval_seconds() -> u64 {
    30
}

fn default_max_line_bytes() -> usize {
    1024 * 1024
}

/// Service configuration document (`api.yaml`)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub api: ApiConfig,

    #[serde(default)]
    pub web: WebConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub cors: CorsConfig,

    #[serde(default)]
    pub agent: AgentConfig,

    #[serde(default)]
    pub limits: LimitsConfig,

    /// Shared read-only skills tree linked into every workspace
    #[serde(default)]
    pub skills_root: Option<PathBuf>,
}

impl ServiceConfig {
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: ServiceConfig =
            serde_yaml::from_str(&content).map_err(|e| Error::Validation(e.to_string()))?;
        Ok(config)
    }
}
