//! Engine configuration loaded from `cascade.toml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    ReadFailed {
        path: String,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    ParseFailed(#[from] toml::de::Error),

    #[error("config validation error: {message}")]
    Validation { message: String },
}

/// Top-level configuration loaded from `cascade.toml`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub workspace: WorkspaceConfig,
    pub scheduler: SchedulerConfig,
    pub process: ProcessConfig,
    pub build: BuildConfig,
}

/// Scratch-directory layout and retention for materialized projects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkspaceConfig {
    /// Root under which per-execution project directories are created.
    pub root_dir: String,
    /// Keep project directories after execution instead of removing them.
    pub retain_artifacts: bool,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            root_dir: std::env::temp_dir()
                .join("cascade-projects")
                .display()
                .to_string(),
            retain_artifacts: false,
        }
    }
}

impl WorkspaceConfig {
    pub fn root_path(&self) -> PathBuf {
        PathBuf::from(&self.root_dir)
    }
}

/// Concurrency bounds for the workflow scheduler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct SchedulerConfig {
    /// Process-wide cap on concurrently running workflow executions.
    pub max_concurrent_workflows: usize,
    /// Per-session node concurrency used when a workflow does not set one.
    pub default_max_concurrent_nodes: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: 10,
            default_max_concurrent_nodes: 4,
        }
    }
}

/// Subprocess supervision limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ProcessConfig {
    /// Applied when a node does not declare a timeout.
    pub default_timeout_minutes: u64,
    /// System ceiling; node timeouts are clamped to this.
    pub max_timeout_minutes: u64,
    /// Grace period between SIGTERM and SIGKILL.
    pub termination_grace_seconds: u64,
    /// Maximum bytes of captured output retained per stream pair.
    pub max_output_bytes: usize,
    /// Capacity of per-execution streaming channels.
    pub stream_buffer_lines: usize,
}

impl Default for ProcessConfig {
    fn default() -> Self {
        Self {
            default_timeout_minutes: 30,
            max_timeout_minutes: 120,
            termination_grace_seconds: 5,
            max_output_bytes: 10 * 1024 * 1024,
            stream_buffer_lines: 256,
        }
    }
}

impl ProcessConfig {
    pub fn termination_grace(&self) -> Duration {
        Duration::from_secs(self.termination_grace_seconds)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.max_timeout_minutes * 60)
    }
}

/// Build-phase limits for language runners.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct BuildConfig {
    pub timeout_minutes: u64,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self { timeout_minutes: 15 }
    }
}

impl BuildConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes * 60)
    }
}

/// Load and validate an [`EngineConfig`] from a TOML file path.
///
/// Returns the default config if the file does not exist.
pub fn load_config(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        tracing::debug!(path = %path.display(), "config file not found, using defaults");
        return Ok(EngineConfig::default());
    }

    let data = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFailed {
        path: path.display().to_string(),
        source: e,
    })?;

    parse_config(&data)
}

/// Parse and validate an [`EngineConfig`] from a TOML string.
pub fn parse_config(data: &str) -> Result<EngineConfig, ConfigError> {
    let config: EngineConfig = toml::from_str(data)?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.scheduler.max_concurrent_workflows == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.max_concurrent_workflows must be > 0".to_string(),
        });
    }

    if config.scheduler.default_max_concurrent_nodes == 0 {
        return Err(ConfigError::Validation {
            message: "scheduler.default_max_concurrent_nodes must be > 0".to_string(),
        });
    }

    if config.process.default_timeout_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "process.default_timeout_minutes must be > 0".to_string(),
        });
    }

    if config.process.max_timeout_minutes < config.process.default_timeout_minutes {
        return Err(ConfigError::Validation {
            message: format!(
                "process.max_timeout_minutes ({}) must be >= default_timeout_minutes ({})",
                config.process.max_timeout_minutes, config.process.default_timeout_minutes
            ),
        });
    }

    if config.process.max_output_bytes == 0 {
        return Err(ConfigError::Validation {
            message: "process.max_output_bytes must be > 0".to_string(),
        });
    }

    if config.build.timeout_minutes == 0 {
        return Err(ConfigError::Validation {
            message: "build.timeout_minutes must be > 0".to_string(),
        });
    }

    Ok(())
}
