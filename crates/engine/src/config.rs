//! Engine configuration and its loader.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use dirs_next::config_dir;
use pipewright_types::ValidationReactionConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Environment variable overriding the configuration file location.
pub const CONFIG_PATH_ENV: &str = "PIPEWRIGHT_CONFIG_PATH";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("invalid config: {message}")]
    Invalid { message: String },
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    /// Deepest allowed nesting of pipe invocations.
    pub max_stack_depth: usize,
    /// Items synthesized for list inputs and outputs during dry runs.
    pub dry_run_list_size: usize,
    /// Whole-run timeout. `None` disables it.
    pub run_timeout_secs: Option<u64>,
    pub validation: ValidationReactionConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_stack_depth: 32,
            dry_run_list_size: 3,
            run_timeout_secs: None,
            validation: ValidationReactionConfig::default(),
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.max_stack_depth == 0 {
            return Err(ConfigError::Invalid {
                message: "max_stack_depth must be at least 1".to_string(),
            });
        }
        if self.run_timeout_secs == Some(0) {
            return Err(ConfigError::Invalid {
                message: "run_timeout_secs must be at least 1 when set".to_string(),
            });
        }
        Ok(())
    }
}

/// Returns the default configuration path, honoring [`CONFIG_PATH_ENV`].
pub fn default_config_path() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_PATH_ENV)
        && !path.trim().is_empty()
    {
        return PathBuf::from(path);
    }

    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("pipewright")
        .join("config.yaml")
}

/// Loads configuration from the default path.
pub fn load_config() -> Result<EngineConfig, ConfigError> {
    load_config_from_path(&default_config_path())
}

/// Loads configuration from a YAML (or JSON) file. A missing file yields the defaults.
pub fn load_config_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    if !path.exists() {
        return Ok(EngineConfig::default());
    }

    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let config: EngineConfig = if content.trim().is_empty() {
        EngineConfig::default()
    } else {
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?
    };
    config.validate()?;
    Ok(config)
}
