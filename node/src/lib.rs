//! Configuration and simulation harness for running the validation engine from the command line.

use egm_validation::ValidationConfig;
use serde::{Deserialize, Serialize};
use std::{path::Path, str::FromStr};
use thiserror::Error;
use tracing::Level;

pub mod simulate;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file {path}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config file")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid log level: {value}")]
    InvalidLogLevel { value: String },
    #[error(transparent)]
    Validation(#[from] egm_validation::ConfigError),
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration file of the node.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Emit structured (JSON) log lines.
    #[serde(default)]
    pub json_logs: bool,

    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
            validation: ValidationConfig::default(),
        }
    }
}

impl Config {
    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(contents)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&contents)
    }

    /// Checks every section, returning the parsed log level.
    pub fn validate(&self) -> Result<Level, ConfigError> {
        self.validation.validate()?;
        Level::from_str(&self.log_level).map_err(|_| ConfigError::InvalidLogLevel {
            value: self.log_level.clone(),
        })
    }
}
