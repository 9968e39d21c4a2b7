//! Configuration structures for deserialisation.
//!
//! These structures map directly to the JSON configuration file format.

use std::path::PathBuf;

use serde::Deserialize;

use crate::build::Verbosity;
use crate::error::ConfigError;

/// Root configuration structure.
///
/// This is the top-level structure that matches the JSON config file.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// Optional JSON schema reference (ignored during parsing).
    #[serde(rename = "$schema", default)]
    _schema: Option<String>,

    /// Optional comment field (ignored during parsing).
    #[serde(rename = "_comment", default)]
    _comment: Option<String>,

    /// Directories project files must live under. Empty allows any path.
    #[serde(default)]
    pub allowed_paths: Vec<PathBuf>,

    /// Build engine settings.
    #[serde(default)]
    pub engine: EngineConfig,

    /// Build request defaults.
    #[serde(default)]
    pub build: BuildConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any validation checks fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.program.trim().is_empty() {
            return Err(ConfigError::ValidationError {
                message: "engine program must not be empty".to_string(),
            });
        }

        if let Some(path) = self.allowed_paths.iter().find(|p| p.is_relative()) {
            return Err(ConfigError::ValidationError {
                message: format!(
                    "allowed path '{}' must be absolute",
                    path.display()
                ),
            });
        }
        Ok(())
    }
}

/// Command used to run builds.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EngineConfig {
    /// Program to execute.
    /// Default: "dotnet"
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed before the project path.
    /// Default: `["msbuild"]`
    #[serde(default = "default_arguments")]
    pub arguments: Vec<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            arguments: default_arguments(),
        }
    }
}

fn default_program() -> String {
    "dotnet".to_string()
}

fn default_arguments() -> Vec<String> {
    vec!["msbuild".to_string()]
}

/// Defaults applied to build requests.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Console verbosity used when a request does not name one.
    #[serde(default)]
    pub default_verbosity: Verbosity,
}

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "warn".to_string()
}
