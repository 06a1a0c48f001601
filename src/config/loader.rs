use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::config::types::ShellRpcConfig;
use crate::integration::ToolKind;

/// Environment variable overriding the config file location.
pub const CONFIG_PATH_ENV: &str = "SHELL_RPC_CONFIG";

/// Errors that can occur when loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadError {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{path}': {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },
}

impl ShellRpcConfig {
    /// Returns the path to the configuration file.
    ///
    /// `$SHELL_RPC_CONFIG` wins when set. Otherwise uses
    /// `~/.config/shell-rpc/config.toml` (or the platform equivalent via
    /// `dirs::config_dir()`), falling back to the current directory.
    pub fn config_path() -> PathBuf {
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return PathBuf::from(path);
        }
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        config_dir.join("shell-rpc").join("config.toml")
    }

    /// Loads configuration from the default config file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(&Self::config_path())
    }

    /// Loads configuration from `path`.
    ///
    /// - If the file doesn't exist, returns `ShellRpcConfig::default()`.
    /// - Otherwise parses it as TOML and validates.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No config file, using defaults");
            return Ok(ShellRpcConfig::default());
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        let config: ShellRpcConfig =
            toml::from_str(&content).map_err(|e| ConfigError::ParseError {
                path: path.to_path_buf(),
                source: e,
            })?;

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration.
    ///
    /// Checks:
    /// - Every profile and the fallback tool name a known tool
    /// - Timeout overrides are positive
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut problems = Vec::new();

        if let Some(name) = &self.defaults.fallback_tool {
            if ToolKind::parse(name).is_none() {
                problems.push(format!("unknown fallback tool '{}'", name));
            }
        }

        let mut names: Vec<&String> = self.profiles.keys().collect();
        names.sort();
        for name in names {
            if ToolKind::parse(name).is_none() {
                problems.push(format!("unknown tool profile '{}'", name));
                continue;
            }
            let profile = &self.profiles[name];
            for (field, value) in [
                ("base_timeout_ms", profile.base_timeout_ms),
                ("activity_extension_ms", profile.activity_extension_ms),
                ("grace_timeout_ms", profile.grace_timeout_ms),
                ("absolute_maximum_ms", profile.absolute_maximum_ms),
            ] {
                if value == Some(0) {
                    problems.push(format!("profiles.{}.{} must be positive", name, field));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::ValidationError {
                message: problems.join("; "),
            })
        }
    }
}
