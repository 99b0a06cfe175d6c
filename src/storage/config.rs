//! Configuration handling for the loader
//!
//! Configuration is read from `~/.config/depload/config.toml` (global) and
//! the nearest `depload.toml` walking up from the working directory
//! (project). Project keys override global keys; anything unset falls back
//! to [`LoaderConfig::default`].

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Project configuration file name
pub const PROJECT_CONFIG_FILE: &str = "depload.toml";

/// Default bound on a single script fetch
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 30_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse configuration: {0}")]
    Parse(String),
}

/// What resolution does when it meets a dependency cycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CyclePolicy {
    /// Record the cycle and drop the offending edge
    #[default]
    Skip,
    /// Record the cycle and fail the require
    Fail,
}

impl CyclePolicy {
    pub fn as_str(&self) -> &str {
        match self {
            CyclePolicy::Skip => "skip",
            CyclePolicy::Fail => "fail",
        }
    }
}

/// Runtime configuration of a loader
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoaderConfig {
    /// Prefix for auto-loaded script locations
    pub base_url: String,

    /// Cache-busting token appended as `?v=<token>`
    pub cache_token: String,

    /// Bound on a single script fetch, in milliseconds
    pub fetch_timeout_ms: u64,

    /// Log every phase transition
    pub debug: bool,

    /// Fail instead of substituting a placeholder when auto-load fails
    pub strict_mode: bool,

    /// Cycle handling during resolution
    pub cycle_policy: CyclePolicy,

    /// Extension of auto-loaded scripts
    pub script_extension: String,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            cache_token: Utc::now().timestamp_millis().to_string(),
            fetch_timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
            debug: false,
            strict_mode: false,
            cycle_policy: CyclePolicy::Skip,
            script_extension: "js".to_string(),
        }
    }
}

impl LoaderConfig {
    /// The fetch timeout as a `Duration`
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Checks values that would make every fetch fail
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fetch_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "fetch_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if self.script_extension.contains('/') {
            return Err(ConfigError::Invalid(format!(
                "script_extension must not contain '/': {}",
                self.script_extension
            )));
        }
        Ok(())
    }

    /// Parses a configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: LoaderConfig =
            toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Loads the layered configuration from default locations
    pub fn load() -> Result<Self> {
        let project = Self::find_project_config();
        Self::load_layers(Self::global_config_path().as_deref(), project.as_deref())
    }

    /// Loads a single configuration file, ignoring global/project discovery
    pub fn load_file(path: &Path) -> Result<Self> {
        Self::load_layers(None, Some(path))
    }

    /// Merges the global and project files (project wins) over the defaults
    pub fn load_layers(global: Option<&Path>, project: Option<&Path>) -> Result<Self> {
        let mut merged = toml::Table::new();

        for path in [global, project].into_iter().flatten() {
            if let Some(table) = Self::read_table(path)? {
                merged.extend(table);
            }
        }

        let config: LoaderConfig = toml::Value::Table(merged)
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::Parse(e.to_string()))
            .context("Failed to parse configuration")?;
        config.validate().context("Invalid configuration")?;

        Ok(config)
    }

    fn read_table(path: &Path) -> Result<Option<toml::Table>> {
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;

        let table: toml::Table = toml::from_str(&content)
            .map_err(|e| ConfigError::Parse(e.to_string()))
            .with_context(|| format!("Failed to parse config: {}", path.display()))?;

        Ok(Some(table))
    }

    /// Returns the global config file location
    pub fn global_config_path() -> Option<PathBuf> {
        ProjectDirs::from("dev", "depload", "depload")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Finds the nearest `depload.toml` walking up from the working directory
    pub fn find_project_config() -> Option<PathBuf> {
        let current = std::env::current_dir().ok()?;
        Self::find_project_config_from(&current)
    }

    /// Finds the nearest `depload.toml` walking up from `start`
    pub fn find_project_config_from(start: &Path) -> Option<PathBuf> {
        let mut current = start.to_path_buf();

        loop {
            let candidate = current.join(PROJECT_CONFIG_FILE);
            if candidate.is_file() {
                return Some(candidate);
            }

            if !current.pop() {
                return None;
            }
        }
    }

    /// Serializes the configuration as TOML
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration")
    }
}
