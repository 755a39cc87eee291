//! Configuration management for the HBP engine.
//!
//! Configuration lives in `~/.hbp/` as a set of JSON files merged by
//! [`crate::config_loader`]. The engine section is kept as raw JSON here and
//! deserialized into typed tables by the engine crate.
//!
//! # Configuration Priority
//!
//! 1. Environment variables (HBP_* prefix)
//! 2. Explicit config file values
//! 3. Default values
//!
//! # Environment Variable Mapping
//!
//! - `HBP_CONFIG_DIR` → configuration directory
//! - `HBP_LOG_LEVEL` → observability.log_level
//! - `HBP_LOG_FORMAT` → observability.log_format

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config_loader::load_modular_config;
use crate::error::{Error, Result};

/// Get the configuration directory path.
pub fn config_dir() -> PathBuf {
    if let Ok(dir) = std::env::var("HBP_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    directories::UserDirs::new()
        .map_or_else(|| PathBuf::from(".hbp"), |dirs| dirs.home_dir().join(".hbp"))
}

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    /// JSON Schema reference
    #[serde(rename = "$schema", default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Engine tables (indicators, sectors, scoring, optimizer), typed by the engine crate
    #[serde(default)]
    pub engine: serde_json::Value,
}

impl Config {
    /// Load configuration from the modular files in `dir`.
    ///
    /// Unreadable files are IO errors; malformed ones are configuration
    /// errors naming the file.
    pub fn load_dir(dir: &Path) -> Result<Self> {
        if !dir.exists() {
            tracing::info!(dir = %dir.display(), "Config directory not found, using defaults");
            return Ok(Self::default());
        }

        let merged = load_modular_config(Some(dir.to_path_buf()))?;
        serde_json::from_value(merged).map_err(|e| {
            Error::Config(format!("Failed to parse config from {}: {e}", dir.display()))
        })
    }

    /// Load configuration from `dir` with environment variable overrides.
    pub fn load_with_env(dir: &Path) -> Result<Self> {
        let mut config = Self::load_dir(dir)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(level) = std::env::var("HBP_LOG_LEVEL") {
            self.observability.log_level = level;
        }
        if let Ok(format) = std::env::var("HBP_LOG_FORMAT") {
            self.observability.log_format = format;
        }
    }

    /// Whether an engine section was supplied at all.
    pub fn has_engine_section(&self) -> bool {
        !self.engine.is_null()
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level", alias = "level")]
    pub log_level: String,

    /// Log format (json, pretty)
    #[serde(default = "default_log_format", alias = "format")]
    pub log_format: String,

    /// Additional module targets to set to `warn`.
    #[serde(default)]
    pub excluded_targets: Vec<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            excluded_targets: Vec::new(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.observability.log_level, "info");
        assert_eq!(config.observability.log_format, "pretty");
        assert!(!config.has_engine_section());
    }

    #[test]
    fn test_observability_aliases() {
        let config: Config = serde_json::from_str(
            r#"{ "observability": { "level": "debug", "format": "json" } }"#,
        )
        .unwrap();
        assert_eq!(config.observability.log_level, "debug");
        assert_eq!(config.observability.log_format, "json");
    }

    #[test]
    fn test_load_missing_dir_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        let config = Config::load_dir(&missing).unwrap();
        assert_eq!(config.observability.log_level, "info");
    }

    #[test]
    fn test_load_dir_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "engine": { "scoring": { "macro_weight": 0.5 } } }"#,
        )
        .unwrap();
        let config = Config::load_dir(dir.path()).unwrap();
        assert!(config.has_engine_section());
        assert_eq!(config.engine["scoring"]["macro_weight"], 0.5);
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("sectors.json"), "{ broken").unwrap();
        let err = Config::load_dir(dir.path()).unwrap_err();
        assert!(err.is_config());
        assert_eq!(err.exit_code(), 78);
        assert!(err.to_string().contains("sectors.json"));
    }

    #[test]
    fn test_wrong_shape_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("config.json"),
            r#"{ "observability": { "log_level": 3 } }"#,
        )
        .unwrap();
        let err = Config::load_dir(dir.path()).unwrap_err();
        assert_eq!(err.exit_code(), 78);
    }
}
