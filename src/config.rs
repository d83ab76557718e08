//! Engine configuration
//!
//! Loaded from a TOML file (default `vista-graph.toml` in the working
//! directory). Every section is optional; missing keys take their defaults.
//! Command-line flags are applied on top after loading.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::confidence::ConfidenceTable;
use crate::error::{GraphError, Result};
use crate::fs_utils;

pub const DEFAULT_CONFIG_FILE: &str = "vista-graph.toml";

/// Smallest and largest merge batch the engine accepts
pub const MIN_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 50_000;

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct EngineConfig {
    #[serde(default)]
    pub extraction: ExtractionConfig,

    #[serde(default)]
    pub merge: MergeConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub confidence: ConfidenceTable,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExtractionConfig {
    /// Worker threads for dump and routine extraction
    #[serde(default = "default_workers")]
    pub workers: usize,

    /// Extension of routine source files
    #[serde(default = "default_routine_extension")]
    pub routine_extension: String,

    /// Malformed lines kept verbatim in the report, per dump file
    #[serde(default = "default_malformed_samples")]
    pub malformed_samples: usize,
}

fn default_workers() -> usize {
    4
}

fn default_routine_extension() -> String {
    "m".to_string()
}

fn default_malformed_samples() -> usize {
    50
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            routine_extension: default_routine_extension(),
            malformed_samples: default_malformed_samples(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MergeConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Concurrent store writers
    #[serde(default = "default_write_slots")]
    pub write_slots: usize,

    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,

    #[serde(default = "default_retry_max_ms")]
    pub retry_max_ms: u64,

    /// Extract and resolve everything but write nothing
    #[serde(default)]
    pub dry_run: bool,
}

fn default_batch_size() -> usize {
    1000
}

fn default_write_slots() -> usize {
    2
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_base_ms() -> u64 {
    200
}

fn default_retry_max_ms() -> u64 {
    2000
}

impl Default for MergeConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            write_slots: default_write_slots(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            retry_max_ms: default_retry_max_ms(),
            dry_run: false,
        }
    }
}

impl MergeConfig {
    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.clamp(MIN_BATCH_SIZE, MAX_BATCH_SIZE);
        self
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoreConfig {
    /// SQLite database holding the graph
    #[serde(default = "default_store_path")]
    pub path: PathBuf,

    /// Milliseconds SQLite waits on a locked database before reporting BUSY
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
}

fn default_store_path() -> PathBuf {
    PathBuf::from("vista-graph.db")
}

fn default_busy_timeout_ms() -> u64 {
    100
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            busy_timeout_ms: default_busy_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from a specific path, falling back to defaults when
    /// the file does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GraphError::io(path.display(), e))?;

        let config: Self = toml::from_str(&content).map_err(|e| GraphError::ConfigError {
            message: format!("Failed to parse config {}: {}", path.display(), e),
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| GraphError::ConfigError {
            message: format!("Failed to serialize config: {}", e),
        })?;
        fs_utils::write_atomic(path, content.as_bytes())
    }

    pub fn validate(&self) -> Result<()> {
        if self.extraction.workers == 0 {
            return Err(GraphError::ConfigError {
                message: "extraction.workers must be at least 1".to_string(),
            });
        }
        if self.merge.write_slots == 0 {
            return Err(GraphError::ConfigError {
                message: "merge.write_slots must be at least 1".to_string(),
            });
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.merge.batch_size) {
            return Err(GraphError::ConfigError {
                message: format!(
                    "merge.batch_size {} must be within {}..={}",
                    self.merge.batch_size, MIN_BATCH_SIZE, MAX_BATCH_SIZE
                ),
            });
        }
        if !["error", "warn", "info", "debug", "trace"].contains(&self.logging.level.as_str()) {
            return Err(GraphError::ConfigError {
                message: format!(
                    "Invalid log level: {}. Must be one of: error, warn, info, debug, trace",
                    self.logging.level
                ),
            });
        }
        self.confidence.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = TempDir::new().unwrap();
        let config = EngineConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.merge.batch_size, 1000);
        assert_eq!(config.extraction.workers, 4);
    }

    #[test]
    fn test_partial_sections() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("vista-graph.toml");
        fs::write(
            &path,
            "[merge]\nbatch_size = 250\n\n[confidence]\nlabel_offset = 0.55\n",
        )
        .unwrap();

        let config = EngineConfig::load_from(&path).unwrap();
        assert_eq!(config.merge.batch_size, 250);
        assert_eq!(config.merge.max_retries, 3);
        assert_eq!(config.confidence.label_offset, 0.55);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_values_rejected() {
        let mut config = EngineConfig::default();
        config.extraction.workers = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.logging.level = "loud".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_malformed_toml_is_config_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        fs::write(&path, "[merge\nbatch_size = ").unwrap();
        assert!(matches!(
            EngineConfig::load_from(&path),
            Err(GraphError::ConfigError { .. })
        ));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("out.toml");
        let mut config = EngineConfig::default();
        config.merge.write_slots = 3;
        config.save_to(&path).unwrap();
        assert_eq!(EngineConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn test_batch_size_clamping() {
        assert_eq!(MergeConfig::default().with_batch_size(10).batch_size, 100);
        assert_eq!(MergeConfig::default().with_batch_size(100_000).batch_size, 50_000);
        assert_eq!(MergeConfig::default().with_batch_size(5000).batch_size, 5000);
    }
}
