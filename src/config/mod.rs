//! Configuration management for the sonda engine
//!
//! Handles loading and validating configuration from environment variables,
//! TOML files, and built-in defaults. Environment variables use the `SONDA_`
//! prefix and override file values.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::{Error, Result};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Search range configuration
    pub search: SearchConfig,

    /// Worker pool configuration
    pub workers: WorkerConfig,

    /// Checkpoint and result persistence configuration
    pub persistence: PersistenceConfig,

    /// Executor (remote service) configuration
    pub executor: ExecutorConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Search range configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Inclusive range start: `"1990"` or `"1990-11"`
    pub start: String,

    /// Inclusive range end: `"2000"` or `"2000-06"`
    pub end: String,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    /// Number of concurrent workers
    pub num_workers: usize,

    /// Maximum requeues per task before it is reported unresolved
    pub max_retries_per_task: u32,

    /// Consecutive transient errors before a worker recreates its executor
    pub max_consecutive_errors: u32,
}

/// Checkpoint and result persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistenceConfig {
    /// Directory for checkpoint files
    pub checkpoint_dir: PathBuf,

    /// Directory for result output files
    pub output_dir: PathBuf,

    /// Wall-clock seconds between checkpoint saves
    pub checkpoint_interval_secs: u64,

    /// Match buffer size that forces a result flush
    pub batch_size: usize,

    /// Seconds after which a non-empty match buffer is flushed regardless
    pub batch_timeout_secs: u64,
}

/// Executor configuration, consumed by the reference HTTP executor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    /// Search form endpoint
    pub endpoint: String,

    /// Request timeout in seconds
    pub request_timeout_secs: u64,

    /// Requests per second limit per executor
    pub requests_per_second: u32,

    /// Minimum delay between searches (seconds)
    pub min_delay_secs: f64,

    /// Maximum delay between searches (seconds)
    pub max_delay_secs: f64,

    /// Take a long pause every N searches
    pub pause_every_n: u64,

    /// Duration of the long pause (seconds)
    pub pause_duration_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables over defaults
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read {}: {e}", path.display())))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| Error::config(format!("Failed to parse {}: {e}", path.display())))?;

        Ok(config)
    }

    /// Apply `SONDA_*` environment overrides in place
    pub fn apply_env(&mut self) {
        if let Some(v) = env_parse::<String>("SONDA_RANGE_START") {
            self.search.start = v;
        }
        if let Some(v) = env_parse::<String>("SONDA_RANGE_END") {
            self.search.end = v;
        }
        if let Some(v) = env_parse("SONDA_NUM_WORKERS") {
            self.workers.num_workers = v;
        }
        if let Some(v) = env_parse("SONDA_MAX_RETRIES_PER_TASK") {
            self.workers.max_retries_per_task = v;
        }
        if let Some(v) = env_parse("SONDA_MAX_CONSECUTIVE_ERRORS") {
            self.workers.max_consecutive_errors = v;
        }
        if let Some(v) = env_parse::<String>("SONDA_CHECKPOINT_DIR") {
            self.persistence.checkpoint_dir = v.into();
        }
        if let Some(v) = env_parse::<String>("SONDA_OUTPUT_DIR") {
            self.persistence.output_dir = v.into();
        }
        if let Some(v) = env_parse("SONDA_CHECKPOINT_INTERVAL") {
            self.persistence.checkpoint_interval_secs = v;
        }
        if let Some(v) = env_parse("SONDA_BATCH_SIZE") {
            self.persistence.batch_size = v;
        }
        if let Some(v) = env_parse("SONDA_BATCH_TIMEOUT") {
            self.persistence.batch_timeout_secs = v;
        }
        if let Some(v) = env_parse::<String>("SONDA_ENDPOINT") {
            self.executor.endpoint = v;
        }
        if let Some(v) = env_parse("SONDA_REQUEST_TIMEOUT") {
            self.executor.request_timeout_secs = v;
        }
        if let Some(v) = env_parse("SONDA_REQUESTS_PER_SECOND") {
            self.executor.requests_per_second = v;
        }
        if let Some(v) = env_parse("SONDA_MIN_DELAY") {
            self.executor.min_delay_secs = v;
        }
        if let Some(v) = env_parse("SONDA_MAX_DELAY") {
            self.executor.max_delay_secs = v;
        }
        if let Some(v) = env_parse("SONDA_PAUSE_EVERY_N") {
            self.executor.pause_every_n = v;
        }
        if let Some(v) = env_parse("SONDA_PAUSE_DURATION") {
            self.executor.pause_duration_secs = v;
        }
        if let Some(v) = env_parse::<String>("SONDA_LOG_LEVEL") {
            self.logging.level = v;
        }
        if let Some(v) = env_parse::<String>("SONDA_LOG_FORMAT") {
            self.logging.format = v;
        }
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.workers.num_workers == 0 {
            return Err(Error::config("num_workers must be greater than 0"));
        }
        if self.persistence.batch_size == 0 {
            return Err(Error::config("batch_size must be greater than 0"));
        }
        if self.persistence.checkpoint_interval_secs == 0 {
            return Err(Error::config(
                "checkpoint_interval_secs must be greater than 0",
            ));
        }
        if self.executor.min_delay_secs < 0.0
            || self.executor.max_delay_secs < self.executor.min_delay_secs
        {
            return Err(Error::config(
                "delay range must satisfy 0 <= min_delay <= max_delay",
            ));
        }
        if self.executor.requests_per_second == 0 {
            return Err(Error::config("requests_per_second must be greater than 0"));
        }
        Ok(())
    }

    /// Get checkpoint interval as Duration
    #[must_use]
    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_secs(self.persistence.checkpoint_interval_secs)
    }

    /// Get batch timeout as Duration
    #[must_use]
    pub fn batch_timeout(&self) -> Duration {
        Duration::from_secs(self.persistence.batch_timeout_secs)
    }

    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.executor.request_timeout()
    }
}

impl ExecutorConfig {
    /// Get request timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig {
                start: String::from("1960"),
                end: String::from("2005"),
            },
            workers: WorkerConfig {
                num_workers: 8,
                max_retries_per_task: 3,
                max_consecutive_errors: 5,
            },
            persistence: PersistenceConfig {
                checkpoint_dir: PathBuf::from("data/checkpoints"),
                output_dir: PathBuf::from("data/results"),
                checkpoint_interval_secs: 300,
                batch_size: 300,
                batch_timeout_secs: 300,
            },
            executor: ExecutorConfig {
                endpoint: String::from("https://localhost/consulta"),
                request_timeout_secs: 60,
                requests_per_second: 2,
                min_delay_secs: 0.3,
                max_delay_secs: 0.6,
                pause_every_n: 500,
                pause_duration_secs: 5,
            },
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse::<T>().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_worker_count() {
        let mut config = Config::default();
        config.workers.num_workers = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_invalid_delay_range() {
        let mut config = Config::default();
        config.executor.min_delay_secs = 2.0;
        config.executor.max_delay_secs = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_duration_conversions() {
        let config = Config::default();
        assert_eq!(config.checkpoint_interval(), Duration::from_secs(300));
        assert_eq!(config.request_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_from_toml() {
        let toml_src = r#"
            [search]
            start = "1990-06"
            end = "1991"

            [workers]
            num_workers = 4
            max_retries_per_task = 2
            max_consecutive_errors = 3

            [persistence]
            checkpoint_dir = "/tmp/ckpt"
            output_dir = "/tmp/out"
            checkpoint_interval_secs = 60
            batch_size = 10
            batch_timeout_secs = 30

            [executor]
            endpoint = "https://example.test/consulta"
            request_timeout_secs = 15
            requests_per_second = 1
            min_delay_secs = 1.0
            max_delay_secs = 2.0
            pause_every_n = 75
            pause_duration_secs = 15

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config: Config = toml::from_str(toml_src).unwrap();
        assert_eq!(config.search.start, "1990-06");
        assert_eq!(config.workers.num_workers, 4);
        assert_eq!(config.persistence.batch_size, 10);
        assert_eq!(config.executor.pause_every_n, 75);
        assert!(config.validate().is_ok());
    }
}
