//! Configuration for the queue exporter.

use std::path::Path;
use std::time::Duration;

use rmq_console_collector::{DEFAULT_COMMAND, Filter, FilterError, ParserKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Invalid queue filter: {0}")]
    Filter(#[from] FilterError),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Prometheus exporter settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,

    /// Command execution settings.
    #[serde(default)]
    pub collection: CollectionConfig,

    /// Queue filtering settings.
    #[serde(default)]
    pub filters: FilterConfig,

    /// Hot reload of the filter rules.
    #[serde(default)]
    pub reload: ReloadConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Prometheus HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrometheusConfig {
    /// Address to listen on (default: "0.0.0.0:2112").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,

    /// Prepended verbatim to every metric name (default: "rmq_").
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_listen() -> String {
    "0.0.0.0:2112".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

fn default_prefix() -> String {
    "rmq_".to_string()
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
            prefix: default_prefix(),
        }
    }
}

/// How `rabbitmqctl` is run and read.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionConfig {
    /// Executable to run; the arguments come from the parser.
    #[serde(default = "default_command")]
    pub command: String,

    /// Output format to request and parse.
    #[serde(default)]
    pub parser: ParserKind,

    /// Deadline for one collection, in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Capacity of the output channel, in lines.
    #[serde(default = "default_output_buffer")]
    pub output_buffer: usize,
}

fn default_command() -> String {
    DEFAULT_COMMAND.to_string()
}

fn default_timeout_ms() -> u64 {
    600_000 // 10 minutes
}

fn default_output_buffer() -> usize {
    100_000
}

impl CollectionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            command: default_command(),
            parser: ParserKind::default(),
            timeout_ms: default_timeout_ms(),
            output_buffer: default_output_buffer(),
        }
    }
}

/// Queue filtering configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Regular expressions matched against queue names (empty = all).
    #[serde(default)]
    pub queues: Vec<String>,
}

impl FilterConfig {
    /// Compile the queue rules.
    pub fn compile(&self) -> Result<Filter, FilterError> {
        Filter::new(&self.queues)
    }
}

/// Hot reload configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReloadConfig {
    /// Watch the config file for filter changes.
    #[serde(default = "default_reload_enabled")]
    pub enabled: bool,

    /// How often the file is checked (seconds).
    #[serde(default = "default_reload_interval")]
    pub interval_secs: u64,
}

fn default_reload_enabled() -> bool {
    true
}

fn default_reload_interval() -> u64 {
    5
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            enabled: default_reload_enabled(),
            interval_secs: default_reload_interval(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output format: "text" or "json".
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self
            .prometheus
            .listen
            .parse::<std::net::SocketAddr>()
            .is_err()
        {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.prometheus.listen
            )));
        }

        if !self.prometheus.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.collection.command.trim().is_empty() {
            return Err(ConfigError::Validation(
                "command must not be empty".to_string(),
            ));
        }

        if self.collection.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.collection.output_buffer == 0 {
            return Err(ConfigError::Validation(
                "output_buffer must be > 0".to_string(),
            ));
        }

        if self.reload.interval_secs == 0 {
            return Err(ConfigError::Validation(
                "interval_secs must be > 0".to_string(),
            ));
        }

        self.filters.compile()?;

        Ok(())
    }
}
