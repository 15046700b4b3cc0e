//! Configuration management for the graph store
//!
//! Process configuration is read from a TOML file and then overridden by
//! `GS_*` environment variables. The graph schema itself lives in a separate
//! JSON document referenced by `schema.path`.

use crate::core::error::{GraphError, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// Storage configuration
    pub storage: StorageConfig,

    /// Event queue configuration
    pub queue: QueueConfig,

    /// Schema document location
    pub schema: SchemaConfig,

    /// Metrics and monitoring
    pub metrics: MetricsConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,
}

/// Available storage backend types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageType {
    /// In-memory storage (data is lost on exit)
    Memory,
    /// SQLite file storage
    Sqlite,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub storage_type: StorageType,

    /// Database file for the SQLite backend
    pub sqlite_path: PathBuf,
}

/// Available event queue types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueType {
    /// Events are only persisted, never published
    None,
    /// In-process channel queue
    Channel,
}

/// Event queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Queue backend type
    pub queue_type: QueueType,

    /// Topic name events are published to
    pub topic: String,

    /// Channel capacity; 0 means unbounded
    pub capacity: usize,
}

/// Schema document location
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchemaConfig {
    /// Path to the JSON graph definition
    pub path: PathBuf,
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Expose Prometheus metrics on `/metrics`
    pub enable_prometheus: bool,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (pretty, json, compact)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_type: StorageType::Memory,
            sqlite_path: PathBuf::from("./data/graph.db"),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            queue_type: QueueType::None,
            topic: "graph-events".to_string(),
            capacity: 0,
        }
    }
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./graph.json"),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enable_prometheus: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl std::str::FromStr for StorageType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "memory" => Ok(Self::Memory),
            "sqlite" => Ok(Self::Sqlite),
            other => Err(GraphError::config(format!(
                "Invalid storage type: {}. Valid options: memory, sqlite",
                other
            ))),
        }
    }
}

impl std::str::FromStr for QueueType {
    type Err = GraphError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "none" => Ok(Self::None),
            "channel" => Ok(Self::Channel),
            other => Err(GraphError::config(format!(
                "Invalid queue type: {}. Valid options: none, channel",
                other
            ))),
        }
    }
}

impl Config {
    /// Load configuration from an optional TOML file, then apply environment overrides
    pub fn load(path: Option<&str>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Config::default(),
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| GraphError::config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| GraphError::config(format!("Failed to parse config file: {}", e)))
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        use std::env;

        if let Ok(addr) = env::var("GS_HTTP_ADDR") {
            self.server.http_addr = addr
                .parse()
                .map_err(|e| GraphError::config(format!("Invalid HTTP address: {}", e)))?;
        }

        if let Ok(storage) = env::var("GS_STORAGE") {
            self.storage.storage_type = storage.parse()?;
        }

        if let Ok(path) = env::var("GS_SQLITE_PATH") {
            self.storage.sqlite_path = PathBuf::from(path);
        }

        if let Ok(queue) = env::var("GS_QUEUE") {
            self.queue.queue_type = queue.parse()?;
        }

        if let Ok(path) = env::var("GS_SCHEMA_PATH") {
            self.schema.path = PathBuf::from(path);
        }

        if let Ok(level) = env::var("GS_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Ok(format) = env::var("GS_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(GraphError::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" | "compact" => {}
            _ => return Err(GraphError::config("Invalid log format")),
        }

        if self.queue.queue_type == QueueType::Channel && self.queue.topic.is_empty() {
            return Err(GraphError::config("Queue topic must not be empty"));
        }

        Ok(())
    }
}
