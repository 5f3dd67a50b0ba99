//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! application. All types derive Serde traits for deserialization from config
//! files, and every field has a default so partial files load.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Application identity and HTTP listener.
    pub server: ServerConfig,

    /// PostgreSQL connection settings.
    pub postgres: PostgresConfig,

    /// Redis connection settings.
    pub redis: RedisConfig,

    /// Start/stop orchestration settings.
    pub lifecycle: LifecycleConfig,

    /// Logging and metrics settings.
    pub observability: ObservabilityConfig,
}

/// Application identity and HTTP listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Name reported in logs. Empty means "default-server".
    pub app_name: String,

    /// Version reported in logs. Empty means "0.0.1".
    pub app_version: String,

    /// Deployment environment (e.g. "development", "production").
    pub app_environment: String,

    /// HTTP bind host.
    pub app_host: String,

    /// HTTP bind port.
    pub app_port: u16,

    /// Per-request timeout in seconds.
    pub request_timeout_secs: u64,

    /// Graceful HTTP shutdown timeout in seconds.
    pub graceful_shutdown_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            app_name: String::new(),
            app_version: String::new(),
            app_environment: "development".to_string(),
            app_host: "0.0.0.0".to_string(),
            app_port: 8080,
            request_timeout_secs: 10,
            graceful_shutdown_secs: 5,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn graceful_shutdown(&self) -> Duration {
        Duration::from_secs(self.graceful_shutdown_secs)
    }
}

/// PostgreSQL configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PostgresConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub dbname: String,

    /// Require TLS for the connection.
    pub sslmode: bool,

    /// Connection establishment timeout in seconds.
    pub connect_timeout_secs: u64,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 5432,
            user: String::new(),
            password: String::new(),
            dbname: String::new(),
            sslmode: false,
            connect_timeout_secs: 5,
        }
    }
}

/// Redis configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RedisConfig {
    pub host: String,
    pub port: u16,
    pub password: String,

    /// Logical database index.
    pub db: i64,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: 6379,
            password: String::new(),
            db: 0,
        }
    }
}

/// Orchestration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Window for stopping every adapter, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            shutdown_timeout_secs: 10,
        }
    }
}

impl LifecycleConfig {
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log filter (e.g. "info", "kaffein=debug,tower_http=info").
    pub log_level: String,

    /// Console log format.
    pub log_format: LogFormat,

    /// Optional file that receives a JSON copy of every log line.
    pub log_file: Option<PathBuf>,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_file: None,
            metrics_enabled: false,
            metrics_address: "0.0.0.0:9090".to_string(),
        }
    }
}
