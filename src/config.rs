//! Configuration System
//!
//! Provides hierarchical configuration loading from:
//! - querydesk.toml (default configuration)
//! - querydesk.local.toml (git-ignored local overrides)
//! - Environment variables (QUERYDESK_* prefix)
//!
//! ## Example
//!
//! ```toml
//! # querydesk.toml
//! [cache]
//! max_entries = 200
//! default_ttl_secs = 600
//!
//! [executions]
//! history_limit = 100
//! ```
//!
//! Environment variable overrides:
//! ```bash
//! QUERYDESK_CACHE__MAX_ENTRIES=50
//! QUERYDESK_LOGGING__FORMAT=json
//! ```

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub executions: ExecutionConfig,
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Result cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Consult and populate the cache at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of entries across all queries
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// TTL applied when the caller does not pass one
    #[serde(default = "default_ttl_secs")]
    pub default_ttl_secs: u64,
}

/// Execution tracking configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Number of finished executions retained
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

/// Collaborator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Timeout for execution calls in milliseconds. 0 = no timeout.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Catalog file used by the file-backed service
    #[serde(default = "default_catalog_path")]
    pub catalog_path: PathBuf,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format (text, json)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Append logs to this file instead of stderr
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}
fn default_max_entries() -> usize {
    100
}
fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}
fn default_history_limit() -> usize {
    50
}
fn default_request_timeout_ms() -> u64 {
    30_000
}
fn default_catalog_path() -> PathBuf {
    PathBuf::from("catalog.json")
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from default locations
    ///
    /// Merges in order:
    /// 1. querydesk.toml (base configuration)
    /// 2. querydesk.local.toml (local overrides, git-ignored)
    /// 3. Environment variables (QUERYDESK_* prefix)
    pub fn load() -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file("querydesk.toml"))
            .merge(Toml::file("querydesk.local.toml"))
            .merge(Env::prefixed("QUERYDESK_").split("__"))
            .extract()
    }

    /// Load configuration from specific file path
    pub fn from_file(path: &str) -> Result<Self, figment::Error> {
        Figment::new()
            .merge(Toml::file(path))
            .merge(Env::prefixed("QUERYDESK_").split("__"))
            .extract()
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            enabled: true,
            max_entries: default_max_entries(),
            default_ttl_secs: default_ttl_secs(),
        }
    }
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        ExecutionConfig {
            history_limit: default_history_limit(),
        }
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        ServiceConfig {
            request_timeout_ms: default_request_timeout_ms(),
            catalog_path: default_catalog_path(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            format: default_log_format(),
            file: None,
        }
    }
}
