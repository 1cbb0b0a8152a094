//! Configuration module for StatusTrail.
//!
//! Server settings come from environment variables with sensible defaults;
//! the monitored endpoints come from a YAML file.

use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::endpoint::{Endpoint, EndpointConfig, EndpointError};

/// Days of history kept when the configuration does not say.
pub const DEFAULT_MAX_DAYS: u32 = 30;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// HTTP port for the web server (default: 9000)
    pub http_port: u16,
    /// Path to the SQLite database file (default: "statustrail.db")
    pub db_path: String,
    /// Path to the endpoints file (default: "config.yaml")
    pub config_path: String,
    /// Run a sweep on this interval; sweeps are only triggered externally when unset
    pub check_interval: Option<Duration>,
    /// Write dashboard data to this file after each sweep
    pub report_path: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_port: 9000,
            db_path: "statustrail.db".to_string(),
            config_path: "config.yaml".to_string(),
            check_interval: None,
            report_path: None,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables.
    ///
    /// Environment variables:
    /// - `STATUSTRAIL_HTTP_PORT`: HTTP port (default: 9000)
    /// - `STATUSTRAIL_DB_PATH`: Database file path (default: "statustrail.db")
    /// - `STATUSTRAIL_CONFIG`: Endpoints file path (default: "config.yaml")
    /// - `STATUSTRAIL_CHECK_INTERVAL`: Seconds between sweeps (default: unset)
    /// - `STATUSTRAIL_REPORT_PATH`: Dashboard data output file (default: unset)
    pub fn load() -> Self {
        let mut cfg = Self::default();

        if let Ok(port_str) = env::var("STATUSTRAIL_HTTP_PORT") {
            if let Ok(port) = port_str.parse() {
                cfg.http_port = port;
            }
        }

        if let Ok(db_path) = env::var("STATUSTRAIL_DB_PATH") {
            cfg.db_path = db_path;
        }

        if let Ok(config_path) = env::var("STATUSTRAIL_CONFIG") {
            cfg.config_path = config_path;
        }

        if let Ok(interval) = env::var("STATUSTRAIL_CHECK_INTERVAL") {
            cfg.check_interval = interval
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .map(Duration::from_secs);
        }

        if let Ok(report_path) = env::var("STATUSTRAIL_REPORT_PATH") {
            if !report_path.is_empty() {
                cfg.report_path = Some(report_path);
            }
        }

        cfg
    }
}

/// Errors raised while loading the endpoints file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("error reading configuration from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("error parsing configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),
    #[error("endpoint {name:?}: {source}")]
    Endpoint {
        name: String,
        #[source]
        source: EndpointError,
    },
    #[error("endpoints {first:?} and {second:?} share the key {key:?}")]
    DuplicateKey {
        key: String,
        first: String,
        second: String,
    },
}

#[derive(Debug, Deserialize)]
struct RawMonitorConfig {
    #[serde(default)]
    debug: bool,
    #[serde(default, rename = "maxDays", alias = "max-days")]
    max_days: u32,
    #[serde(default, rename = "reportDays", alias = "report-days")]
    report_days: u32,
    #[serde(default)]
    endpoints: Vec<EndpointConfig>,
}

/// Validated monitoring configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Dump every probe outcome to the log.
    pub debug: bool,
    /// Days of history kept per endpoint.
    pub max_days: u32,
    /// Trailing days included in dashboard data.
    pub report_days: u32,
    pub endpoints: Vec<Endpoint>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            debug: false,
            max_days: DEFAULT_MAX_DAYS,
            report_days: DEFAULT_MAX_DAYS,
            endpoints: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Read and validate the endpoints file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration text.
    ///
    /// The first invalid endpoint aborts the whole load.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let raw: RawMonitorConfig = serde_yaml::from_str(content)?;

        let max_days = if raw.max_days == 0 {
            DEFAULT_MAX_DAYS
        } else {
            raw.max_days
        };
        let report_days = if raw.report_days == 0 {
            max_days
        } else {
            raw.report_days
        };

        let mut endpoints = Vec::with_capacity(raw.endpoints.len());
        let mut seen: HashMap<String, String> = HashMap::new();
        for endpoint_cfg in raw.endpoints {
            let name = endpoint_cfg.name.clone();
            let endpoint = Endpoint::try_from(endpoint_cfg)
                .map_err(|source| ConfigError::Endpoint { name, source })?;

            if let Some(first) = seen.get(&endpoint.key) {
                return Err(ConfigError::DuplicateKey {
                    key: endpoint.key.clone(),
                    first: first.clone(),
                    second: endpoint.name.clone(),
                });
            }
            seen.insert(endpoint.key.clone(), endpoint.name.clone());
            endpoints.push(endpoint);
        }

        Ok(Self {
            debug: raw.debug,
            max_days,
            report_days,
            endpoints,
        })
    }

    /// Endpoints that take part in sweeps.
    pub fn enabled(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter().filter(|e| e.enabled)
    }
}
