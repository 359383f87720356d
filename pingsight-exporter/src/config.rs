//! Configuration for the ping exporter.

use pingsight_common::LoggingConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Largest ICMP payload that fits in a single IPv4 datagram.
const MAX_PAYLOAD_SIZE: usize = 65_507;

/// Route served next to the metrics endpoint.
pub const HEALTH_PATH: &str = "/health";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Load(#[from] pingsight_common::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Complete exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Hosts to probe, in order. Hostnames or IP literals.
    #[serde(default = "default_targets")]
    pub targets: Vec<String>,

    /// Probe timing settings.
    #[serde(default)]
    pub probe: ProbeConfig,

    /// HTTP endpoint settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_targets() -> Vec<String> {
    vec!["8.8.8.8".to_string()]
}

/// Probe settings shared by every prober.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProbeConfig {
    /// Time between echo requests to one target (default: 1000).
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,

    /// How long to wait for a reply before treating it as lost (default: 1000).
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// ICMP payload size in bytes (default: 56).
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
}

fn default_interval_ms() -> u64 {
    1000
}

fn default_timeout_ms() -> u64 {
    1000
}

fn default_payload_size() -> usize {
    56
}

impl ProbeConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            timeout_ms: default_timeout_ms(),
            payload_size: default_payload_size(),
        }
    }
}

/// Metrics HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:8080").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config: ExporterConfig = pingsight_common::load_config(path)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = pingsight_common::parse_config(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parsed listen address. Only valid after [`validate`](Self::validate).
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.http.listen.parse().map_err(|_| {
            ConfigError::Validation(format!("Invalid listen address: {}", self.http.listen))
        })
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.targets.is_empty() {
            return Err(ConfigError::Validation(
                "at least one target is required".to_string(),
            ));
        }

        if self.targets.iter().any(|t| t.trim().is_empty()) {
            return Err(ConfigError::Validation(
                "targets must not be blank".to_string(),
            ));
        }

        if self.probe.interval_ms == 0 {
            return Err(ConfigError::Validation(
                "interval_ms must be > 0".to_string(),
            ));
        }

        if self.probe.timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "timeout_ms must be > 0".to_string(),
            ));
        }

        if self.probe.payload_size > MAX_PAYLOAD_SIZE {
            return Err(ConfigError::Validation(format!(
                "payload_size must be <= {}",
                MAX_PAYLOAD_SIZE
            )));
        }

        self.listen_addr()?;

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if self.http.path == HEALTH_PATH {
            return Err(ConfigError::Validation(format!(
                "Metrics path must not be {}",
                HEALTH_PATH
            )));
        }

        // Router captures and wildcards would shadow or reject the route.
        if self
            .http
            .path
            .split('/')
            .any(|segment| segment.starts_with(':') || segment.starts_with('*'))
        {
            return Err(ConfigError::Validation(format!(
                "Metrics path must be a literal path: {}",
                self.http.path
            )));
        }

        Ok(())
    }
}

impl Default for ExporterConfig {
    fn default() -> Self {
        Self {
            targets: default_targets(),
            probe: ProbeConfig::default(),
            http: HttpConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}
