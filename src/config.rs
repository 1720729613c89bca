// src/config.rs

//! Manages server configuration: loading, defaulting, and validation.

use crate::core::protocol::{DEFAULT_MAX_FRAME_LEN, DEFAULT_PROTOCOL_VERSION};
use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

/// Per-connection tuning knobs.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ConnectionConfig {
    /// The maximum number of bytes requested from the stream per read.
    #[serde(default = "default_read_chunk_size")]
    pub read_chunk_size: usize,
    /// Frames declaring a larger length are rejected and close the connection.
    #[serde(default = "default_max_frame_len")]
    pub max_frame_len: usize,
    /// The maximum number of concurrently running message handlers per connection.
    /// The read loop stops reading while the limit is reached.
    #[serde(default = "default_max_in_flight_handlers")]
    pub max_in_flight_handlers: usize,
    /// How long in-flight handlers may keep running after the read loop stops.
    #[serde(default = "default_handler_drain_timeout_ms")]
    pub handler_drain_timeout_ms: u64,
    /// If true, a message that resolved a pending waiter is also dispatched normally.
    #[serde(default)]
    pub matched_also_dispatch: bool,
    /// The protocol version assumed before the handshake.
    #[serde(default = "default_protocol_version")]
    pub default_protocol_version: i32,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            read_chunk_size: default_read_chunk_size(),
            max_frame_len: default_max_frame_len(),
            max_in_flight_handlers: default_max_in_flight_handlers(),
            handler_drain_timeout_ms: default_handler_drain_timeout_ms(),
            matched_also_dispatch: false,
            default_protocol_version: default_protocol_version(),
        }
    }
}

fn default_read_chunk_size() -> usize {
    1024
}
fn default_max_frame_len() -> usize {
    DEFAULT_MAX_FRAME_LEN
}
fn default_max_in_flight_handlers() -> usize {
    256
}
fn default_handler_drain_timeout_ms() -> u64 {
    1000
}
fn default_protocol_version() -> i32 {
    DEFAULT_PROTOCOL_VERSION
}

/// What the server reports in the server-list status response.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StatusConfig {
    #[serde(default = "default_motd")]
    pub motd: String,
    #[serde(default = "default_max_players")]
    pub max_players: u32,
    #[serde(default = "default_version_name")]
    pub version_name: String,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            motd: default_motd(),
            max_players: default_max_players(),
            version_name: default_version_name(),
        }
    }
}

fn default_motd() -> String {
    "A Lodestone server".to_string()
}
fn default_max_players() -> u32 {
    20
}
fn default_version_name() -> String {
    "1.14.4".to_string()
}

/// Configuration for the Prometheus metrics exporter.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// If true, an HTTP server will be started to expose Prometheus metrics.
    #[serde(default)]
    pub enabled: bool,
    /// The port for the Prometheus metrics server.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_port() -> u16 {
    9225
}

/// A raw representation of the config file before validation.
#[derive(Deserialize)]
struct RawConfig {
    #[serde(default = "default_host")]
    host: String,
    #[serde(default = "default_port")]
    port: u16,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_max_clients")]
    max_clients: usize,
    #[serde(default)]
    connection: ConnectionConfig,
    #[serde(default)]
    status: StatusConfig,
    #[serde(default)]
    metrics: MetricsConfig,
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_port() -> u16 {
    25565
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_max_clients() -> usize {
    1000
}

/// The resolved server configuration.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub max_clients: usize,
    pub connection: ConnectionConfig,
    pub status: StatusConfig,
    pub metrics: MetricsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            log_level: default_log_level(),
            max_clients: default_max_clients(),
            connection: ConnectionConfig::default(),
            status: StatusConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Config {
    /// Creates a new `Config` instance by reading and parsing a TOML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file at '{path}'"))?;
        Self::from_toml_str(&contents).with_context(|| format!("Invalid config in '{path}'"))
    }

    /// Like `from_file`, but falls back to defaults when the file does not exist.
    pub fn from_file_or_default(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            info!("No config file at '{}', using defaults.", path);
            let config = Config::default();
            config.validate()?;
            Ok(config)
        }
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let raw_config: RawConfig =
            toml::from_str(contents).context("Failed to parse TOML configuration")?;

        let config = Config {
            host: raw_config.host,
            port: raw_config.port,
            log_level: raw_config.log_level,
            max_clients: raw_config.max_clients,
            connection: raw_config.connection,
            status: raw_config.status,
            metrics: raw_config.metrics,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validates the resolved configuration to ensure logical consistency.
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(anyhow!("port cannot be 0"));
        }
        if self.host.trim().is_empty() {
            return Err(anyhow!("host cannot be empty"));
        }
        if self.max_clients == 0 {
            return Err(anyhow!("max_clients cannot be 0"));
        }

        let conn = &self.connection;
        if conn.read_chunk_size == 0 {
            return Err(anyhow!("connection.read_chunk_size cannot be 0"));
        }
        // The smallest frame is a one-byte length followed by a one-byte packet id.
        if conn.max_frame_len < 2 {
            return Err(anyhow!("connection.max_frame_len must be at least 2"));
        }
        if conn.max_in_flight_handlers == 0 {
            return Err(anyhow!("connection.max_in_flight_handlers cannot be 0"));
        }
        if conn.max_frame_len > DEFAULT_MAX_FRAME_LEN {
            warn!(
                "connection.max_frame_len of {} exceeds the protocol limit of {} bytes.",
                conn.max_frame_len, DEFAULT_MAX_FRAME_LEN
            );
        }

        if self.metrics.enabled {
            if self.metrics.port == 0 {
                return Err(anyhow!("metrics.port cannot be 0"));
            }
            if self.metrics.port == self.port {
                return Err(anyhow!(
                    "metrics.port cannot be the same as the main server port"
                ));
            }
        }
        Ok(())
    }
}
