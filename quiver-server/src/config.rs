//! Server configuration.
//!
//! Configuration is loaded in the following order (later overrides earlier):
//! 1. Default values
//! 2. YAML config file (if specified via QUIVER_CONFIG)
//! 3. Environment variables

use crate::server::ServerOptions;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Network configuration.
    pub network: NetworkConfig,
    /// Runtime limits.
    pub limits: LimitsConfig,
    /// TLS configuration.
    pub tls: TlsConfig,
}

impl Config {
    /// Loads configuration from file, then applies environment variable
    /// overrides.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("QUIVER_CONFIG") {
            config = Self::from_file(&path)?;
        }

        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.to_path_buf(), e))?;
        let config: Config = serde_yaml::from_str(&content)
            .map_err(|e| ConfigError::ParseError(path.to_path_buf(), e.to_string()))?;
        Ok(config)
    }

    /// Loads configuration from environment variables only.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    fn apply_env_overrides(&mut self) {
        self.network.apply_env_overrides();
        self.limits.apply_env_overrides();
        self.tls.apply_env_overrides();
    }
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address to bind the QUIC endpoint to.
    #[serde(with = "socket_addr_serde")]
    pub bind_addr: SocketAddr,
    /// ALPN identifier offered during the handshake.
    pub alpn: String,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], quiver_codec::DEFAULT_PORT)),
            alpn: String::from_utf8_lossy(quiver_codec::DEFAULT_ALPN).into_owned(),
        }
    }
}

impl NetworkConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(addr) = std::env::var("QUIVER_BIND") {
            if let Ok(parsed) = addr.parse() {
                self.bind_addr = parsed;
            }
        }
        if let Ok(alpn) = std::env::var("QUIVER_ALPN") {
            if !alpn.is_empty() {
                self.alpn = alpn;
            }
        }
    }
}

/// Runtime limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Largest frame body accepted from a peer, in bytes.
    pub max_receive_message_size: usize,
    /// Largest reply body a handler may produce, in bytes.
    pub max_send_message_size: usize,
    /// Worker count; zero runs each handler on an ad-hoc task.
    pub num_server_workers: u32,
    /// In-flight handler bound per connection.
    pub max_concurrent_streams: u32,
    /// Idle budget per connection, in milliseconds.
    pub max_connection_idle_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        let opts = ServerOptions::default();
        Self {
            max_receive_message_size: opts.max_receive_message_size,
            max_send_message_size: opts.max_send_message_size,
            num_server_workers: opts.num_server_workers,
            max_concurrent_streams: opts.max_concurrent_streams,
            max_connection_idle_ms: opts.max_connection_idle.as_millis() as u64,
        }
    }
}

impl LimitsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(size) = std::env::var("QUIVER_MAX_RECEIVE_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_receive_message_size = n;
            }
        }
        if let Ok(size) = std::env::var("QUIVER_MAX_SEND_SIZE") {
            if let Ok(n) = size.parse() {
                self.max_send_message_size = n;
            }
        }
        if let Ok(workers) = std::env::var("QUIVER_WORKERS") {
            if let Ok(n) = workers.parse() {
                self.num_server_workers = n;
            }
        }
        if let Ok(streams) = std::env::var("QUIVER_MAX_STREAMS") {
            if let Ok(n) = streams.parse() {
                self.max_concurrent_streams = n;
            }
        }
        if let Ok(idle) = std::env::var("QUIVER_IDLE_MS") {
            if let Ok(ms) = idle.parse() {
                self.max_connection_idle_ms = ms;
            }
        }
    }

    /// Returns the idle budget as a Duration.
    pub fn max_connection_idle(&self) -> Duration {
        Duration::from_millis(self.max_connection_idle_ms)
    }

    /// Converts the limits into programmatic server options.
    pub fn server_options(&self) -> ServerOptions {
        ServerOptions::default()
            .with_max_receive_message_size(self.max_receive_message_size)
            .with_max_send_message_size(self.max_send_message_size)
            .with_num_server_workers(self.num_server_workers)
            .with_max_concurrent_streams(self.max_concurrent_streams)
            .with_max_connection_idle(self.max_connection_idle())
    }
}

/// TLS configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TlsConfig {
    /// Path to PEM-encoded server certificate file.
    #[serde(default)]
    pub cert_path: Option<PathBuf>,
    /// Path to PEM-encoded private key file.
    #[serde(default)]
    pub key_path: Option<PathBuf>,
}

impl TlsConfig {
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("QUIVER_TLS_CERT") {
            self.cert_path = Some(PathBuf::from(path));
        }
        if let Ok(path) = std::env::var("QUIVER_TLS_KEY") {
            self.key_path = Some(PathBuf::from(path));
        }
    }

    /// Validates TLS configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cert_path.is_none() {
            return Err(ConfigError::ValidationError(
                "cert_path not set (QUIC requires TLS)".to_string(),
            ));
        }
        if self.key_path.is_none() {
            return Err(ConfigError::ValidationError(
                "key_path not set (QUIC requires TLS)".to_string(),
            ));
        }
        Ok(())
    }
}

/// Configuration error.
#[derive(Debug)]
pub enum ConfigError {
    IoError(PathBuf, std::io::Error),
    ParseError(PathBuf, String),
    ValidationError(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::IoError(path, e) => {
                write!(f, "failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::ValidationError(msg) => {
                write!(f, "configuration validation failed: {}", msg)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Custom serde module for SocketAddr (to handle as string in YAML).
mod socket_addr_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::net::SocketAddr;

    pub fn serialize<S>(addr: &SocketAddr, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&addr.to_string())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<SocketAddr, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}
