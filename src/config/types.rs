//! Configuration types

use serde::Deserialize;

use crate::auth::PasswordRecord;
use crate::protocol::MIN_FRAME_LEN;

/// Root configuration structure
///
/// # Example
///
/// ```yaml
/// server:
///   host: "127.0.0.1"
///   port: 25575
///   max_connections: 10
///
/// credential: "base64salt:base64digest"
///
/// logging:
///   level: info
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Server listener configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Stored credential record, `base64(salt):base64(digest)`.
    /// Absent or blank disables authentication (insecure mode).
    #[serde(default)]
    pub credential: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Config {
    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        self.server.validate()?;

        if let Some(stored) = &self.credential {
            if !stored.trim().is_empty() && PasswordRecord::parse(stored).is_none() {
                return Err(
                    "Invalid credential: expected base64(salt):base64(digest)".to_string()
                );
            }
        }

        Ok(())
    }

    /// Parse the configured credential record, if any.
    ///
    /// Returns `None` in insecure mode (absent or blank entry). Call
    /// [`Config::validate`] first; an unparseable entry also yields `None`
    /// here so a malformed record can never accidentally authenticate.
    pub fn credential_record(&self) -> Option<PasswordRecord> {
        self.credential
            .as_deref()
            .filter(|stored| !stored.trim().is_empty())
            .and_then(PasswordRecord::parse)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            credential: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Server listener configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Address to listen on
    #[serde(default = "default_host")]
    pub host: String,
    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allow binding port 0 (OS-assigned). Only settable from code, for
    /// tests that need an ephemeral port; config files and env overrides
    /// cannot enable it.
    #[serde(skip)]
    pub allow_ephemeral_port: bool,
    /// Maximum number of concurrent connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Largest accepted or emitted frame in bytes
    #[serde(default = "default_max_frame_size")]
    pub max_frame_size: usize,
    /// Per-socket read timeout and idle cap in milliseconds
    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,
    /// Acceptor wakeup interval in milliseconds
    #[serde(default = "default_accept_timeout_ms")]
    pub accept_timeout_ms: u64,
}

impl ServerConfig {
    /// Validate server configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.host.trim().is_empty() {
            return Err("Listen host cannot be empty".to_string());
        }
        if self.port == 0 && !self.allow_ephemeral_port {
            return Err("port must be greater than 0".to_string());
        }
        if self.max_connections == 0 {
            return Err("max_connections must be greater than 0".to_string());
        }
        if self.max_frame_size < MIN_FRAME_LEN {
            return Err(format!(
                "max_frame_size must be at least {} bytes (one empty frame)",
                MIN_FRAME_LEN
            ));
        }
        if self.read_timeout_ms == 0 {
            return Err("read_timeout_ms must be greater than 0".to_string());
        }
        if self.accept_timeout_ms == 0 {
            return Err("accept_timeout_ms must be greater than 0".to_string());
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            allow_ephemeral_port: false,
            max_connections: default_max_connections(),
            max_frame_size: default_max_frame_size(),
            read_timeout_ms: default_read_timeout_ms(),
            accept_timeout_ms: default_accept_timeout_ms(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    25575
}

fn default_max_connections() -> usize {
    10
}

fn default_max_frame_size() -> usize {
    4096
}

fn default_read_timeout_ms() -> u64 {
    30_000
}

fn default_accept_timeout_ms() -> u64 {
    5_000
}

fn default_log_level() -> String {
    "info".to_string()
}
