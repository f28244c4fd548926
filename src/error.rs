//! Error types for rcon-server

use thiserror::Error;

use crate::command::ExecutorError;

/// Main error type for the server
#[derive(Error, Debug)]
pub enum RconError {
    /// I/O error (network, file)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Protocol framing or state machine error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication error
    #[error("Authentication error: {0}")]
    Auth(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Command executor failure
    #[error("Executor error: {0}")]
    Executor(#[from] ExecutorError),

    /// Server lifecycle misuse (started twice, restarted after stop)
    #[error("Server state error: {0}")]
    ServerState(String),
}

/// Result type alias for RconError
pub type Result<T> = std::result::Result<T, RconError>;

impl From<serde_yaml::Error> for RconError {
    fn from(err: serde_yaml::Error) -> Self {
        RconError::Config(err.to_string())
    }
}
