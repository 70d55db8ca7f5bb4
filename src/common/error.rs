//! Error types for the application.

use thiserror::Error;

/// Top-level application error.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("Connection error: {0}")]
    Connection(#[from] ConnectionError),
}

/// Configuration-related errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config: {message}")]
    ParseError { message: String },

    #[error("Config validation failed: {message}")]
    ValidationError { message: String },

    #[error("Unknown filter '{name}'")]
    UnknownFilter { name: String },

    #[error("Invalid value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

/// Wire-level decoding errors (IRC lines, RCON frames, UDP log datagrams).
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Invalid line: {message}")]
    InvalidLine { message: String },

    #[error("Invalid frame length: {length}")]
    InvalidFrameLength { length: i32 },

    #[error("Invalid log datagram: {message}")]
    InvalidDatagram { message: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Connection-related errors.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Failed to resolve {host}: {source}")]
    ResolveFailed {
        host: String,
        #[source]
        source: std::io::Error,
    },

    #[error("No addresses found for {host}")]
    NoAddresses { host: String },

    #[error("Failed to connect to {host}:{port}: {source}")]
    ConnectFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to bind {host}:{port}: {source}")]
    BindFailed {
        host: String,
        port: u16,
        #[source]
        source: std::io::Error,
    },

    #[error("Socket is not registered")]
    NotRegistered,

    #[error("Connection closed by remote")]
    ConnectionClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure inside a relay filter. The bus treats it as a block.
#[derive(Debug, Error)]
pub enum FilterError {
    #[error("Regex evaluation failed for '{pattern}': {message}")]
    Regex { pattern: String, message: String },
}

/// Result type alias for protocol operations.
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

/// Result type alias for connection operations.
pub type ConnectionResult<T> = std::result::Result<T, ConnectionError>;
