//! Error types for the firewall data plane

use thiserror::Error;

/// Firewall error type
#[derive(Error, Debug)]
pub enum FirewallError {
    /// Invalid configuration value
    #[error("config error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file
    #[error("parse error: {0}")]
    Parse(#[from] serde_json::Error),

    /// Worker thread could not be spawned
    #[error("failed to spawn worker: {0}")]
    SpawnFailed(String),

    /// Worker thread panicked before it could be joined
    #[error("worker panicked: {0}")]
    WorkerPanicked(String),

    /// A packet referenced an address with no record
    #[error("no record for address {0}")]
    UnknownAddress(i32),
}

/// Result type for the firewall data plane
pub type FirewallResult<T> = Result<T, FirewallError>;
