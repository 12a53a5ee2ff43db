//! P2P layer error types.

use thiserror::Error;

/// Errors that can occur in the P2P layer.
#[derive(Debug, Error)]
pub enum P2PError {
    /// Network connection error.
    #[error("Connection error: {0}")]
    Connection(String),

    /// Listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    /// Malformed network address.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Peer public key failed to parse.
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Component started twice.
    #[error("Already started")]
    AlreadyStarted,

    /// Component used before start.
    #[error("Not started")]
    NotStarted,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}
