//! WolfGossip Error Types

use thiserror::Error;

/// Result type alias for WolfGossip operations
pub type Result<T> = std::result::Result<T, Error>;

/// WolfGossip error types
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(#[from] toml::de::Error),

    // Membership errors
    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("No forwarder available to reach {0}")]
    NoForwarder(String),

    // Network errors
    #[error("Network error: {0}")]
    Network(String),

    #[error("Connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("Connection timeout to {0}")]
    ConnectionTimeout(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    #[error("Remote error: {0}")]
    Remote(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    // Seed discovery errors
    #[error("Seed discovery failed: {0}")]
    Discovery(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Shutdown in progress")]
    ShuttingDown,
}

impl Error {
    /// Check if this error is a transport-level failure.
    ///
    /// These are the failures the gossip loop recovers from by probing the
    /// peer indirectly; anything else is a local problem.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::ConnectionTimeout(_)
                | Error::ConnectionFailed { .. }
                | Error::Network(_)
                | Error::Remote(_)
                | Error::InvalidResponse(_)
                | Error::Serialization(_)
                | Error::Io(_)
        )
    }
}
