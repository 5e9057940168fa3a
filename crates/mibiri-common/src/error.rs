//! Common error types for Mibiri.
//!
//! Shared by the relay (request decoding, idle timeouts) and the client
//! (profile files, server addresses, relay round trips).

use thiserror::Error;

/// Result type alias using Mibiri's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for Mibiri operations.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error (file, network, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Invalid local input: server address, profile, flags
    #[error("configuration error: {0}")]
    Config(String),

    /// Invalid key material
    #[error("crypto error: {0}")]
    Crypto(String),

    /// Malformed request or response line
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Missing local profile
    #[error("not found: {0}")]
    NotFound(String),

    /// Connect, round trip or idle timeout
    #[error("timeout: {0}")]
    Timeout(String),
}

impl Error {
    /// Create a serialization error from any displayable type.
    pub fn serialization(msg: impl std::fmt::Display) -> Self {
        Self::Serialization(msg.to_string())
    }

    /// Create a config error from any displayable type.
    pub fn config(msg: impl std::fmt::Display) -> Self {
        Self::Config(msg.to_string())
    }

    /// Create a crypto error from any displayable type.
    pub fn crypto(msg: impl std::fmt::Display) -> Self {
        Self::Crypto(msg.to_string())
    }

    /// Create a protocol error from any displayable type.
    pub fn protocol(msg: impl std::fmt::Display) -> Self {
        Self::Protocol(msg.to_string())
    }

    /// Create a not found error from any displayable type.
    pub fn not_found(msg: impl std::fmt::Display) -> Self {
        Self::NotFound(msg.to_string())
    }

    /// Create a timeout error from any displayable type.
    pub fn timeout(msg: impl std::fmt::Display) -> Self {
        Self::Timeout(msg.to_string())
    }
}
