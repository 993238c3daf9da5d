//! Error types for the chat server.

use std::net::SocketAddr;

use thiserror::Error;

/// Chat server errors.
#[derive(Debug, Error)]
pub enum ChatError {
    /// IO error (network)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// The listening socket could not be set up
    #[error("Failed to listen on {addr}: {source}")]
    Bind {
        /// Address that was being bound
        addr: SocketAddr,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Internal server error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ChatError {
    /// Create a new configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
