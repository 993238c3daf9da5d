//! Common types for the chat server.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Connection state in the per-client protocol lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Prompted for a username, waiting for the reply
    AwaitingName,
    /// Registered and exchanging messages
    Active,
    /// Cleaned up; no further reads
    Terminated,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionState::AwaitingName => write!(f, "awaiting-name"),
            ConnectionState::Active => write!(f, "active"),
            ConnectionState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Process-unique identifier of an accepted connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

impl ConnectionId {
    /// Allocate the next connection id.
    pub fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}
