//! Connection Registry implementation.
//!
//! Tracks registered connections by username for message routing.

use std::collections::btree_map::Entry;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;
use std::sync::{Mutex, MutexGuard, PoisonError};

use murmur_proto::{ServerMessage, Username};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

use crate::types::ConnectionId;

/// Why an enqueue to a connection failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The outbound queue is full; the peer stopped reading
    QueueFull,
    /// The connection was closed or its writer task has exited
    Closed,
}

/// Result of attempting to send a line to a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Line was queued for delivery
    Sent,
    /// The connection is unusable and should be reaped
    Failed(SendFailure),
}

impl SendOutcome {
    /// Whether the line was queued.
    pub fn is_sent(&self) -> bool {
        matches!(self, SendOutcome::Sent)
    }
}

/// Handle onto one accepted connection.
///
/// Cloning is cheap. All clones feed the same outbound queue, which is drained
/// in order by the connection's single writer task.
#[derive(Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    peer: SocketAddr,
    sender: mpsc::Sender<ServerMessage>,
    close: CancellationToken,
}

impl ConnectionHandle {
    /// Create a handle and the receiving end of its outbound queue.
    ///
    /// A capacity of zero is raised to one.
    pub fn channel(
        id: ConnectionId,
        peer: SocketAddr,
        capacity: usize,
        close: CancellationToken,
    ) -> (Self, mpsc::Receiver<ServerMessage>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id,
            peer,
            sender,
            close,
        };
        (handle, receiver)
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Remote address.
    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Enqueue a line without waiting.
    pub fn send(&self, message: ServerMessage) -> SendOutcome {
        if self.close.is_cancelled() {
            return SendOutcome::Failed(SendFailure::Closed);
        }
        match self.sender.try_send(message) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::Failed(SendFailure::QueueFull),
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::Failed(SendFailure::Closed),
        }
    }

    /// Close the connection. Idempotent.
    ///
    /// The writer task stops, the socket is shut down and the owning handler's
    /// read loop ends.
    pub fn close(&self) {
        self.close.cancel();
    }

    /// Whether [`close`](Self::close) has been called (or the writer died).
    pub fn is_closed(&self) -> bool {
        self.close.is_cancelled() || self.sender.is_closed()
    }

    /// Token cancelled when the connection closes.
    pub fn close_token(&self) -> &CancellationToken {
        &self.close
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("peer", &self.peer)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// Another connection already holds the name
    #[error("Username '{0}' is already taken")]
    DuplicateName(Username),
}

/// Registry of connected users.
///
/// All state sits behind one mutex so that every operation, including the
/// duplicate check in [`register`](Self::register), is a single critical
/// section. No I/O happens while the lock is held.
///
/// ## Usage
///
/// ```ignore
/// let registry = Registry::new();
///
/// // When a client picks a name:
/// registry.register(name.clone(), handle.clone())?;
///
/// // When routing:
/// for (name, handle) in registry.snapshot() {
///     handle.send(message.clone());
/// }
///
/// // When the connection ends:
/// registry.unregister_connection(&name, handle.id());
/// ```
pub struct Registry {
    entries: Mutex<BTreeMap<Username, ConnectionHandle>>,
}

impl Registry {
    /// Create an empty registry.
    pub fn new() -> Self {
        info!("Creating connection registry");
        Self {
            entries: Mutex::new(BTreeMap::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Username, ConnectionHandle>> {
        // Entries stay consistent across a panic; every mutation is a single map call.
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a connection under `name`.
    ///
    /// Fails if the name is already held, leaving the existing entry intact.
    #[instrument(skip(self, handle), fields(username = %name, conn_id = %handle.id()))]
    pub fn register(&self, name: Username, handle: ConnectionHandle) -> Result<(), RegistryError> {
        match self.lock().entry(name) {
            Entry::Occupied(occupied) => {
                debug!("Username already registered");
                Err(RegistryError::DuplicateName(occupied.key().clone()))
            }
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                debug!("Registered connection");
                Ok(())
            }
        }
    }

    /// Remove the entry for `name`, whoever holds it.
    ///
    /// Returns the removed handle, or `None` if the name was not registered.
    #[instrument(skip(self))]
    pub fn unregister(&self, name: &str) -> Option<ConnectionHandle> {
        let removed = self.lock().remove(name);
        if removed.is_some() {
            debug!("Unregistered connection");
        } else {
            debug!("Connection was not registered");
        }
        removed
    }

    /// Remove the entry for `name` only if it still belongs to `id`.
    ///
    /// A stale handle never evicts a newer holder of the same name.
    #[instrument(skip(self), fields(conn_id = %id))]
    pub fn unregister_connection(&self, name: &str, id: ConnectionId) -> Option<ConnectionHandle> {
        let mut entries = self.lock();
        let owned = entries.get(name).is_some_and(|handle| handle.id() == id);
        if !owned {
            debug!("Entry not held by this connection");
            return None;
        }
        let removed = entries.remove(name);
        drop(entries);
        debug!("Unregistered connection");
        removed
    }

    /// Look up the handle registered under `name`.
    pub fn lookup(&self, name: &str) -> Option<ConnectionHandle> {
        self.lock().get(name).cloned()
    }

    /// Whether `name` is currently registered.
    pub fn contains(&self, name: &str) -> bool {
        self.lock().contains_key(name)
    }

    /// Copy of every entry, ordered by name.
    pub fn snapshot(&self) -> Vec<(Username, ConnectionHandle)> {
        self.lock()
            .iter()
            .map(|(name, handle)| (name.clone(), handle.clone()))
            .collect()
    }

    /// Registered names, in order.
    pub fn usernames(&self) -> Vec<Username> {
        self.lock().keys().cloned().collect()
    }

    /// Number of registered connections.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nobody is registered.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Remove and return every entry.
    pub fn drain(&self) -> Vec<(Username, ConnectionHandle)> {
        let drained = std::mem::take(&mut *self.lock());
        debug!(count = drained.len(), "Drained registry");
        drained.into_iter().collect()
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("connection_count", &self.len())
            .finish()
    }
}
