//! Message routing over the registry.
//!
//! Every operation takes a snapshot (or a single lookup) under the registry
//! lock, releases it, and only then enqueues lines. Recipients whose queue
//! rejects a line are reaped: unregistered, closed, and announced as departed
//! to everyone still connected. Announcing a departure can in turn surface
//! more broken recipients, so reaping runs over a worklist until it settles.

use std::sync::Arc;

use murmur_proto::{ServerMessage, Username};
use tracing::{debug, info, instrument, warn};

use crate::metrics;
use crate::registry::{ConnectionHandle, Registry, SendOutcome};

/// Result of a private delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// The recipient was registered and the line was handed to it
    Delivered,
    /// No user with that name is registered
    NotFound,
}

/// Notice broadcast when a user registers.
pub fn join_text(name: &Username) -> String {
    format!("{name} has joined the chat.")
}

/// Notice broadcast when a user leaves or is reaped.
pub fn departure_text(name: &Username) -> String {
    format!("{name} has left the chat.")
}

/// Routes lines between registered connections.
#[derive(Debug, Clone)]
pub struct Router {
    registry: Arc<Registry>,
}

impl Router {
    /// Create a router over a shared registry.
    pub fn new(registry: Arc<Registry>) -> Self {
        Self { registry }
    }

    /// The registry this router reads.
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Enqueue a line to one connection.
    ///
    /// This is the send primitive; it does not reap on failure.
    pub fn send_to(&self, handle: &ConnectionHandle, message: ServerMessage) -> SendOutcome {
        handle.send(message)
    }

    /// Send a `SYSTEM` notice to every registered user.
    #[instrument(skip(self, text))]
    pub fn broadcast_system(&self, text: &str) {
        let failed = self.deliver_all(ServerMessage::system(text), None, "system");
        self.reap(failed);
    }

    /// Send a `MSG` line from `from` to every other registered user.
    #[instrument(skip(self, text), fields(from = %from))]
    pub fn broadcast_message(&self, from: &Username, text: &str) {
        let failed = self.deliver_all(ServerMessage::message(from, text), Some(from), "broadcast");
        self.reap(failed);
    }

    /// Send a `PRV` line from `from` to `to`.
    ///
    /// A recipient that is registered but unusable is reaped and the call
    /// still reports [`Delivery::Delivered`].
    #[instrument(skip(self, text), fields(from = %from, to = %to))]
    pub fn deliver_private(&self, from: &Username, to: &str, text: &str) -> Delivery {
        let Some(handle) = self.registry.lookup(to) else {
            debug!("Private recipient not found");
            return Delivery::NotFound;
        };

        match self.send_to(&handle, ServerMessage::private(from, to, text)) {
            SendOutcome::Sent => metrics::record_routed("private", 1),
            SendOutcome::Failed(failure) => {
                debug!(?failure, "Private recipient unusable");
                if let Ok(name) = Username::parse(to) {
                    self.reap(vec![(name, handle)]);
                }
            }
        }
        Delivery::Delivered
    }

    /// Names of every registered user, in order.
    pub fn list_usernames(&self) -> Vec<Username> {
        self.registry.usernames()
    }

    /// Remove a user's own entry, close it and announce the departure.
    ///
    /// The notice goes out only if this call removed the entry, so a user
    /// who was already reaped is never announced twice. Returns whether the
    /// entry was removed.
    #[instrument(skip(self, handle), fields(username = %name, conn_id = %handle.id()))]
    pub fn depart(&self, name: &Username, handle: &ConnectionHandle) -> bool {
        handle.close();
        if self
            .registry
            .unregister_connection(name.as_str(), handle.id())
            .is_none()
        {
            debug!("Entry already removed, no departure notice");
            return false;
        }

        info!("User left");
        metrics::record_active_users(self.registry.len());
        self.broadcast_system(&departure_text(name));
        true
    }

    /// Enqueue `message` to every entry except `exclude`; returns the entries
    /// that could not take it.
    fn deliver_all(
        &self,
        message: ServerMessage,
        exclude: Option<&Username>,
        kind: &str,
    ) -> Vec<(Username, ConnectionHandle)> {
        let mut failed = Vec::new();
        let mut sent = 0;

        for (name, handle) in self.registry.snapshot() {
            if exclude.is_some_and(|excluded| *excluded == name) {
                continue;
            }
            match self.send_to(&handle, message.clone()) {
                SendOutcome::Sent => sent += 1,
                SendOutcome::Failed(failure) => {
                    debug!(username = %name, ?failure, "Recipient unusable");
                    failed.push((name, handle));
                }
            }
        }

        metrics::record_routed(kind, sent);
        failed
    }

    fn reap(&self, mut pending: Vec<(Username, ConnectionHandle)>) {
        while let Some((name, handle)) = pending.pop() {
            handle.close();
            if self
                .registry
                .unregister_connection(name.as_str(), handle.id())
                .is_none()
            {
                continue;
            }

            warn!(
                username = %name,
                conn_id = %handle.id(),
                peer = %handle.peer(),
                "Reaped unusable connection"
            );
            metrics::record_reaped();
            metrics::record_active_users(self.registry.len());

            let notice = ServerMessage::system(departure_text(&name));
            pending.extend(self.deliver_all(notice, None, "system"));
        }
    }
}
