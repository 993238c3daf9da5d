//! Connection Registry for message routing.
//!
//! This module provides the shared table of registered users. Each entry maps
//! a [`Username`](murmur_proto::Username) to the [`ConnectionHandle`] of the
//! connection that claimed it.
//!
//! ## Architecture
//!
//! Each connection gets a bounded outbound queue drained by its own writer
//! task. Once the client picks a name, the handle is registered and any other
//! connection can enqueue lines to it through the router.
//!
//! ```text
//! Handler (alice) <-> Registry <-> Handler (bob)
//!       |                |               |
//!       v                v               v
//!  mpsc::Sender   Mutex<BTreeMap<   mpsc::Sender
//!                  Username, ConnectionHandle>>
//! ```

mod connection_registry;

pub use connection_registry::{
    ConnectionHandle, Registry, RegistryError, SendFailure, SendOutcome,
};
