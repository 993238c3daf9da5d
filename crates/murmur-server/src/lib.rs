//! # murmur-server
//!
//! Multi-user line chat server.
//!
//! Clients connect over TCP, pick a unique username, and exchange broadcast
//! and private messages using the line protocol in `murmur-proto`.
//!
//! ## Architecture
//!
//! - **Server**: TCP listener; spawns one connection actor per client
//! - **Connection Actors**: drive the naming -> active -> terminated lifecycle
//!   and are the only readers of their socket
//! - **Registry**: the single shared map from username to connection handle
//! - **Router**: broadcast, private delivery and listing over registry
//!   snapshots, reaping connections that can no longer take lines

pub mod codec;
pub mod config;
pub mod connection;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod server;
pub mod telemetry;

mod error;
mod types;

pub use config::{LogFormat, ServerConfig};
pub use connection::{ConnectionActor, ConnectionSettings};
pub use error::ChatError;
pub use registry::{ConnectionHandle, Registry, RegistryError, SendFailure, SendOutcome};
pub use router::{Delivery, Router};
pub use server::ChatServer;
pub use types::*;
