//! # murmur-shutdown
//!
//! Graceful shutdown support for the murmur chat server.
//!
//! ## Signal Conventions
//!
//! - `SIGINT` (Ctrl-C): stop accepting, close every connection, drain, exit
//! - `SIGTERM`: same as `SIGINT`
//!
//! On non-Unix platforms only Ctrl-C is observed.

mod shutdown;

pub use shutdown::{ConnectionGuard, GracefulShutdown, ShutdownSignal};
