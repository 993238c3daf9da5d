//! # murmur-proto
//!
//! Wire protocol shared by the murmur chat server and its terminal client.
//!
//! Every frame is a single UTF-8 line. Server-to-client lines are
//! pipe-delimited with a type tag in the first field:
//!
//! ```text
//! ENTERNAME|Please enter your desired username:
//! SYSTEM|1718000000|bob has joined the chat.
//! MSG|alice|1718000003|hello
//! PRV|bob|alice|1718000007|hi
//! ```
//!
//! Client-to-server lines are a bare username first, then commands
//! (`/list`, `/quit`, `@user text`) or plain text to broadcast.

mod command;
mod error;
mod message;
mod username;

pub use command::ClientCommand;
pub use error::ProtocolError;
pub use message::{tags, unix_now, ErrorCode, ServerMessage};
pub use username::Username;
