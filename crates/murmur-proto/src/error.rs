//! Error types for the murmur wire protocol.

use thiserror::Error;

use crate::message::ErrorCode;

/// Protocol errors raised while parsing client input or decoding server lines.
///
/// The `Display` text of the client-facing variants is exactly what the
/// server sends back in the `ERR` line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The requested username was empty after trimming.
    #[error("Username cannot be empty")]
    EmptyName,

    /// A private message with no recipient (`@ text` or a bare `@`).
    #[error("Usage: @username message")]
    MalformedPrivate,

    /// A server line was empty.
    #[error("empty line")]
    EmptyLine,

    /// The first field of a server line is not a known tag.
    #[error("unknown message tag: {0}")]
    UnknownTag(String),

    /// A server line has fewer fields than its tag requires.
    #[error("{tag} line is missing the {field} field")]
    MissingField {
        /// Tag of the offending line
        tag: &'static str,
        /// Name of the first missing field
        field: &'static str,
    },

    /// A timestamp field did not hold whole unix seconds.
    #[error("invalid timestamp: {0}")]
    InvalidTimestamp(String),

    /// An `ERR` line carried a code outside the known set.
    #[error("unknown error code: {0}")]
    UnknownErrorCode(String),
}

impl ProtocolError {
    /// The `ERR` code reported to the client for this error, if it is one
    /// that a client can cause.
    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::EmptyName => Some(ErrorCode::EmptyName),
            Self::MalformedPrivate => Some(ErrorCode::MalformedPrivate),
            _ => None,
        }
    }
}
