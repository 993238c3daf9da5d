//! Client-to-server commands.

use crate::ProtocolError;

/// A line sent by a registered client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientCommand {
    /// `/quit`: disconnect
    Quit,
    /// `/list`: request the connected usernames
    List,
    /// `@<to> <text>`: private message
    Private { to: String, text: String },
    /// Any other non-empty line
    Broadcast(String),
}

impl ClientCommand {
    /// Classify one client line.
    ///
    /// Returns `Ok(None)` for blank lines, which are ignored. A private
    /// message without a recipient is a [`ProtocolError::MalformedPrivate`].
    pub fn parse(line: &str) -> Result<Option<Self>, ProtocolError> {
        let text = line.trim();
        if text.is_empty() {
            return Ok(None);
        }

        let command = match text {
            "/quit" => Self::Quit,
            "/list" => Self::List,
            _ => match text.strip_prefix('@') {
                Some(rest) => {
                    let (to, body) = rest.split_once(' ').unwrap_or((rest, ""));
                    let to = to.trim();
                    if to.is_empty() {
                        return Err(ProtocolError::MalformedPrivate);
                    }
                    Self::Private {
                        to: to.to_string(),
                        text: body.to_string(),
                    }
                }
                None => Self::Broadcast(text.to_string()),
            },
        };

        Ok(Some(command))
    }
}
