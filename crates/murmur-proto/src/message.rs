//! Server-to-client protocol lines.

use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// Type tags for server-to-client lines.
pub mod tags {
    /// Prompt for a username
    pub const ENTERNAME: &str = "ENTERNAME";
    /// Acknowledgement / welcome
    pub const OK: &str = "OK";
    /// Join, leave and server notices
    pub const SYSTEM: &str = "SYSTEM";
    /// Broadcast message from another user
    pub const MSG: &str = "MSG";
    /// Private message received
    pub const PRV: &str = "PRV";
    /// Confirmation of a private message sent
    pub const SENTPRV: &str = "SENTPRV";
    /// Response to `/list`
    pub const USERS: &str = "USERS";
    /// Error report
    pub const ERR: &str = "ERR";
}

/// Field separator inside a line.
const SEPARATOR: char = '|';

/// Current time as whole unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Error codes carried by `ERR` lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    /// The requested username was empty
    EmptyName,
    /// The requested username is held by another connection
    DuplicateName,
    /// A private message had no recipient
    MalformedPrivate,
    /// The private message recipient is not connected
    NoUser,
}

impl ErrorCode {
    /// Wire representation of this code.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EmptyName => "EMPTY_NAME",
            Self::DuplicateName => "DUPLICATE_NAME",
            Self::MalformedPrivate => "MALFORMED_PRIVATE",
            Self::NoUser => "NO_USER",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ErrorCode {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "EMPTY_NAME" => Ok(Self::EmptyName),
            "DUPLICATE_NAME" => Ok(Self::DuplicateName),
            "MALFORMED_PRIVATE" => Ok(Self::MalformedPrivate),
            "NO_USER" => Ok(Self::NoUser),
            other => Err(ProtocolError::UnknownErrorCode(other.to_string())),
        }
    }
}

/// A single server-to-client line.
///
/// `Display` produces the line without its trailing newline; the framing
/// codec appends it. The last field of every variant is free text and may
/// contain the separator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// `ENTERNAME|text`
    EnterName { prompt: String },
    /// `OK|text`
    Ok { text: String },
    /// `SYSTEM|timestamp|text`
    System { timestamp: i64, text: String },
    /// `MSG|from|timestamp|text`
    Msg {
        from: String,
        timestamp: i64,
        text: String,
    },
    /// `PRV|from|to|timestamp|text`
    Private {
        from: String,
        to: String,
        timestamp: i64,
        text: String,
    },
    /// `SENTPRV|to|timestamp|text`
    SentPrivate {
        to: String,
        timestamp: i64,
        text: String,
    },
    /// `USERS|a,b,c`
    Users { names: Vec<String> },
    /// `ERR|code|text`
    Error { code: ErrorCode, text: String },
}

impl ServerMessage {
    /// The username prompt sent when a connection is accepted.
    pub fn enter_name() -> Self {
        Self::EnterName {
            prompt: "Please enter your desired username:".to_string(),
        }
    }

    /// The acknowledgement sent after a successful registration.
    pub fn welcome(name: impl AsRef<str>) -> Self {
        Self::Ok {
            text: format!(
                "Welcome {}! You can type /list, /quit, or @username message for private.",
                name.as_ref()
            ),
        }
    }

    /// A system notice stamped with the current time.
    pub fn system(text: impl Into<String>) -> Self {
        Self::System {
            timestamp: unix_now(),
            text: text.into(),
        }
    }

    /// A broadcast message stamped with the current time.
    pub fn message(from: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::Msg {
            from: from.as_ref().to_string(),
            timestamp: unix_now(),
            text: text.into(),
        }
    }

    /// A private message stamped with the current time.
    pub fn private(from: impl AsRef<str>, to: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::Private {
            from: from.as_ref().to_string(),
            to: to.as_ref().to_string(),
            timestamp: unix_now(),
            text: text.into(),
        }
    }

    /// Confirmation to the sender of a private message.
    pub fn sent_private(to: impl AsRef<str>, text: impl Into<String>) -> Self {
        Self::SentPrivate {
            to: to.as_ref().to_string(),
            timestamp: unix_now(),
            text: text.into(),
        }
    }

    /// The `/list` response.
    pub fn users<I, N>(names: I) -> Self
    where
        I: IntoIterator<Item = N>,
        N: AsRef<str>,
    {
        Self::Users {
            names: names.into_iter().map(|n| n.as_ref().to_string()).collect(),
        }
    }

    /// An error report.
    pub fn error(code: ErrorCode, text: impl Into<String>) -> Self {
        Self::Error {
            code,
            text: text.into(),
        }
    }

    /// The type tag of this line.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::EnterName { .. } => tags::ENTERNAME,
            Self::Ok { .. } => tags::OK,
            Self::System { .. } => tags::SYSTEM,
            Self::Msg { .. } => tags::MSG,
            Self::Private { .. } => tags::PRV,
            Self::SentPrivate { .. } => tags::SENTPRV,
            Self::Users { .. } => tags::USERS,
            Self::Error { .. } => tags::ERR,
        }
    }
}

impl fmt::Display for ServerMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = self.tag();
        match self {
            Self::EnterName { prompt } => write!(f, "{tag}|{prompt}"),
            Self::Ok { text } => write!(f, "{tag}|{text}"),
            Self::System { timestamp, text } => write!(f, "{tag}|{timestamp}|{text}"),
            Self::Msg {
                from,
                timestamp,
                text,
            } => write!(f, "{tag}|{from}|{timestamp}|{text}"),
            Self::Private {
                from,
                to,
                timestamp,
                text,
            } => write!(f, "{tag}|{from}|{to}|{timestamp}|{text}"),
            Self::SentPrivate {
                to,
                timestamp,
                text,
            } => write!(f, "{tag}|{to}|{timestamp}|{text}"),
            Self::Users { names } => write!(f, "{tag}|{}", names.join(",")),
            Self::Error { code, text } => write!(f, "{tag}|{code}|{text}"),
        }
    }
}

impl FromStr for ServerMessage {
    type Err = ProtocolError;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            return Err(ProtocolError::EmptyLine);
        }

        let (tag, rest) = match line.split_once(SEPARATOR) {
            Some((tag, rest)) => (tag, rest),
            None => (line, ""),
        };

        match tag {
            tags::ENTERNAME => Ok(Self::EnterName {
                prompt: rest.to_string(),
            }),
            tags::OK => Ok(Self::Ok {
                text: rest.to_string(),
            }),
            tags::SYSTEM => {
                let [timestamp, text] = split_fields(tags::SYSTEM, rest, ["timestamp", "text"])?;
                Ok(Self::System {
                    timestamp: parse_timestamp(timestamp)?,
                    text: text.to_string(),
                })
            }
            tags::MSG => {
                let [from, timestamp, text] =
                    split_fields(tags::MSG, rest, ["sender", "timestamp", "text"])?;
                Ok(Self::Msg {
                    from: from.to_string(),
                    timestamp: parse_timestamp(timestamp)?,
                    text: text.to_string(),
                })
            }
            tags::PRV => {
                let [from, to, timestamp, text] = split_fields(
                    tags::PRV,
                    rest,
                    ["sender", "recipient", "timestamp", "text"],
                )?;
                Ok(Self::Private {
                    from: from.to_string(),
                    to: to.to_string(),
                    timestamp: parse_timestamp(timestamp)?,
                    text: text.to_string(),
                })
            }
            tags::SENTPRV => {
                let [to, timestamp, text] =
                    split_fields(tags::SENTPRV, rest, ["recipient", "timestamp", "text"])?;
                Ok(Self::SentPrivate {
                    to: to.to_string(),
                    timestamp: parse_timestamp(timestamp)?,
                    text: text.to_string(),
                })
            }
            tags::USERS => Ok(Self::Users {
                names: rest
                    .split(',')
                    .filter(|name| !name.is_empty())
                    .map(str::to_string)
                    .collect(),
            }),
            tags::ERR => {
                let [code, text] = split_fields(tags::ERR, rest, ["code", "text"])?;
                Ok(Self::Error {
                    code: code.parse()?,
                    text: text.to_string(),
                })
            }
            other => Err(ProtocolError::UnknownTag(other.to_string())),
        }
    }
}

/// Split `rest` into exactly `N` fields; the last field keeps any separators.
fn split_fields<'a, const N: usize>(
    tag: &'static str,
    rest: &'a str,
    names: [&'static str; N],
) -> Result<[&'a str; N], ProtocolError> {
    let mut parts = rest.splitn(N, SEPARATOR);
    let mut fields = [""; N];
    for (slot, name) in fields.iter_mut().zip(names) {
        *slot = parts
            .next()
            .ok_or(ProtocolError::MissingField { tag, field: name })?;
    }
    Ok(fields)
}

fn parse_timestamp(raw: &str) -> Result<i64, ProtocolError> {
    raw.parse()
        .map_err(|_| ProtocolError::InvalidTimestamp(raw.to_string()))
}
