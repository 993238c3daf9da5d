use std::borrow::Borrow;
use std::fmt;
use std::str::FromStr;

use crate::ProtocolError;

/// A display name chosen by a client at connection time.
///
/// Surrounding whitespace is trimmed; the remaining text must be non-empty.
/// Names are compared byte-for-byte.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Username(String);

impl Username {
    /// Parse a username from a raw client line.
    pub fn parse(raw: &str) -> Result<Self, ProtocolError> {
        let name = raw.trim();
        if name.is_empty() {
            return Err(ProtocolError::EmptyName);
        }
        Ok(Self(name.to_string()))
    }

    /// Borrow the name as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Username {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for Username {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Username {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for Username {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Username {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}
