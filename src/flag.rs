//! IMAP message flags
//!
//! Provides a strongly-typed enum for the system flags a bulk job may
//! add or remove, instead of raw strings.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// An IMAP system flag.
///
/// # Examples
///
/// ```
/// use gmailfilters::Flag;
///
/// let seen: Flag = "seen".parse().unwrap();
/// assert_eq!(seen, Flag::Seen);
/// assert_eq!(seen.as_imap_str(), "\\Seen");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Flag {
    /// Message has been read (`\Seen`).
    Seen,
    /// Message has been answered (`\Answered`).
    Answered,
    /// Message is flagged for attention (`\Flagged`).
    Flagged,
    /// Message is marked for deletion (`\Deleted`).
    Deleted,
    /// Message is a draft (`\Draft`).
    Draft,
    /// Message arrived in this session (`\Recent`).
    Recent,
}

impl Flag {
    /// The IMAP wire representation of this flag, including the
    /// leading backslash.
    #[must_use]
    pub const fn as_imap_str(self) -> &'static str {
        match self {
            Self::Seen => "\\Seen",
            Self::Answered => "\\Answered",
            Self::Flagged => "\\Flagged",
            Self::Deleted => "\\Deleted",
            Self::Draft => "\\Draft",
            Self::Recent => "\\Recent",
        }
    }
}

impl fmt::Display for Flag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_imap_str())
    }
}

impl FromStr for Flag {
    type Err = Error;

    /// Parse a flag name such as `seen` or `\Flagged`
    /// (case-insensitive).
    fn from_str(s: &str) -> Result<Self> {
        let name = s.trim_start_matches('\\').to_ascii_uppercase();
        match name.as_str() {
            "SEEN" => Ok(Self::Seen),
            "ANSWERED" => Ok(Self::Answered),
            "FLAGGED" => Ok(Self::Flagged),
            "DELETED" => Ok(Self::Deleted),
            "DRAFT" => Ok(Self::Draft),
            "RECENT" => Ok(Self::Recent),
            _ => Err(Error::InvalidOptions(format!("unknown flag: {s}"))),
        }
    }
}
