//! Typed message actions
//!
//! Every side effect the executor can perform on a chunk of messages
//! is one variant of [`Action`]. Rule properties the executor does not
//! know how to perform end up as [`Action::Unsupported`] and are
//! skipped with a warning at execution time.

use crate::error::Result;
use crate::flag::Flag;
use serde::Serialize;
use std::fmt;

/// Gmail's system label for inbox membership.
pub const INBOX_LABEL: &str = "\\Inbox";

/// A side effect applied to every message of a chunk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AddLabels(Vec<String>),
    RemoveLabels(Vec<String>),
    AddFlags(Vec<Flag>),
    RemoveFlags(Vec<Flag>),
    /// Add `\Seen`.
    MarkAsRead,
    /// Remove the `\Inbox` label.
    Archive,
    /// Fetch envelopes so the caller can display the messages.
    Show,
    /// Set `\Deleted`, then expunge the folder.
    Trash,
    /// A rule property with no IMAP counterpart.
    Unsupported { key: String, value: String },
}

impl Action {
    /// Short name used in logs and reports.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::AddLabels(_) => "add-labels",
            Self::RemoveLabels(_) => "remove-labels",
            Self::AddFlags(_) => "add-flags",
            Self::RemoveFlags(_) => "remove-flags",
            Self::MarkAsRead => "mark-as-read",
            Self::Archive => "archive",
            Self::Show => "show",
            Self::Trash => "trash",
            Self::Unsupported { .. } => "unsupported",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AddLabels(labels) | Self::RemoveLabels(labels) => {
                write!(f, "{} {}", self.kind(), labels.join(" "))
            }
            Self::AddFlags(flags) | Self::RemoveFlags(flags) => {
                let names: Vec<&str> = flags.iter().map(|fl| fl.as_imap_str()).collect();
                write!(f, "{} {}", self.kind(), names.join(" "))
            }
            Self::Unsupported { key, value } => write!(f, "unsupported {key}={value}"),
            _ => f.write_str(self.kind()),
        }
    }
}

impl Serialize for Action {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// An add-or-remove request for a label or flag, written on the
/// command line as `+name`, `-name` or plain `name` (add).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Change<T> {
    Add(T),
    Remove(T),
}

impl<T> Change<T> {
    #[must_use]
    pub const fn value(&self) -> &T {
        match self {
            Self::Add(v) | Self::Remove(v) => v,
        }
    }

    #[must_use]
    pub const fn is_add(&self) -> bool {
        matches!(self, Self::Add(_))
    }
}

impl Change<String> {
    /// Parse a label change.
    ///
    /// ```
    /// use gmailfilters::Change;
    ///
    /// assert_eq!(Change::<String>::parse_label("-Later"), Change::Remove("Later".to_string()));
    /// assert_eq!(Change::<String>::parse_label("Work"), Change::Add("Work".to_string()));
    /// ```
    #[must_use]
    pub fn parse_label(raw: &str) -> Self {
        if let Some(label) = raw.strip_prefix('-') {
            Self::Remove(label.to_string())
        } else {
            Self::Add(raw.strip_prefix('+').unwrap_or(raw).to_string())
        }
    }
}

impl Change<Flag> {
    /// Parse a flag change, validating the flag name.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::InvalidOptions`] for names outside the IMAP
    /// system flags.
    pub fn parse_flag(raw: &str) -> Result<Self> {
        match Change::<String>::parse_label(raw) {
            Change::Add(name) => Ok(Self::Add(name.parse()?)),
            Change::Remove(name) => Ok(Self::Remove(name.parse()?)),
        }
    }
}

/// Split a list of changes into `(added, removed)` values.
#[must_use]
pub fn partition<T: Clone>(changes: &[Change<T>]) -> (Vec<T>, Vec<T>) {
    let added = changes.iter().filter(|c| c.is_add()).map(|c| c.value().clone()).collect();
    let removed = changes.iter().filter(|c| !c.is_add()).map(|c| c.value().clone()).collect();
    (added, removed)
}

/// A free-form bulk operation: an optional Gmail query plus actions
/// given directly instead of coming from a rule file.
#[derive(Debug, Clone, Default)]
pub struct BulkJob {
    /// Gmail search syntax; `None` selects every message.
    pub query: Option<String>,
    pub flags: Vec<Change<Flag>>,
    pub labels: Vec<Change<String>>,
    pub delete: bool,
    pub show: bool,
}

impl BulkJob {
    /// Actions in execution order: flags, labels, show, delete.
    #[must_use]
    pub fn actions(&self) -> Vec<Action> {
        let mut actions = Vec::new();

        let (add_flags, del_flags) = partition(&self.flags);
        if !add_flags.is_empty() {
            actions.push(Action::AddFlags(add_flags));
        }
        if !del_flags.is_empty() {
            actions.push(Action::RemoveFlags(del_flags));
        }

        let (add_labels, del_labels) = partition(&self.labels);
        if !add_labels.is_empty() {
            actions.push(Action::AddLabels(add_labels));
        }
        if !del_labels.is_empty() {
            actions.push(Action::RemoveLabels(del_labels));
        }

        if self.show {
            actions.push(Action::Show);
        }
        if self.delete {
            actions.push(Action::Trash);
        }
        actions
    }
}
