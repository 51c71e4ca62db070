//! The mail-session interface the executor drives
//!
//! A session has exactly one selected folder at a time, so every
//! method takes `&mut self` and callers must use it sequentially.
//! [`crate::connection::ImapSession`] is the IMAP implementation; tests
//! substitute an in-memory one.

use crate::error::Result;
use crate::flag::Flag;
use crate::folder::FolderInfo;
use serde::Serialize;

/// A message UID within the selected folder.
pub type Uid = u32;

/// Result of selecting a folder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FolderStatus {
    /// Number of messages in the folder.
    pub exists: u32,
}

/// Envelope data fetched for display.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MessageSummary {
    pub uid: Uid,
    pub subject: String,
    pub from: Vec<String>,
    pub reply_to: Vec<String>,
    pub to: Vec<String>,
    pub cc: Vec<String>,
    pub message_id: Option<String>,
}

/// Operations the filter engine needs from a mail server.
#[allow(async_fn_in_trait)]
pub trait MailSession {
    /// LIST every folder.
    async fn list_folders(&mut self) -> Result<Vec<FolderInfo>>;

    /// SELECT a folder, making it the target of later calls.
    async fn select_folder(&mut self, name: &str) -> Result<FolderStatus>;

    /// UIDs matching a Gmail query, or every UID when `query` is
    /// `None`, in ascending order.
    async fn search(&mut self, query: Option<&str>) -> Result<Vec<Uid>>;

    /// Envelope summaries for the given UIDs.
    async fn fetch_summaries(&mut self, uids: &[Uid]) -> Result<Vec<MessageSummary>>;

    async fn add_flags(&mut self, uids: &[Uid], flags: &[Flag]) -> Result<()>;

    async fn remove_flags(&mut self, uids: &[Uid], flags: &[Flag]) -> Result<()>;

    async fn add_labels(&mut self, uids: &[Uid], labels: &[String]) -> Result<()>;

    async fn remove_labels(&mut self, uids: &[Uid], labels: &[String]) -> Result<()>;

    /// Mark messages `\Deleted`.
    async fn delete_messages(&mut self, uids: &[Uid]) -> Result<()>;

    /// Permanently remove `\Deleted` messages from the selected folder.
    async fn expunge(&mut self) -> Result<()>;

    async fn logout(&mut self) -> Result<()>;
}

/// Format UIDs as an IMAP sequence set (`1,2,5`).
#[must_use]
pub fn uid_set(uids: &[Uid]) -> String {
    uids.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

/// Quote a string for use in an IMAP command.
#[must_use]
pub fn quote(s: &str) -> String {
    let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
    format!("\"{escaped}\"")
}

/// Encode a folder or label name to IMAP modified UTF-7.
#[must_use]
pub fn encode_name(name: &str) -> String {
    utf7_imap::encode_utf7_imap(name.to_string())
}

/// Decode a modified UTF-7 folder or label name.
#[must_use]
pub fn decode_name(name: &str) -> String {
    utf7_imap::decode_utf7_imap(name.to_string())
}

/// Format labels as a parenthesised X-GM-LABELS list. System labels
/// such as `\Inbox` are sent as atoms, everything else quoted in
/// modified UTF-7.
#[must_use]
pub fn label_list(labels: &[String]) -> String {
    let items: Vec<String> = labels
        .iter()
        .map(|l| {
            if l.starts_with('\\') {
                l.clone()
            } else {
                quote(&encode_name(l))
            }
        })
        .collect();
    format!("({})", items.join(" "))
}

/// Arguments of a `UID SEARCH X-GM-RAW` command.
#[derive(Debug, PartialEq, Eq)]
pub enum RawSearch<'a> {
    /// ASCII query, sent in one line as a quoted string.
    Quoted(String),
    /// Non-ASCII query: `command` ends with a `{n}` literal header and
    /// `data` follows once the server asks for it.
    Literal { command: String, data: &'a str },
}

/// Search arguments for a Gmail query. Quoted strings are 7-bit, so
/// anything else is sent as a UTF-8 literal.
#[must_use]
pub fn raw_search(query: &str) -> RawSearch<'_> {
    if query.is_ascii() {
        RawSearch::Quoted(format!("X-GM-RAW {}", quote(query)))
    } else {
        RawSearch::Literal {
            command: format!("CHARSET UTF-8 X-GM-RAW {{{}}}", query.len()),
            data: query,
        }
    }
}

/// Format flags as a parenthesised flag list.
#[must_use]
pub fn flag_list(flags: &[Flag]) -> String {
    let items: Vec<&str> = flags.iter().map(|f| f.as_imap_str()).collect();
    format!("({})", items.join(" "))
}
