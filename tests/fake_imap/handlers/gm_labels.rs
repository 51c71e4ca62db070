//! Gmail `X-GM-LABELS` store handler.
//!
//! Labels are added or removed with a STORE whose data item is
//! `X-GM-LABELS` instead of `FLAGS`:
//!
//! ```text
//! A0005 UID STORE 3,7 +X-GM-LABELS.SILENT (\Inbox "Work Stuff")
//! A0005 OK STORE completed
//! ```
//!
//! System labels such as `\Inbox` travel as atoms, user labels as
//! quoted strings. Like `gm_raw`, this is matched on the raw line
//! before `imap-codec` sees it.

use super::gm_raw::unquote;
use super::sequence::parse_uid_set;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// A parsed `UID STORE ... X-GM-LABELS` command.
#[derive(Debug, PartialEq, Eq)]
pub struct LabelStore<'a> {
    pub tag: &'a str,
    pub uid_set: &'a str,
    pub add: bool,
    pub labels: Vec<String>,
}

/// Recognise a `UID STORE <set> (+|-)X-GM-LABELS[.SILENT] (...)` line.
pub fn parse_gm_labels(line: &str) -> Option<LabelStore<'_>> {
    let mut parts = line.trim().splitn(5, ' ');
    let tag = parts.next()?;
    if !parts.next()?.eq_ignore_ascii_case("UID") || !parts.next()?.eq_ignore_ascii_case("STORE")
    {
        return None;
    }
    let uid_set = parts.next()?;
    let (item, list) = parts.next()?.split_once(' ')?;

    let add = match item.get(..1)? {
        "+" => true,
        "-" => false,
        _ => return None,
    };
    let name = item[1..].to_ascii_uppercase();
    if name != "X-GM-LABELS" && name != "X-GM-LABELS.SILENT" {
        return None;
    }

    let inner = list.trim().strip_prefix('(')?.strip_suffix(')')?;
    Some(LabelStore {
        tag,
        uid_set,
        add,
        labels: tokens(inner),
    })
}

/// Split a label list into atoms and unquoted strings.
fn tokens(s: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut rest = s.trim_start();
    while !rest.is_empty() {
        let end = if rest.starts_with('"') {
            let mut escaped = false;
            rest.char_indices()
                .skip(1)
                .find(|&(_, c)| {
                    let close = c == '"' && !escaped;
                    escaped = c == '\\' && !escaped;
                    close
                })
                .map_or(rest.len(), |(i, _)| i + 1)
        } else {
            rest.find(' ').unwrap_or(rest.len())
        };
        out.push(unquote(&rest[..end]));
        rest = rest[end..].trim_start();
    }
    out
}

/// Apply a label store to the selected folder.
pub async fn handle_gm_labels<S: AsyncRead + AsyncWrite + Unpin>(
    store: &LabelStore<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let tag = store.tag;
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let resp = {
        let mut mb = mailbox.lock().unwrap();
        match mb.get_folder_mut(folder_name) {
            None => format!("{tag} BAD Folder not found\r\n"),
            Some(folder) => match parse_uid_set(store.uid_set, folder.max_uid()) {
                None => format!("{tag} BAD Invalid sequence set\r\n"),
                Some(uids) => {
                    for email in folder.emails.iter_mut().filter(|e| uids.contains(&e.uid)) {
                        for label in &store.labels {
                            let present = email.has_label(label);
                            if store.add && !present {
                                email.labels.push(label.clone());
                            } else if !store.add && present {
                                email.labels.retain(|l| l != label);
                            }
                        }
                    }
                    format!("{tag} OK STORE completed\r\n")
                }
            },
        }
    };
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    fn mailbox() -> Mutex<Mailbox> {
        Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, b"Subject: a\r\n\r\n")
                .labels(&["\\Inbox"])
                .email(2, false, b"Subject: b\r\n\r\n")
                .labels(&["\\Inbox", "Work"])
                .email(3, false, b"Subject: c\r\n\r\n")
                .build(),
        )
    }

    async fn run(line: &str, mailbox: &Mutex<Mailbox>, selected: Option<&str>) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let store = parse_gm_labels(line).unwrap();
        handle_gm_labels(&store, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    fn labels(mailbox: &Mutex<Mailbox>, uid: u32) -> Vec<String> {
        let mb = mailbox.lock().unwrap();
        let folder = mb.get_folder("INBOX").unwrap();
        folder.emails.iter().find(|e| e.uid == uid).unwrap().labels.clone()
    }

    #[test]
    fn parses_atoms_and_quoted_labels() {
        let store =
            parse_gm_labels("A0005 UID STORE 1:3 +X-GM-LABELS.SILENT (\\Inbox \"Work Stuff\")\r\n")
                .unwrap();
        assert_eq!(
            store,
            LabelStore {
                tag: "A0005",
                uid_set: "1:3",
                add: true,
                labels: vec!["\\Inbox".to_string(), "Work Stuff".to_string()],
            }
        );
    }

    #[test]
    fn parses_removal_and_escapes() {
        let store = parse_gm_labels("A1 uid store 4 -X-GM-LABELS (\"say \\\"hi\\\"\")").unwrap();
        assert!(!store.add);
        assert_eq!(store.labels, vec!["say \"hi\"".to_string()]);
    }

    #[test]
    fn ignores_flag_stores() {
        assert!(parse_gm_labels("A1 UID STORE 1 +FLAGS.SILENT (\\Seen)").is_none());
        assert!(parse_gm_labels("A1 UID SEARCH ALL").is_none());
    }

    #[tokio::test]
    async fn adds_labels_without_duplicates() {
        let mailbox = mailbox();
        let output = run(
            "A1 UID STORE 1:2 +X-GM-LABELS.SILENT (\"Work\")",
            &mailbox,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("A1 OK STORE completed"));
        assert_eq!(labels(&mailbox, 1), vec!["\\Inbox", "Work"]);
        assert_eq!(labels(&mailbox, 2), vec!["\\Inbox", "Work"]);
        assert!(labels(&mailbox, 3).is_empty());
    }

    #[tokio::test]
    async fn removes_system_label() {
        let mailbox = mailbox();
        let output = run(
            "A1 UID STORE 1,2 -X-GM-LABELS.SILENT (\\Inbox)",
            &mailbox,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("A1 OK STORE completed"));
        assert!(labels(&mailbox, 1).is_empty());
        assert_eq!(labels(&mailbox, 2), vec!["Work"]);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mailbox = mailbox();
        let output = run("A1 UID STORE 1 +X-GM-LABELS (x)", &mailbox, None).await;
        assert!(output.contains("A1 BAD No folder selected"));
    }
}
