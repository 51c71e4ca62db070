//! UID STORE command handler.
//!
//! Modifies the `\Seen`, `\Flagged` and `\Deleted` flags on messages
//! identified by UID. Supports:
//!
//! - `+FLAGS (...)` -- add flags
//! - `-FLAGS (...)` -- remove flags
//! - `FLAGS (...)` -- replace flags
//!
//! Responds with `* N FETCH (FLAGS (...))` per modified message unless
//! the `.SILENT` form was used, then the tagged OK. Gmail label stores
//! (`X-GM-LABELS`) are handled in `gm_labels`.

use super::sequence::extract_uids;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

/// Handle the UID STORE command. Modifies flags on matching emails.
pub async fn handle_uid_store<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    args: &StoreArgs<'_>,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let wanted = Wanted::from_flags(args.flags);

    // Check folder exists (quick lock, no await).
    let folder_exists = {
        let mb = mailbox.lock().unwrap();
        mb.get_folder(folder_name).is_some()
    };
    if !folder_exists {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    // Mutate flags under lock (no await inside).
    let results = {
        let mut mb = mailbox.lock().unwrap();
        let folder = mb.get_folder_mut(folder_name).unwrap();

        let uids = extract_uids(args.sequence_set, folder.max_uid());

        let mut results: Vec<(usize, u32, Vec<String>)> = Vec::new();

        for uid in uids {
            if let Some((idx, email)) = folder
                .emails
                .iter_mut()
                .enumerate()
                .find(|(_, e)| e.uid == uid)
            {
                wanted.apply(email, args.kind);
                let current = current_flags(email);

                let seq = idx + 1;
                results.push((seq, uid, current));
            }
        }
        drop(mb);
        results
    };

    // Send FETCH responses outside the lock.
    if !matches!(args.response, StoreResponse::Silent) {
        for (seq, uid, flags_list) in &results {
            let flags_str = flags_list.join(" ");
            let line = format!(
                "* {seq} FETCH (UID {uid} \
                 FLAGS ({flags_str}))\r\n"
            );
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

/// The tracked flags named in a STORE command.
#[allow(clippy::struct_excessive_bools)]
struct Wanted {
    seen: bool,
    flagged: bool,
    deleted: bool,
}

impl Wanted {
    fn from_flags(flags: &[Flag<'_>]) -> Self {
        Self {
            seen: flags.iter().any(|f| matches!(f, Flag::Seen)),
            flagged: flags.iter().any(|f| matches!(f, Flag::Flagged)),
            deleted: flags.iter().any(|f| matches!(f, Flag::Deleted)),
        }
    }

    fn apply(&self, email: &mut TestEmail, kind: &StoreType) {
        let update = |current: &mut bool, named: bool| match kind {
            StoreType::Add if named => *current = true,
            StoreType::Remove if named => *current = false,
            StoreType::Replace => *current = named,
            _ => {}
        };
        update(&mut email.seen, self.seen);
        update(&mut email.flagged, self.flagged);
        update(&mut email.deleted, self.deleted);
    }
}

fn current_flags(email: &TestEmail) -> Vec<String> {
    [
        (email.seen, "\\Seen"),
        (email.flagged, "\\Flagged"),
        (email.deleted, "\\Deleted"),
    ]
    .iter()
    .filter(|(set, _)| *set)
    .map(|(_, name)| (*name).to_string())
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence};
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    fn uid_set(uid: u32) -> SequenceSet {
        SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(
                NonZeroU32::new(uid).unwrap(),
            ))]
            .try_into()
            .unwrap(),
        )
    }

    fn make_raw_email() -> Vec<u8> {
        b"From: a@b.com\r\nSubject: Test\r\n\r\nBody".to_vec()
    }

    async fn run_store(
        tag: &str,
        seq: &SequenceSet,
        kind: &StoreType,
        response: &StoreResponse,
        flags: &[Flag<'_>],
        mailbox: &Mutex<Mailbox>,
        selected: Option<&str>,
    ) -> String {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let args = StoreArgs {
            sequence_set: seq,
            kind,
            response,
            flags,
        };
        handle_uid_store(tag, &args, mailbox, selected, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn add_seen_flag() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );

        let output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Add,
            &StoreResponse::Answer,
            &[Flag::Seen],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("FLAGS (\\Seen)"));
        assert!(output.contains("A1 OK STORE completed"));

        // Verify mutation persisted.
        assert!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].seen);
    }

    #[tokio::test]
    async fn remove_seen_flag() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, true, &raw) // starts seen
                .build(),
        );

        let _output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Remove,
            &StoreResponse::Answer,
            &[Flag::Seen],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(!mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].seen);
    }

    #[tokio::test]
    async fn add_deleted_flag() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );

        let _output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Add,
            &StoreResponse::Answer,
            &[Flag::Deleted],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].deleted);
    }

    #[tokio::test]
    async fn silent_store_sends_only_ok() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );

        let output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Add,
            &StoreResponse::Silent,
            &[Flag::Flagged],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert_eq!(output, "A1 OK STORE completed\r\n");
        assert!(mb.lock().unwrap().get_folder("INBOX").unwrap().emails[0].flagged);
    }

    #[tokio::test]
    async fn replace_sets_exactly_the_named_flags() {
        let raw = make_raw_email();
        let mb = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, true, &raw)
                .build(),
        );

        let output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Replace,
            &StoreResponse::Answer,
            &[Flag::Flagged],
            &mb,
            Some("INBOX"),
        )
        .await;

        assert!(output.contains("FLAGS (\\Flagged)"));
        let locked = mb.lock().unwrap();
        let email = &locked.get_folder("INBOX").unwrap().emails[0];
        assert!(!email.seen);
        assert!(email.flagged);
    }

    #[tokio::test]
    async fn no_folder_selected_returns_bad() {
        let mb = Mutex::new(MailboxBuilder::new().folder("INBOX").build());

        let output = run_store(
            "A1",
            &uid_set(1),
            &StoreType::Add,
            &StoreResponse::Answer,
            &[Flag::Seen],
            &mb,
            None,
        )
        .await;

        assert!(output.contains("A1 BAD No folder selected"));
    }
}
