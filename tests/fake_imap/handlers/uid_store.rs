//! UID STORE command handler.
//!
//! Applies `+FLAGS` / `-FLAGS` / `FLAGS` to the `\Seen` and
//! `\Deleted` flags of matching messages and answers with one
//! `* N FETCH (FLAGS (...) UID u)` per modified message (suppressed
//! for the `.SILENT` forms), then the tagged OK.

use super::uid_fetch::expand_uids;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::flag::{Flag, StoreResponse, StoreType};
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Parsed STORE command arguments, as decoded by imap-codec.
pub struct StoreArgs<'a> {
    pub sequence_set: &'a SequenceSet,
    pub kind: &'a StoreType,
    pub response: &'a StoreResponse,
    pub flags: &'a [Flag<'a>],
}

/// Handle the UID STORE command.
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

    let wants_seen = args.flags.iter().any(|f| matches!(f, Flag::Seen));
    let wants_deleted = args.flags.iter().any(|f| matches!(f, Flag::Deleted));

    // Mutate under lock, with no await inside.
    let results: Option<Vec<(usize, u32, String)>> = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(folder_name).map(|folder| {
            let max_uid = folder.emails.iter().map(|e| e.uid).max().unwrap_or(0);
            let uids = expand_uids(args.sequence_set, max_uid);
            let mut touched = Vec::new();
            for uid in uids {
                if let Some((idx, email)) = folder
                    .emails
                    .iter_mut()
                    .enumerate()
                    .find(|(_, e)| e.uid == uid)
                {
                    match args.kind {
                        StoreType::Add => {
                            email.seen |= wants_seen;
                            email.deleted |= wants_deleted;
                        }
                        StoreType::Remove => {
                            if wants_seen {
                                email.seen = false;
                            }
                            if wants_deleted {
                                email.deleted = false;
                            }
                        }
                        StoreType::Replace => {
                            email.seen = wants_seen;
                            email.deleted = wants_deleted;
                        }
                    }
                    touched.push((idx, uid, email.flags_wire()));
                }
            }
            touched
        })
    };

    let Some(results) = results else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    if matches!(args.response, StoreResponse::Answer) {
        for (idx, uid, flags) in &results {
            let line = format!("* {} FETCH (FLAGS {flags} UID {uid})\r\n", idx + 1);
            if write_line(stream, &line).await.is_err() {
                return;
            }
        }
    }

    let resp = format!("{tag} OK STORE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use imap_codec::imap_types::sequence::{SeqOrUid, Sequence};
    use std::num::NonZeroU32;
    use tokio::io::BufReader;

    async fn run(args: &StoreArgs<'_>, mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(2048);
        let mut stream = BufReader::new(server);

        handle_uid_store("A1", args, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn add_seen_reports_new_flags() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );
        let set = SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(1).unwrap()))]
                .try_into()
                .unwrap(),
        );
        let args = StoreArgs {
            sequence_set: &set,
            kind: &StoreType::Add,
            response: &StoreResponse::Answer,
            flags: &[Flag::Seen],
        };

        let output = run(&args, &mailbox).await;
        assert!(output.contains("* 1 FETCH (FLAGS (\\Seen) UID 1)"));
        assert!(mailbox.lock().unwrap().get_folder("INBOX").unwrap().emails[0].seen);
    }

    #[tokio::test]
    async fn silent_suppresses_fetch_lines() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, false, &raw)
                .build(),
        );
        let set = SequenceSet(
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(1).unwrap()))]
                .try_into()
                .unwrap(),
        );
        let args = StoreArgs {
            sequence_set: &set,
            kind: &StoreType::Add,
            response: &StoreResponse::Silent,
            flags: &[Flag::Seen],
        };

        let output = run(&args, &mailbox).await;
        assert!(!output.contains("FETCH"));
        assert!(output.contains("A1 OK STORE completed"));
    }
}
