//! EXPUNGE command handler.
//!
//! Removes every `\Deleted` message and announces each removal as
//! `* N EXPUNGE`, where N is the message's sequence number *at the
//! moment of removal* -- earlier removals in the same response shift
//! the numbers of everything after them. Clients must apply the
//! shifts in receipt order; this is exactly what the engine's
//! EXPUNGE handling is tested against.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the EXPUNGE command.
pub async fn handle_expunge<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Remove under lock (no await inside), collecting the shifted
    // sequence numbers to announce.
    let expunged = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(folder_name).map(|folder| {
            let mut seqs = Vec::new();
            let mut idx = 0;
            folder.emails.retain(|email| {
                idx += 1;
                if email.deleted {
                    // idx counts surviving + this one; removals so far
                    // already shifted the live sequence numbers.
                    seqs.push(idx - seqs.len());
                    false
                } else {
                    true
                }
            });
            seqs
        })
    };

    let Some(expunged) = expunged else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    for seq in &expunged {
        let line = format!("* {seq} EXPUNGE\r\n");
        if write_line(stream, &line).await.is_err() {
            return;
        }
    }

    let resp = format!("{tag} OK EXPUNGE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(2048);
        let mut stream = BufReader::new(server);

        handle_expunge("A1", mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn announces_shifted_sequence_numbers() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, true, &raw) // seq 1, deleted
                .email(2, true, &raw) // seq 2
                .email(3, true, &raw) // seq 3, deleted
                .build(),
        );
        {
            let mut mb = mailbox.lock().unwrap();
            let folder = mb.get_folder_mut("INBOX").unwrap();
            folder.emails[0].deleted = true;
            folder.emails[2].deleted = true;
        }

        let output = run(&mailbox).await;
        // First removal is seq 1; the old seq 3 became seq 2.
        assert!(output.contains("* 1 EXPUNGE\r\n* 2 EXPUNGE\r\n"), "{output}");
        assert_eq!(
            mailbox.lock().unwrap().get_folder("INBOX").unwrap().emails[0].uid,
            2
        );
    }

    #[tokio::test]
    async fn nothing_deleted_is_just_ok() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, true, &raw)
                .build(),
        );
        assert_eq!(run(&mailbox).await, "A1 OK EXPUNGE completed\r\n");
    }
}
