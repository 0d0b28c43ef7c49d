//! UID COPY command handler.
//!
//! Clones messages into the destination folder, assigning fresh UIDs
//! there, and reports the mapping in a `[COPYUID validity src dst]`
//! response code (RFC 4315) on the tagged OK.

use super::uid_fetch::expand_uids;
use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use imap_codec::imap_types::sequence::SequenceSet;
use std::sync::Mutex;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UID COPY command.
pub async fn handle_uid_copy<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    sequence_set: &SequenceSet,
    dest_folder: &str,
    mailbox: &Mutex<Mailbox>,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    // Copy under lock, collecting the UID mapping.
    let outcome = {
        let mut mb = mailbox.lock().unwrap();
        if mb.get_folder(folder_name).is_none() {
            None
        } else if mb.get_folder(dest_folder).is_none() {
            Some(Err(()))
        } else {
            let src = mb.get_folder(folder_name).unwrap();
            let max_uid = src.emails.iter().map(|e| e.uid).max().unwrap_or(0);
            let wanted = expand_uids(sequence_set, max_uid);
            let to_copy: Vec<_> = src
                .emails
                .iter()
                .filter(|e| wanted.contains(&e.uid))
                .cloned()
                .collect();

            let dest = mb.get_folder_mut(dest_folder).unwrap();
            let validity = dest.uid_validity;
            let mut src_uids = Vec::new();
            let mut dst_uids = Vec::new();
            for mut email in to_copy {
                let new_uid = dest.uid_next();
                src_uids.push(email.uid.to_string());
                dst_uids.push(new_uid.to_string());
                email.uid = new_uid;
                dest.emails.push(email);
            }
            Some(Ok((validity, src_uids, dst_uids)))
        }
    };

    match outcome {
        None => {
            let resp = format!("{tag} BAD Source folder not found\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Some(Err(())) => {
            let resp = format!("{tag} NO [TRYCREATE] Destination folder not found\r\n");
            let _ = write_line(stream, &resp).await;
        }
        Some(Ok((validity, src_uids, dst_uids))) if !src_uids.is_empty() => {
            let resp = format!(
                "{tag} OK [COPYUID {validity} {} {}] COPY completed\r\n",
                src_uids.join(","),
                dst_uids.join(","),
            );
            let _ = write_line(stream, &resp).await;
        }
        Some(Ok(_)) => {
            let resp = format!("{tag} OK COPY completed\r\n");
            let _ = write_line(stream, &resp).await;
        }
    }
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
            vec![Sequence::Single(SeqOrUid::Value(NonZeroU32::new(uid).unwrap()))]
                .try_into()
                .unwrap(),
        )
    }

    async fn run(set: &SequenceSet, dest: &str, mailbox: &Mutex<Mailbox>) -> String {
        let (client, server) = tokio::io::duplex(2048);
        let mut stream = BufReader::new(server);

        handle_uid_copy("A1", set, dest, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn copy_reports_copyuid_mapping() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(5, true, &raw)
                .folder("Trash")
                .build(),
        );

        let output = run(&uid_set(5), "Trash", &mailbox).await;
        assert!(output.contains("[COPYUID 1 5 1]"), "{output}");

        let mb = mailbox.lock().unwrap();
        assert_eq!(mb.get_folder("Trash").unwrap().emails.len(), 1);
        assert_eq!(mb.get_folder("INBOX").unwrap().emails.len(), 1);
    }

    #[tokio::test]
    async fn missing_destination_suggests_trycreate() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(5, true, &raw)
                .build(),
        );

        let output = run(&uid_set(5), "Nope", &mailbox).await;
        assert!(output.contains("NO [TRYCREATE]"));
    }
}
