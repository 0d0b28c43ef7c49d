//! UID SEARCH command handler.
//!
//! Matches against the parsed `SearchKey` criteria from imap-types:
//! `ALL`, `SEEN`/`UNSEEN`, `DELETED`, and the `AND`/`OR`/`NOT`
//! combinators. Anything fancier matches everything, which is enough
//! for tests that only care about the response plumbing.
//!
//! Response shape (RFC 3501 §7.2.5): `* SEARCH 1 2 3` then tagged OK.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use imap_codec::imap_types::search::SearchKey;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the UID SEARCH command against the selected folder.
pub async fn handle_uid_search<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    criteria: &[SearchKey<'_>],
    mailbox: &Mailbox,
    selected_folder: Option<&str>,
    stream: &mut BufReader<S>,
) {
    let Some(folder_name) = selected_folder else {
        let resp = format!("{tag} BAD No folder selected\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} BAD Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let uids: Vec<String> = folder
        .emails
        .iter()
        .filter(|e| criteria.iter().all(|key| matches_key(e, key)))
        .map(|e| e.uid.to_string())
        .collect();

    // An empty result is still "* SEARCH" with no numbers.
    let search_line = format!("* SEARCH {}\r\n", uids.join(" "));
    let _ = write_line(stream, &search_line).await;
    let resp = format!("{tag} OK SEARCH completed\r\n");
    let _ = write_line(stream, &resp).await;
}

fn matches_key(email: &TestEmail, key: &SearchKey<'_>) -> bool {
    match key {
        SearchKey::Unseen => !email.seen,
        SearchKey::Seen => email.seen,
        SearchKey::Deleted => email.deleted,
        SearchKey::Undeleted => !email.deleted,
        SearchKey::And(keys) => keys.as_ref().iter().all(|k| matches_key(email, k)),
        SearchKey::Or(a, b) => matches_key(email, a) || matches_key(email, b),
        SearchKey::Not(k) => !matches_key(email, k),
        // ALL and any unsupported criterion match everything.
        _ => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(criteria: &[SearchKey<'_>], mailbox: &Mailbox) -> String {
        let (client, server) = tokio::io::duplex(2048);
        let mut stream = BufReader::new(server);

        handle_uid_search("A1", criteria, mailbox, Some("INBOX"), &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[tokio::test]
    async fn unseen_filters_by_flag() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, true, &raw)
            .email(2, false, &raw)
            .build();

        let output = run(&[SearchKey::Unseen], &mailbox).await;
        assert!(output.contains("* SEARCH 2\r\n"));
    }

    #[tokio::test]
    async fn all_returns_every_uid() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, true, &raw)
            .email(2, false, &raw)
            .build();

        let output = run(&[SearchKey::All], &mailbox).await;
        assert!(output.contains("* SEARCH 1 2\r\n"));
    }
}
