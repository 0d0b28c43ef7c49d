//! STATUS command handler.
//!
//! Always answers with the full item set regardless of what the
//! client asked for; the engine must pick out what it knows and skip
//! the rest.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle the STATUS command for `folder_name`.
pub async fn handle_status<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };

    let unseen = folder.emails.iter().filter(|e| !e.seen).count();
    let line = format!(
        "* STATUS \"{}\" (MESSAGES {} RECENT 0 UIDNEXT {} UIDVALIDITY {} UNSEEN {})\r\n",
        folder.name,
        folder.emails.len(),
        folder.uid_next(),
        folder.uid_validity,
        unseen,
    );
    let _ = write_line(stream, &line).await;
    let resp = format!("{tag} OK STATUS completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reports_counts() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(3, true, &raw)
            .email(7, false, &raw)
            .build();

        let (client, server) = tokio::io::duplex(2048);
        let mut stream = BufReader::new(server);
        handle_status("A1", "INBOX", &mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.contains("MESSAGES 2"));
        assert!(output.contains("UIDNEXT 8"));
        assert!(output.contains("UNSEEN 1"));
        assert!(output.contains("A1 OK STATUS completed"));
    }
}
