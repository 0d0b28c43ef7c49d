//! SELECT / EXAMINE command handler.
//!
//! Opens a folder and emits the untagged metadata the engine applies
//! to its folder cache:
//!
//! - `* FLAGS (...)` and `* OK [PERMANENTFLAGS (...)]`
//! - `* N EXISTS` / `* N RECENT`
//! - `* OK [UIDVALIDITY V]` / `* OK [UIDNEXT U]` / `* OK [UNSEEN N]`
//!
//! Returns the selected folder name (or `None` if not found).

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use tokio::io::{AsyncRead, AsyncWrite, BufReader};

/// Handle SELECT (read-write) or EXAMINE (read-only).
pub async fn handle_select<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    folder_name: &str,
    examine: bool,
    mailbox: &Mailbox,
    stream: &mut BufReader<S>,
) -> Option<String> {
    let Some(folder) = mailbox.get_folder(folder_name) else {
        let resp = format!("{tag} NO Folder not found\r\n");
        let _ = write_line(stream, &resp).await;
        return None;
    };

    let _ = write_line(
        stream,
        "* FLAGS (\\Seen \\Answered \\Flagged \\Deleted \\Draft)\r\n",
    )
    .await;

    let exists = format!("* {} EXISTS\r\n", folder.emails.len());
    let _ = write_line(stream, &exists).await;
    let _ = write_line(stream, "* 0 RECENT\r\n").await;

    let uidvalidity = format!("* OK [UIDVALIDITY {}]\r\n", folder.uid_validity);
    let _ = write_line(stream, &uidvalidity).await;

    let uidnext = format!("* OK [UIDNEXT {}]\r\n", folder.uid_next());
    let _ = write_line(stream, &uidnext).await;

    let _ = write_line(
        stream,
        "* OK [PERMANENTFLAGS (\\Seen \\Deleted)] Limited\r\n",
    )
    .await;

    if let Some(pos) = folder.emails.iter().position(|e| !e.seen) {
        let _ = write_line(stream, &format!("* OK [UNSEEN {}]\r\n", pos + 1)).await;
    }

    let access = if examine { "READ-ONLY" } else { "READ-WRITE" };
    let verb = if examine { "EXAMINE" } else { "SELECT" };
    let resp = format!("{tag} OK [{access}] {verb} completed\r\n");
    let _ = write_line(stream, &resp).await;
    Some(folder.name.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::BufReader;

    async fn run(tag: &str, folder: &str, examine: bool, mailbox: &Mailbox) -> (String, Option<String>) {
        let (client, server) = tokio::io::duplex(4096);
        let mut stream = BufReader::new(server);

        let selected = handle_select(tag, folder, examine, mailbox, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        (String::from_utf8(buf).unwrap(), selected)
    }

    fn raw() -> Vec<u8> {
        b"From: a@b.com\r\nSubject: Test\r\n\r\nBody".to_vec()
    }

    #[tokio::test]
    async fn selects_existing_folder() {
        let mailbox = MailboxBuilder::new()
            .folder("INBOX")
            .email(1, false, &raw())
            .email(2, true, &raw())
            .build();

        let (output, selected) = run("A1", "INBOX", false, &mailbox).await;
        assert_eq!(selected, Some("INBOX".to_string()));
        assert!(output.contains("* 2 EXISTS"));
        assert!(output.contains("[UIDVALIDITY 1]"));
        assert!(output.contains("[UIDNEXT 3]"));
        assert!(output.contains("[UNSEEN 1]"));
        assert!(output.contains("A1 OK [READ-WRITE] SELECT completed"));
    }

    #[tokio::test]
    async fn examine_is_read_only() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let (output, _) = run("A1", "INBOX", true, &mailbox).await;
        assert!(output.contains("A1 OK [READ-ONLY] EXAMINE completed"));
    }

    #[tokio::test]
    async fn missing_folder_is_no() {
        let mailbox = MailboxBuilder::new().folder("INBOX").build();
        let (output, selected) = run("A1", "Nope", false, &mailbox).await;
        assert!(selected.is_none());
        assert!(output.contains("A1 NO Folder not found"));
    }
}
