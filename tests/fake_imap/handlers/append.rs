//! APPEND command handler.
//!
//! APPEND is the one client command that carries a literal:
//!
//! ```text
//! A1 APPEND "INBOX" {310}        <- synchronising: wait for "+"
//! A1 APPEND "INBOX" {310+}       <- LITERAL+: body follows at once
//! <310 bytes of raw message>
//! ```
//!
//! The handler parses the literal header itself, sends the `+`
//! continuation only for the synchronising form, drains exactly the
//! announced byte count, and answers with an APPENDUID response code
//! (RFC 4315).

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::{Mailbox, TestEmail};
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader};

/// Parse the trailing `{n}` / `{n+}` of an APPEND line.
fn literal_size(command: &str) -> Option<(usize, bool)> {
    let open = command.rfind('{')?;
    let inner = command[open + 1..].strip_suffix('}')?;
    inner.strip_suffix('+').map_or_else(
        || inner.parse().ok().map(|n| (n, false)),
        |digits| digits.parse().ok().map(|n| (n, true)),
    )
}

/// Extract the mailbox name between APPEND and the literal header.
fn target_folder(command: &str) -> String {
    let rest = command["APPEND".len()..].trim_start();
    let name = match rest.strip_prefix('"') {
        Some(quoted) => quoted.split('"').next().unwrap_or(""),
        None => rest.split_whitespace().next().unwrap_or(""),
    };
    name.to_string()
}

/// Handle the APPEND command, reading the message literal.
pub async fn handle_append<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    command: &str,
    mailbox: &Mutex<Mailbox>,
    stream: &mut BufReader<S>,
) {
    let Some((size, nonsync)) = literal_size(command.trim()) else {
        let resp = format!("{tag} BAD APPEND needs a literal\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };
    let folder_name = target_folder(command.trim());

    if !nonsync && write_line(stream, "+ Ready for literal data\r\n").await.is_err() {
        return;
    }

    let mut raw = vec![0u8; size];
    if stream.read_exact(&mut raw).await.is_err() {
        return;
    }
    // The CRLF that terminates the command line after the literal.
    let mut trailer = String::new();
    if stream.read_line(&mut trailer).await.is_err() {
        return;
    }

    let appended = {
        let mut mb = mailbox.lock().unwrap();
        mb.get_folder_mut(&folder_name).map(|folder| {
            let uid = folder.uid_next();
            folder.emails.push(TestEmail {
                uid,
                seen: false,
                deleted: false,
                raw,
            });
            (folder.uid_validity, uid)
        })
    };

    match appended {
        Some((validity, uid)) => {
            let resp = format!("{tag} OK [APPENDUID {validity} {uid}] APPEND completed\r\n");
            let _ = write_line(stream, &resp).await;
        }
        None => {
            let resp = format!("{tag} NO [TRYCREATE] No such folder\r\n");
            let _ = write_line(stream, &resp).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[test]
    fn parses_literal_headers() {
        assert_eq!(literal_size("APPEND \"INBOX\" {42}"), Some((42, false)));
        assert_eq!(literal_size("APPEND \"INBOX\" {42+}"), Some((42, true)));
        assert_eq!(literal_size("APPEND \"INBOX\""), None);
    }

    #[test]
    fn parses_folder_names() {
        assert_eq!(target_folder("APPEND \"My Stuff\" {1+}"), "My Stuff");
        assert_eq!(target_folder("APPEND INBOX {1+}"), "INBOX");
    }

    #[tokio::test]
    async fn nonsync_literal_is_stored_without_continuation() {
        let mailbox = Mutex::new(MailboxBuilder::new().folder("INBOX").build());
        let (mut client, server) = tokio::io::duplex(4096);

        let handler = async {
            let mut stream = BufReader::new(server);
            handle_append("A1", "APPEND \"INBOX\" {5+}", &mailbox, &mut stream).await;
        };
        let writer = async {
            client.write_all(b"hello\r\n").await.unwrap();
            let mut buf = Vec::new();
            client.read_to_end(&mut buf).await.unwrap();
            String::from_utf8(buf).unwrap()
        };
        let ((), output) = tokio::join!(handler, writer);

        assert!(output.contains("[APPENDUID 1 1]"), "{output}");
        let mb = mailbox.lock().unwrap();
        assert_eq!(mb.get_folder("INBOX").unwrap().emails.len(), 1);
        assert_eq!(mb.get_folder("INBOX").unwrap().emails[0].raw, b"hello");
    }
}
