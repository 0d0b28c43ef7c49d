//! IDLE command handler (RFC 2177).
//!
//! Acknowledges with `+`, pushes one `* N EXISTS` for the selected
//! folder so clients have something to chew on, then waits for the
//! client's `DONE` line and completes.

use crate::fake_imap::io::write_line;
use crate::fake_imap::mailbox::Mailbox;
use std::sync::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

/// Handle the IDLE command until the client sends DONE.
pub async fn handle_idle<S: AsyncRead + AsyncWrite + Unpin>(
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

    if write_line(stream, "+ idling\r\n").await.is_err() {
        return;
    }

    let exists = {
        let mb = mailbox.lock().unwrap();
        mb.get_folder(folder_name).map(|f| f.emails.len())
    };
    if let Some(exists) = exists {
        let line = format!("* {exists} EXISTS\r\n");
        if write_line(stream, &line).await.is_err() {
            return;
        }
    }

    loop {
        let mut line = String::new();
        match stream.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        if line.trim().eq_ignore_ascii_case("DONE") {
            break;
        }
    }

    let resp = format!("{tag} OK IDLE terminated\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fake_imap::mailbox::MailboxBuilder;
    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn acknowledges_pushes_and_terminates() {
        let raw = b"From: a@b\r\n\r\nx".to_vec();
        let mailbox = Mutex::new(
            MailboxBuilder::new()
                .folder("INBOX")
                .email(1, true, &raw)
                .build(),
        );
        let (mut client, server) = tokio::io::duplex(2048);

        let handler = async {
            let mut stream = BufReader::new(server);
            handle_idle("A7", &mailbox, Some("INBOX"), &mut stream).await;
        };
        let driver = async {
            let mut header = [0u8; 9];
            client.read_exact(&mut header).await.unwrap();
            assert_eq!(&header, b"+ idling\r");
            client.write_all(b"DONE\r\n").await.unwrap();
            let mut rest = Vec::new();
            client.read_to_end(&mut rest).await.unwrap();
            String::from_utf8(rest).unwrap()
        };
        let ((), output) = tokio::join!(handler, driver);

        assert!(output.contains("* 1 EXISTS"));
        assert!(output.contains("A7 OK IDLE terminated"));
    }

    #[tokio::test]
    async fn requires_a_selected_folder() {
        let mailbox = Mutex::new(MailboxBuilder::new().build());
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_idle("A8", &mailbox, None, &mut stream).await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        assert!(String::from_utf8(buf).unwrap().contains("A8 BAD"));
    }
}
