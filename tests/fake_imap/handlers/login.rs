//! LOGIN and AUTHENTICATE handlers.
//!
//! Both accept any credentials; what matters to the tests is the
//! shape of the exchange. AUTHENTICATE exercises the two SASL paths
//! the engine implements:
//!
//! - `AUTHENTICATE PLAIN <base64>` -- initial response inline
//!   (SASL-IR), answered with a single tagged OK that carries the
//!   capabilities inline.
//! - `AUTHENTICATE PLAIN` -- the server issues an empty `+` challenge
//!   and reads one base64 response line before the tagged OK.

use crate::fake_imap::io::write_line;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};

/// Handle the LOGIN command. Accepts any credentials.
pub async fn handle_login<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    stream: &mut BufReader<S>,
) -> bool {
    let resp = format!("{tag} OK LOGIN completed\r\n");
    write_line(stream, &resp).await.is_ok()
}

/// Handle `AUTHENTICATE <mech> [initial-response]`.
///
/// The tagged OK includes `[CAPABILITY ...]` so the engine can skip
/// its post-authentication CAPABILITY query.
pub async fn handle_authenticate<S: AsyncRead + AsyncWrite + Unpin>(
    tag: &str,
    command: &str,
    capabilities: &str,
    stream: &mut BufReader<S>,
) {
    let mut words = command.split_whitespace();
    let _authenticate = words.next();
    let Some(mechanism) = words.next() else {
        let resp = format!("{tag} BAD AUTHENTICATE needs a mechanism\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    };
    if !mechanism.eq_ignore_ascii_case("PLAIN") {
        let resp = format!("{tag} NO Unsupported mechanism\r\n");
        let _ = write_line(stream, &resp).await;
        return;
    }

    if words.next().is_none() {
        // No initial response: challenge for it.
        if write_line(stream, "+ \r\n").await.is_err() {
            return;
        }
        let mut response = String::new();
        if stream.read_line(&mut response).await.is_err() {
            return;
        }
        if response.trim().is_empty() {
            let resp = format!("{tag} NO Empty SASL response\r\n");
            let _ = write_line(stream, &resp).await;
            return;
        }
    }

    let resp = format!("{tag} OK [CAPABILITY {capabilities}] AUTHENTICATE completed\r\n");
    let _ = write_line(stream, &resp).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, BufReader};

    #[tokio::test]
    async fn login_responds_with_ok() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        assert!(handle_login("A0001", &mut stream).await);
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        assert_eq!(String::from_utf8(buf).unwrap(), "A0001 OK LOGIN completed\r\n");
    }

    #[tokio::test]
    async fn authenticate_with_initial_response_is_one_round() {
        let (client, server) = tokio::io::duplex(1024);
        let mut stream = BufReader::new(server);
        handle_authenticate("A2", "AUTHENTICATE PLAIN AHVzZXIAcGFzcw==", "IMAP4rev1", &mut stream)
            .await;
        drop(stream);

        let mut buf = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut BufReader::new(client), &mut buf)
            .await
            .unwrap();
        let output = String::from_utf8(buf).unwrap();
        assert!(output.starts_with("A2 OK [CAPABILITY IMAP4rev1]"));
        assert!(!output.contains('+'));
    }

    #[tokio::test]
    async fn authenticate_without_initial_response_challenges() {
        let (mut client, server) = tokio::io::duplex(1024);
        let handler = tokio::spawn(async move {
            let mut stream = BufReader::new(server);
            handle_authenticate("A3", "AUTHENTICATE PLAIN", "IMAP4rev1", &mut stream).await;
        });

        let mut buf = [0u8; 4];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut buf)
            .await
            .unwrap();
        assert_eq!(&buf, b"+ \r\n");

        client.write_all(b"AHVzZXIAcGFzcw==\r\n").await.unwrap();
        handler.await.unwrap();

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut client, &mut rest)
            .await
            .unwrap();
        assert!(String::from_utf8(rest).unwrap().starts_with("A3 OK"));
    }
}
