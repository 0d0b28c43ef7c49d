//! In-process fake IMAP server
//!
//! Speaks enough IMAP4rev1 to exercise the engine's full connection
//! lifecycle against real sockets and real TLS:
//!
//! ```text
//!   TCP connect
//!       |
//!   "* OK IMAP4rev1 Fake server ready"
//!       |
//!   CAPABILITY (pre-TLS: STARTTLS advertised, LOGIN disabled)
//!       |
//!   STARTTLS -> rustls handshake with an rcgen self-signed cert
//!       |
//!   CAPABILITY / AUTHENTICATE PLAIN / LOGIN
//!       |
//!   LIST, SELECT, STATUS, UID FETCH/SEARCH/STORE/COPY, APPEND,
//!   EXPUNGE, IDLE ... LOGOUT
//! ```
//!
//! Structured commands are decoded with `imap-codec`; the commands
//! that involve continuations or mode switches (AUTHENTICATE, APPEND,
//! IDLE) and the few the codec does not need to see (STARTTLS,
//! EXAMINE, STATUS, CLOSE) are parsed by hand, the same split a real
//! server's command loop has between line commands and stateful ones.

use super::handlers::{
    StoreArgs, handle_append, handle_authenticate, handle_capability, handle_expunge,
    handle_idle, handle_list, handle_login, handle_logout, handle_noop, handle_select,
    handle_status, handle_uid_copy, handle_uid_fetch, handle_uid_search, handle_uid_store,
};
use super::io::write_line;
use super::mailbox::Mailbox;
use imap_codec::CommandCodec;
use imap_codec::decode::Decoder;
use imap_codec::imap_types::command::CommandBody;
use imap_codec::imap_types::mailbox::Mailbox as ImapMailbox;
use rcgen::generate_simple_self_signed;
use rustls::pki_types::PrivatePkcs8KeyDer;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, BufReader};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// Capabilities before the TLS upgrade: clients must STARTTLS first.
pub const PRE_TLS_CAPABILITIES: &str = "IMAP4rev1 STARTTLS LOGINDISABLED";

/// Capabilities on the encrypted session.
pub const POST_TLS_CAPABILITIES: &str = "IMAP4rev1 LITERAL+ IDLE UIDPLUS SASL-IR AUTH=PLAIN";

/// A fake IMAP server on localhost with an OS-assigned port.
pub struct FakeImapServer {
    port: u16,
    /// Keeps the accept loop alive for the server's lifetime.
    _handle: tokio::task::JoinHandle<()>,
}

impl FakeImapServer {
    /// Bind to an ephemeral port, generate a self-signed certificate,
    /// and start accepting connections.
    pub async fn start(mailbox: Mailbox) -> Self {
        // Multiple tests race to install the provider; losing the race
        // is fine.
        let _ = rustls::crypto::ring::default_provider().install_default();

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind to ephemeral port");
        let port = listener.local_addr().unwrap().port();

        let cert = generate_simple_self_signed(vec!["127.0.0.1".to_string()])
            .expect("generate self-signed cert");
        let cert_der = cert.cert.der().clone();
        let key_der = PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der());

        let tls_config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert_der], key_der.into())
            .expect("build server TLS config");

        let acceptor = TlsAcceptor::from(Arc::new(tls_config));
        let mailbox = Arc::new(Mutex::new(mailbox));

        let handle = tokio::spawn(async move {
            loop {
                let Ok((stream, _addr)) = listener.accept().await else {
                    break;
                };
                let acceptor = acceptor.clone();
                let mailbox = mailbox.clone();
                tokio::spawn(async move {
                    handle_connection(stream, acceptor, &mailbox).await;
                });
            }
        });

        Self {
            port,
            _handle: handle,
        }
    }

    pub const fn port(&self) -> u16 {
        self.port
    }
}

/// Pre-TLS phase: greeting, CAPABILITY, STARTTLS, then the encrypted
/// session.
async fn handle_connection(
    stream: tokio::net::TcpStream,
    acceptor: TlsAcceptor,
    mailbox: &Mutex<Mailbox>,
) {
    let mut reader = BufReader::new(stream);

    if write_line(&mut reader, "* OK IMAP4rev1 Fake server ready\r\n")
        .await
        .is_err()
    {
        return;
    }

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
        let parts: Vec<&str> = line.trim().splitn(2, ' ').collect();
        if parts.len() < 2 {
            return;
        }
        let tag = parts[0];
        let command = parts[1].to_uppercase();

        match command.as_str() {
            "CAPABILITY" => {
                let caps = format!("* CAPABILITY {PRE_TLS_CAPABILITIES}\r\n");
                if write_line(&mut reader, &caps).await.is_err() {
                    return;
                }
                let resp = format!("{tag} OK CAPABILITY completed\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    return;
                }
            }
            "STARTTLS" => {
                let resp = format!("{tag} OK Begin TLS negotiation now\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    return;
                }
                break;
            }
            "LOGOUT" => {
                let _ = write_line(&mut reader, "* BYE\r\n").await;
                let resp = format!("{tag} OK LOGOUT completed\r\n");
                let _ = write_line(&mut reader, &resp).await;
                return;
            }
            _ => {
                let resp = format!("{tag} BAD Run STARTTLS first\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    return;
                }
            }
        }
    }

    let tcp = reader.into_inner();
    let Ok(tls_stream) = acceptor.accept(tcp).await else {
        return;
    };
    handle_imap_session(tls_stream, mailbox).await;
}

/// Extract the folder name from a parsed `imap_types::Mailbox`.
fn mailbox_name(mb: &ImapMailbox<'_>) -> String {
    match mb {
        ImapMailbox::Inbox => "INBOX".to_string(),
        ImapMailbox::Other(other) => {
            let bytes: &[u8] = other.as_ref();
            String::from_utf8_lossy(bytes).into_owned()
        }
    }
}

/// Pull a (possibly quoted) mailbox name out of a hand-parsed command.
fn unquote_name(raw: &str) -> String {
    let raw = raw.trim();
    raw.strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .map_or_else(|| raw.to_string(), |s| s.replace("\\\"", "\"").replace("\\\\", "\\"))
}

/// The encrypted command loop.
///
/// Continuation-based commands (AUTHENTICATE, APPEND, IDLE) and the
/// hand-parsed stateful ones run first; everything else goes through
/// `imap-codec`'s `CommandCodec` into a typed `CommandBody`, which
/// dispatches to the matching handler.
#[allow(clippy::too_many_lines)]
async fn handle_imap_session<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
    mailbox: &Mutex<Mailbox>,
) {
    let mut reader = BufReader::new(stream);
    let mut selected_folder: Option<String> = None;
    let codec = CommandCodec::default();

    loop {
        let mut line = String::new();
        match reader.read_line(&mut line).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {}
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        // Hand-parsed commands first.
        let mut split = trimmed.splitn(2, ' ');
        let raw_tag = split.next().unwrap_or("*").to_string();
        let rest = split.next().unwrap_or("").to_string();
        let upper = rest.to_uppercase();

        if upper.starts_with("AUTHENTICATE") {
            handle_authenticate(&raw_tag, &rest, POST_TLS_CAPABILITIES, &mut reader).await;
            continue;
        }
        if upper.starts_with("APPEND") {
            handle_append(&raw_tag, &rest, mailbox, &mut reader).await;
            continue;
        }
        if upper == "IDLE" {
            handle_idle(&raw_tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            continue;
        }
        if upper.starts_with("STATUS") {
            let name = unquote_name(
                rest.splitn(3, ' ').nth(1).unwrap_or(""),
            );
            let snap = mailbox.lock().unwrap().clone();
            handle_status(&raw_tag, &name, &snap, &mut reader).await;
            continue;
        }
        if upper.starts_with("EXAMINE") {
            let name = unquote_name(rest.splitn(2, ' ').nth(1).unwrap_or(""));
            let snap = mailbox.lock().unwrap().clone();
            selected_folder = handle_select(&raw_tag, &name, true, &snap, &mut reader).await;
            continue;
        }
        if upper == "CLOSE" {
            selected_folder = None;
            let resp = format!("{raw_tag} OK CLOSE completed\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        }

        // Everything else is a plain line command imap-codec can
        // decode for us.
        let line_bytes = line.as_bytes();
        let Ok((_, command)) = codec.decode(line_bytes) else {
            let resp = format!("{raw_tag} BAD Parse error\r\n");
            if write_line(&mut reader, &resp).await.is_err() {
                break;
            }
            continue;
        };

        let tag = command.tag.inner();
        let snap = mailbox.lock().unwrap().clone();

        match command.body {
            CommandBody::Capability => {
                handle_capability(tag, POST_TLS_CAPABILITIES, &mut reader).await;
            }
            CommandBody::Noop => {
                handle_noop(tag, &mut reader).await;
            }
            CommandBody::Login { .. } => {
                if !handle_login(tag, &mut reader).await {
                    break;
                }
            }
            CommandBody::List { .. } => {
                handle_list(tag, &snap, &mut reader).await;
            }
            CommandBody::Select { mailbox: mb, .. } => {
                let name = mailbox_name(&mb);
                selected_folder = handle_select(tag, &name, false, &snap, &mut reader).await;
            }
            CommandBody::Search {
                criteria,
                uid: true,
                ..
            } => {
                handle_uid_search(
                    tag,
                    criteria.as_ref(),
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Fetch {
                sequence_set,
                uid: true,
                ..
            } => {
                handle_uid_fetch(
                    tag,
                    &sequence_set,
                    &snap,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Store {
                ref sequence_set,
                uid: true,
                ref kind,
                ref response,
                ref flags,
                ..
            } => {
                let args = StoreArgs {
                    sequence_set,
                    kind,
                    response,
                    flags,
                };
                handle_uid_store(tag, &args, mailbox, selected_folder.as_deref(), &mut reader)
                    .await;
            }
            CommandBody::Copy {
                ref sequence_set,
                mailbox: ref dest_mb,
                uid: true,
                ..
            } => {
                let dest_name = mailbox_name(dest_mb);
                handle_uid_copy(
                    tag,
                    sequence_set,
                    &dest_name,
                    mailbox,
                    selected_folder.as_deref(),
                    &mut reader,
                )
                .await;
            }
            CommandBody::Expunge => {
                handle_expunge(tag, mailbox, selected_folder.as_deref(), &mut reader).await;
            }
            CommandBody::Logout => {
                handle_logout(tag, &mut reader).await;
                break;
            }
            _ => {
                let resp = format!("{tag} BAD Unknown command\r\n");
                if write_line(&mut reader, &resp).await.is_err() {
                    break;
                }
            }
        }
    }
}
