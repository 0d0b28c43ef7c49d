//! The IMAP protocol driver
//!
//! `ImapEngine` owns the connection and everything scoped to it: the
//! tokenizer, the tag counter, the command queue, capabilities, the
//! folder cache, and the selected-mailbox context. One command runs at
//! a time; untagged responses received while it is in flight are
//! parsed here, applied to engine/folder state, and then offered to
//! the command's registered handlers.
//!
//! The engine is single-owner: it is driven from exactly one task.
//! Every I/O operation is an await point, and every public operation
//! honours the command's cancellation token.

use crate::capability::{Capabilities, CapabilitySets};
use crate::command::{Command, CommandStatus, UntaggedResponse};
use crate::config::{ImapConfig, SecureSocketOptions};
use crate::error::{Error, Result};
use crate::fetch::read_fetch_attributes;
use crate::flag::read_flag_list;
use crate::folder::{Folder, FolderAttributes, FolderCache, FolderId};
use crate::format::{CommandArg, Part};
use crate::listing::{
    ListResponse, NamespaceLists, read_list_response, read_namespace_response,
    read_status_response,
};
use crate::logger::{EngineObserver, ProtocolLogger, TracingLogger};
use crate::quirks::QuirksMode;
use crate::response::{
    Response, ResponseCode, ResponseKind, read_response_code, read_uid_set,
};
use crate::sasl::{SaslMechanism, decode_challenge, encode_response};
use crate::stream::{ByteStream, TlsValidation, Transport, handshake_tls};
use crate::thread::read_thread_response;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use crate::uidset::{UniqueId, UniqueIdSet};
use crate::utf7;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Connection lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum EngineState {
    Disconnected,
    Connecting,
    Connected,
    Authenticated,
    Selected,
    Idle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProtocolVersion {
    #[default]
    Unknown,
    Imap4,
    Imap4Rev1,
}

/// Rotated across connects so interleaved connection logs stay
/// distinguishable.
static TAG_PREFIX: AtomicU8 = AtomicU8::new(0);

fn next_tag_prefix() -> char {
    let n = TAG_PREFIX.fetch_add(1, Ordering::Relaxed) % 26;
    char::from(b'A' + n)
}

/// Chunk size for literal bodies; also the upload progress grain.
const LITERAL_CHUNK: usize = 4096;

pub struct ImapEngine {
    tokenizer: Option<Tokenizer>,
    state: EngineState,
    tag_prefix: char,
    next_tag: u32,
    driving: bool,
    capability_sets: CapabilitySets,
    capabilities_version: u32,
    protocol_version: ProtocolVersion,
    qresync_enabled: bool,
    utf8_enabled: bool,
    namespaces: NamespaceLists,
    selected: Option<FolderId>,
    folders: FolderCache,
    quirks: QuirksMode,
    queue: VecDeque<Command>,
    finished: Vec<Command>,
    /// When disabled, EXISTS/RECENT noise for the selected folder is
    /// not applied while running commands against other folders.
    /// EXPUNGE is always applied: sequence numbers must stay aligned.
    pub notify_selected_new_expunge: bool,
    logger: Arc<dyn ProtocolLogger>,
    observer: Option<Arc<dyn EngineObserver>>,
    host: String,
    greeting_text: String,
    read_timeout: Option<std::time::Duration>,
    write_timeout: Option<std::time::Duration>,
}

impl ImapEngine {
    /// Connect to `config.host`, negotiate TLS per the security mode,
    /// and read the server greeting.
    pub async fn connect(
        config: &ImapConfig,
        validation: TlsValidation,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let (port, security) = config.resolve()?;
        let host = config.host.clone();
        let logger: Arc<dyn ProtocolLogger> = Arc::new(TracingLogger);

        let tcp = tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            stream = TcpStream::connect((host.as_str(), port)) => stream?,
        };
        logger.log_connect(&host, port);

        let transport: Box<dyn Transport> = if security == SecureSocketOptions::SslOnConnect {
            handshake_tls(Box::new(tcp), &host, &validation).await?
        } else {
            Box::new(tcp)
        };

        let mut stream = ByteStream::new(transport, Arc::clone(&logger));
        stream.set_read_timeout(config.read_timeout);
        stream.set_write_timeout(config.write_timeout);

        let mut engine = Self::with_tokenizer(Tokenizer::new(stream), host, logger);
        engine.read_timeout = config.read_timeout;
        engine.write_timeout = config.write_timeout;
        engine.state = EngineState::Connecting;
        engine.read_greeting().await?;

        if engine.capability_sets.caps.is_empty() {
            engine.query_capabilities(&cancel).await?;
        }

        let wants_tls = match security {
            SecureSocketOptions::StartTls => {
                if !engine.capabilities().contains(Capabilities::STARTTLS) {
                    engine.teardown();
                    return Err(Error::NotSupported("STARTTLS"));
                }
                true
            }
            SecureSocketOptions::StartTlsWhenAvailable => {
                engine.capabilities().contains(Capabilities::STARTTLS)
            }
            _ => false,
        };
        if wants_tls {
            engine.starttls(&validation, &cancel).await?;
        }
        Ok(engine)
    }

    /// Build an engine over an already-established transport and read
    /// the greeting. No TLS negotiation is attempted; this is the
    /// entry point for proxied transports and in-process test pipes.
    pub async fn from_transport(
        transport: Box<dyn Transport>,
        host: impl Into<String>,
    ) -> Result<Self> {
        let logger: Arc<dyn ProtocolLogger> = Arc::new(TracingLogger);
        let stream = ByteStream::new(transport, Arc::clone(&logger));
        let mut engine = Self::with_tokenizer(Tokenizer::new(stream), host.into(), logger);
        engine.state = EngineState::Connecting;
        engine.read_greeting().await?;
        Ok(engine)
    }

    fn with_tokenizer(tokenizer: Tokenizer, host: String, logger: Arc<dyn ProtocolLogger>) -> Self {
        Self {
            tokenizer: Some(tokenizer),
            state: EngineState::Disconnected,
            tag_prefix: next_tag_prefix(),
            next_tag: 0,
            driving: false,
            capability_sets: CapabilitySets::default(),
            capabilities_version: 0,
            protocol_version: ProtocolVersion::default(),
            qresync_enabled: false,
            utf8_enabled: false,
            namespaces: NamespaceLists::default(),
            selected: None,
            folders: FolderCache::new(),
            quirks: QuirksMode::None,
            queue: VecDeque::new(),
            finished: Vec::new(),
            notify_selected_new_expunge: true,
            logger,
            observer: None,
            host,
            greeting_text: String::new(),
            read_timeout: None,
            write_timeout: None,
        }
    }

    // ── accessors ──────────────────────────────────────────────────

    #[must_use]
    pub const fn state(&self) -> EngineState {
        self.state
    }

    #[must_use]
    pub const fn capabilities(&self) -> Capabilities {
        self.capability_sets.caps
    }

    #[must_use]
    pub const fn capability_sets(&self) -> &CapabilitySets {
        &self.capability_sets
    }

    /// Bumped by one on every CAPABILITY response the server sends.
    #[must_use]
    pub const fn capabilities_version(&self) -> u32 {
        self.capabilities_version
    }

    #[must_use]
    pub const fn protocol_version(&self) -> ProtocolVersion {
        self.protocol_version
    }

    #[must_use]
    pub const fn quirks(&self) -> QuirksMode {
        self.quirks
    }

    #[must_use]
    pub const fn qresync_enabled(&self) -> bool {
        self.qresync_enabled
    }

    #[must_use]
    pub const fn utf8_enabled(&self) -> bool {
        self.utf8_enabled
    }

    #[must_use]
    pub const fn namespaces(&self) -> &NamespaceLists {
        &self.namespaces
    }

    #[must_use]
    pub const fn selected(&self) -> Option<FolderId> {
        self.selected
    }

    #[must_use]
    pub fn greeting(&self) -> &str {
        &self.greeting_text
    }

    /// Read-only view of the folder cache.
    #[must_use]
    pub const fn folder_cache(&self) -> &FolderCache {
        &self.folders
    }

    /// Copy-out lookup by encoded name.
    #[must_use]
    pub fn folder(&self, encoded_name: &str) -> Option<Folder> {
        self.folders
            .lookup(encoded_name)
            .map(|id| self.folders.get(id).clone())
    }

    pub fn set_observer(&mut self, observer: Arc<dyn EngineObserver>) {
        self.observer = Some(observer);
    }

    /// Commands completed while driving towards a later command.
    pub fn take_finished(&mut self) -> Vec<Command> {
        std::mem::take(&mut self.finished)
    }

    /// Build a command with this engine's formatting state.
    pub fn command(&self, template: &str, args: Vec<CommandArg>) -> Result<Command> {
        Command::new(template, args, self.utf8_enabled)
    }

    // ── queue and driver ───────────────────────────────────────────

    fn allocate_tag(&mut self, cmd: &mut Command) -> u32 {
        self.next_tag += 1;
        cmd.tag = self.next_tag;
        cmd.tag_text = format!("{}{:08}", self.tag_prefix, self.next_tag);
        self.next_tag
    }

    /// Append a command to the FIFO queue, assigning its tag.
    pub fn enqueue(&mut self, mut cmd: Command) -> Result<u32> {
        if self.state < EngineState::Connected {
            return Err(Error::InvalidState("engine is not connected"));
        }
        if self.state == EngineState::Idle {
            return Err(Error::InvalidState("cannot queue commands while IDLE"));
        }
        let tag = self.allocate_tag(&mut cmd);
        self.queue.push_back(cmd);
        Ok(tag)
    }

    /// Enqueue `cmd` and drive the queue until its tagged response
    /// arrives. Earlier queued commands complete first (FIFO) and are
    /// retrievable via `take_finished`.
    pub async fn run(&mut self, cmd: Command) -> Result<Command> {
        let tag = self.enqueue(cmd)?;
        self.drive_until(tag).await
    }

    /// Drive every queued command to completion, in order.
    pub async fn run_queued(&mut self) -> Result<Vec<Command>> {
        let Some(last) = self.queue.back().map(|c| c.tag) else {
            return Ok(Vec::new());
        };
        let final_cmd = self.drive_until(last).await?;
        let mut all = self.take_finished();
        all.push(final_cmd);
        Ok(all)
    }

    async fn drive_until(&mut self, tag: u32) -> Result<Command> {
        if self.driving {
            return Err(Error::InvalidState(
                "engine is busy driving another command",
            ));
        }
        self.driving = true;
        let result = self.drive_until_inner(tag).await;
        self.driving = false;
        if let Err(e) = &result {
            if e.is_fatal() {
                self.fail_pending();
                self.teardown();
            }
        }
        result
    }

    async fn drive_until_inner(&mut self, tag: u32) -> Result<Command> {
        loop {
            let Some(mut cmd) = self.queue.pop_front() else {
                return Err(Error::InvalidState("command vanished from the queue"));
            };
            if cmd.cancellation.is_cancelled() {
                if cmd.tag == tag {
                    return Err(Error::Cancelled);
                }
                continue;
            }
            self.drive_one(&mut cmd).await?;
            if cmd.tag == tag {
                return Ok(cmd);
            }
            self.finished.push(cmd);
        }
    }

    /// Drop queued commands after a fatal error; entries whose own
    /// cancellation fired are silently removed either way.
    fn fail_pending(&mut self) {
        for cmd in self.queue.drain(..) {
            debug!("dropping pending command {}", cmd.name());
        }
    }

    fn teardown(&mut self) {
        self.tokenizer = None;
        self.selected = None;
        self.state = EngineState::Disconnected;
    }

    /// Run one command to completion: write its parts (synchronising
    /// on `+` for plain literals), then consume responses until the
    /// tagged status line.
    async fn drive_one(&mut self, cmd: &mut Command) -> Result<()> {
        cmd.advance_status(CommandStatus::Active);
        let parts = std::mem::take(&mut cmd.parts);

        for part in parts {
            if cmd.cancellation.is_cancelled() {
                // Cancelled mid-write: the stream is not resumable.
                return Err(Error::Cancelled);
            }
            match part {
                Part::Text(text) => {
                    let Some(tok) = self.tokenizer.as_mut() else {
                        return Err(Error::InvalidState("engine is not connected"));
                    };
                    tok.stream_mut().write(&text).await?;
                }
                Part::Literal(literal) => {
                    let nonsync = self.literal_is_nonsync(literal.len());
                    let header = if nonsync {
                        format!("{{{}+}}\r\n", literal.len())
                    } else {
                        format!("{{{}}}\r\n", literal.len())
                    };
                    {
                        let Some(tok) = self.tokenizer.as_mut() else {
                            return Err(Error::InvalidState("engine is not connected"));
                        };
                        tok.stream_mut().write(header.as_bytes()).await?;
                        tok.stream_mut().flush().await?;
                    }
                    if !nonsync && !self.await_continuation(cmd).await? {
                        // The server rejected the command before the
                        // literal; the tagged response is already in.
                        return Ok(());
                    }
                    let total = literal.len() as u64;
                    let mut sent: u64 = 0;
                    for chunk in literal.bytes.chunks(LITERAL_CHUNK) {
                        let Some(tok) = self.tokenizer.as_mut() else {
                            return Err(Error::InvalidState("engine is not connected"));
                        };
                        tok.stream_mut().write(chunk).await?;
                        sent += chunk.len() as u64;
                        if let Some(progress) = &literal.progress {
                            progress.report(sent, total);
                        }
                    }
                }
            }
        }
        {
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            tok.stream_mut().flush().await?;
        }

        self.read_until_tagged(cmd).await
    }

    const fn literal_is_nonsync(&self, len: usize) -> bool {
        let caps = self.capability_sets.caps;
        caps.contains(Capabilities::LITERAL_PLUS)
            || (caps.contains(Capabilities::LITERAL_MINUS) && len <= 4096)
    }

    /// Wait for the `+` that authorises a synchronising literal body.
    ///
    /// Returns `false` if the command's tagged response arrived
    /// instead (the server refused the literal).
    async fn await_continuation(&mut self, cmd: &mut Command) -> Result<bool> {
        loop {
            if cmd.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            match tok.read_token(Specials::Default).await? {
                ImapToken::Plus => {
                    tok.read_text_to_eoln();
                    return Ok(true);
                }
                ImapToken::Asterisk => {
                    self.dispatch_untagged(cmd).await?;
                    self.check_bye(cmd)?;
                }
                ImapToken::Atom(a) if a.as_str() == cmd.tag_text => {
                    self.finish_tagged(cmd).await?;
                    return Ok(false);
                }
                ImapToken::Eoln => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} while waiting for continuation",
                        other.describe()
                    )));
                }
            }
        }
    }

    /// Response-read mode: consume lines until this command's tagged
    /// status arrives.
    async fn read_until_tagged(&mut self, cmd: &mut Command) -> Result<()> {
        loop {
            if cmd.cancellation.is_cancelled() {
                return Err(Error::Cancelled);
            }
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            match tok.read_token(Specials::Default).await? {
                ImapToken::Asterisk => {
                    self.dispatch_untagged(cmd).await?;
                    self.check_bye(cmd)?;
                }
                ImapToken::Plus => {
                    self.handle_continuation(cmd).await?;
                }
                ImapToken::Atom(a) if a.as_str() == cmd.tag_text => {
                    return self.finish_tagged(cmd).await;
                }
                ImapToken::Atom(stale) => {
                    // A tag from a previous session or a server bug;
                    // skip the line rather than kill the connection.
                    warn!("skipping response with unexpected tag {}", stale.as_str());
                    self.tokenizer
                        .as_mut()
                        .expect("tokenizer present")
                        .skip_to_eoln()
                        .await?;
                }
                ImapToken::Eoln => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} at start of response line",
                        other.describe()
                    )));
                }
            }
        }
    }

    /// A BYE outside LOGOUT is fatal to the connection.
    fn check_bye(&self, cmd: &Command) -> Result<()> {
        if cmd.bye && !cmd.logout {
            let text = cmd
                .response
                .as_ref()
                .filter(|r| r.kind == ResponseKind::Bye)
                .map_or_else(|| "server closed the session".to_string(), |r| r.text.clone());
            return Err(Error::Protocol(text));
        }
        Ok(())
    }

    /// `+ <data>` during response-read: hand the payload to the
    /// command's continuation handler and write its reply.
    async fn handle_continuation(&mut self, cmd: &mut Command) -> Result<()> {
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        let challenge = tok.read_text_to_eoln();
        let Some(mut handler) = cmd.continuation.take() else {
            return Err(Error::Protocol(
                "unexpected continuation request from server".into(),
            ));
        };
        let reply = handler(cmd, challenge.trim().as_bytes());
        cmd.continuation = Some(handler);
        let reply = reply?;
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        tok.stream_mut().write(&reply).await?;
        tok.stream_mut().write(b"\r\n").await?;
        tok.stream_mut().flush().await?;
        Ok(())
    }

    /// Parse `<tag> OK|NO|BAD [code] text` and complete the command.
    async fn finish_tagged(&mut self, cmd: &mut Command) -> Result<()> {
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        let status = tok.read_token(Specials::Default).await?;
        let Some(kind) = status.text().and_then(ResponseKind::from_atom) else {
            return Err(Error::Protocol(format!(
                "expected tagged status, got {}",
                status.describe()
            )));
        };
        let (codes, text) = self.read_state_line().await?;
        self.apply_codes(&codes, cmd.folder.or(self.selected));

        let mut response = Response::new(kind);
        response.codes = std::mem::take(&mut cmd.resp_codes);
        response.codes.extend(codes);
        response.text = text;
        self.surface_alert(&response.codes, &response.text);

        cmd.response = Some(response);
        cmd.advance_status(CommandStatus::Complete);
        Ok(())
    }

    /// Optional `[code]`s plus the human text of a status line.
    async fn read_state_line(&mut self) -> Result<(Vec<ResponseCode>, String)> {
        let mut codes = Vec::new();
        loop {
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            // Probe the raw line: a peeked token would poison the
            // rest-of-line text read below.
            if !tok.at_response_code().await? {
                break;
            }
            tok.read_token(Specials::Default).await?;
            let code = read_response_code(
                self.tokenizer.as_mut().expect("tokenizer present"),
                &mut self.capability_sets,
            )
            .await?;
            if code == ResponseCode::Capability {
                self.note_capabilities_updated();
            }
            codes.push(code);
        }
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        let text = tok.read_text_to_eoln().trim().to_string();
        Ok((codes, text))
    }

    fn note_capabilities_updated(&mut self) {
        self.capabilities_version += 1;
        let caps = self.capability_sets.caps;
        if caps.contains(Capabilities::IMAP4REV1) {
            self.protocol_version = ProtocolVersion::Imap4Rev1;
        } else if caps.contains(Capabilities::IMAP4) {
            self.protocol_version = ProtocolVersion::Imap4;
        }
    }

    fn surface_alert(&self, codes: &[ResponseCode], text: &str) {
        if codes.iter().any(|c| *c == ResponseCode::Alert) {
            if let Some(observer) = &self.observer {
                observer.alert(text);
            }
        }
    }

    /// Apply folder-scoped response codes to the command's folder (or
    /// the selected one).
    fn apply_codes(&mut self, codes: &[ResponseCode], folder: Option<FolderId>) {
        let Some(id) = folder else { return };
        for code in codes {
            let folder = self.folders.get_mut(id);
            match code {
                ResponseCode::UidValidity(v) => folder.uid_validity = *v,
                ResponseCode::UidNext(uid) => {
                    // UIDNEXT 0 is an empty-mailbox artifact.
                    folder.uid_next = if uid.id == 0 {
                        None
                    } else {
                        Some(UniqueId::new(folder.uid_validity, uid.id))
                    };
                }
                ResponseCode::Unseen(n) => folder.unread = *n,
                ResponseCode::HighestModSeq(n) => folder.highest_mod_seq = *n,
                ResponseCode::NoModSeq => folder.highest_mod_seq = 0,
                ResponseCode::PermanentFlags(flags) => folder.permanent_flags = flags.clone(),
                ResponseCode::MailboxId(mid) => folder.id = Some(mid.clone()),
                _ => {}
            }
        }
    }

    // ── untagged dispatch ──────────────────────────────────────────

    async fn dispatch_untagged(&mut self, cmd: &mut Command) -> Result<()> {
        let response = self.read_untagged().await?;

        match &response {
            UntaggedResponse::Capabilities(_) => self.note_capabilities_updated(),
            UntaggedResponse::State { codes, text, kind } => {
                self.apply_codes(codes, cmd.folder.or(self.selected));
                self.surface_alert(codes, text);
                cmd.resp_codes.extend(codes.iter().cloned());
                if *kind == ResponseKind::Bye {
                    // One BYE per session; Yandex repeats it during
                    // LOGOUT and only that repeat is tolerated.
                    if cmd.bye && !self.quirks.repeats_bye() {
                        return Err(Error::Protocol(
                            "server repeated the untagged BYE".into(),
                        ));
                    }
                    cmd.bye = true;
                    let mut bye_response = Response::new(ResponseKind::Bye);
                    bye_response.text = text.clone();
                    bye_response.codes = codes.clone();
                    if cmd.response.is_none() {
                        cmd.response = Some(bye_response);
                    }
                }
            }
            other => self.apply_untagged(other, cmd),
        }

        let atom = response.routing_atom().to_string();
        if !atom.is_empty() {
            if let Some(mut handler) = cmd.take_handler(&atom) {
                let result = handler(cmd, &response);
                cmd.put_handler(atom, handler);
                result?;
            }
        }
        Ok(())
    }

    /// Parse one untagged line (the leading `*` is already consumed).
    async fn read_untagged(&mut self) -> Result<UntaggedResponse> {
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        let first = tok.read_token(Specials::Default).await?;

        // Numeric responses: EXISTS / RECENT / EXPUNGE / FETCH.
        if let ImapToken::Atom(a) = &first {
            if let Ok(number) = a.as_str().parse::<u32>() {
                let second = tok.read_token(Specials::Default).await?;
                let Some(name) = second.text().map(str::to_ascii_uppercase) else {
                    return Err(Error::Protocol(format!(
                        "unexpected {} after message number",
                        second.describe()
                    )));
                };
                let response = match name.as_str() {
                    "EXISTS" => UntaggedResponse::Exists(number),
                    "RECENT" => UntaggedResponse::Recent(number),
                    "EXPUNGE" => UntaggedResponse::Expunge(number),
                    "FETCH" => UntaggedResponse::Fetch(
                        read_fetch_attributes(tok, number, self.quirks).await?,
                    ),
                    other => {
                        debug!("skipping unknown numeric response {other}");
                        tok.skip_to_eoln().await?;
                        return Ok(UntaggedResponse::Unknown(other.to_string()));
                    }
                };
                tok.skip_to_eoln().await?;
                return Ok(response);
            }
        }

        let Some(atom) = first.text().map(str::to_ascii_uppercase) else {
            return Err(Error::Protocol(format!(
                "unexpected {} at start of untagged response",
                first.describe()
            )));
        };

        if let Some(kind) = ResponseKind::from_atom(&atom) {
            let (codes, text) = self.read_state_line().await?;
            return Ok(UntaggedResponse::State { kind, codes, text });
        }

        let response = match atom.as_str() {
            "CAPABILITY" => {
                crate::capability::read_capabilities(tok, &mut self.capability_sets).await?;
                UntaggedResponse::Capabilities(self.capability_sets.clone())
            }
            "FLAGS" => UntaggedResponse::Flags(read_flag_list(tok).await?),
            "LIST" | "XLIST" => {
                UntaggedResponse::List(read_list_response(tok, self.quirks).await?)
            }
            "LSUB" => UntaggedResponse::Lsub(read_list_response(tok, self.quirks).await?),
            "STATUS" => UntaggedResponse::Status(read_status_response(tok).await?),
            "NAMESPACE" => UntaggedResponse::Namespace(read_namespace_response(tok).await?),
            "SEARCH" | "SORT" => {
                let mut ids = Vec::new();
                loop {
                    match tok.read_token(Specials::Default).await? {
                        ImapToken::Eoln => {
                            tok.unget_token(ImapToken::Eoln);
                            break;
                        }
                        ImapToken::Atom(a) => {
                            if let Ok(n) = a.as_str().parse() {
                                ids.push(n);
                            }
                        }
                        // CONDSTORE appends "(MODSEQ n)"; skip it.
                        ImapToken::OpenParen => loop {
                            match tok.read_token(Specials::Default).await? {
                                ImapToken::CloseParen => break,
                                ImapToken::Eoln => {
                                    return Err(Error::Protocol(
                                        "unterminated SEARCH modifier".into(),
                                    ));
                                }
                                _ => {}
                            }
                        },
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected {} in SEARCH response",
                                other.describe()
                            )));
                        }
                    }
                }
                if atom == "SORT" {
                    UntaggedResponse::Sort(ids)
                } else {
                    UntaggedResponse::Search(ids)
                }
            }
            "THREAD" => UntaggedResponse::Thread(read_thread_response(tok).await?),
            "ENABLED" => {
                let mut enabled = Vec::new();
                loop {
                    match tok.read_token(Specials::Default).await? {
                        ImapToken::Eoln => {
                            tok.unget_token(ImapToken::Eoln);
                            break;
                        }
                        ImapToken::Atom(a) => enabled.push(a.as_str().to_ascii_uppercase()),
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected {} in ENABLED response",
                                other.describe()
                            )));
                        }
                    }
                }
                UntaggedResponse::Enabled(enabled)
            }
            "ID" => UntaggedResponse::Id(read_id_params(tok).await?),
            "METADATA" => {
                let mailbox_bytes = tok.read_astring(Specials::Atom).await?;
                let mailbox = String::from_utf8_lossy(&mailbox_bytes).into_owned();
                let mut entries = Vec::new();
                match tok.peek_token(Specials::Default).await? {
                    ImapToken::OpenParen => {
                        tok.read_token(Specials::Default).await?;
                        loop {
                            match tok.read_token(Specials::Default).await? {
                                ImapToken::CloseParen => break,
                                ImapToken::Atom(entry) | ImapToken::QString(entry) => {
                                    let name = entry.as_str().to_string();
                                    let value = tok.read_nstring().await?;
                                    entries.push((name, value));
                                }
                                other => {
                                    return Err(Error::Protocol(format!(
                                        "unexpected {} in METADATA entries",
                                        other.describe()
                                    )));
                                }
                            }
                        }
                    }
                    _ => loop {
                        // Unsolicited change notification: bare entry
                        // names, no values.
                        match tok.read_token(Specials::Default).await? {
                            ImapToken::Eoln => {
                                tok.unget_token(ImapToken::Eoln);
                                break;
                            }
                            ImapToken::Atom(entry) | ImapToken::QString(entry) => {
                                entries.push((entry.as_str().to_string(), None));
                            }
                            other => {
                                return Err(Error::Protocol(format!(
                                    "unexpected {} in METADATA notification",
                                    other.describe()
                                )));
                            }
                        }
                    },
                }
                UntaggedResponse::Metadata { mailbox, entries }
            }
            "VANISHED" => {
                let mut earlier = false;
                if tok.peek_token(Specials::Default).await? == ImapToken::OpenParen {
                    tok.read_token(Specials::Default).await?;
                    let marker = tok.read_token(Specials::Default).await?;
                    earlier = marker.is_atom("EARLIER");
                    tok.expect(&ImapToken::CloseParen).await?;
                }
                let uids = read_uid_set(tok).await?;
                UntaggedResponse::Vanished { earlier, uids }
            }
            other => {
                debug!("skipping unknown untagged response {other}");
                tok.skip_to_eoln().await?;
                return Ok(UntaggedResponse::Unknown(other.to_string()));
            }
        };

        self.tokenizer
            .as_mut()
            .expect("tokenizer present")
            .skip_to_eoln()
            .await?;
        Ok(response)
    }

    /// Default application of untagged data to engine and folder
    /// state. Runs before any per-command handler sees the response.
    fn apply_untagged(&mut self, response: &UntaggedResponse, cmd: &mut Command) {
        let target = cmd.folder.or(self.selected);
        match response {
            UntaggedResponse::Exists(n) => {
                if let Some(id) = target {
                    let skip = !self.notify_selected_new_expunge
                        && cmd.folder.is_none()
                        && self.selected.is_some();
                    if !skip {
                        self.folders.get_mut(id).exists = *n;
                    }
                }
            }
            UntaggedResponse::Recent(n) => {
                if let Some(id) = target {
                    self.folders.get_mut(id).recent = *n;
                }
            }
            UntaggedResponse::Expunge(_) => {
                if let Some(id) = target {
                    let folder = self.folders.get_mut(id);
                    folder.exists = folder.exists.saturating_sub(1);
                }
            }
            UntaggedResponse::Vanished { earlier, uids } => {
                if !earlier {
                    if let Some(id) = target {
                        let folder = self.folders.get_mut(id);
                        let count = u32::try_from(uids.count()).unwrap_or(u32::MAX);
                        folder.exists = folder.exists.saturating_sub(count);
                    }
                }
            }
            UntaggedResponse::Flags(flags) => {
                if let Some(id) = target {
                    self.folders.get_mut(id).accepted_flags = flags.clone();
                }
            }
            UntaggedResponse::Fetch(attrs) => {
                if let Some(id) = target {
                    if let Some(mod_seq) = attrs.mod_seq {
                        let folder = self.folders.get_mut(id);
                        folder.highest_mod_seq = folder.highest_mod_seq.max(mod_seq);
                    }
                }
            }
            UntaggedResponse::List(list) => {
                let unsolicited = !cmd.has_handler("LIST");
                self.apply_list(list, cmd.list_returns_subscribed, false, unsolicited);
            }
            UntaggedResponse::Lsub(list) => {
                self.apply_list(list, false, true, false);
            }
            UntaggedResponse::Status(status) => self.apply_status(status),
            UntaggedResponse::Namespace(lists) => self.apply_namespaces(lists.clone()),
            UntaggedResponse::Enabled(atoms) => {
                for atom in atoms {
                    match atom.as_str() {
                        "QRESYNC" => self.qresync_enabled = true,
                        "UTF8=ACCEPT" => self.utf8_enabled = true,
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    /// LIST/LSUB merge rules into the folder cache.
    fn apply_list(
        &mut self,
        list: &ListResponse,
        returns_subscribed: bool,
        is_lsub: bool,
        unsolicited: bool,
    ) {
        if let Some(delim) = list.delimiter {
            self.folders.observe_separator(delim);
        }

        // OLDNAME: the mailbox was renamed; re-key the cached entry.
        if let Some(old_name) = &list.old_name {
            if let Some(id) = self.folders.lookup(old_name) {
                self.folders.rename(id, &list.encoded_name, self.utf8_enabled);
            }
        }

        let created = self.folders.lookup(&list.encoded_name).is_none();
        let id = self
            .folders
            .get_or_create(&list.encoded_name, self.utf8_enabled);
        let folder = self.folders.get_mut(id);
        if list.delimiter.is_some() {
            folder.directory_separator = list.delimiter;
        }

        let old = folder.attributes;
        let mut attrs = list.attributes;
        if folder.is_inbox() {
            attrs |= FolderAttributes::INBOX;
        }
        if is_lsub {
            // LSUB's whole point is subscription state.
            attrs |= old | FolderAttributes::SUBSCRIBED;
        } else {
            // LIST merges special-use flags with what we already know;
            // \Subscribed is only trusted when the server was asked
            // for it (RETURN (SUBSCRIBED)).
            attrs |= old & FolderAttributes::special_use();
            if !returns_subscribed {
                attrs |= old & FolderAttributes::SUBSCRIBED;
            }
        }
        folder.attributes = attrs;

        if attrs.contains(FolderAttributes::NON_EXISTENT) {
            folder.clear_counters();
        }

        if created && unsolicited {
            if let Some(observer) = &self.observer {
                observer.folder_created(&list.encoded_name);
            }
        }
    }

    fn apply_status(&mut self, status: &crate::listing::StatusResponse) {
        let id = self
            .folders
            .get_or_create(&status.encoded_name, self.utf8_enabled);
        let folder = self.folders.get_mut(id);
        if let Some(n) = status.messages {
            folder.exists = n;
        }
        if let Some(n) = status.recent {
            folder.recent = n;
        }
        if let Some(n) = status.unseen {
            folder.unread = n;
        }
        if let Some(v) = status.uid_validity {
            folder.uid_validity = v;
        }
        if let Some(n) = status.uid_next {
            folder.uid_next = if n == 0 {
                None
            } else {
                Some(UniqueId::new(folder.uid_validity, n))
            };
        }
        if let Some(n) = status.highest_mod_seq {
            folder.highest_mod_seq = n;
        }
        if let Some(n) = status.append_limit {
            folder.append_limit = Some(n);
        }
        if let Some(n) = status.size {
            folder.size = Some(n);
        }
        if let Some(mid) = &status.mailbox_id {
            folder.id = Some(mid.clone());
        }
    }

    fn apply_namespaces(&mut self, lists: NamespaceLists) {
        for entry in lists
            .personal
            .iter()
            .chain(lists.other.iter())
            .chain(lists.shared.iter())
        {
            if let Some(delim) = entry.delimiter {
                self.folders.observe_separator(delim);
            }
            if !entry.prefix.is_empty() {
                let id = self.folders.get_or_create(&entry.prefix, self.utf8_enabled);
                let folder = self.folders.get_mut(id);
                folder.is_namespace = true;
                folder.directory_separator = entry.delimiter;
            }
        }
        self.namespaces = lists;
    }

    // ── connection lifecycle ───────────────────────────────────────

    /// `* OK|PREAUTH|BYE [code] text` at connection start.
    async fn read_greeting(&mut self) -> Result<()> {
        let Some(tok) = self.tokenizer.as_mut() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        tok.expect(&ImapToken::Asterisk).await?;
        let status = tok.read_token(Specials::Default).await?;
        let Some(word) = status.text().map(str::to_ascii_uppercase) else {
            return Err(Error::Protocol(format!(
                "malformed greeting: {}",
                status.describe()
            )));
        };
        let (codes, text) = self.read_state_line().await?;
        self.greeting_text = text.clone();
        self.quirks = QuirksMode::from_greeting(&text);

        match word.as_str() {
            "OK" => self.state = EngineState::Connected,
            "PREAUTH" => self.state = EngineState::Authenticated,
            "BYE" => {
                self.teardown();
                return Err(Error::Protocol(format!("server refused connection: {text}")));
            }
            other => {
                self.teardown();
                return Err(Error::Protocol(format!("unexpected greeting {other}")));
            }
        }
        self.surface_alert(&codes, &self.greeting_text);
        debug!(quirks = ?self.quirks, "greeting processed");
        Ok(())
    }

    async fn query_capabilities(&mut self, cancel: &CancellationToken) -> Result<()> {
        let mut cmd = self.command("CAPABILITY\r\n", vec![])?;
        cmd.set_cancellation(cancel.clone());
        let cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("CAPABILITY produced no response".into()))?
            .require_ok("CAPABILITY")?;
        Ok(())
    }

    /// Upgrade the connection with STARTTLS and re-establish
    /// capabilities. Only STARTTLS itself survives the upgrade.
    async fn starttls(
        &mut self,
        validation: &TlsValidation,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut cmd = self.command("STARTTLS\r\n", vec![])?;
        cmd.set_cancellation(cancel.clone());
        let cmd = self.run(cmd).await?;
        let response = cmd
            .response
            .clone()
            .ok_or_else(|| Error::Protocol("STARTTLS produced no response".into()))?
            .require_ok("STARTTLS")?;

        let Some(tokenizer) = self.tokenizer.take() else {
            return Err(Error::InvalidState("engine is not connected"));
        };
        let host = self.host.clone();
        let transport = tokenizer.into_stream().into_transport();
        let upgraded = handshake_tls(transport, &host, validation).await?;
        let mut stream = ByteStream::new(upgraded, Arc::clone(&self.logger));
        stream.set_read_timeout(self.read_timeout);
        stream.set_write_timeout(self.write_timeout);
        self.tokenizer = Some(Tokenizer::new(stream));

        // The old capability set is void now; only STARTTLS is assumed
        // to survive. Re-query unless the OK already carried one.
        if !response.codes.contains(&ResponseCode::Capability) {
            self.query_capabilities(cancel).await?;
        }
        Ok(())
    }

    /// Best-effort LOGOUT, then tear the transport down.
    pub async fn disconnect(&mut self, quit: bool) {
        if quit && self.state >= EngineState::Connected && self.tokenizer.is_some() {
            match self.command("LOGOUT\r\n", vec![]) {
                Ok(cmd) => {
                    if let Err(e) = self.run(cmd).await {
                        debug!("LOGOUT failed during disconnect: {e}");
                    }
                }
                Err(e) => debug!("could not build LOGOUT: {e}"),
            }
        }
        self.fail_pending();
        self.teardown();
    }

    // ── authentication ─────────────────────────────────────────────

    /// Try each SASL mechanism the server advertises, most preferred
    /// first, falling back to LOGIN unless the server disabled it.
    pub async fn authenticate(
        &mut self,
        mechanisms: Vec<Box<dyn SaslMechanism>>,
        credentials: (&str, &str),
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.state >= EngineState::Authenticated {
            return Err(Error::InvalidState("session is already authenticated"));
        }
        if self.state < EngineState::Connected {
            return Err(Error::InvalidState("engine is not connected"));
        }

        let mut last_refusal = None;
        for mechanism in mechanisms {
            let name = mechanism.mechanism_name().to_ascii_uppercase();
            if !self.capability_sets.auth_mechanisms.contains(&name) {
                continue;
            }
            let sasl_ir = self.capabilities().contains(Capabilities::SASL_IR)
                && mechanism.supports_initial_response();
            let mechanism = Arc::new(Mutex::new(mechanism));

            let mut cmd = if sasl_ir {
                let initial = mechanism
                    .lock()
                    .expect("mechanism lock")
                    .respond(b"")?;
                let encoded = encode_response(&initial);
                let ir = if encoded.is_empty() {
                    // RFC 4959: a zero-length initial response is "=".
                    "=".to_string()
                } else {
                    String::from_utf8_lossy(&encoded).into_owned()
                };
                self.command(
                    "AUTHENTICATE %s %s\r\n",
                    vec![CommandArg::String(name.clone()), CommandArg::String(ir)],
                )?
            } else {
                self.command("AUTHENTICATE %s\r\n", vec![CommandArg::String(name.clone())])?
            };
            cmd.set_cancellation(cancel.clone());

            let continuation_mechanism = Arc::clone(&mechanism);
            cmd.set_continuation(move |_cmd, challenge| {
                let decoded = decode_challenge(challenge)?;
                let reply = continuation_mechanism
                    .lock()
                    .expect("mechanism lock")
                    .respond(&decoded)?;
                Ok(encode_response(&reply))
            });

            let cmd = self.run(cmd).await?;
            let response = cmd
                .response
                .clone()
                .ok_or_else(|| Error::Protocol("AUTHENTICATE produced no response".into()))?;
            match response.kind {
                ResponseKind::Ok => {
                    debug!(mechanism = %name, "authenticated");
                    return self.finish_authentication(&response, &cancel).await;
                }
                _ => {
                    debug!(mechanism = %name, "server refused mechanism");
                    last_refusal = Some(response.text);
                }
            }
        }

        // LOGIN fallback.
        if self.capabilities().contains(Capabilities::LOGIN_DISABLED) {
            return Err(Error::Authentication(last_refusal.unwrap_or_else(|| {
                "no usable SASL mechanism and LOGIN is disabled".into()
            })));
        }
        let (username, password) = credentials;
        let mut cmd = self.command(
            "LOGIN %S %S\r\n",
            vec![
                CommandArg::String(username.to_string()),
                CommandArg::String(password.to_string()),
            ],
        )?;
        cmd.set_cancellation(cancel.clone());
        let cmd = self.run(cmd).await?;
        let response = cmd
            .response
            .clone()
            .ok_or_else(|| Error::Protocol("LOGIN produced no response".into()))?;
        if response.kind == ResponseKind::Ok {
            self.finish_authentication(&response, &cancel).await
        } else {
            Err(Error::Authentication(response.text))
        }
    }

    /// Post-authentication housekeeping: refresh capabilities unless
    /// they came inline, then discover namespaces and special-use
    /// folders.
    async fn finish_authentication(
        &mut self,
        response: &Response,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.state = EngineState::Authenticated;
        if !response.codes.contains(&ResponseCode::Capability) {
            self.query_capabilities(cancel).await?;
        }
        if self.capabilities().contains(Capabilities::NAMESPACE) {
            let mut cmd = self.command("NAMESPACE\r\n", vec![])?;
            cmd.set_cancellation(cancel.clone());
            let cmd = self.run(cmd).await?;
            if let Some(resp) = cmd.response {
                resp.require_ok("NAMESPACE")?;
            }
        }
        if self
            .capabilities()
            .contains(Capabilities::LIST_EXTENDED | Capabilities::SPECIAL_USE)
        {
            let mut cmd = self.command("LIST (SPECIAL-USE) %s %s\r\n", vec![
                CommandArg::String(String::new()),
                CommandArg::String("*".to_string()),
            ])?;
            cmd.set_cancellation(cancel.clone());
            let cmd = self.run(cmd).await?;
            if let Some(resp) = cmd.response {
                resp.require_ok("LIST")?;
            }
        }
        Ok(())
    }

    // ── mailbox operations ─────────────────────────────────────────

    fn encode_mailbox(&self, name: &str) -> String {
        if self.utf8_enabled {
            name.to_string()
        } else {
            String::from_utf8_lossy(&utf7::encode(name)).into_owned()
        }
    }

    /// List folders under `reference` matching `pattern`; returns the
    /// cache ids of every folder the server reported.
    pub async fn list(
        &mut self,
        reference: &str,
        pattern: &str,
        cancel: CancellationToken,
    ) -> Result<Vec<FolderId>> {
        if self.state < EngineState::Authenticated {
            return Err(Error::InvalidState("LIST requires authentication"));
        }
        let extended = self
            .capabilities()
            .contains(Capabilities::LIST_EXTENDED);
        let template = if extended {
            "LIST %s %s RETURN (SUBSCRIBED CHILDREN)\r\n"
        } else {
            "LIST %s %s\r\n"
        };
        let mut cmd = self.command(template, vec![
            CommandArg::String(reference.to_string()),
            CommandArg::String(pattern.to_string()),
        ])?;
        cmd.list_returns_subscribed = extended;
        cmd.set_cancellation(cancel);
        cmd.user_data = Some(Box::new(Vec::<String>::new()));
        cmd.on_untagged("LIST", |cmd, response| {
            if let UntaggedResponse::List(list) = response {
                if let Some(names) = cmd.user_data_mut::<Vec<String>>() {
                    names.push(list.encoded_name.clone());
                }
            }
            Ok(())
        });

        let mut cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("LIST produced no response".into()))?
            .require_ok("LIST")?;
        let names = cmd.take_user_data::<Vec<String>>().unwrap_or_default();
        Ok(names
            .iter()
            .filter_map(|name| self.folders.lookup(name))
            .collect())
    }

    /// STATUS a folder; items are chosen from the server capabilities.
    pub async fn status(
        &mut self,
        name: &str,
        cancel: CancellationToken,
    ) -> Result<Folder> {
        if self.state < EngineState::Authenticated {
            return Err(Error::InvalidState("STATUS requires authentication"));
        }
        if !self.capabilities().contains(Capabilities::STATUS) {
            return Err(Error::NotSupported("STATUS"));
        }
        let mut items = vec!["MESSAGES", "RECENT", "UIDNEXT", "UIDVALIDITY", "UNSEEN"];
        if self.capabilities().contains(Capabilities::CONDSTORE) {
            items.push("HIGHESTMODSEQ");
        }
        if self.capabilities().contains(Capabilities::APPEND_LIMIT) {
            items.push("APPENDLIMIT");
        }
        if self.capabilities().contains(Capabilities::OBJECTID) {
            items.push("MAILBOXID");
        }
        let template = format!("STATUS %F ({})\r\n", items.join(" "));
        let mut cmd = self.command(&template, vec![CommandArg::Mailbox(name.to_string())])?;
        cmd.set_cancellation(cancel);
        let cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("STATUS produced no response".into()))?
            .require_ok("STATUS")?;
        let encoded = self.encode_mailbox(name);
        self.folder(&encoded)
            .ok_or_else(|| Error::FolderNotFound(name.to_string()))
    }

    /// SELECT (or EXAMINE) a mailbox.
    pub async fn select(
        &mut self,
        name: &str,
        examine: bool,
        cancel: CancellationToken,
    ) -> Result<FolderId> {
        if self.state < EngineState::Authenticated {
            return Err(Error::InvalidState("SELECT requires authentication"));
        }
        let encoded = self.encode_mailbox(name);
        let id = self.folders.get_or_create(&encoded, self.utf8_enabled);

        let template = if examine {
            "EXAMINE %F\r\n"
        } else {
            "SELECT %F\r\n"
        };
        let mut cmd = self.command(template, vec![CommandArg::Mailbox(name.to_string())])?;
        cmd.folder = Some(id);
        cmd.set_cancellation(cancel);
        let cmd = self.run(cmd).await?;
        let response = cmd
            .response
            .clone()
            .ok_or_else(|| Error::Protocol("SELECT produced no response".into()))?;
        match response.kind {
            ResponseKind::Ok => {
                self.selected = Some(id);
                self.state = EngineState::Selected;
                Ok(id)
            }
            _ => Err(Error::Command {
                command: if examine { "EXAMINE" } else { "SELECT" }.to_string(),
                kind: response.kind,
                codes: response.codes,
                text: response.text,
            }),
        }
    }

    /// CLOSE the selected mailbox and return to Authenticated.
    pub async fn close(&mut self, cancel: CancellationToken) -> Result<()> {
        if self.state != EngineState::Selected {
            return Err(Error::InvalidState("no mailbox is selected"));
        }
        let mut cmd = self.command("CLOSE\r\n", vec![])?;
        cmd.set_cancellation(cancel);
        let cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("CLOSE produced no response".into()))?
            .require_ok("CLOSE")?;
        self.selected = None;
        self.state = EngineState::Authenticated;
        Ok(())
    }

    /// Resolve the parent folder, LISTing it if it is not cached and
    /// synthesising a `\NonExistent` placeholder if the server does
    /// not report it.
    pub async fn resolve_parent(
        &mut self,
        id: FolderId,
        cancel: CancellationToken,
    ) -> Result<Option<FolderId>> {
        let Some(parent_name) = self.folders.parent_name(id) else {
            return Ok(None);
        };
        if let Some(parent) = self.folders.lookup(&parent_name) {
            self.folders.get_mut(id).parent = Some(parent);
            return Ok(Some(parent));
        }

        // Neutralise wildcards: '*' would match the whole subtree.
        let pattern = parent_name.replace('*', "%");
        let mut cmd = self.command("LIST %s %s\r\n", vec![
            CommandArg::String(String::new()),
            CommandArg::String(pattern),
        ])?;
        cmd.set_cancellation(cancel);
        let cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("LIST produced no response".into()))?
            .require_ok("LIST")?;

        let parent = self.folders.lookup(&parent_name).unwrap_or_else(|| {
            let parent = self.folders.get_or_create(&parent_name, self.utf8_enabled);
            let folder = self.folders.get_mut(parent);
            folder.attributes |=
                FolderAttributes::NON_EXISTENT | FolderAttributes::NO_SELECT;
            parent
        });
        self.folders.get_mut(id).parent = Some(parent);
        Ok(Some(parent))
    }

    /// ENABLE one or more extensions (RFC 5161).
    pub async fn enable(
        &mut self,
        extensions: &[&str],
        cancel: CancellationToken,
    ) -> Result<()> {
        if !self.capabilities().contains(Capabilities::ENABLE) {
            return Err(Error::NotSupported("ENABLE"));
        }
        if self.state != EngineState::Authenticated {
            return Err(Error::InvalidState(
                "ENABLE is only valid in the authenticated state",
            ));
        }
        let template = format!("ENABLE {}\r\n", extensions.join(" "));
        let mut cmd = self.command(&template, vec![])?;
        cmd.set_cancellation(cancel);
        let cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("ENABLE produced no response".into()))?
            .require_ok("ENABLE")?;
        Ok(())
    }

    /// Enable QRESYNC (implies CONDSTORE).
    pub async fn enable_qresync(&mut self, cancel: CancellationToken) -> Result<()> {
        if !self.capabilities().contains(Capabilities::QRESYNC) {
            return Err(Error::NotSupported("QRESYNC"));
        }
        self.enable(&["QRESYNC", "CONDSTORE"], cancel).await
    }

    /// ID command (RFC 2971): send client info, return server info.
    pub async fn identify(
        &mut self,
        client_info: Option<&[(&str, &str)]>,
        cancel: CancellationToken,
    ) -> Result<Option<Vec<(String, Option<String>)>>> {
        if !self.capabilities().contains(Capabilities::ID) {
            return Err(Error::NotSupported("ID"));
        }
        let (template, args) = match client_info {
            None => ("ID NIL\r\n".to_string(), vec![]),
            Some(pairs) => {
                let mut template = String::from("ID (");
                let mut args = Vec::new();
                for (i, (key, value)) in pairs.iter().enumerate() {
                    if i > 0 {
                        template.push(' ');
                    }
                    template.push_str("%S %S");
                    args.push(CommandArg::String((*key).to_string()));
                    args.push(CommandArg::String((*value).to_string()));
                }
                template.push_str(")\r\n");
                (template, args)
            }
        };
        let mut cmd = self.command(&template, args)?;
        cmd.set_cancellation(cancel);
        cmd.user_data = Some(Box::new(None::<Vec<(String, Option<String>)>>));
        cmd.on_untagged("ID", |cmd, response| {
            if let UntaggedResponse::Id(params) = response {
                if let Some(slot) = cmd.user_data_mut::<Option<Vec<(String, Option<String>)>>>() {
                    *slot = params.clone();
                }
            }
            Ok(())
        });
        let mut cmd = self.run(cmd).await?;
        cmd.response
            .clone()
            .ok_or_else(|| Error::Protocol("ID produced no response".into()))?
            .require_ok("ID")?;
        Ok(cmd
            .take_user_data::<Option<Vec<(String, Option<String>)>>>()
            .and_then(|boxed| *boxed))
    }

    /// Issue one command per UID subset so each serialised command
    /// stays under the server's length limit; returns the completed
    /// commands in order. The union of their responses is the logical
    /// result.
    pub async fn run_for_subsets(
        &mut self,
        set: &UniqueIdSet,
        overhead: usize,
        mut build: impl FnMut(&UniqueIdSet) -> Result<Command>,
    ) -> Result<Vec<Command>> {
        let budget = self
            .quirks
            .max_command_length()
            .saturating_sub(overhead)
            .max(32);
        let mut completed = Vec::new();
        for subset in set.enumerate_subsets(budget) {
            let cmd = build(&subset)?;
            completed.push(self.run(cmd).await?);
        }
        Ok(completed)
    }

    // ── IDLE ───────────────────────────────────────────────────────

    /// Enter IDLE until `done` is cancelled, dispatching pushed
    /// mailbox updates as they arrive.
    ///
    /// `done` only ends the IDLE gracefully (DONE + tagged OK);
    /// `cancel` is the emergency brake that abandons the transport.
    pub async fn idle(
        &mut self,
        done: CancellationToken,
        cancel: CancellationToken,
    ) -> Result<()> {
        if self.state != EngineState::Selected {
            return Err(Error::InvalidState("IDLE requires a selected mailbox"));
        }
        if !self.capabilities().contains(Capabilities::IDLE) {
            return Err(Error::NotSupported("IDLE"));
        }

        let mut cmd = self.command("IDLE\r\n", vec![])?;
        cmd.set_cancellation(cancel.clone());
        self.allocate_tag(&mut cmd);

        // Write the command line ourselves: IDLE's continuation is a
        // mode switch, not a data request.
        let parts = std::mem::take(&mut cmd.parts);
        {
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            for part in parts {
                if let Part::Text(text) = part {
                    tok.stream_mut().write(&text).await?;
                }
            }
            tok.stream_mut().flush().await?;
        }
        cmd.advance_status(CommandStatus::Active);

        // Wait for the `+` acknowledging IDLE.
        loop {
            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            match tok.read_token(Specials::Default).await? {
                ImapToken::Plus => {
                    tok.read_text_to_eoln();
                    break;
                }
                ImapToken::Asterisk => {
                    self.dispatch_untagged(&mut cmd).await?;
                    self.check_bye(&cmd)?;
                }
                ImapToken::Atom(a) if a.as_str() == cmd.tag_text => {
                    // Rejected (NO/BAD) without entering IDLE.
                    self.finish_tagged(&mut cmd).await?;
                    let response = cmd
                        .response
                        .ok_or_else(|| Error::Protocol("IDLE produced no response".into()))?;
                    response.require_ok("IDLE")?;
                    return Err(Error::Protocol("IDLE ended before it began".into()));
                }
                ImapToken::Eoln => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} entering IDLE",
                        other.describe()
                    )));
                }
            }
        }

        self.state = EngineState::Idle;
        let result = self.idle_loop(&mut cmd, &done, &cancel).await;
        match &result {
            Ok(()) => self.state = EngineState::Selected,
            Err(e) if e.is_fatal() => {
                self.fail_pending();
                self.teardown();
            }
            Err(_) => self.state = EngineState::Selected,
        }
        result
    }

    async fn idle_loop(
        &mut self,
        cmd: &mut Command,
        done: &CancellationToken,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let mut done_sent = false;
        loop {
            // `done` is honoured before the outer token: the graceful
            // DONE must reach the wire even when both have fired.
            if done.is_cancelled() && !done_sent {
                let Some(tok) = self.tokenizer.as_mut() else {
                    return Err(Error::InvalidState("engine is not connected"));
                };
                tok.stream_mut().write(b"DONE\r\n").await?;
                tok.stream_mut().flush().await?;
                done_sent = true;
            }
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            if done_sent {
                // Drain to the tagged OK without racing the token.
                if !tok.fill_line_cancellable(&CancellationToken::new()).await? {
                    continue;
                }
            } else if !tok.fill_line_cancellable(done).await? {
                // done fired while waiting; loop to send DONE.
                continue;
            }

            let Some(tok) = self.tokenizer.as_mut() else {
                return Err(Error::InvalidState("engine is not connected"));
            };
            match tok.read_token(Specials::Default).await? {
                ImapToken::Asterisk => {
                    self.dispatch_untagged(cmd).await?;
                    self.check_bye(cmd)?;
                }
                ImapToken::Atom(a) if a.as_str() == cmd.tag_text => {
                    self.finish_tagged(cmd).await?;
                    let response = cmd
                        .response
                        .clone()
                        .ok_or_else(|| Error::Protocol("IDLE produced no response".into()))?;
                    response.require_ok("IDLE")?;
                    return Ok(());
                }
                ImapToken::Plus => {
                    let Some(tok) = self.tokenizer.as_mut() else {
                        return Err(Error::InvalidState("engine is not connected"));
                    };
                    tok.read_text_to_eoln();
                }
                ImapToken::Eoln => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} during IDLE",
                        other.describe()
                    )));
                }
            }
        }
    }
}

/// `* ID (key value ...)` or `* ID NIL`.
async fn read_id_params(
    tokenizer: &mut Tokenizer,
) -> Result<Option<Vec<(String, Option<String>)>>> {
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => Ok(None),
        ImapToken::OpenParen => {
            let mut params = Vec::new();
            loop {
                let key = match tokenizer.read_token(Specials::Default).await? {
                    ImapToken::CloseParen => return Ok(Some(params)),
                    ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_string(),
                    ImapToken::Literal(n) => {
                        let mut bytes = Vec::new();
                        tokenizer.read_literal(n, &mut bytes).await?;
                        String::from_utf8_lossy(&bytes).into_owned()
                    }
                    other => {
                        return Err(Error::Protocol(format!(
                            "unexpected {} in ID parameters",
                            other.describe()
                        )));
                    }
                };
                let value = tokenizer
                    .read_nstring()
                    .await?
                    .map(|b| String::from_utf8_lossy(&b).into_owned());
                params.push((key, value));
            }
        }
        other => Err(Error::Protocol(format!(
            "expected ID parameter list, got {}",
            other.describe()
        ))),
    }
}
