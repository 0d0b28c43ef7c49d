//! Lazy tokenization of the server stream
//!
//! The tokenizer turns `ByteStream` lines into `ImapToken`s on demand,
//! with a one-token unget buffer for the lookahead the recursive
//! parsers need. A `{n}` literal header ends the lexed portion of a
//! response line; after the consumer drains the n octets the next
//! `read_token` transparently resumes the same response line from the
//! transport.

use crate::cache::TokenCache;
use crate::error::{Error, Result};
use crate::stream::ByteStream;
use crate::token::{ImapToken, Specials, TokenKind};
use tokio_util::sync::CancellationToken;

pub struct Tokenizer {
    stream: ByteStream,
    cache: TokenCache,
    /// Current response line without the trailing CRLF.
    line: Vec<u8>,
    pos: usize,
    need_line: bool,
    /// A cancelled line read left partial bytes in `line`.
    partial: bool,
    unget: Option<ImapToken>,
}

impl Tokenizer {
    #[must_use]
    pub fn new(stream: ByteStream) -> Self {
        Self {
            stream,
            cache: TokenCache::new(),
            line: Vec::new(),
            pos: 0,
            need_line: true,
            partial: false,
            unget: None,
        }
    }

    /// The underlying stream, for writes and flushes.
    pub fn stream_mut(&mut self) -> &mut ByteStream {
        &mut self.stream
    }

    /// Tear down into the stream (STARTTLS upgrade path).
    #[must_use]
    pub fn into_stream(self) -> ByteStream {
        self.stream
    }

    #[must_use]
    pub const fn cache(&self) -> &TokenCache {
        &self.cache
    }

    /// Push one token back; the next `read_token` returns it first.
    ///
    /// The buffer is exactly one token deep.
    pub fn unget_token(&mut self, token: ImapToken) {
        debug_assert!(self.unget.is_none(), "unget buffer already occupied");
        self.unget = Some(token);
    }

    pub async fn peek_token(&mut self, specials: Specials) -> Result<ImapToken> {
        let token = self.read_token(specials).await?;
        self.unget_token(token.clone());
        Ok(token)
    }

    async fn fill_line(&mut self) -> Result<()> {
        if !self.partial {
            self.line.clear();
            self.pos = 0;
        }
        self.partial = false;
        self.stream.read_line_into(&mut self.line).await?;
        trim_crlf(&mut self.line);
        self.need_line = false;
        Ok(())
    }

    /// Pre-fill the next response line, abandoning the wait when
    /// `done` fires. Returns `true` when a full line is buffered and
    /// token reads can proceed without blocking on the transport.
    ///
    /// Partial bytes received before cancellation are kept, so calling
    /// again later resumes the same line. This is the IDLE loop's wait
    /// primitive.
    pub async fn fill_line_cancellable(&mut self, done: &CancellationToken) -> Result<bool> {
        if !self.need_line || self.unget.is_some() {
            return Ok(true);
        }
        if !self.partial {
            self.line.clear();
            self.pos = 0;
        }
        let complete = self.stream.read_line_cancellable(&mut self.line, done).await?;
        if complete {
            trim_crlf(&mut self.line);
            self.need_line = false;
            self.partial = false;
        } else {
            self.partial = true;
        }
        Ok(complete)
    }

    /// Read the next token; atom boundaries follow `specials`.
    pub async fn read_token(&mut self, specials: Specials) -> Result<ImapToken> {
        if let Some(token) = self.unget.take() {
            return Ok(token);
        }
        if self.need_line {
            self.fill_line().await?;
        }

        while self.pos < self.line.len()
            && (self.line[self.pos] == b' ' || self.line[self.pos] == b'\t')
        {
            self.pos += 1;
        }
        if self.pos >= self.line.len() {
            self.need_line = true;
            return Ok(ImapToken::Eoln);
        }

        let byte = self.line[self.pos];
        match byte {
            b'(' => {
                self.pos += 1;
                Ok(ImapToken::OpenParen)
            }
            b')' => {
                self.pos += 1;
                Ok(ImapToken::CloseParen)
            }
            b'[' if specials == Specials::Default => {
                self.pos += 1;
                Ok(ImapToken::OpenBracket)
            }
            b']' if specials == Specials::Default => {
                self.pos += 1;
                Ok(ImapToken::CloseBracket)
            }
            b'*' => {
                self.pos += 1;
                Ok(ImapToken::Asterisk)
            }
            b'+' if self.pos + 1 >= self.line.len() || self.line[self.pos + 1] == b' ' => {
                self.pos += 1;
                Ok(ImapToken::Plus)
            }
            b'"' => self.read_quoted(),
            b'\\' => self.read_flag(specials),
            b'{' => self.read_literal_header(),
            _ => self.read_atom(specials),
        }
    }

    fn read_quoted(&mut self) -> Result<ImapToken> {
        let mut bytes = Vec::new();
        let mut i = self.pos + 1;
        while i < self.line.len() {
            match self.line[i] {
                b'\\' if i + 1 < self.line.len() => {
                    bytes.push(self.line[i + 1]);
                    i += 2;
                }
                b'"' => {
                    self.pos = i + 1;
                    let text = self.cache.intern(TokenKind::QString, &bytes);
                    return Ok(ImapToken::QString(text));
                }
                other => {
                    bytes.push(other);
                    i += 1;
                }
            }
        }
        Err(Error::Protocol("unterminated quoted string".into()))
    }

    fn read_flag(&mut self, specials: Specials) -> Result<ImapToken> {
        let start = self.pos;
        self.pos += 1;
        if self.pos < self.line.len() && self.line[self.pos] == b'*' {
            // \* inside PERMANENTFLAGS
            self.pos += 1;
        } else {
            while self.pos < self.line.len() && !specials.terminates_atom(self.line[self.pos]) {
                self.pos += 1;
            }
        }
        if self.pos == start + 1 {
            return Err(Error::Protocol("empty flag token".into()));
        }
        let text = self
            .cache
            .intern(TokenKind::Flag, &self.line[start..self.pos]);
        Ok(ImapToken::Flag(text))
    }

    fn read_literal_header(&mut self) -> Result<ImapToken> {
        let mut i = self.pos + 1;
        let mut value: u64 = 0;
        let mut digits = 0;
        while i < self.line.len() && self.line[i].is_ascii_digit() {
            value = value * 10 + u64::from(self.line[i] - b'0');
            digits += 1;
            i += 1;
        }
        // Tolerate a non-synchronising marker even though servers
        // should not send one.
        if i < self.line.len() && self.line[i] == b'+' {
            i += 1;
        }
        if digits == 0 || i >= self.line.len() || self.line[i] != b'}' {
            return Err(Error::Protocol("malformed literal header".into()));
        }
        if i + 1 != self.line.len() {
            return Err(Error::Protocol(
                "literal header not at end of line".into(),
            ));
        }
        let Ok(n) = u32::try_from(value) else {
            return Err(Error::Protocol(format!("bad literal octet count {value}")));
        };
        self.pos = self.line.len();
        // The rest of the response line follows the literal octets.
        self.need_line = true;
        Ok(ImapToken::Literal(n))
    }

    fn read_atom(&mut self, specials: Specials) -> Result<ImapToken> {
        let start = self.pos;
        while self.pos < self.line.len() && !specials.terminates_atom(self.line[self.pos]) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(Error::Protocol(format!(
                "unexpected byte 0x{:02x} in stream",
                self.line[self.pos]
            )));
        }
        let raw = &self.line[start..self.pos];
        if raw.eq_ignore_ascii_case(b"NIL") {
            return Ok(ImapToken::Nil);
        }
        let text = self.cache.intern(TokenKind::Atom, raw);
        Ok(ImapToken::Atom(text))
    }

    /// Drain the body of a previously returned `Literal(n)` token.
    pub async fn read_literal(&mut self, n: u32, out: &mut Vec<u8>) -> Result<()> {
        debug_assert!(self.unget.is_none(), "literal read with pending unget");
        self.stream.read_literal_into(n as usize, out).await
    }

    /// Whether the next non-blank byte on the current line opens a
    /// `[response-code]`. Probes the raw line without tokenizing, so
    /// the following read can still be `read_text_to_eoln`.
    pub async fn at_response_code(&mut self) -> Result<bool> {
        if self.unget.is_some() {
            return Ok(matches!(self.unget, Some(ImapToken::OpenBracket)));
        }
        if self.need_line {
            self.fill_line().await?;
        }
        let mut i = self.pos;
        while i < self.line.len() && (self.line[i] == b' ' || self.line[i] == b'\t') {
            i += 1;
        }
        Ok(i < self.line.len() && self.line[i] == b'[')
    }

    /// The raw remainder of the current line, e.g. human-readable
    /// response text. Consumes up to the end of the line.
    pub fn read_text_to_eoln(&mut self) -> String {
        debug_assert!(self.unget.is_none(), "text read with pending unget");
        if self.need_line || self.pos >= self.line.len() {
            self.need_line = true;
            return String::new();
        }
        let text = String::from_utf8_lossy(&self.line[self.pos..]).into_owned();
        self.pos = self.line.len();
        self.need_line = true;
        text
    }

    /// Read an atom and parse it as an unsigned number.
    pub async fn read_u32(&mut self) -> Result<u32> {
        let token = self.read_token(Specials::Default).await?;
        token
            .text()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Error::Protocol(format!("expected number, got {}", token.describe())))
    }

    pub async fn read_u64(&mut self) -> Result<u64> {
        let token = self.read_token(Specials::Default).await?;
        token
            .text()
            .and_then(|t| t.parse().ok())
            .ok_or_else(|| Error::Protocol(format!("expected number, got {}", token.describe())))
    }

    /// Read an astring (atom, quoted string, or literal) as raw bytes.
    pub async fn read_astring(&mut self, specials: Specials) -> Result<Vec<u8>> {
        match self.read_token(specials).await? {
            ImapToken::Atom(t) | ImapToken::QString(t) | ImapToken::Flag(t) => {
                Ok(t.bytes().to_vec())
            }
            ImapToken::Nil => Ok(b"NIL".to_vec()),
            ImapToken::Literal(n) => {
                let mut bytes = Vec::with_capacity(n as usize);
                self.read_literal(n, &mut bytes).await?;
                Ok(bytes)
            }
            other => Err(Error::Protocol(format!(
                "expected string, got {}",
                other.describe()
            ))),
        }
    }

    /// Read an nstring: `NIL` maps to `None`.
    pub async fn read_nstring(&mut self) -> Result<Option<Vec<u8>>> {
        match self.read_token(Specials::Default).await? {
            ImapToken::Nil => Ok(None),
            ImapToken::Atom(t) | ImapToken::QString(t) => Ok(Some(t.bytes().to_vec())),
            ImapToken::Literal(n) => {
                let mut bytes = Vec::with_capacity(n as usize);
                self.read_literal(n, &mut bytes).await?;
                Ok(Some(bytes))
            }
            other => Err(Error::Protocol(format!(
                "expected nstring, got {}",
                other.describe()
            ))),
        }
    }

    /// Expect a specific structural token.
    pub async fn expect(&mut self, expected: &ImapToken) -> Result<()> {
        let token = self.read_token(Specials::Default).await?;
        if token == *expected {
            Ok(())
        } else {
            Err(Error::Protocol(format!(
                "expected {}, got {}",
                expected.describe(),
                token.describe()
            )))
        }
    }

    /// Consume and discard everything up to and including `Eoln`,
    /// draining any literals on the way.
    pub async fn skip_to_eoln(&mut self) -> Result<()> {
        let mut scratch = Vec::new();
        loop {
            match self.read_token(Specials::Default).await? {
                ImapToken::Eoln => return Ok(()),
                ImapToken::Literal(n) => {
                    scratch.clear();
                    self.read_literal(n, &mut scratch).await?;
                }
                _ => {}
            }
        }
    }
}

fn trim_crlf(line: &mut Vec<u8>) {
    if line.last() == Some(&b'\n') {
        line.pop();
    }
    if line.last() == Some(&b'\r') {
        line.pop();
    }
}
