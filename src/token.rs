//! IMAP stream tokens
//!
//! The server stream is lexed into a small closed set of tokens. The
//! text-bearing variants (atoms, flags, quoted strings) hold shared,
//! interned `TokenText` values supplied by the token cache, so the same
//! atom arriving thousands of times per session costs one allocation.

use std::fmt;
use std::sync::Arc;

/// Interned token payload: the raw wire bytes plus their decoded form.
///
/// Decoding is UTF-8 with a Latin-1 fallback; equality is defined over
/// the raw bytes so undecodable names still compare correctly.
#[derive(Debug, Clone)]
pub struct TokenText {
    bytes: Vec<u8>,
    text: String,
}

impl TokenText {
    #[must_use]
    pub fn new(bytes: Vec<u8>) -> Self {
        let text = match String::from_utf8(bytes.clone()) {
            Ok(s) => s,
            Err(e) => encoding_rs::mem::decode_latin1(e.as_bytes()).into_owned(),
        };
        Self { bytes, text }
    }

    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.text
    }
}

impl PartialEq for TokenText {
    fn eq(&self, other: &Self) -> bool {
        self.bytes == other.bytes
    }
}

impl Eq for TokenText {}

impl fmt::Display for TokenText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Which interning pool a text token belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Atom,
    Flag,
    QString,
}

/// One lexical token of the IMAP response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum ImapToken {
    Atom(Arc<TokenText>),
    /// `\Atom` or `\*`; the payload includes the leading backslash.
    Flag(Arc<TokenText>),
    QString(Arc<TokenText>),
    /// `{n}` header; the consumer drains exactly `n` octets next.
    Literal(u32),
    OpenParen,
    CloseParen,
    OpenBracket,
    CloseBracket,
    Asterisk,
    Plus,
    Nil,
    Eoln,
}

impl ImapToken {
    /// Case-insensitive atom comparison; `Nil` matches `"NIL"`.
    #[must_use]
    pub fn is_atom(&self, name: &str) -> bool {
        match self {
            Self::Atom(t) => t.as_str().eq_ignore_ascii_case(name),
            Self::Nil => name.eq_ignore_ascii_case("NIL"),
            _ => false,
        }
    }

    /// The decoded text of an atom, flag, or quoted string.
    #[must_use]
    pub fn text(&self) -> Option<&str> {
        match self {
            Self::Atom(t) | Self::Flag(t) | Self::QString(t) => Some(t.as_str()),
            Self::Nil => Some("NIL"),
            _ => None,
        }
    }

    /// A short description for protocol error messages.
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Atom(t) => format!("atom {:?}", t.as_str()),
            Self::Flag(t) => format!("flag {:?}", t.as_str()),
            Self::QString(t) => format!("string {:?}", t.as_str()),
            Self::Literal(n) => format!("literal {{{n}}}"),
            Self::OpenParen => "'('".into(),
            Self::CloseParen => "')'".into(),
            Self::OpenBracket => "'['".into(),
            Self::CloseBracket => "']'".into(),
            Self::Asterisk => "'*'".into(),
            Self::Plus => "'+'".into(),
            Self::Nil => "NIL".into(),
            Self::Eoln => "end of line".into(),
        }
    }
}

/// Which byte set terminates a bare atom.
///
/// `Default` is used for general response parsing: brackets delimit
/// response codes and must break atoms. `Atom` is used when reading
/// mailbox names, which may legitimately contain `[` and `]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Specials {
    Default,
    Atom,
}

impl Specials {
    #[must_use]
    pub fn terminates_atom(self, byte: u8) -> bool {
        if byte <= 0x20 || byte == 0x7f {
            return true;
        }
        match byte {
            b'(' | b')' | b'{' | b'%' | b'*' | b'"' | b'\\' => true,
            b'[' | b']' => self == Self::Default,
            _ => false,
        }
    }
}
