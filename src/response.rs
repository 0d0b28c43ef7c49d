//! Command responses and bracketed response codes

use crate::capability::CapabilitySets;
use crate::capability::read_capabilities;
use crate::error::{Error, Result};
use crate::flag::{FlagSet, read_flag_list};
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use crate::uidset::{UniqueId, UniqueIdSet};
use std::fmt;

/// Status word of a tagged (or untagged status) response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Ok,
    No,
    Bad,
    Bye,
}

impl fmt::Display for ResponseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Ok => "OK",
            Self::No => "NO",
            Self::Bad => "BAD",
            Self::Bye => "BYE",
        })
    }
}

impl ResponseKind {
    #[must_use]
    pub fn from_atom(atom: &str) -> Option<Self> {
        match atom.to_ascii_uppercase().as_str() {
            "OK" => Some(Self::Ok),
            "NO" => Some(Self::No),
            "BAD" => Some(Self::Bad),
            "BYE" => Some(Self::Bye),
            _ => None,
        }
    }
}

/// METADATA response-code subtypes (RFC 5464).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetadataCode {
    LongEntries(u32),
    MaxSize(u32),
    TooMany,
    NoPrivate,
}

/// A bracketed response code with its parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub enum ResponseCode {
    Alert,
    BadCharset(Vec<String>),
    /// Capability data inside the code is applied to the engine's
    /// capability sets as a side effect of parsing.
    Capability,
    Parse,
    PermanentFlags(FlagSet),
    ReadOnly,
    ReadWrite,
    TryCreate,
    /// Some servers send `UIDNEXT 0` for empty mailboxes; the zero is
    /// preserved here and interpreted by the folder update logic.
    UidNext(UniqueId),
    UidValidity(u32),
    Unseen(u32),
    AppendUid {
        validity: u32,
        uids: UniqueIdSet,
    },
    CopyUid {
        validity: u32,
        src: UniqueIdSet,
        dst: UniqueIdSet,
    },
    UidNotSticky,
    BadUrl(String),
    HighestModSeq(u64),
    NoModSeq,
    Modified(UniqueIdSet),
    NoUpdate(String),
    Metadata(MetadataCode),
    Annotate(String),
    Annotations {
        max_size: Option<u32>,
        scopes: Vec<String>,
    },
    UndefinedFilter(String),
    MailboxId(String),
    NotificationOverflow,
    Closed,
    Referral(String),
    Unknown(String),
}

/// The terminal state of one command.
#[derive(Debug, Clone)]
pub struct Response {
    pub kind: ResponseKind,
    pub codes: Vec<ResponseCode>,
    pub text: String,
}

impl Response {
    #[must_use]
    pub fn new(kind: ResponseKind) -> Self {
        Self {
            kind,
            codes: Vec::new(),
            text: String::new(),
        }
    }

    #[must_use]
    pub fn code(&self, matches: impl Fn(&ResponseCode) -> bool) -> Option<&ResponseCode> {
        self.codes.iter().find(|c| matches(c))
    }

    /// Turn a tagged NO/BAD into `Error::Command`, keeping the
    /// connection usable.
    pub fn require_ok(self, command: &str) -> Result<Self> {
        match self.kind {
            ResponseKind::Ok => Ok(self),
            kind => Err(Error::Command {
                command: command.to_string(),
                kind,
                codes: self.codes,
                text: self.text,
            }),
        }
    }
}

/// Read a sequence-set / uid-set from the token stream.
///
/// `1:3,5` arrives as one atom; a `*` bound splits the set across
/// atom and asterisk tokens (`10:*` is `Atom("10:")` + `Asterisk`),
/// so the pieces are reassembled before parsing.
pub async fn read_uid_set(tokenizer: &mut Tokenizer) -> Result<UniqueIdSet> {
    let mut text = String::new();
    loop {
        let token = tokenizer.peek_token(Specials::Default).await?;
        match &token {
            ImapToken::Atom(a)
                if text.is_empty() || a.as_str().starts_with(':') || a.as_str().starts_with(',') =>
            {
                tokenizer.read_token(Specials::Default).await?;
                text.push_str(a.as_str());
            }
            ImapToken::Asterisk
                if text.is_empty() || text.ends_with(':') || text.ends_with(',') =>
            {
                tokenizer.read_token(Specials::Default).await?;
                text.push('*');
            }
            _ => break,
        }
        // A set never continues after a complete bound unless the next
        // token glues on with ':' or ','.
        if text.ends_with(':') || text.ends_with(',') {
            continue;
        }
        let next = tokenizer.peek_token(Specials::Default).await?;
        match &next {
            ImapToken::Atom(a) if a.as_str().starts_with(':') || a.as_str().starts_with(',') => {}
            _ => break,
        }
    }
    if text.is_empty() {
        return Err(Error::Protocol("expected UID set".into()));
    }
    text.parse()
        .map_err(|_| Error::Protocol(format!("invalid UID set {text:?}")))
}

async fn read_charset_list(tokenizer: &mut Tokenizer) -> Result<Vec<String>> {
    let mut charsets = Vec::new();
    let token = tokenizer.peek_token(Specials::Default).await?;
    if token != ImapToken::OpenParen {
        return Ok(charsets);
    }
    tokenizer.read_token(Specials::Default).await?;
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(charsets),
            ImapToken::Atom(t) | ImapToken::QString(t) => charsets.push(t.as_str().to_string()),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in charset list",
                    other.describe()
                )));
            }
        }
    }
}

async fn read_metadata_code(tokenizer: &mut Tokenizer) -> Result<MetadataCode> {
    let token = tokenizer.read_token(Specials::Default).await?;
    let Some(subtype) = token.text() else {
        return Err(Error::Protocol(format!(
            "expected METADATA subtype, got {}",
            token.describe()
        )));
    };
    match subtype.to_ascii_uppercase().as_str() {
        "LONGENTRIES" => Ok(MetadataCode::LongEntries(tokenizer.read_u32().await?)),
        "MAXSIZE" => Ok(MetadataCode::MaxSize(tokenizer.read_u32().await?)),
        "TOOMANY" => Ok(MetadataCode::TooMany),
        "NOPRIVATE" => Ok(MetadataCode::NoPrivate),
        other => Err(Error::Protocol(format!(
            "unknown METADATA subtype {other}"
        ))),
    }
}

/// Parse one `[code ...]` response code. The opening bracket has been
/// consumed; parsing consumes through the matching `]`.
///
/// `CAPABILITY` data inside the code is applied to `caps` in place.
pub async fn read_response_code(
    tokenizer: &mut Tokenizer,
    caps: &mut CapabilitySets,
) -> Result<ResponseCode> {
    let token = tokenizer.read_token(Specials::Default).await?;
    let Some(atom) = token.text().map(str::to_ascii_uppercase) else {
        return Err(Error::Protocol(format!(
            "expected response code, got {}",
            token.describe()
        )));
    };

    let code = match atom.as_str() {
        "ALERT" => ResponseCode::Alert,
        "PARSE" => ResponseCode::Parse,
        "READ-ONLY" => ResponseCode::ReadOnly,
        "READ-WRITE" => ResponseCode::ReadWrite,
        "TRYCREATE" => ResponseCode::TryCreate,
        "UIDNOTSTICKY" => ResponseCode::UidNotSticky,
        "CLOSED" => ResponseCode::Closed,
        "NOMODSEQ" => ResponseCode::NoModSeq,
        "NOTIFICATIONOVERFLOW" => ResponseCode::NotificationOverflow,
        "BADCHARSET" => ResponseCode::BadCharset(read_charset_list(tokenizer).await?),
        "CAPABILITY" => {
            read_capabilities(tokenizer, caps).await?;
            ResponseCode::Capability
        }
        "PERMANENTFLAGS" => ResponseCode::PermanentFlags(read_flag_list(tokenizer).await?),
        "UIDNEXT" => ResponseCode::UidNext(UniqueId::new(0, tokenizer.read_u32().await?)),
        "UIDVALIDITY" => ResponseCode::UidValidity(tokenizer.read_u32().await?),
        "UNSEEN" => ResponseCode::Unseen(tokenizer.read_u32().await?),
        "APPENDUID" => {
            let validity = tokenizer.read_u32().await?;
            let uids = read_uid_set(tokenizer).await?;
            ResponseCode::AppendUid { validity, uids }
        }
        "COPYUID" => {
            let validity = tokenizer.read_u32().await?;
            let src = read_uid_set(tokenizer).await?;
            let dst = read_uid_set(tokenizer).await?;
            ResponseCode::CopyUid { validity, src, dst }
        }
        "BADURL" => {
            let url = tokenizer.read_astring(Specials::Default).await?;
            ResponseCode::BadUrl(String::from_utf8_lossy(&url).into_owned())
        }
        "HIGHESTMODSEQ" => ResponseCode::HighestModSeq(tokenizer.read_u64().await?),
        "MODIFIED" => ResponseCode::Modified(read_uid_set(tokenizer).await?),
        "NOUPDATE" => {
            let tag = tokenizer.read_astring(Specials::Default).await?;
            ResponseCode::NoUpdate(String::from_utf8_lossy(&tag).into_owned())
        }
        "METADATA" => ResponseCode::Metadata(read_metadata_code(tokenizer).await?),
        "ANNOTATE" => {
            let subtype = tokenizer.read_astring(Specials::Default).await?;
            ResponseCode::Annotate(String::from_utf8_lossy(&subtype).into_owned())
        }
        "ANNOTATIONS" => {
            let mut max_size = None;
            let mut scopes = Vec::new();
            loop {
                let peeked = tokenizer.peek_token(Specials::Default).await?;
                match &peeked {
                    ImapToken::CloseBracket | ImapToken::Eoln => break,
                    ImapToken::Atom(a) => {
                        tokenizer.read_token(Specials::Default).await?;
                        if let Ok(n) = a.as_str().parse() {
                            max_size = Some(n);
                        } else {
                            scopes.push(a.as_str().to_string());
                        }
                    }
                    _ => {
                        tokenizer.read_token(Specials::Default).await?;
                    }
                }
            }
            ResponseCode::Annotations { max_size, scopes }
        }
        "UNDEFINED-FILTER" => {
            let name = tokenizer.read_astring(Specials::Default).await?;
            ResponseCode::UndefinedFilter(String::from_utf8_lossy(&name).into_owned())
        }
        "MAILBOXID" => {
            tokenizer.expect(&ImapToken::OpenParen).await?;
            let id = tokenizer.read_astring(Specials::Default).await?;
            tokenizer.expect(&ImapToken::CloseParen).await?;
            ResponseCode::MailboxId(String::from_utf8_lossy(&id).into_owned())
        }
        "REFERRAL" => {
            let url = tokenizer.read_astring(Specials::Default).await?;
            ResponseCode::Referral(String::from_utf8_lossy(&url).into_owned())
        }
        _ => ResponseCode::Unknown(atom),
    };

    // Drain anything the specific parser did not consume, then eat the
    // closing bracket. Unknown codes land here with their arguments.
    let mut scratch = Vec::new();
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseBracket => return Ok(code),
            ImapToken::Eoln => {
                return Err(Error::Protocol("unterminated response code".into()));
            }
            ImapToken::Literal(n) => {
                scratch.clear();
                tokenizer.read_literal(n, &mut scratch).await?;
            }
            _ => {}
        }
    }
}
