//! FETCH response attributes
//!
//! One untagged `* n FETCH (item value ...)` line carries any mix of
//! attributes; everything parses into a single `MessageAttributes`
//! value handed to the command's FETCH handler. Unknown attributes are
//! skipped with their value so new server extensions do not kill the
//! session.

use crate::body::{BodyStructure, read_body};
use crate::envelope::{Envelope, read_envelope};
use crate::error::{Error, Result};
use crate::flag::{FlagSet, read_flag_list, read_label_list};
use crate::quirks::QuirksMode;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use chrono::{DateTime, FixedOffset};

/// One `BODY[section]<origin>` payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BodySection {
    /// The section specifier, e.g. `""`, `HEADER`, `1.2`,
    /// `HEADER.FIELDS (FROM TO)`.
    pub section: String,
    pub origin: Option<u32>,
    pub data: Option<Vec<u8>>,
}

/// Attributes accumulated from one FETCH response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageAttributes {
    /// 1-based message sequence number from the untagged response.
    pub seq: u32,
    pub uid: Option<u32>,
    pub flags: Option<FlagSet>,
    pub internal_date: Option<DateTime<FixedOffset>>,
    pub save_date: Option<DateTime<FixedOffset>>,
    pub size: Option<u32>,
    pub mod_seq: Option<u64>,
    pub envelope: Option<Envelope>,
    pub body_structure: Option<BodyStructure>,
    pub sections: Vec<BodySection>,
    pub email_id: Option<String>,
    pub thread_id: Option<String>,
    pub gmail_message_id: Option<u64>,
    pub gmail_thread_id: Option<u64>,
    pub gmail_labels: Option<Vec<String>>,
}

impl MessageAttributes {
    /// The payload of `BODY[]`, when fetched.
    #[must_use]
    pub fn body(&self) -> Option<&[u8]> {
        self.sections
            .iter()
            .find(|s| s.section.is_empty())
            .and_then(|s| s.data.as_deref())
    }
}

/// `dd-MMM-yyyy HH:mm:ss +HHMM`, English month names, day possibly
/// space-padded.
pub fn parse_internal_date(text: &str) -> Option<DateTime<FixedOffset>> {
    DateTime::parse_from_str(text.trim_start(), "%d-%b-%Y %H:%M:%S %z").ok()
}

/// Render a date in INTERNALDATE layout for APPEND.
#[must_use]
pub fn format_internal_date(date: &DateTime<FixedOffset>) -> String {
    date.format("%d-%b-%Y %H:%M:%S %z").to_string()
}

async fn read_date(tokenizer: &mut Tokenizer) -> Result<Option<DateTime<FixedOffset>>> {
    let Some(bytes) = tokenizer.read_nstring().await? else {
        return Ok(None);
    };
    let text = String::from_utf8_lossy(&bytes);
    Ok(parse_internal_date(&text))
}

async fn read_paren_u64(tokenizer: &mut Tokenizer) -> Result<u64> {
    tokenizer.expect(&ImapToken::OpenParen).await?;
    let value = tokenizer.read_u64().await?;
    tokenizer.expect(&ImapToken::CloseParen).await?;
    Ok(value)
}

/// `EMAILID (id)` / `THREADID (id)`; THREADID may be NIL.
async fn read_objectid(tokenizer: &mut Tokenizer) -> Result<Option<String>> {
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => Ok(None),
        ImapToken::OpenParen => {
            let id = tokenizer.read_astring(Specials::Default).await?;
            tokenizer.expect(&ImapToken::CloseParen).await?;
            Ok(Some(String::from_utf8_lossy(&id).into_owned()))
        }
        other => Err(Error::Protocol(format!(
            "expected object id, got {}",
            other.describe()
        ))),
    }
}

/// Reassemble the text between `BODY[` and `]`.
async fn read_section_spec(tokenizer: &mut Tokenizer) -> Result<String> {
    let mut spec = String::new();
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseBracket => return Ok(spec),
            ImapToken::OpenParen => {
                if !spec.is_empty() {
                    spec.push(' ');
                }
                spec.push('(');
            }
            ImapToken::CloseParen => spec.push(')'),
            ImapToken::Atom(t) | ImapToken::QString(t) => {
                if !(spec.is_empty() || spec.ends_with('(')) {
                    spec.push(' ');
                }
                spec.push_str(t.as_str());
            }
            ImapToken::Eoln => {
                return Err(Error::Protocol("unterminated body section".into()));
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in body section",
                    other.describe()
                )));
            }
        }
    }
}

async fn read_section(tokenizer: &mut Tokenizer) -> Result<BodySection> {
    // "[" already consumed.
    let section = read_section_spec(tokenizer).await?;
    let mut origin = None;
    // An octet origin rides along as "<123>"; '<' and '>' are ordinary
    // atom bytes.
    if let ImapToken::Atom(a) = tokenizer.peek_token(Specials::Default).await? {
        if let Some(inner) = a
            .as_str()
            .strip_prefix('<')
            .and_then(|s| s.strip_suffix('>'))
        {
            tokenizer.read_token(Specials::Default).await?;
            origin = inner.parse().ok();
        }
    }
    let data = tokenizer.read_nstring().await?;
    Ok(BodySection {
        section,
        origin,
        data,
    })
}

/// Skip the value of an attribute this parser does not know.
async fn skip_value(tokenizer: &mut Tokenizer) -> Result<()> {
    let mut scratch = Vec::new();
    let mut depth = 0u32;
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::OpenParen | ImapToken::OpenBracket => depth += 1,
            ImapToken::CloseParen | ImapToken::CloseBracket => {
                if depth == 0 {
                    return Err(Error::Protocol("unbalanced fetch attribute".into()));
                }
                depth -= 1;
                if depth == 0 {
                    return Ok(());
                }
            }
            ImapToken::Literal(n) => {
                scratch.clear();
                tokenizer.read_literal(n, &mut scratch).await?;
                if depth == 0 {
                    return Ok(());
                }
            }
            ImapToken::Eoln => {
                return Err(Error::Protocol("unterminated fetch attribute".into()));
            }
            _ => {
                if depth == 0 {
                    return Ok(());
                }
            }
        }
    }
}

/// Parse `(item value ...)`; the sequence number and the FETCH atom
/// have been consumed by the dispatcher. `quirks` reaches the
/// body-structure parser's per-server tolerances.
pub async fn read_fetch_attributes(
    tokenizer: &mut Tokenizer,
    seq: u32,
    quirks: QuirksMode,
) -> Result<MessageAttributes> {
    tokenizer.expect(&ImapToken::OpenParen).await?;
    let mut attrs = MessageAttributes {
        seq,
        ..MessageAttributes::default()
    };

    loop {
        let token = tokenizer.read_token(Specials::Default).await?;
        let name = match &token {
            ImapToken::CloseParen => return Ok(attrs),
            ImapToken::Atom(a) => a.as_str().to_ascii_uppercase(),
            other => {
                return Err(Error::Protocol(format!(
                    "expected fetch attribute, got {}",
                    other.describe()
                )));
            }
        };

        match name.as_str() {
            "UID" => attrs.uid = Some(tokenizer.read_u32().await?),
            "FLAGS" => attrs.flags = Some(read_flag_list(tokenizer).await?),
            "INTERNALDATE" => attrs.internal_date = read_date(tokenizer).await?,
            "SAVEDATE" => attrs.save_date = read_date(tokenizer).await?,
            "RFC822.SIZE" => attrs.size = Some(tokenizer.read_u32().await?),
            "MODSEQ" => attrs.mod_seq = Some(read_paren_u64(tokenizer).await?),
            "ENVELOPE" => attrs.envelope = Some(read_envelope(tokenizer).await?),
            "BODYSTRUCTURE" => attrs.body_structure = Some(read_body(tokenizer, quirks).await?),
            "BODY" => {
                if tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenBracket {
                    tokenizer.read_token(Specials::Default).await?;
                    let section = read_section(tokenizer).await?;
                    attrs.sections.push(section);
                } else {
                    attrs.body_structure = Some(read_body(tokenizer, quirks).await?);
                }
            }
            "RFC822" => {
                attrs.sections.push(BodySection {
                    section: String::new(),
                    origin: None,
                    data: tokenizer.read_nstring().await?,
                });
            }
            "RFC822.HEADER" => {
                attrs.sections.push(BodySection {
                    section: "HEADER".into(),
                    origin: None,
                    data: tokenizer.read_nstring().await?,
                });
            }
            "RFC822.TEXT" => {
                attrs.sections.push(BodySection {
                    section: "TEXT".into(),
                    origin: None,
                    data: tokenizer.read_nstring().await?,
                });
            }
            "EMAILID" => attrs.email_id = read_objectid(tokenizer).await?,
            "THREADID" => attrs.thread_id = read_objectid(tokenizer).await?,
            "X-GM-MSGID" => attrs.gmail_message_id = Some(tokenizer.read_u64().await?),
            "X-GM-THRID" => attrs.gmail_thread_id = Some(tokenizer.read_u64().await?),
            "X-GM-LABELS" => attrs.gmail_labels = Some(read_label_list(tokenizer).await?),
            other => {
                tracing::debug!("skipping unknown fetch attribute {other}");
                skip_value(tokenizer).await?;
            }
        }
    }
}
