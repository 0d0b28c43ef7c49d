//! BODY / BODYSTRUCTURE parsing
//!
//! A body is a parenthesised tree: a part whose first child token is
//! another `(` is a multipart, otherwise a single part whose media
//! type decides the trailing type-specific fields (line counts for
//! text, an embedded envelope and body for message/rfc822).
//!
//! Real servers deviate from the grammar in known ways. A lone
//! media-subtype with no media type, `NIL` where the
//! content-transfer-encoding belongs, and negative octet counts are
//! tolerated for everyone. A nested multipart that reuses its parent's
//! boundary is a GMail bug: it is accepted under `QuirksMode::GMail`
//! and rejected for any other server.

use crate::envelope::{Envelope, read_envelope};
use crate::error::{Error, Result};
use crate::quirks::QuirksMode;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use std::future::Future;
use std::pin::Pin;

/// Common fields of every non-multipart body part.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyFields {
    pub media_type: String,
    pub media_subtype: String,
    pub params: Vec<(String, String)>,
    pub content_id: Option<String>,
    pub description: Option<String>,
    pub encoding: Option<String>,
    pub octets: u32,
}

/// Optional single-part extension data.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BodyExtensions {
    pub md5: Option<String>,
    pub disposition: Option<(String, Vec<(String, String)>)>,
    pub language: Vec<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Multipart {
    pub parts: Vec<BodyStructure>,
    pub media_subtype: String,
    pub params: Vec<(String, String)>,
    pub disposition: Option<(String, Vec<(String, String)>)>,
    pub language: Vec<String>,
    pub location: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BodyStructure {
    Basic {
        fields: BodyFields,
        extensions: BodyExtensions,
    },
    Text {
        fields: BodyFields,
        lines: u32,
        extensions: BodyExtensions,
    },
    Message {
        fields: BodyFields,
        envelope: Box<Envelope>,
        body: Option<Box<BodyStructure>>,
        lines: u32,
        extensions: BodyExtensions,
    },
    Multipart(Multipart),
}

impl BodyStructure {
    /// `type/subtype`, lower-cased.
    #[must_use]
    pub fn content_type(&self) -> String {
        match self {
            Self::Multipart(m) => format!("multipart/{}", m.media_subtype.to_lowercase()),
            Self::Basic { fields, .. }
            | Self::Text { fields, .. }
            | Self::Message { fields, .. } => format!(
                "{}/{}",
                fields.media_type.to_lowercase(),
                fields.media_subtype.to_lowercase()
            ),
        }
    }
}

type BoxFut<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

async fn read_nstring_lossy(tokenizer: &mut Tokenizer) -> Result<Option<String>> {
    Ok(tokenizer
        .read_nstring()
        .await?
        .map(|b| String::from_utf8_lossy(&b).into_owned()))
}

/// Octet and line counts; negative values (seen in the wild) clamp
/// to zero, as does a stray NIL.
async fn read_count(tokenizer: &mut Tokenizer) -> Result<u32> {
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => Ok(0),
        ImapToken::Atom(a) => {
            let signed: i64 = a
                .as_str()
                .parse()
                .map_err(|_| Error::Protocol(format!("bad octet count {:?}", a.as_str())))?;
            Ok(u32::try_from(signed.max(0)).unwrap_or(u32::MAX))
        }
        other => Err(Error::Protocol(format!(
            "expected count, got {}",
            other.describe()
        ))),
    }
}

/// `NIL` or a parenthesised list of key/value string pairs.
async fn read_params(tokenizer: &mut Tokenizer) -> Result<Vec<(String, String)>> {
    let mut params = Vec::new();
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => return Ok(params),
        ImapToken::OpenParen => {}
        other => {
            return Err(Error::Protocol(format!(
                "expected parameter list, got {}",
                other.describe()
            )));
        }
    }
    loop {
        let key = match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(params),
            ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_string(),
            ImapToken::Literal(n) => {
                let mut bytes = Vec::new();
                tokenizer.read_literal(n, &mut bytes).await?;
                String::from_utf8_lossy(&bytes).into_owned()
            }
            ImapToken::Nil => String::new(),
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in parameter list",
                    other.describe()
                )));
            }
        };
        // A dangling key with no value is kept with an empty value.
        if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
            params.push((key, String::new()));
            continue;
        }
        let value = tokenizer.read_astring(Specials::Default).await?;
        params.push((key, String::from_utf8_lossy(&value).into_owned()));
    }
}

/// `NIL` or `(type params)`.
async fn read_disposition(
    tokenizer: &mut Tokenizer,
) -> Result<Option<(String, Vec<(String, String)>)>> {
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => Ok(None),
        ImapToken::OpenParen => {
            let kind = tokenizer.read_astring(Specials::Default).await?;
            let params = read_params(tokenizer).await?;
            tokenizer.expect(&ImapToken::CloseParen).await?;
            Ok(Some((String::from_utf8_lossy(&kind).into_owned(), params)))
        }
        other => Err(Error::Protocol(format!(
            "expected disposition, got {}",
            other.describe()
        ))),
    }
}

/// `NIL`, a single string, or a parenthesised list.
async fn read_language(tokenizer: &mut Tokenizer) -> Result<Vec<String>> {
    let mut languages = Vec::new();
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => {}
        ImapToken::Atom(t) | ImapToken::QString(t) => languages.push(t.as_str().to_string()),
        ImapToken::OpenParen => loop {
            match tokenizer.read_token(Specials::Default).await? {
                ImapToken::CloseParen => break,
                ImapToken::Atom(t) | ImapToken::QString(t) => {
                    languages.push(t.as_str().to_string());
                }
                ImapToken::Nil => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} in language list",
                        other.describe()
                    )));
                }
            }
        },
        other => {
            return Err(Error::Protocol(format!(
                "expected language, got {}",
                other.describe()
            )));
        }
    }
    Ok(languages)
}

/// Consume the rest of the current part, balancing nested parens and
/// draining literals. Future extension fields land here.
async fn drain_part(tokenizer: &mut Tokenizer) -> Result<()> {
    let mut depth = 0u32;
    let mut scratch = Vec::new();
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::OpenParen => depth += 1,
            ImapToken::CloseParen => {
                if depth == 0 {
                    return Ok(());
                }
                depth -= 1;
            }
            ImapToken::Literal(n) => {
                scratch.clear();
                tokenizer.read_literal(n, &mut scratch).await?;
            }
            ImapToken::Eoln => {
                return Err(Error::Protocol("unterminated body structure".into()));
            }
            _ => {}
        }
    }
}

fn boundary_of(params: &[(String, String)]) -> Option<&str> {
    params
        .iter()
        .find(|(key, _)| key.eq_ignore_ascii_case("BOUNDARY"))
        .map(|(_, value)| value.as_str())
}

/// Final validation of a parsed multipart: a direct child multipart
/// sharing this part's boundary cannot nest and is rejected, unless
/// the GMail quirk is in effect.
fn finish_multipart(multipart: Multipart, quirks: QuirksMode) -> Result<BodyStructure> {
    if !quirks.allows_nested_multipart_reuse() {
        if let Some(boundary) = boundary_of(&multipart.params) {
            for part in &multipart.parts {
                if let BodyStructure::Multipart(child) = part {
                    if boundary_of(&child.params) == Some(boundary) {
                        return Err(Error::Protocol(format!(
                            "nested multipart reuses boundary {boundary:?}"
                        )));
                    }
                }
            }
        }
    }
    Ok(BodyStructure::Multipart(multipart))
}

/// Trailing extension data shared by the single-part shapes:
/// `[md5 [disposition [language [location *ext]]]]`.
async fn read_extensions(tokenizer: &mut Tokenizer) -> Result<BodyExtensions> {
    let mut ext = BodyExtensions::default();
    if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
        tokenizer.read_token(Specials::Default).await?;
        return Ok(ext);
    }
    ext.md5 = read_nstring_lossy(tokenizer).await?;
    if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
        tokenizer.read_token(Specials::Default).await?;
        return Ok(ext);
    }
    ext.disposition = read_disposition(tokenizer).await?;
    if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
        tokenizer.read_token(Specials::Default).await?;
        return Ok(ext);
    }
    ext.language = read_language(tokenizer).await?;
    if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
        tokenizer.read_token(Specials::Default).await?;
        return Ok(ext);
    }
    ext.location = read_nstring_lossy(tokenizer).await?;
    drain_part(tokenizer).await?;
    Ok(ext)
}

fn read_body_inner<'a>(
    tokenizer: &'a mut Tokenizer,
    quirks: QuirksMode,
) -> BoxFut<'a, Result<BodyStructure>> {
    Box::pin(async move {
        tokenizer.expect(&ImapToken::OpenParen).await?;

        // Multipart: one or more nested parts before the subtype.
        if tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen {
            let mut multipart = Multipart::default();
            while tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen {
                multipart.parts.push(read_body_inner(tokenizer, quirks).await?);
            }
            multipart.media_subtype = match tokenizer.read_token(Specials::Default).await? {
                ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_string(),
                // Tolerate a missing subtype.
                ImapToken::CloseParen => return finish_multipart(multipart, quirks),
                other => {
                    return Err(Error::Protocol(format!(
                        "expected multipart subtype, got {}",
                        other.describe()
                    )));
                }
            };
            if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
                tokenizer.read_token(Specials::Default).await?;
                return finish_multipart(multipart, quirks);
            }
            multipart.params = read_params(tokenizer).await?;
            if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
                tokenizer.read_token(Specials::Default).await?;
                return finish_multipart(multipart, quirks);
            }
            multipart.disposition = read_disposition(tokenizer).await?;
            if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
                tokenizer.read_token(Specials::Default).await?;
                return finish_multipart(multipart, quirks);
            }
            multipart.language = read_language(tokenizer).await?;
            if tokenizer.peek_token(Specials::Default).await? == ImapToken::CloseParen {
                tokenizer.read_token(Specials::Default).await?;
                return finish_multipart(multipart, quirks);
            }
            multipart.location = read_nstring_lossy(tokenizer).await?;
            drain_part(tokenizer).await?;
            return finish_multipart(multipart, quirks);
        }

        let media_type = match tokenizer.read_token(Specials::Default).await? {
            ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_string(),
            ImapToken::Nil => String::new(),
            other => {
                return Err(Error::Protocol(format!(
                    "expected media type, got {}",
                    other.describe()
                )));
            }
        };

        // Some servers send a lone media-subtype where a part belongs;
        // treat it as a childless multipart of that subtype.
        let subtype_token = tokenizer.read_token(Specials::Default).await?;
        let media_subtype = match &subtype_token {
            ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_string(),
            ImapToken::Nil => String::new(),
            ImapToken::OpenParen | ImapToken::CloseParen => {
                tokenizer.unget_token(subtype_token.clone());
                let mut multipart = Multipart {
                    media_subtype: media_type,
                    ..Multipart::default()
                };
                if tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen {
                    multipart.params = read_params(tokenizer).await?;
                }
                drain_part(tokenizer).await?;
                return finish_multipart(multipart, quirks);
            }
            other => {
                return Err(Error::Protocol(format!(
                    "expected media subtype, got {}",
                    other.describe()
                )));
            }
        };

        let fields = BodyFields {
            media_type,
            media_subtype,
            params: read_params(tokenizer).await?,
            content_id: read_nstring_lossy(tokenizer).await?,
            description: read_nstring_lossy(tokenizer).await?,
            // NIL here is out of spec but seen in the wild.
            encoding: read_nstring_lossy(tokenizer).await?,
            octets: read_count(tokenizer).await?,
        };

        if fields.media_type.eq_ignore_ascii_case("TEXT") {
            let lines = read_count(tokenizer).await?;
            let extensions = read_extensions(tokenizer).await?;
            return Ok(BodyStructure::Text {
                fields,
                lines,
                extensions,
            });
        }

        if fields.media_type.eq_ignore_ascii_case("MESSAGE")
            && fields.media_subtype.eq_ignore_ascii_case("RFC822")
            && tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen
        {
            let envelope = Box::new(read_envelope(tokenizer).await?);
            let body = if tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen {
                Some(Box::new(read_body_inner(tokenizer, quirks).await?))
            } else {
                None
            };
            let lines = read_count(tokenizer).await?;
            let extensions = read_extensions(tokenizer).await?;
            return Ok(BodyStructure::Message {
                fields,
                envelope,
                body,
                lines,
                extensions,
            });
        }

        let extensions = read_extensions(tokenizer).await?;
        Ok(BodyStructure::Basic { fields, extensions })
    })
}

/// Parse a BODY or BODYSTRUCTURE value; the opening paren has not been
/// consumed. `quirks` selects the per-server tolerances.
pub async fn read_body(tokenizer: &mut Tokenizer, quirks: QuirksMode) -> Result<BodyStructure> {
    read_body_inner(tokenizer, quirks).await
}
