//! LIST / LSUB, STATUS, and NAMESPACE wire parsing
//!
//! These parsers produce plain data; applying it to the folder cache
//! (attribute merge rules, rename aliasing, counter updates) is the
//! engine's job, so the grammar stays testable in isolation.

use crate::error::{Error, Result};
use crate::folder::FolderAttributes;
use crate::quirks::QuirksMode;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;

/// One `* LIST (...)` or `* LSUB (...)` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListResponse {
    pub attributes: FolderAttributes,
    pub delimiter: Option<char>,
    /// Encoded mailbox name with any trailing delimiter trimmed.
    pub encoded_name: String,
    /// `OLDNAME` extension: the mailbox this one was renamed from.
    pub old_name: Option<String>,
    /// A `CHILDINFO` extension item was present.
    pub child_info: bool,
}

fn trim_trailing_delimiter(name: &mut String, delimiter: Option<char>) {
    if let Some(delim) = delimiter {
        if name.len() > delim.len_utf8() && name.ends_with(delim) {
            name.truncate(name.len() - delim.len_utf8());
        }
    }
}

/// `NIL` or a quoted single-character delimiter.
async fn read_delimiter(tokenizer: &mut Tokenizer) -> Result<Option<char>> {
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => Ok(None),
        ImapToken::QString(s) => Ok(s.as_str().chars().next()),
        other => Err(Error::Protocol(format!(
            "expected hierarchy delimiter, got {}",
            other.describe()
        ))),
    }
}

async fn read_mailbox_name(tokenizer: &mut Tokenizer) -> Result<String> {
    let bytes = tokenizer.read_astring(Specials::Atom).await?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Parse the remainder of a LIST/LSUB response after the LIST atom.
/// `quirks` enables the Exchange tab-in-name repair.
pub async fn read_list_response(
    tokenizer: &mut Tokenizer,
    quirks: QuirksMode,
) -> Result<ListResponse> {
    let mut response = ListResponse::default();

    tokenizer.expect(&ImapToken::OpenParen).await?;
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => break,
            ImapToken::Flag(flag) | ImapToken::Atom(flag) => {
                if let Some(attr) = FolderAttributes::from_atom(flag.as_str()) {
                    response.attributes |= attr;
                } else {
                    tracing::debug!("unknown mailbox attribute {}", flag.as_str());
                }
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in mailbox attribute list",
                    other.describe()
                )));
            }
        }
    }

    response.delimiter = read_delimiter(tokenizer).await?;
    response.encoded_name = read_mailbox_name(tokenizer).await?;
    if quirks.tab_in_mailbox_names() {
        // Exchange sends unquoted names with embedded tabs; the
        // tokenizer splits them, so glue the pieces back together.
        loop {
            match tokenizer.peek_token(Specials::Atom).await? {
                ImapToken::Atom(piece) => {
                    tokenizer.read_token(Specials::Atom).await?;
                    response.encoded_name.push('\t');
                    response.encoded_name.push_str(piece.as_str());
                }
                _ => break,
            }
        }
    }
    trim_trailing_delimiter(&mut response.encoded_name, response.delimiter);

    // Optional LIST-EXTENDED extension items: ("OLDNAME" ("x") ...).
    if tokenizer.peek_token(Specials::Default).await? == ImapToken::OpenParen {
        tokenizer.read_token(Specials::Default).await?;
        loop {
            let tag = match tokenizer.read_token(Specials::Default).await? {
                ImapToken::CloseParen => break,
                ImapToken::Atom(t) | ImapToken::QString(t) => t.as_str().to_ascii_uppercase(),
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} in LIST extensions",
                        other.describe()
                    )));
                }
            };
            let mut values = Vec::new();
            match tokenizer.read_token(Specials::Default).await? {
                ImapToken::OpenParen => loop {
                    match tokenizer.read_token(Specials::Default).await? {
                        ImapToken::CloseParen => break,
                        ImapToken::Atom(t) | ImapToken::QString(t) => {
                            values.push(t.as_str().to_string());
                        }
                        ImapToken::Literal(n) => {
                            let mut bytes = Vec::new();
                            tokenizer.read_literal(n, &mut bytes).await?;
                            values.push(String::from_utf8_lossy(&bytes).into_owned());
                        }
                        ImapToken::Nil => {}
                        other => {
                            return Err(Error::Protocol(format!(
                                "unexpected {} in LIST extension value",
                                other.describe()
                            )));
                        }
                    }
                },
                ImapToken::Atom(t) | ImapToken::QString(t) => {
                    values.push(t.as_str().to_string());
                }
                ImapToken::Nil => {}
                other => {
                    return Err(Error::Protocol(format!(
                        "unexpected {} as LIST extension value",
                        other.describe()
                    )));
                }
            }
            match tag.as_str() {
                "OLDNAME" => response.old_name = values.into_iter().next(),
                "CHILDINFO" => response.child_info = true,
                other => tracing::debug!("ignoring LIST extension {other}"),
            }
        }
    }

    Ok(response)
}

/// One `* STATUS mailbox (...)` line.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusResponse {
    pub encoded_name: String,
    pub messages: Option<u32>,
    pub recent: Option<u32>,
    pub uid_next: Option<u32>,
    pub uid_validity: Option<u32>,
    pub unseen: Option<u32>,
    pub highest_mod_seq: Option<u64>,
    pub append_limit: Option<u32>,
    pub size: Option<u64>,
    pub mailbox_id: Option<String>,
}

/// Parse the remainder of a STATUS response after the STATUS atom.
pub async fn read_status_response(tokenizer: &mut Tokenizer) -> Result<StatusResponse> {
    let mut response = StatusResponse {
        encoded_name: read_mailbox_name(tokenizer).await?,
        ..StatusResponse::default()
    };

    tokenizer.expect(&ImapToken::OpenParen).await?;
    loop {
        let item = match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(response),
            ImapToken::Atom(a) => a.as_str().to_ascii_uppercase(),
            other => {
                return Err(Error::Protocol(format!(
                    "expected STATUS item, got {}",
                    other.describe()
                )));
            }
        };
        match item.as_str() {
            "MESSAGES" => response.messages = Some(tokenizer.read_u32().await?),
            "RECENT" => response.recent = Some(tokenizer.read_u32().await?),
            "UIDNEXT" => response.uid_next = Some(tokenizer.read_u32().await?),
            "UIDVALIDITY" => response.uid_validity = Some(tokenizer.read_u32().await?),
            "UNSEEN" => response.unseen = Some(tokenizer.read_u32().await?),
            "HIGHESTMODSEQ" => response.highest_mod_seq = Some(tokenizer.read_u64().await?),
            "APPENDLIMIT" => response.append_limit = Some(tokenizer.read_u32().await?),
            "SIZE" => response.size = Some(tokenizer.read_u64().await?),
            "MAILBOXID" => {
                tokenizer.expect(&ImapToken::OpenParen).await?;
                let id = tokenizer.read_astring(Specials::Default).await?;
                tokenizer.expect(&ImapToken::CloseParen).await?;
                response.mailbox_id = Some(String::from_utf8_lossy(&id).into_owned());
            }
            other => {
                tracing::debug!("skipping unknown STATUS item {other}");
                tokenizer.read_token(Specials::Default).await?;
            }
        }
    }
}

/// One namespace: its prefix (trailing delimiter trimmed) and the
/// hierarchy delimiter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceEntry {
    pub prefix: String,
    pub delimiter: Option<char>,
}

/// The three namespace classes of RFC 2342.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NamespaceLists {
    pub personal: Vec<NamespaceEntry>,
    pub other: Vec<NamespaceEntry>,
    pub shared: Vec<NamespaceEntry>,
}

async fn read_namespace_list(tokenizer: &mut Tokenizer) -> Result<Vec<NamespaceEntry>> {
    let mut entries = Vec::new();
    match tokenizer.read_token(Specials::Default).await? {
        ImapToken::Nil => return Ok(entries),
        ImapToken::OpenParen => {}
        other => {
            return Err(Error::Protocol(format!(
                "expected namespace list, got {}",
                other.describe()
            )));
        }
    }
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(entries),
            ImapToken::OpenParen => {
                let prefix_bytes = tokenizer.read_astring(Specials::Atom).await?;
                let delimiter = read_delimiter(tokenizer).await?;
                let mut prefix = String::from_utf8_lossy(&prefix_bytes).into_owned();
                trim_trailing_delimiter(&mut prefix, delimiter);
                // Namespace response extensions are ignored.
                let mut depth = 0u32;
                loop {
                    match tokenizer.read_token(Specials::Default).await? {
                        ImapToken::OpenParen => depth += 1,
                        ImapToken::CloseParen => {
                            if depth == 0 {
                                break;
                            }
                            depth -= 1;
                        }
                        ImapToken::Eoln => {
                            return Err(Error::Protocol(
                                "unterminated namespace entry".into(),
                            ));
                        }
                        _ => {}
                    }
                }
                entries.push(NamespaceEntry { prefix, delimiter });
            }
            other => {
                return Err(Error::Protocol(format!(
                    "unexpected {} in namespace list",
                    other.describe()
                )));
            }
        }
    }
}

/// Parse the remainder of a NAMESPACE response: personal, other
/// users', shared.
pub async fn read_namespace_response(tokenizer: &mut Tokenizer) -> Result<NamespaceLists> {
    Ok(NamespaceLists {
        personal: read_namespace_list(tokenizer).await?,
        other: read_namespace_list(tokenizer).await?,
        shared: read_namespace_list(tokenizer).await?,
    })
}
