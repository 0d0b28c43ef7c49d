//! IMAP message flags
//!
//! System flags (`\Seen`, `\Answered`, ...) are a closed set and live
//! in a bit set; user-defined keyword flags ride alongside in a sorted
//! set of atoms. `\*` in a PERMANENTFLAGS list means the server accepts
//! new keywords and maps to `USER_DEFINED`.

use crate::error::Result;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use bitflags::bitflags;
use std::collections::BTreeSet;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MessageFlags: u32 {
        const SEEN = 1 << 0;
        const ANSWERED = 1 << 1;
        const FLAGGED = 1 << 2;
        const DELETED = 1 << 3;
        const DRAFT = 1 << 4;
        const RECENT = 1 << 5;
        /// `\*`: the server accepts arbitrary new keywords.
        const USER_DEFINED = 1 << 6;
    }
}

impl MessageFlags {
    /// Map a `\Flag` wire atom onto its bit, if it is a system flag.
    #[must_use]
    pub fn from_system_flag(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "\\seen" => Some(Self::SEEN),
            "\\answered" => Some(Self::ANSWERED),
            "\\flagged" => Some(Self::FLAGGED),
            "\\deleted" => Some(Self::DELETED),
            "\\draft" => Some(Self::DRAFT),
            "\\recent" => Some(Self::RECENT),
            "\\*" => Some(Self::USER_DEFINED),
            _ => None,
        }
    }
}

/// System flags plus keyword flags, as they appear in FLAGS and
/// PERMANENTFLAGS lists and FETCH FLAGS attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlagSet {
    pub flags: MessageFlags,
    pub keywords: BTreeSet<String>,
}

impl FlagSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.flags.is_empty() && self.keywords.is_empty()
    }
}

impl fmt::Display for FlagSet {
    /// The wire form used in APPEND and STORE flag lists:
    /// space-separated, enclosed in parens.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        f.write_str("(")?;
        for (bit, name) in [
            (MessageFlags::ANSWERED, "\\Answered"),
            (MessageFlags::DELETED, "\\Deleted"),
            (MessageFlags::DRAFT, "\\Draft"),
            (MessageFlags::FLAGGED, "\\Flagged"),
            (MessageFlags::SEEN, "\\Seen"),
        ] {
            if self.flags.contains(bit) {
                if !first {
                    f.write_str(" ")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        for keyword in &self.keywords {
            if !first {
                f.write_str(" ")?;
            }
            f.write_str(keyword)?;
            first = false;
        }
        f.write_str(")")
    }
}

/// Parse a parenthesised flag list; the opening paren has not been
/// consumed yet.
pub async fn read_flag_list(tokenizer: &mut Tokenizer) -> Result<FlagSet> {
    let token = tokenizer.read_token(Specials::Default).await?;
    if token != ImapToken::OpenParen {
        return Err(crate::error::Error::Protocol(format!(
            "expected flag list, got {}",
            token.describe()
        )));
    }
    let mut set = FlagSet::new();
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(set),
            ImapToken::Flag(flag) => {
                if let Some(bit) = MessageFlags::from_system_flag(flag.as_str()) {
                    set.flags |= bit;
                } else {
                    set.keywords.insert(flag.as_str().to_string());
                }
            }
            ImapToken::Atom(atom) => {
                set.keywords.insert(atom.as_str().to_string());
            }
            // Some servers put strings or stray NILs into flag lists;
            // strings become keywords, NIL is dropped.
            ImapToken::QString(s) => {
                set.keywords.insert(s.as_str().to_string());
            }
            ImapToken::Nil => {}
            other => {
                return Err(crate::error::Error::Protocol(format!(
                    "unexpected {} in flag list",
                    other.describe()
                )));
            }
        }
    }
}

/// Parse a Gmail X-GM-LABELS list: astrings and flag-style atoms.
///
/// Gmail quotes the label `"NIL"` when it is a real label; a bare NIL
/// token (SmarterMail-style filler) is skipped.
pub async fn read_label_list(tokenizer: &mut Tokenizer) -> Result<Vec<String>> {
    let mut labels = Vec::new();
    let token = tokenizer.read_token(Specials::Default).await?;
    if token == ImapToken::Nil {
        return Ok(labels);
    }
    if token != ImapToken::OpenParen {
        return Err(crate::error::Error::Protocol(format!(
            "expected label list, got {}",
            token.describe()
        )));
    }
    loop {
        match tokenizer.read_token(Specials::Default).await? {
            ImapToken::CloseParen => return Ok(labels),
            ImapToken::Atom(t) | ImapToken::Flag(t) | ImapToken::QString(t) => {
                labels.push(t.as_str().to_string());
            }
            ImapToken::Literal(n) => {
                let mut bytes = Vec::new();
                tokenizer.read_literal(n, &mut bytes).await?;
                labels.push(String::from_utf8_lossy(&bytes).into_owned());
            }
            ImapToken::Nil => {}
            other => {
                return Err(crate::error::Error::Protocol(format!(
                    "unexpected {} in label list",
                    other.describe()
                )));
            }
        }
    }
}
