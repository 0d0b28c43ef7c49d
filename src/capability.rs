//! CAPABILITY data
//!
//! Capabilities are a bit set plus a handful of open-ended families
//! (`AUTH=`, `COMPRESS=`, `THREAD=`, ...) that collect into side sets.
//! Every CAPABILITY response replaces the previous state wholesale --
//! except STARTTLS, which must survive the post-upgrade re-query.

use crate::error::Result;
use crate::token::{ImapToken, Specials};
use crate::tokenizer::Tokenizer;
use bitflags::bitflags;
use std::collections::BTreeSet;
use std::fmt;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct Capabilities: u64 {
        const IMAP4 = 1 << 0;
        const IMAP4REV1 = 1 << 1;
        /// STATUS is mandatory in IMAP4/IMAP4rev1; the bit is implied
        /// by either version atom.
        const STATUS = 1 << 2;
        const STARTTLS = 1 << 3;
        const LOGIN_DISABLED = 1 << 4;
        const SASL_IR = 1 << 5;
        const LITERAL_PLUS = 1 << 6;
        const LITERAL_MINUS = 1 << 7;
        const IDLE = 1 << 8;
        const NAMESPACE = 1 << 9;
        const ID = 1 << 10;
        const UIDPLUS = 1 << 11;
        const CONDSTORE = 1 << 12;
        const QRESYNC = 1 << 13;
        const ENABLE = 1 << 14;
        const LIST_EXTENDED = 1 << 15;
        const LIST_STATUS = 1 << 16;
        const METADATA = 1 << 17;
        const METADATA_SERVER = 1 << 18;
        const SPECIAL_USE = 1 << 19;
        const CREATE_SPECIAL_USE = 1 << 20;
        const MOVE = 1 << 21;
        const UTF8_ACCEPT = 1 << 22;
        const UTF8_ONLY = 1 << 23;
        const OBJECTID = 1 << 24;
        const REPLACE = 1 << 25;
        const SAVEDATE = 1 << 26;
        const NOTIFY = 1 << 27;
        const COMPRESS = 1 << 28;
        const ACL = 1 << 29;
        const QUOTA = 1 << 30;
        const SORT = 1 << 31;
        const THREAD = 1 << 32;
        const CHILDREN = 1 << 33;
        const UNSELECT = 1 << 34;
        const ESEARCH = 1 << 35;
        const WITHIN = 1 << 36;
        const APPEND_LIMIT = 1 << 37;
        const XLIST = 1 << 38;
        /// X-GM-EXT-1: Gmail extensions (X-GM-MSGID, X-GM-LABELS, ...).
        const GMAIL_EXT1 = 1 << 39;
    }
}

const CAPABILITY_ATOMS: &[(&str, Capabilities)] = &[
    ("IMAP4", Capabilities::IMAP4),
    ("IMAP4REV1", Capabilities::IMAP4REV1),
    ("STATUS", Capabilities::STATUS),
    ("STARTTLS", Capabilities::STARTTLS),
    ("LOGINDISABLED", Capabilities::LOGIN_DISABLED),
    ("SASL-IR", Capabilities::SASL_IR),
    ("LITERAL+", Capabilities::LITERAL_PLUS),
    ("LITERAL-", Capabilities::LITERAL_MINUS),
    ("IDLE", Capabilities::IDLE),
    ("NAMESPACE", Capabilities::NAMESPACE),
    ("ID", Capabilities::ID),
    ("UIDPLUS", Capabilities::UIDPLUS),
    ("CONDSTORE", Capabilities::CONDSTORE),
    ("QRESYNC", Capabilities::QRESYNC),
    ("ENABLE", Capabilities::ENABLE),
    ("LIST-EXTENDED", Capabilities::LIST_EXTENDED),
    ("LIST-STATUS", Capabilities::LIST_STATUS),
    ("METADATA", Capabilities::METADATA),
    ("METADATA-SERVER", Capabilities::METADATA_SERVER),
    ("SPECIAL-USE", Capabilities::SPECIAL_USE),
    ("CREATE-SPECIAL-USE", Capabilities::CREATE_SPECIAL_USE),
    ("MOVE", Capabilities::MOVE),
    ("UTF8=ACCEPT", Capabilities::UTF8_ACCEPT),
    ("UTF8=ONLY", Capabilities::UTF8_ONLY),
    ("OBJECTID", Capabilities::OBJECTID),
    ("REPLACE", Capabilities::REPLACE),
    ("SAVEDATE", Capabilities::SAVEDATE),
    ("NOTIFY", Capabilities::NOTIFY),
    ("ACL", Capabilities::ACL),
    ("QUOTA", Capabilities::QUOTA),
    ("SORT", Capabilities::SORT),
    ("CHILDREN", Capabilities::CHILDREN),
    ("UNSELECT", Capabilities::UNSELECT),
    ("ESEARCH", Capabilities::ESEARCH),
    ("WITHIN", Capabilities::WITHIN),
    ("APPENDLIMIT", Capabilities::APPEND_LIMIT),
    ("XLIST", Capabilities::XLIST),
    ("X-GM-EXT-1", Capabilities::GMAIL_EXT1),
];

/// Server-side threading algorithms (`THREAD=` capabilities).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ThreadAlgo {
    OrderedSubject,
    References,
    Refs,
}

impl ThreadAlgo {
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "ORDEREDSUBJECT" => Some(Self::OrderedSubject),
            "REFERENCES" => Some(Self::References),
            "REFS" => Some(Self::Refs),
            _ => None,
        }
    }
}

impl fmt::Display for ThreadAlgo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::OrderedSubject => "ORDEREDSUBJECT",
            Self::References => "REFERENCES",
            Self::Refs => "REFS",
        })
    }
}

/// ACL rights characters advertised via `RIGHTS=`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccessRights {
    chars: String,
}

impl AccessRights {
    #[must_use]
    pub fn contains(&self, right: char) -> bool {
        self.chars.contains(right)
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

/// Everything a CAPABILITY response conveys.
#[derive(Debug, Clone, Default)]
pub struct CapabilitySets {
    pub caps: Capabilities,
    pub auth_mechanisms: BTreeSet<String>,
    pub compression_algorithms: BTreeSet<String>,
    pub supported_contexts: BTreeSet<String>,
    pub threading_algorithms: BTreeSet<ThreadAlgo>,
    pub rights: AccessRights,
    pub append_limit: Option<u32>,
    pub i18n_level: i32,
}

impl CapabilitySets {
    /// Drop everything except STARTTLS, which must survive the
    /// re-query after a TLS upgrade.
    fn reset(&mut self) {
        self.caps &= Capabilities::STARTTLS;
        self.auth_mechanisms.clear();
        self.compression_algorithms.clear();
        self.supported_contexts.clear();
        self.threading_algorithms.clear();
        self.rights = AccessRights::default();
        self.append_limit = None;
        self.i18n_level = 0;
    }

    fn apply_atom(&mut self, atom: &str) {
        let upper = atom.to_ascii_uppercase();
        if let Some(mech) = upper.strip_prefix("AUTH=") {
            self.auth_mechanisms.insert(mech.to_string());
            return;
        }
        if let Some(alg) = upper.strip_prefix("COMPRESS=") {
            self.caps |= Capabilities::COMPRESS;
            self.compression_algorithms.insert(alg.to_string());
            return;
        }
        if let Some(ctx) = upper.strip_prefix("CONTEXT=") {
            self.supported_contexts.insert(ctx.to_string());
            return;
        }
        if let Some(algo) = upper.strip_prefix("THREAD=") {
            self.caps |= Capabilities::THREAD;
            if let Some(parsed) = ThreadAlgo::parse(algo) {
                self.threading_algorithms.insert(parsed);
            }
            return;
        }
        if let Some(limit) = upper.strip_prefix("APPENDLIMIT=") {
            self.caps |= Capabilities::APPEND_LIMIT;
            self.append_limit = limit.parse().ok();
            return;
        }
        if let Some(level) = upper.strip_prefix("I18NLEVEL=") {
            self.i18n_level = level.parse().unwrap_or(0);
            return;
        }
        if let Some(rights) = upper.strip_prefix("RIGHTS=") {
            self.caps |= Capabilities::ACL;
            self.rights.chars = rights.to_string();
            return;
        }
        for (name, bit) in CAPABILITY_ATOMS {
            if upper == *name {
                self.caps |= *bit;
                return;
            }
        }
        tracing::debug!("unrecognised capability {atom}");
    }

    fn normalise(&mut self) {
        if self
            .caps
            .intersects(Capabilities::IMAP4 | Capabilities::IMAP4REV1)
        {
            self.caps |= Capabilities::STATUS;
        }
        // QRESYNC subsumes CONDSTORE, UTF8=ONLY subsumes UTF8=ACCEPT.
        if self.caps.contains(Capabilities::QRESYNC) {
            self.caps |= Capabilities::CONDSTORE;
        }
        if self.caps.contains(Capabilities::UTF8_ONLY) {
            self.caps |= Capabilities::UTF8_ACCEPT;
        }
    }
}

/// Parse the atoms of a CAPABILITY response.
///
/// Works both for the untagged `* CAPABILITY ...` line and for a
/// bracketed `[CAPABILITY ...]` response code: parsing stops at `Eoln`
/// or `]`, which is left unconsumed for the caller.
pub async fn read_capabilities(
    tokenizer: &mut Tokenizer,
    sets: &mut CapabilitySets,
) -> Result<()> {
    sets.reset();
    loop {
        let token = tokenizer.read_token(Specials::Default).await?;
        match token {
            ImapToken::Eoln | ImapToken::CloseBracket => {
                tokenizer.unget_token(token);
                sets.normalise();
                return Ok(());
            }
            ImapToken::Atom(atom) => sets.apply_atom(atom.as_str()),
            // Tolerate anything else; unknown syntax in a capability
            // list is not worth dropping the connection over.
            other => {
                tracing::debug!("ignoring {} in capability data", other.describe());
            }
        }
    }
}
