//! IMAP folders and the per-engine folder cache
//!
//! Folders are created lazily the first time a LIST, LSUB, STATUS, or
//! NAMESPACE response mentions them and live for the life of the
//! engine. The cache key is the server's encoded name canonicalised so
//! that `inbox`, `INBOX`, and `Inbox` collide: RFC 3501 makes the
//! INBOX segment case-insensitive, but only the INBOX segment.

use crate::flag::FlagSet;
use crate::uidset::UniqueId;
use crate::utf7;
use bitflags::bitflags;
use std::collections::HashMap;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FolderAttributes: u32 {
        const NO_INFERIORS = 1 << 0;
        const NO_SELECT = 1 << 1;
        const MARKED = 1 << 2;
        const UNMARKED = 1 << 3;
        const HAS_CHILDREN = 1 << 4;
        const HAS_NO_CHILDREN = 1 << 5;
        const INBOX = 1 << 6;
        const ALL = 1 << 7;
        const ARCHIVE = 1 << 8;
        const DRAFTS = 1 << 9;
        const FLAGGED = 1 << 10;
        const IMPORTANT = 1 << 11;
        const JUNK = 1 << 12;
        const SENT = 1 << 13;
        const TRASH = 1 << 14;
        const SUBSCRIBED = 1 << 15;
        const NON_EXISTENT = 1 << 16;
        const REMOTE = 1 << 17;
    }
}

impl FolderAttributes {
    /// Map a `\Attribute` atom from a LIST/LSUB response,
    /// case-insensitively. Unknown attributes map to `None` and are
    /// ignored by the caller.
    #[must_use]
    pub fn from_atom(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "\\noinferiors" => Some(Self::NO_INFERIORS),
            "\\noselect" => Some(Self::NO_SELECT),
            "\\marked" => Some(Self::MARKED),
            "\\unmarked" => Some(Self::UNMARKED),
            "\\haschildren" => Some(Self::HAS_CHILDREN),
            "\\hasnochildren" => Some(Self::HAS_NO_CHILDREN),
            "\\inbox" => Some(Self::INBOX),
            "\\all" => Some(Self::ALL),
            "\\archive" => Some(Self::ARCHIVE),
            "\\drafts" => Some(Self::DRAFTS),
            "\\flagged" | "\\starred" => Some(Self::FLAGGED),
            "\\important" => Some(Self::IMPORTANT),
            "\\junk" | "\\spam" => Some(Self::JUNK),
            "\\sent" => Some(Self::SENT),
            "\\trash" => Some(Self::TRASH),
            "\\subscribed" => Some(Self::SUBSCRIBED),
            "\\nonexistent" => Some(Self::NON_EXISTENT),
            "\\remote" => Some(Self::REMOTE),
            _ => None,
        }
    }

    /// The special-use subset (RFC 6154 plus `\Inbox`/`\Important`).
    #[must_use]
    pub const fn special_use() -> Self {
        Self::INBOX
            .union(Self::ALL)
            .union(Self::ARCHIVE)
            .union(Self::DRAFTS)
            .union(Self::FLAGGED)
            .union(Self::IMPORTANT)
            .union(Self::JUNK)
            .union(Self::SENT)
            .union(Self::TRASH)
    }
}

/// Stable handle into the engine's folder cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FolderId(usize);

/// A cached mailbox.
#[derive(Debug, Clone, Default)]
pub struct Folder {
    /// Name exactly as the server spells it on the wire.
    pub encoded_name: String,
    /// Decoded (modified UTF-7 or UTF-8) display name.
    pub full_name: String,
    pub directory_separator: Option<char>,
    pub attributes: FolderAttributes,
    pub parent: Option<FolderId>,
    pub is_namespace: bool,
    pub permanent_flags: FlagSet,
    pub accepted_flags: FlagSet,
    pub uid_validity: u32,
    pub uid_next: Option<UniqueId>,
    pub highest_mod_seq: u64,
    pub unread: u32,
    pub recent: u32,
    pub exists: u32,
    pub size: Option<u64>,
    pub id: Option<String>,
    pub append_limit: Option<u32>,
}

impl Folder {
    #[must_use]
    pub fn is_inbox(&self) -> bool {
        self.encoded_name.eq_ignore_ascii_case("INBOX")
    }

    /// A `\NonExistent` observation wipes the transient counters; they
    /// belong to a mailbox that is not there any more.
    pub fn clear_counters(&mut self) {
        self.exists = 0;
        self.recent = 0;
        self.unread = 0;
        self.uid_next = None;
        self.highest_mod_seq = 0;
    }
}

/// Canonicalise an encoded name: the leading INBOX segment (and only
/// that segment) is case-folded, when it stands alone or is followed
/// by the directory separator.
#[must_use]
pub fn canonical_key(encoded: &str, separator: Option<char>) -> String {
    if let Some(prefix) = encoded.get(..5) {
        if prefix.eq_ignore_ascii_case("INBOX") {
            let rest = &encoded[5..];
            let at_boundary =
                rest.is_empty() || separator.is_some_and(|sep| rest.starts_with(sep));
            if at_boundary {
                return format!("INBOX{rest}");
            }
        }
    }
    encoded.to_string()
}

/// The engine's mapping from encoded mailbox names to folder slots.
///
/// Slots are never removed; renames alias the old key onto the new
/// slot so both names resolve to the same folder for the rest of the
/// session.
#[derive(Debug, Default)]
pub struct FolderCache {
    folders: Vec<Folder>,
    index: HashMap<String, usize>,
    /// Fixed once the INBOX hierarchy delimiter has been observed.
    separator: Option<char>,
}

impl FolderCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn separator(&self) -> Option<char> {
        self.separator
    }

    pub fn observe_separator(&mut self, separator: char) {
        if self.separator.is_none() {
            self.separator = Some(separator);
        }
    }

    #[must_use]
    pub fn lookup(&self, encoded: &str) -> Option<FolderId> {
        self.index
            .get(&canonical_key(encoded, self.separator))
            .copied()
            .map(FolderId)
    }

    #[must_use]
    pub fn get(&self, id: FolderId) -> &Folder {
        &self.folders[id.0]
    }

    pub fn get_mut(&mut self, id: FolderId) -> &mut Folder {
        &mut self.folders[id.0]
    }

    /// Look up or lazily create the folder for an encoded name.
    ///
    /// `utf8_enabled` selects between raw UTF-8 and modified UTF-7 for
    /// the decoded display name.
    pub fn get_or_create(&mut self, encoded: &str, utf8_enabled: bool) -> FolderId {
        let key = canonical_key(encoded, self.separator);
        if let Some(&slot) = self.index.get(&key) {
            return FolderId(slot);
        }
        let full_name = if utf8_enabled {
            encoded.to_string()
        } else {
            utf7::decode(encoded.as_bytes()).unwrap_or_else(|| encoded.to_string())
        };
        let slot = self.folders.len();
        self.folders.push(Folder {
            encoded_name: encoded.to_string(),
            full_name,
            directory_separator: self.separator,
            attributes: if key == "INBOX" {
                FolderAttributes::INBOX
            } else {
                FolderAttributes::default()
            },
            ..Folder::default()
        });
        self.index.insert(key, slot);
        FolderId(slot)
    }

    /// Re-key a folder after an OLDNAME rename notification. The old
    /// key stays in the index as an alias, so session-long lookups of
    /// either name land on the same folder.
    pub fn rename(&mut self, id: FolderId, new_encoded: &str, utf8_enabled: bool) {
        let key = canonical_key(new_encoded, self.separator);
        let folder = &mut self.folders[id.0];
        folder.encoded_name = new_encoded.to_string();
        folder.full_name = if utf8_enabled {
            new_encoded.to_string()
        } else {
            utf7::decode(new_encoded.as_bytes()).unwrap_or_else(|| new_encoded.to_string())
        };
        self.index.insert(key, id.0);
    }

    /// The encoded name of the parent mailbox, if the name has one.
    #[must_use]
    pub fn parent_name(&self, id: FolderId) -> Option<String> {
        let folder = self.get(id);
        let separator = folder.directory_separator.or(self.separator)?;
        let name = &folder.encoded_name;
        name.rfind(separator).map(|pos| name[..pos].to_string())
    }

    pub fn iter(&self) -> impl Iterator<Item = (FolderId, &Folder)> {
        self.folders
            .iter()
            .enumerate()
            .map(|(i, f)| (FolderId(i), f))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.folders.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}
