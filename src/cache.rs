//! Interning token cache
//!
//! IMAP servers repeat the same atoms (`FETCH`, `EXISTS`, flag names)
//! thousands of times per session. The tokenizer funnels every atom,
//! flag, and quoted string through this bounded LRU so repeats share
//! one `TokenText` allocation instead of decoding again.

use crate::token::{TokenKind, TokenText};
use lru::LruCache;
use std::num::NonZeroUsize;
use std::sync::Arc;

/// LRU of decoded token texts keyed by (kind, raw bytes).
pub struct TokenCache {
    entries: LruCache<(TokenKind, Vec<u8>), Arc<TokenText>>,
    hits: u64,
    misses: u64,
}

impl TokenCache {
    pub const CAPACITY: usize = 128;

    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: LruCache::new(NonZeroUsize::new(Self::CAPACITY).unwrap()),
            hits: 0,
            misses: 0,
        }
    }

    /// Look up or create the shared text for a token.
    ///
    /// A hit moves the entry to the head; a miss decodes the bytes and
    /// may evict the least recently used entry.
    pub fn intern(&mut self, kind: TokenKind, bytes: &[u8]) -> Arc<TokenText> {
        let key = (kind, bytes.to_vec());
        if let Some(hit) = self.entries.get(&key) {
            self.hits += 1;
            return Arc::clone(hit);
        }
        self.misses += 1;
        let value = Arc::new(TokenText::new(key.1.clone()));
        self.entries.push(key, Arc::clone(&value));
        value
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn hits(&self) -> u64 {
        self.hits
    }

    #[must_use]
    pub const fn misses(&self) -> u64 {
        self.misses
    }
}

impl Default for TokenCache {
    fn default() -> Self {
        Self::new()
    }
}
