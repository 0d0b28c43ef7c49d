//! Unique identifiers and UID sets
//!
//! A message's full identity is (UIDVALIDITY, UID): the UID alone is
//! only meaningful while the mailbox keeps its validity value. UID
//! sets are kept range-compressed in the wire order (`1:5,7,10:*`);
//! `*` is represented internally as `u32::MAX`.

use crate::error::{Error, Result};
use std::fmt;
use std::str::FromStr;

/// A message UID qualified by the mailbox UIDVALIDITY it belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct UniqueId {
    pub validity: u32,
    pub id: u32,
}

impl UniqueId {
    #[must_use]
    pub const fn new(validity: u32, id: u32) -> Self {
        Self { validity, id }
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}

/// An ordered, range-compressed set of UIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UniqueIdSet {
    /// Sorted, inclusive, non-overlapping, non-adjacent.
    ranges: Vec<(u32, u32)>,
}

fn segment(a: u32, b: u32, out: &mut String) {
    use fmt::Write as _;
    let write_bound = |out: &mut String, v: u32| {
        if v == u32::MAX {
            out.push('*');
        } else {
            let _ = write!(out, "{v}");
        }
    };
    write_bound(out, a);
    if a != b {
        out.push(':');
        write_bound(out, b);
    }
}

impl UniqueIdSet {
    #[must_use]
    pub const fn new() -> Self {
        Self { ranges: Vec::new() }
    }

    pub fn from_ids<I: IntoIterator<Item = u32>>(ids: I) -> Self {
        let mut set = Self::new();
        for id in ids {
            set.add(id);
        }
        set
    }

    pub fn add(&mut self, id: u32) {
        self.add_range(id, id);
    }

    /// Insert an inclusive range; bounds may arrive swapped (`4:2`).
    pub fn add_range(&mut self, lo: u32, hi: u32) {
        let (lo, hi) = if lo <= hi { (lo, hi) } else { (hi, lo) };
        self.ranges.push((lo, hi));
        self.ranges.sort_unstable();
        let mut merged: Vec<(u32, u32)> = Vec::with_capacity(self.ranges.len());
        for &(a, b) in &self.ranges {
            if let Some(last) = merged.last_mut() {
                if a <= last.1.saturating_add(1) {
                    last.1 = last.1.max(b);
                    continue;
                }
            }
            merged.push((a, b));
        }
        self.ranges = merged;
    }

    #[must_use]
    pub fn contains(&self, id: u32) -> bool {
        self.ranges.iter().any(|&(a, b)| a <= id && id <= b)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }

    /// Number of UIDs in the set.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.ranges
            .iter()
            .map(|&(a, b)| u64::from(b - a) + 1)
            .sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = u32> + '_ {
        self.ranges.iter().flat_map(|&(a, b)| a..=b)
    }

    /// Split the set into subsets whose serialised form stays within
    /// `max_len` octets each. Concatenating the subsets in order gives
    /// back the original set.
    #[must_use]
    pub fn enumerate_subsets(&self, max_len: usize) -> Vec<Self> {
        let mut subsets = Vec::new();
        let mut current = Self::new();
        let mut text = String::new();
        for &(a, b) in &self.ranges {
            let mut piece = String::new();
            segment(a, b, &mut piece);
            let extra = if text.is_empty() {
                piece.len()
            } else {
                piece.len() + 1
            };
            if !text.is_empty() && text.len() + extra > max_len {
                subsets.push(std::mem::take(&mut current));
                text.clear();
            }
            if !text.is_empty() {
                text.push(',');
            }
            text.push_str(&piece);
            current.ranges.push((a, b));
        }
        if !current.is_empty() {
            subsets.push(current);
        }
        subsets
    }
}

impl fmt::Display for UniqueIdSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for (i, &(a, b)) in self.ranges.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            segment(a, b, &mut out);
        }
        f.write_str(&out)
    }
}

impl FromStr for UniqueIdSet {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        fn bound(s: &str) -> Result<u32> {
            if s == "*" {
                return Ok(u32::MAX);
            }
            s.parse()
                .map_err(|_| Error::Argument(format!("invalid UID set element: {s:?}")))
        }

        if s.is_empty() {
            return Err(Error::Argument("empty UID set".into()));
        }
        let mut set = Self::new();
        for piece in s.split(',') {
            match piece.split_once(':') {
                Some((lo, hi)) => set.add_range(bound(lo)?, bound(hi)?),
                None => set.add(bound(piece)?),
            }
        }
        Ok(set)
    }
}

impl FromIterator<u32> for UniqueIdSet {
    fn from_iter<I: IntoIterator<Item = u32>>(iter: I) -> Self {
        Self::from_ids(iter)
    }
}
