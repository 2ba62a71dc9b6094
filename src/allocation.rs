//! Allocation records and per-snapshot call-stack maps
//!
//! A [`SnapshotRecordSet`] is built during one pass over a snapshot's lines
//! and is read-only afterwards: the page mapper consumes it and the differ
//! keeps it around to compare against the following snapshot.

use std::collections::BTreeMap;
use std::fmt;

/// One allocated byte range
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Allocation {
    /// First occupied byte
    pub address: u64,
    /// Number of occupied bytes (never zero)
    pub size: u64,
}

impl Allocation {
    /// Create an allocation, rejecting empty ranges and ranges that run
    /// past the end of the address space
    pub fn new(address: u64, size: u64) -> Option<Self> {
        address
            .checked_add(size.checked_sub(1)?)
            .map(|_| Self { address, size })
    }

    /// Inclusive last occupied byte
    pub fn end_address(&self) -> u64 {
        self.address.saturating_add(self.size - 1)
    }
}

impl fmt::Display for Allocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:#x}, {})", self.address, self.size)
    }
}

/// Disambiguated call-stack tag
///
/// The same tag text may appear on many lines of one snapshot, so each
/// occurrence is keyed by the tag plus the line counter it was first seen
/// at. Ordering is by tag text, then numerically by sequence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagKey {
    tag: String,
    seq: usize,
}

impl TagKey {
    pub fn new(tag: impl Into<String>, seq: usize) -> Self {
        Self {
            tag: tag.into(),
            seq,
        }
    }

    /// Original tag text as it appeared in the trace
    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn seq(&self) -> usize {
        self.seq
    }
}

impl fmt::Display for TagKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.tag, self.seq)
    }
}

/// Allocations owned by one disambiguated key
///
/// The first `own_len` allocations came from the key's own line; anything
/// after that was appended when the same tag reappeared later in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallStackEntry {
    allocations: Vec<Allocation>,
    own_len: usize,
}

impl CallStackEntry {
    pub(crate) fn new(allocations: Vec<Allocation>) -> Self {
        let own_len = allocations.len();
        Self {
            allocations,
            own_len,
        }
    }

    pub(crate) fn extend(&mut self, more: &[Allocation]) {
        self.allocations.extend_from_slice(more);
    }

    /// Every allocation attributed to this key
    pub fn allocations(&self) -> &[Allocation] {
        &self.allocations
    }

    /// Allocations recorded on the key's own line
    pub fn own(&self) -> &[Allocation] {
        &self.allocations[..self.own_len]
    }

    /// Allocations appended by later occurrences of the same tag
    pub fn extension(&self) -> &[Allocation] {
        &self.allocations[self.own_len..]
    }

    pub fn is_extended(&self) -> bool {
        self.allocations.len() > self.own_len
    }
}

/// Ordered map from disambiguated key to its allocations for one snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotRecordSet {
    entries: BTreeMap<TagKey, CallStackEntry>,
}

impl SnapshotRecordSet {
    pub(crate) fn insert(&mut self, key: TagKey, entry: CallStackEntry) {
        self.entries.insert(key, entry);
    }

    pub(crate) fn get_mut(&mut self, key: &TagKey) -> Option<&mut CallStackEntry> {
        self.entries.get_mut(key)
    }

    pub fn get(&self, key: &TagKey) -> Option<&CallStackEntry> {
        self.entries.get(key)
    }

    /// Iterate keys in ascending order
    pub fn iter(&self) -> impl Iterator<Item = (&TagKey, &CallStackEntry)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &TagKey> {
        self.entries.keys()
    }

    /// Every allocation of every key, duplicates included
    pub fn allocations(&self) -> impl Iterator<Item = &Allocation> {
        self.entries.values().flat_map(|e| e.allocations().iter())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One parsed point-in-time capture
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// Human-readable source name (file path, or `path#n` for stream segments)
    pub name: String,
    pub records: SnapshotRecordSet,
}

impl Snapshot {
    /// Name usable as a report file suffix
    pub fn label(&self) -> String {
        let base = self.name.rsplit('/').next().unwrap_or(self.name.as_str());
        base.replace('#', ".")
    }
}
