//! The sorted secondary index over batch records.
//!
//! An ordered collection of index entries under the entry comparator. The
//! comparator resolves keys through the batch buffer, so every ordering
//! operation takes the buffer as an argument. The index is single-writer
//! and must not be mutated while cursors exist over it.

use std::cmp::Ordering;

use super::entry::{EntryComparator, IndexEntry};

/// Sorted entries with binary-search positioning. Equal-key entries order
/// by record offset, i.e. insertion order.
#[derive(Default)]
pub struct EntryIndex {
    entries: Vec<IndexEntry<'static>>,
}

impl EntryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn get(&self, pos: usize) -> Option<&IndexEntry<'static>> {
        self.entries.get(pos)
    }

    pub(crate) fn get_mut(&mut self, pos: usize) -> Option<&mut IndexEntry<'static>> {
        self.entries.get_mut(pos)
    }

    /// Inserts a real entry at its ordered position. A record appended later
    /// carries a larger offset, so it lands after existing entries for the
    /// same key.
    pub fn insert(&mut self, buf: &[u8], comparator: &EntryComparator, entry: IndexEntry<'static>) {
        let pos = self.lower_bound(buf, comparator, &entry);
        self.entries.insert(pos, entry);
    }

    /// Position of the first entry >= target.
    fn lower_bound(&self, buf: &[u8], comparator: &EntryComparator, target: &IndexEntry) -> usize {
        self.entries
            .partition_point(|e| comparator.compare(buf, e, target) == Ordering::Less)
    }

    /// Position of the first entry > target.
    fn upper_bound(&self, buf: &[u8], comparator: &EntryComparator, target: &IndexEntry) -> usize {
        self.entries
            .partition_point(|e| comparator.compare(buf, e, target) != Ordering::Greater)
    }

    pub fn cursor<'a>(&'a self, buf: &'a [u8], comparator: &'a EntryComparator) -> RawCursor<'a> {
        RawCursor {
            buf,
            comparator,
            index: self,
            pos: None,
        }
    }
}

/// A bidirectional cursor over the sorted index. Starts invalid; stepping an
/// invalid cursor is a no-op, and stepping off either end invalidates it.
pub struct RawCursor<'a> {
    buf: &'a [u8],
    comparator: &'a EntryComparator,
    index: &'a EntryIndex,
    pos: Option<usize>,
}

impl<'a> RawCursor<'a> {
    pub fn valid(&self) -> bool {
        self.pos.is_some()
    }

    /// The entry under the cursor; requires `valid()`.
    pub fn entry(&self) -> Option<&'a IndexEntry<'static>> {
        self.pos.and_then(|pos| self.index.get(pos))
    }

    /// The cursor's index position, for in-place entry updates.
    pub(crate) fn position(&self) -> Option<usize> {
        self.pos
    }

    /// Positions at the first entry >= target, invalid if none.
    pub fn seek(&mut self, target: &IndexEntry) {
        let pos = self.index.lower_bound(self.buf, self.comparator, target);
        self.pos = (pos < self.index.len()).then_some(pos);
    }

    /// Positions at the last entry <= target, invalid if none.
    pub fn seek_for_prev(&mut self, target: &IndexEntry) {
        let pos = self.index.upper_bound(self.buf, self.comparator, target);
        self.pos = pos.checked_sub(1);
    }

    pub fn seek_to_first(&mut self) {
        self.pos = (!self.index.is_empty()).then_some(0);
    }

    pub fn seek_to_last(&mut self) {
        self.pos = self.index.len().checked_sub(1);
    }

    pub fn next(&mut self) {
        if let Some(pos) = self.pos {
            self.pos = (pos + 1 < self.index.len()).then_some(pos + 1);
        }
    }

    pub fn prev(&mut self) {
        if let Some(pos) = self.pos {
            self.pos = pos.checked_sub(1);
        }
    }
}
