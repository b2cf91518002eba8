//! Per-column-family iteration over the sorted index.

use std::cmp::Ordering;

use super::entry::{EntryComparator, IndexEntry, WriteEntry};
use super::index::RawCursor;
use super::record::{decode_record_at, RecordKind};
use crate::error::Result;

/// A forward/backward cursor over the index entries of one column family,
/// materializing decoded write entries on demand.
///
/// The underlying cursor ranges over the whole index; this wrapper treats
/// positions outside its column family as invalid. Stepping methods move the
/// raw cursor one entry, and validity is re-derived on inspection.
pub struct BatchIterator<'a> {
    column_family: u32,
    cursor: RawCursor<'a>,
    buf: &'a [u8],
    comparator: &'a EntryComparator,
}

impl<'a> BatchIterator<'a> {
    pub(crate) fn new(
        column_family: u32,
        cursor: RawCursor<'a>,
        buf: &'a [u8],
        comparator: &'a EntryComparator,
    ) -> Self {
        Self {
            column_family,
            cursor,
            buf,
            comparator,
        }
    }

    pub fn column_family(&self) -> u32 {
        self.column_family
    }

    /// True iff the cursor points at an entry of this column family.
    pub fn valid(&self) -> bool {
        match self.cursor.entry() {
            Some(entry) => entry.column_family == self.column_family,
            None => false,
        }
    }

    /// Positions at the first entry of the column family.
    pub fn seek_to_first(&mut self) {
        self.cursor.seek(&IndexEntry::min_in_cf(self.column_family));
    }

    /// Positions at the last entry of the column family: forward-seek to the
    /// start of the next column family and step back, falling back to the
    /// index tail when there is no later entry.
    pub fn seek_to_last(&mut self) {
        match self.column_family.checked_add(1) {
            Some(next_cf) => {
                self.cursor.seek(&IndexEntry::min_in_cf(next_cf));
                if !self.cursor.valid() {
                    self.cursor.seek_to_last();
                } else {
                    self.cursor.prev();
                }
            }
            None => self.cursor.seek_to_last(),
        }
    }

    /// Positions at the earliest record whose key is >= `key`.
    pub fn seek(&mut self, key: &[u8]) {
        self.cursor
            .seek(&IndexEntry::forward_search(key, self.column_family));
    }

    /// Positions at the latest record whose key is <= `key`.
    pub fn seek_for_prev(&mut self, key: &[u8]) {
        self.cursor
            .seek_for_prev(&IndexEntry::reverse_search(key, self.column_family));
    }

    pub fn next(&mut self) {
        self.cursor.next();
    }

    pub fn prev(&mut self) {
        self.cursor.prev();
    }

    /// The current entry's user key, resolved from the index without
    /// decoding the record. Requires `valid()`.
    pub fn key(&self) -> &'a [u8] {
        debug_assert!(self.valid());
        self.cursor
            .entry()
            .map(|entry| entry.key(self.buf))
            .unwrap_or_default()
    }

    /// Decodes the record under the cursor. Requires `valid()`. Only indexed
    /// kinds can appear: Put, Delete, SingleDelete, DeleteRange, or Merge.
    pub fn entry(&self) -> Result<WriteEntry<'a>> {
        debug_assert!(self.valid());
        let index_entry = self.cursor.entry().ok_or_else(|| {
            crate::error::Error::NotSupported("entry() on invalid iterator".to_string())
        })?;
        let record = decode_record_at(self.buf, index_entry.offset)?;
        debug_assert!(matches!(
            record.kind,
            RecordKind::Put
                | RecordKind::Delete
                | RecordKind::SingleDelete
                | RecordKind::DeleteRange
                | RecordKind::Merge
        ));
        Ok(WriteEntry {
            kind: record.kind,
            key: record.key,
            value: record.value,
        })
    }

    /// Sub-iterator errors cannot occur on the in-memory index; decode
    /// failures surface from `entry()` instead.
    pub fn status(&self) -> Result<()> {
        Ok(())
    }

    /// True iff the iterator is valid and the column family's comparator
    /// rates the current key equal to `key`.
    pub fn matches_key(&self, column_family: u32, key: &[u8]) -> bool {
        self.valid()
            && self
                .comparator
                .compare_key(column_family, key, self.key())
                == Ordering::Equal
    }

    /// The raw cursor position, for in-place index entry updates.
    pub(crate) fn position(&self) -> Option<usize> {
        self.cursor.position()
    }

    fn advance_key(&mut self, forward: bool) {
        if self.valid() {
            let key = self.key();
            loop {
                if forward {
                    self.next();
                } else {
                    self.prev();
                }
                if !self.matches_key(self.column_family, key) {
                    break;
                }
            }
        }
    }

    /// Steps forward past every record of the current key.
    pub fn next_key(&mut self) {
        self.advance_key(true);
    }

    /// Steps backward onto the first record of the previous key.
    pub fn prev_key(&mut self) {
        self.advance_key(false); // now at the tail of the previous key
        if self.valid() {
            self.advance_key(false); // past the head of that key
            if self.valid() {
                self.next(); // back onto its first record
            } else {
                self.seek_to_first();
            }
        }
    }
}
