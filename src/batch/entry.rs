//! Index entries and the total order over them.
//!
//! The sorted index holds one `IndexEntry` per indexed record. Entries do
//! not own their keys: a real entry locates its key inside the batch buffer
//! with an offset/size pair, resolved lazily at comparison time. Dummy
//! entries carry an external search key (or the min-in-CF sentinel) and
//! exist only on the stack during a seek.

use std::cmp::Ordering;
use std::fmt::Display;
use std::sync::Arc;

use super::record::RecordKind;
use crate::comparator::KeyComparator;
use crate::format::Raw;

/// Marks an entry's `key_size` as "smaller than every real key in its
/// column family". Seeking to this dummy lands on the first real entry of
/// the column family.
pub const MIN_IN_CF: usize = usize::MAX;

/// A lightweight handle into the batch buffer, ordered by [`EntryComparator`].
///
/// Because same-key entries break ties by `offset`, entries for one user key
/// sort in insertion order and the latest mutation is the last entry sharing
/// that key.
#[derive(Debug, Clone, Copy)]
pub struct IndexEntry<'a> {
    /// Byte offset of the record in the batch buffer. Dummy search keys set
    /// this to 0 (forward lookup, ordering at-or-before every record with
    /// the search key) or `usize::MAX` (reverse lookup, ordering after all
    /// of them).
    pub offset: usize,
    /// Column family the entry targets.
    pub column_family: u32,
    /// Offset of the key inside the batch buffer; ignored when `search_key`
    /// is set.
    pub key_offset: usize,
    /// Size of the key; [`MIN_IN_CF`] marks a seek-to-first dummy.
    pub key_size: usize,
    /// External key overriding `(key_offset, key_size)` for comparison.
    pub search_key: Option<&'a [u8]>,
}

impl IndexEntry<'static> {
    /// A real entry pointing at an indexed record.
    pub fn new(offset: usize, column_family: u32, key_offset: usize, key_size: usize) -> Self {
        Self {
            offset,
            column_family,
            key_offset,
            key_size,
            search_key: None,
        }
    }

    /// A dummy that compares less than every real entry of `column_family`.
    pub fn min_in_cf(column_family: u32) -> Self {
        Self {
            offset: 0,
            column_family,
            key_offset: 0,
            key_size: MIN_IN_CF,
            search_key: None,
        }
    }
}

impl<'a> IndexEntry<'a> {
    /// A dummy search key for a forward seek: compares at-or-before every
    /// real entry whose key equals `key`, so a lower-bound search lands on
    /// the earliest record for the key.
    pub fn forward_search(key: &'a [u8], column_family: u32) -> Self {
        Self {
            offset: 0,
            column_family,
            key_offset: 0,
            key_size: 0,
            search_key: Some(key),
        }
    }

    /// A dummy search key for a reverse seek: compares after every real
    /// entry whose key equals `key`, so a reverse lower-bound lands on the
    /// latest record for the key.
    pub fn reverse_search(key: &'a [u8], column_family: u32) -> Self {
        Self {
            offset: usize::MAX,
            column_family,
            key_offset: 0,
            key_size: 0,
            search_key: Some(key),
        }
    }

    pub fn is_min_in_cf(&self) -> bool {
        debug_assert!(
            self.key_size != MIN_IN_CF || (self.key_offset == 0 && self.search_key.is_none())
        );
        self.key_size == MIN_IN_CF
    }

    /// Resolves the entry's key: the external search key if set, else the
    /// slice it locates inside the batch buffer.
    pub fn key<'b>(&'b self, buf: &'b [u8]) -> &'b [u8] {
        match self.search_key {
            Some(key) => key,
            None => &buf[self.key_offset..self.key_offset + self.key_size],
        }
    }
}

/// A decoded mutation yielded by batch iterators. `value` is meaningful for
/// `Put` and `Merge` (and carries the range end for `DeleteRange`); both
/// slices alias the batch buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteEntry<'a> {
    pub kind: RecordKind,
    pub key: &'a [u8],
    pub value: &'a [u8],
}

impl Display for WriteEntry<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self.kind {
            RecordKind::Put | RecordKind::Merge | RecordKind::DeleteRange => {
                write!(f, "{:?}({})", self.kind, Raw::key_value(self.key, self.value))
            }
            _ => write!(f, "{:?}({})", self.kind, Raw::bytes(self.key)),
        }
    }
}

/// Total order over index entries, parameterized by per-column-family key
/// comparators. The batch buffer is passed in at comparison time so stored
/// entries can resolve their keys lazily.
///
/// Ordering: smaller column family first; the min-in-CF sentinel before
/// every real key of its column family; then keys under the column family's
/// comparator (falling back to the default); then smaller offset first.
pub struct EntryComparator {
    default: Arc<dyn KeyComparator>,
    cf_comparators: Vec<Option<Arc<dyn KeyComparator>>>,
}

impl EntryComparator {
    pub fn new(default: Arc<dyn KeyComparator>) -> Self {
        Self {
            default,
            cf_comparators: Vec::new(),
        }
    }

    /// Registers a key comparator for a column family, growing the sparse
    /// table as needed.
    pub fn set_comparator_for_cf(&mut self, column_family: u32, comparator: Arc<dyn KeyComparator>) {
        let index = column_family as usize;
        if index >= self.cf_comparators.len() {
            self.cf_comparators.resize_with(index + 1, || None);
        }
        self.cf_comparators[index] = Some(comparator);
    }

    /// The key comparator governing a column family: its registered
    /// comparator, or the default.
    pub fn user_comparator(&self, column_family: u32) -> Arc<dyn KeyComparator> {
        self.cf_comparators
            .get(column_family as usize)
            .and_then(|c| c.clone())
            .unwrap_or_else(|| self.default.clone())
    }

    pub fn compare_key(&self, column_family: u32, a: &[u8], b: &[u8]) -> Ordering {
        match self
            .cf_comparators
            .get(column_family as usize)
            .and_then(|c| c.as_deref())
        {
            Some(comparator) => comparator.compare(a, b),
            None => self.default.compare(a, b),
        }
    }

    pub fn compare(&self, buf: &[u8], a: &IndexEntry, b: &IndexEntry) -> Ordering {
        let by_cf = a.column_family.cmp(&b.column_family);
        if by_cf != Ordering::Equal {
            return by_cf;
        }

        // Seek-to-first sentinels order before every real entry of the CF.
        if a.is_min_in_cf() {
            return Ordering::Less;
        } else if b.is_min_in_cf() {
            return Ordering::Greater;
        }

        let by_key = self.compare_key(a.column_family, a.key(buf), b.key(buf));
        if by_key != Ordering::Equal {
            return by_key;
        }

        a.offset.cmp(&b.offset)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comparator::{BytewiseComparator, ReverseBytewiseComparator};

    fn comparator() -> EntryComparator {
        EntryComparator::new(Arc::new(BytewiseComparator))
    }

    /// Buffer laid out as raw keys so entries can point straight at them.
    fn buf() -> Vec<u8> {
        b"applebananacherry".to_vec()
    }

    #[test]
    fn test_column_family_orders_first() {
        let buf = buf();
        let cmp = comparator();
        // "banana" in CF 1 vs "apple" in CF 2: CF wins over key.
        let a = IndexEntry::new(10, 1, 5, 6);
        let b = IndexEntry::new(0, 2, 0, 5);
        assert_eq!(cmp.compare(&buf, &a, &b), Ordering::Less);
        assert_eq!(cmp.compare(&buf, &b, &a), Ordering::Greater);
    }

    #[test]
    fn test_min_in_cf_sorts_before_real_entries() {
        let buf = buf();
        let cmp = comparator();
        let min = IndexEntry::min_in_cf(1);
        let real = IndexEntry::new(0, 1, 0, 5);
        assert!(min.is_min_in_cf());
        assert_eq!(cmp.compare(&buf, &min, &real), Ordering::Less);
        assert_eq!(cmp.compare(&buf, &real, &min), Ordering::Greater);
        // But a smaller column family still wins.
        let earlier_cf = IndexEntry::new(0, 0, 0, 5);
        assert_eq!(cmp.compare(&buf, &min, &earlier_cf), Ordering::Greater);
    }

    #[test]
    fn test_keys_compared_under_cf_comparator() {
        let buf = buf();
        let mut cmp = comparator();
        let apple = IndexEntry::new(0, 1, 0, 5);
        let banana = IndexEntry::new(20, 1, 5, 6);
        assert_eq!(cmp.compare(&buf, &apple, &banana), Ordering::Less);

        // CF 1 flips to reverse order once registered.
        cmp.set_comparator_for_cf(1, Arc::new(ReverseBytewiseComparator));
        assert_eq!(cmp.compare(&buf, &apple, &banana), Ordering::Greater);
        // Other column families keep the default.
        let apple0 = IndexEntry::new(0, 0, 0, 5);
        let banana0 = IndexEntry::new(20, 0, 5, 6);
        assert_eq!(cmp.compare(&buf, &apple0, &banana0), Ordering::Less);
    }

    #[test]
    fn test_same_key_breaks_ties_by_offset() {
        let buf = buf();
        let cmp = comparator();
        let older = IndexEntry::new(3, 0, 0, 5);
        let newer = IndexEntry::new(40, 0, 0, 5);
        assert_eq!(cmp.compare(&buf, &older, &newer), Ordering::Less);
        assert_eq!(cmp.compare(&buf, &newer, &older), Ordering::Greater);
        assert_eq!(cmp.compare(&buf, &older, &older), Ordering::Equal);
    }

    #[test]
    fn test_search_key_overrides_buffer_key() {
        let buf = buf();
        let cmp = comparator();
        let real = IndexEntry::new(12, 0, 5, 6); // "banana"
        assert_eq!(real.key(&buf), b"banana");

        // Forward search key at offset 0 orders before the real record even
        // for an equal key; reverse search key at usize::MAX orders after.
        let forward = IndexEntry::forward_search(b"banana", 0);
        assert_eq!(forward.key(&buf), b"banana");
        assert_eq!(cmp.compare(&buf, &forward, &real), Ordering::Less);

        let reverse = IndexEntry::reverse_search(b"banana", 0);
        assert_eq!(cmp.compare(&buf, &reverse, &real), Ordering::Greater);

        let between = IndexEntry::forward_search(b"avocado", 0);
        assert_eq!(cmp.compare(&buf, &between, &real), Ordering::Less);
    }

    #[test]
    fn test_user_comparator_resolution() {
        let mut cmp = comparator();
        cmp.set_comparator_for_cf(3, Arc::new(ReverseBytewiseComparator));
        assert_eq!(cmp.user_comparator(0).compare(b"a", b"b"), Ordering::Less);
        assert_eq!(cmp.user_comparator(3).compare(b"a", b"b"), Ordering::Greater);
        // Unregistered CF beyond the table falls back to the default.
        assert_eq!(cmp.user_comparator(9).compare(b"a", b"b"), Ordering::Less);
    }

    #[test]
    fn test_write_entry_display() {
        let put = WriteEntry {
            kind: RecordKind::Put,
            key: b"k",
            value: b"v",
        };
        assert_eq!(put.to_string(), "Put(\"k\" => \"v\")");

        let del = WriteEntry {
            kind: RecordKind::Delete,
            key: b"k",
            value: b"",
        };
        assert_eq!(del.to_string(), "Delete(\"k\")");
    }
}
