//! In-memory committed-state store.
//!
//! Stands in for the storage engine's committed state: a skip-list-backed
//! ordered map whose iterator implements [`StorageIterator`], usable as the
//! base side of a base/delta merge. Keys order bytewise; custom column
//! family comparators do not apply here.

use std::ops::Bound;

use crossbeam_skiplist::map::Entry;
use crossbeam_skiplist::SkipMap;

use crate::error::Result;
use crate::iterator::StorageIterator;

/// Point reads from committed state, the seam
/// [`crate::batch::IndexedBatch::get_from_batch_and_store`] consumes.
pub trait ReadableStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// An ordered in-memory key-value store.
#[derive(Debug, Default)]
pub struct MemStore {
    data: SkipMap<Vec<u8>, Vec<u8>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or updates a key-value pair.
    pub fn set(&self, key: &[u8], value: Vec<u8>) {
        self.data.insert(key.to_vec(), value);
    }

    pub fn delete(&self, key: &[u8]) {
        self.data.remove(key);
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// An iterator over the whole store. It does not enforce any bounds; a
    /// wrapping merging iterator applies its read options itself.
    pub fn iter(&self) -> MemIterator<'_> {
        MemIterator {
            data: &self.data,
            current: None,
            lower: None,
            upper: None,
        }
    }

    /// An iterator restricted to `[lower, upper)` that enforces its bounds
    /// itself and reports them, so wrapping iterators can trust it.
    pub fn iter_with_bounds(
        &self,
        lower: Option<Vec<u8>>,
        upper: Option<Vec<u8>>,
    ) -> MemIterator<'_> {
        MemIterator {
            data: &self.data,
            current: None,
            lower,
            upper,
        }
    }
}

impl ReadableStore for MemStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.data.get(key).map(|entry| entry.value().clone()))
    }
}

/// Bidirectional cursor over a [`MemStore`], positioned on a live skip-list
/// entry. Starts invalid until the first seek.
pub struct MemIterator<'a> {
    data: &'a SkipMap<Vec<u8>, Vec<u8>>,
    current: Option<Entry<'a, Vec<u8>, Vec<u8>>>,
    lower: Option<Vec<u8>>,
    upper: Option<Vec<u8>>,
}

impl MemIterator<'_> {
    /// Invalidates the cursor when it drifted at or past the upper bound.
    fn clamp_upper(&mut self) {
        if let (Some(entry), Some(upper)) = (&self.current, &self.upper) {
            if entry.key().as_slice() >= upper.as_slice() {
                self.current = None;
            }
        }
    }

    /// Invalidates the cursor when it drifted below the lower bound.
    fn clamp_lower(&mut self) {
        if let (Some(entry), Some(lower)) = (&self.current, &self.lower) {
            if entry.key().as_slice() < lower.as_slice() {
                self.current = None;
            }
        }
    }
}

impl StorageIterator for MemIterator<'_> {
    fn valid(&self) -> bool {
        self.current.is_some()
    }

    fn seek_to_first(&mut self) {
        self.current = match &self.lower {
            Some(lower) => self.data.lower_bound(Bound::Included(lower.as_slice())),
            None => self.data.front(),
        };
        self.clamp_upper();
    }

    fn seek_to_last(&mut self) {
        self.current = match &self.upper {
            Some(upper) => self.data.upper_bound(Bound::Excluded(upper.as_slice())),
            None => self.data.back(),
        };
        self.clamp_lower();
    }

    fn seek(&mut self, target: &[u8]) {
        let target = match &self.lower {
            Some(lower) if lower.as_slice() > target => lower.as_slice(),
            _ => target,
        };
        self.current = self.data.lower_bound(Bound::Included(target));
        self.clamp_upper();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.current = match &self.upper {
            Some(upper) if upper.as_slice() <= target => {
                self.data.upper_bound(Bound::Excluded(upper.as_slice()))
            }
            _ => self.data.upper_bound(Bound::Included(target)),
        };
        self.clamp_lower();
    }

    fn next(&mut self) {
        self.current = self.current.take().and_then(|entry| entry.next());
        self.clamp_upper();
    }

    fn prev(&mut self) {
        self.current = self.current.take().and_then(|entry| entry.prev());
        self.clamp_lower();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.current
            .as_ref()
            .map(|entry| entry.key().as_slice())
            .unwrap_or_default()
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        self.current
            .as_ref()
            .map(|entry| entry.value().as_slice())
            .unwrap_or_default()
    }

    fn status(&self) -> Result<()> {
        Ok(())
    }

    fn checks_upper_bound(&self) -> bool {
        self.upper.is_some()
    }

    fn checks_lower_bound(&self) -> bool {
        self.lower.is_some()
    }

    fn upper_bound(&self) -> Option<&[u8]> {
        self.upper.as_deref()
    }

    fn lower_bound(&self) -> Option<&[u8]> {
        self.lower.as_deref()
    }
}
