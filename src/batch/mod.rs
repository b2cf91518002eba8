//! Indexed write batches.
//!
//! An [`IndexedBatch`] buffers pending mutations in an append-only byte
//! buffer and maintains a sorted secondary index over them. The index makes
//! two read paths possible before the batch is ever committed: point lookup
//! with merge-operand folding ([`IndexedBatch::get_from_batch`]) and ordered
//! iteration over pending mutations, either alone
//! ([`IndexedBatch::iter_cf`]) or merged with committed state
//! ([`IndexedBatch::base_delta_iter`]).
//!
//! The batch is single-writer: the index must not be mutated while
//! iterators borrow it, which the borrow checker enforces here.

pub mod entry;
pub mod index;
pub mod iter;
pub mod record;

use std::sync::Arc;

use self::entry::{EntryComparator, IndexEntry};
use self::index::EntryIndex;
use self::iter::BatchIterator;
use self::record::{decode_record_at, RecordKind, DEFAULT_COLUMN_FAMILY};
use crate::comparator::{BytewiseComparator, KeyComparator};
use crate::error::{Error, Result};
use crate::format::Raw;
use crate::iterator::base_delta::BaseDeltaIterator;
use crate::iterator::StorageIterator;
use crate::memstore::ReadableStore;
use crate::merge::{MergeContext, MergeOperator};
use crate::options::{BatchOptions, ReadOptions};
use crate::{errcorruption, errinput};

/// The outcome of a batch point lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchGet {
    /// The latest mutation for the key is a put; pending merge operands, if
    /// any, have been folded into the value.
    Found(Vec<u8>),
    /// The latest mutation deletes the key.
    Deleted,
    /// The batch holds no mutation for the key.
    NotFound,
    /// The newest mutations are merges with no terminating record beneath
    /// them; the operands (newest first) await composition against the
    /// committed store.
    MergeInProgress(Vec<Vec<u8>>),
}

/// Interim state of the reverse lookup scan.
#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanResult {
    NotFound,
    Found,
    Deleted,
    MergeInProgress,
}

struct Savepoint {
    data_size: usize,
    count: usize,
}

/// A write batch with a sorted secondary index over its mutations.
pub struct IndexedBatch {
    buf: Vec<u8>,
    count: usize,
    comparator: EntryComparator,
    index: EntryIndex,
    overwrite_key: bool,
    max_bytes: Option<usize>,
    /// Offset of the most recently appended indexed record.
    last_entry_offset: usize,
    /// Start of the current sub-batch; a sub-batch begins right before a key
    /// that duplicates one already written in the previous sub-batch.
    last_sub_batch_offset: usize,
    sub_batch_cnt: usize,
    savepoints: Vec<Savepoint>,
}

impl IndexedBatch {
    /// A batch ordering keys bytewise in every column family.
    pub fn new(options: BatchOptions) -> Self {
        Self::with_comparator(Arc::new(BytewiseComparator), options)
    }

    /// A batch with a caller-provided default key comparator.
    pub fn with_comparator(
        default_comparator: Arc<dyn KeyComparator>,
        options: BatchOptions,
    ) -> Self {
        Self {
            buf: Vec::with_capacity(options.reserved_bytes),
            count: 0,
            comparator: EntryComparator::new(default_comparator),
            index: EntryIndex::new(),
            overwrite_key: options.overwrite_key,
            max_bytes: options.max_bytes,
            last_entry_offset: 0,
            last_sub_batch_offset: 0,
            sub_batch_cnt: 1,
            savepoints: Vec::new(),
        }
    }

    /// Registers the key comparator for a column family. Must be called
    /// before any mutation targets the column family.
    pub fn set_comparator_for_cf(&mut self, column_family: u32, comparator: Arc<dyn KeyComparator>) {
        self.comparator.set_comparator_for_cf(column_family, comparator);
    }

    /// Number of indexed mutations in the batch.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Size of the record buffer in bytes.
    pub fn data_size(&self) -> usize {
        self.buf.len()
    }

    /// The raw record buffer.
    pub fn data(&self) -> &[u8] {
        &self.buf
    }

    /// Number of sub-batches: 1 plus the number of times a key was written
    /// again after already appearing in the previous sub-batch. Only tracked
    /// in overwrite-key mode.
    pub fn sub_batch_cnt(&self) -> usize {
        self.sub_batch_cnt
    }

    pub fn overwrite_key(&self) -> bool {
        self.overwrite_key
    }

    pub fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.put_cf(DEFAULT_COLUMN_FAMILY, key, value)
    }

    pub fn put_cf(&mut self, column_family: u32, key: &[u8], value: &[u8]) -> Result<()> {
        self.append_indexed(column_family, RecordKind::Put, |buf| {
            record::append_put(buf, column_family, key, value)
        })
    }

    pub fn delete(&mut self, key: &[u8]) -> Result<()> {
        self.delete_cf(DEFAULT_COLUMN_FAMILY, key)
    }

    pub fn delete_cf(&mut self, column_family: u32, key: &[u8]) -> Result<()> {
        self.append_indexed(column_family, RecordKind::Delete, |buf| {
            record::append_delete(buf, column_family, key)
        })
    }

    pub fn single_delete(&mut self, key: &[u8]) -> Result<()> {
        self.single_delete_cf(DEFAULT_COLUMN_FAMILY, key)
    }

    pub fn single_delete_cf(&mut self, column_family: u32, key: &[u8]) -> Result<()> {
        self.append_indexed(column_family, RecordKind::SingleDelete, |buf| {
            record::append_single_delete(buf, column_family, key)
        })
    }

    /// Buffers a range deletion for `[begin, end)`. Range deletions are
    /// indexed under their begin key but never surfaced by iteration.
    pub fn delete_range(&mut self, begin: &[u8], end: &[u8]) -> Result<()> {
        self.delete_range_cf(DEFAULT_COLUMN_FAMILY, begin, end)
    }

    pub fn delete_range_cf(&mut self, column_family: u32, begin: &[u8], end: &[u8]) -> Result<()> {
        self.append_indexed(column_family, RecordKind::DeleteRange, |buf| {
            record::append_delete_range(buf, column_family, begin, end)
        })
    }

    pub fn merge(&mut self, key: &[u8], operand: &[u8]) -> Result<()> {
        self.merge_cf(DEFAULT_COLUMN_FAMILY, key, operand)
    }

    pub fn merge_cf(&mut self, column_family: u32, key: &[u8], operand: &[u8]) -> Result<()> {
        self.append_indexed(column_family, RecordKind::Merge, |buf| {
            record::append_merge(buf, column_family, key, operand)
        })
    }

    /// Appends an opaque blob that rides along with the batch but is never
    /// indexed.
    pub fn put_log_data(&mut self, blob: &[u8]) -> Result<()> {
        self.append_unindexed(|buf| record::append_log_data(buf, blob))
    }

    pub fn mark_noop(&mut self) -> Result<()> {
        self.append_unindexed(record::append_noop)
    }

    pub fn mark_begin_prepare(&mut self) -> Result<()> {
        self.append_unindexed(record::append_begin_prepare)
    }

    pub fn mark_end_prepare(&mut self, xid: &[u8]) -> Result<()> {
        self.append_unindexed(|buf| record::append_end_prepare(buf, xid))
    }

    pub fn mark_commit(&mut self, xid: &[u8]) -> Result<()> {
        self.append_unindexed(|buf| record::append_commit(buf, xid))
    }

    pub fn mark_rollback(&mut self, xid: &[u8]) -> Result<()> {
        self.append_unindexed(|buf| record::append_rollback(buf, xid))
    }

    /// Clears all buffered mutations, the index, and savepoints.
    pub fn clear(&mut self) {
        self.buf.clear();
        self.count = 0;
        self.index.clear();
        self.last_entry_offset = 0;
        self.last_sub_batch_offset = 0;
        self.sub_batch_cnt = 1;
        self.savepoints.clear();
    }

    /// Remembers the current batch state for a later rollback.
    pub fn set_savepoint(&mut self) {
        self.savepoints.push(Savepoint {
            data_size: self.buf.len(),
            count: self.count,
        });
    }

    /// Truncates the batch back to the most recent savepoint and rebuilds
    /// the index. Returns `Error::NotFound` when no savepoint is set.
    pub fn rollback_to_savepoint(&mut self) -> Result<()> {
        let savepoint = self.savepoints.pop().ok_or(Error::NotFound)?;
        self.buf.truncate(savepoint.data_size);
        self.count = savepoint.count;
        self.last_entry_offset = 0;
        self.last_sub_batch_offset = 0;
        self.sub_batch_cnt = 1;
        self.rebuild_index()?;
        tracing::debug!(
            data_size = savepoint.data_size,
            count = savepoint.count,
            "rolled back batch to savepoint"
        );
        Ok(())
    }

    /// Drops the most recent savepoint without rolling back. Returns
    /// `Error::NotFound` when no savepoint is set.
    pub fn pop_savepoint(&mut self) -> Result<()> {
        self.savepoints.pop().map(|_| ()).ok_or(Error::NotFound)
    }

    /// Iterates the pending mutations of the default column family.
    pub fn iter(&self) -> BatchIterator<'_> {
        self.iter_cf(DEFAULT_COLUMN_FAMILY)
    }

    /// Iterates the pending mutations of one column family.
    pub fn iter_cf(&self, column_family: u32) -> BatchIterator<'_> {
        BatchIterator::new(
            column_family,
            self.index.cursor(&self.buf, &self.comparator),
            &self.buf,
            &self.comparator,
        )
    }

    /// Fuses a base iterator over committed state with this batch's pending
    /// mutations for one column family. The read options reference, when
    /// given, must outlive the returned iterator.
    ///
    /// When a key may be written more than once, create the batch in
    /// overwrite-key mode; otherwise every pending record for the key is
    /// surfaced individually.
    pub fn base_delta_iter<'a, B: StorageIterator>(
        &'a self,
        column_family: u32,
        base: B,
        read_options: Option<&'a ReadOptions>,
    ) -> BaseDeltaIterator<'a, B> {
        BaseDeltaIterator::new(
            base,
            self.iter_cf(column_family),
            self.comparator.user_comparator(column_family),
            read_options,
        )
    }

    /// Determines the effective outcome for `key` from the batch alone by
    /// scanning its mutations newest-first.
    ///
    /// The scan stops at the first put or delete; merge operands above it
    /// accumulate newest-first and are folded with `merge_operator` (over
    /// the put's value, or over no base value after a delete). In
    /// overwrite-key mode the scan stops after the first merge operand,
    /// since anything older has been logically replaced. Merges with no
    /// terminating record return [`BatchGet::MergeInProgress`] for the
    /// caller to compose against the committed store.
    pub fn get_from_batch(
        &self,
        column_family: u32,
        key: &[u8],
        merge_operator: Option<&dyn MergeOperator>,
    ) -> Result<BatchGet> {
        let mut context = MergeContext::new();
        let mut iter = self.iter_cf(column_family);

        // Position on the latest record for the key: advance past every
        // record equal to it, then step back.
        iter.seek(key);
        while iter.valid() && iter.matches_key(column_family, key) {
            iter.next();
        }
        if iter.valid() {
            iter.prev();
        } else {
            iter.seek_to_last();
        }

        let mut result = ScanResult::NotFound;
        let mut put_value: &[u8] = &[];
        while iter.valid() && iter.matches_key(column_family, key) {
            let entry = iter.entry()?;
            match entry.kind {
                RecordKind::Put => {
                    put_value = entry.value;
                    result = ScanResult::Found;
                    break;
                }
                RecordKind::Merge => {
                    context.push_operand(entry.value.to_vec());
                    result = ScanResult::MergeInProgress;
                }
                RecordKind::Delete | RecordKind::SingleDelete => {
                    result = ScanResult::Deleted;
                    break;
                }
                RecordKind::LogData | RecordKind::XidMarker => {}
                RecordKind::DeleteRange => {
                    return errcorruption!("unexpected entry in indexed batch: {entry}");
                }
            }
            // Under overwrite semantics, records older than a merge have
            // been logically replaced; the caller must escalate.
            if self.overwrite_key && result == ScanResult::MergeInProgress {
                break;
            }
            iter.prev();
        }

        match result {
            ScanResult::Found if !context.is_empty() => {
                let merged = self.merge_key(key, Some(put_value), &context, merge_operator)?;
                Ok(BatchGet::Found(merged))
            }
            ScanResult::Found => Ok(BatchGet::Found(put_value.to_vec())),
            ScanResult::Deleted if !context.is_empty() => {
                let merged = self.merge_key(key, None, &context, merge_operator)?;
                Ok(BatchGet::Found(merged))
            }
            ScanResult::Deleted => Ok(BatchGet::Deleted),
            ScanResult::NotFound => Ok(BatchGet::NotFound),
            ScanResult::MergeInProgress => Ok(BatchGet::MergeInProgress(context.into_operands())),
        }
    }

    /// Composes a batch lookup with the committed state in `store`: batch
    /// puts and deletes win outright, pending merges fold over the store's
    /// value, and untouched keys read through.
    pub fn get_from_batch_and_store<S: ReadableStore>(
        &self,
        store: &S,
        column_family: u32,
        key: &[u8],
        merge_operator: Option<&dyn MergeOperator>,
    ) -> Result<Option<Vec<u8>>> {
        match self.get_from_batch(column_family, key, merge_operator)? {
            BatchGet::Found(value) => Ok(Some(value)),
            BatchGet::Deleted => Ok(None),
            BatchGet::NotFound => store.get(key),
            BatchGet::MergeInProgress(operands) => {
                let mut context = MergeContext::new();
                for operand in operands {
                    context.push_operand(operand);
                }
                let base = store.get(key)?;
                let merged = self.merge_key(key, base.as_deref(), &context, merge_operator)?;
                Ok(Some(merged))
            }
        }
    }

    fn merge_key(
        &self,
        key: &[u8],
        existing: Option<&[u8]>,
        context: &MergeContext,
        merge_operator: Option<&dyn MergeOperator>,
    ) -> Result<Vec<u8>> {
        let operator = merge_operator.ok_or_else(|| {
            Error::InvalidArgument("a merge operator must be set to fold merge operands".to_string())
        })?;
        operator
            .merge(key, existing, context.operands())
            .ok_or_else(|| Error::Corruption(format!("merge failed for key {}", Raw::bytes(key))))
    }

    fn append_indexed(
        &mut self,
        column_family: u32,
        kind: RecordKind,
        write: impl FnOnce(&mut Vec<u8>),
    ) -> Result<()> {
        let offset = self.buf.len();
        write(&mut self.buf);
        if let Err(e) = self.check_capacity() {
            self.buf.truncate(offset);
            return Err(e);
        }
        self.last_entry_offset = offset;
        self.count += 1;
        self.add_or_update_index(column_family, kind)
    }

    fn append_unindexed(&mut self, write: impl FnOnce(&mut Vec<u8>)) -> Result<()> {
        let offset = self.buf.len();
        write(&mut self.buf);
        if let Err(e) = self.check_capacity() {
            self.buf.truncate(offset);
            return Err(e);
        }
        Ok(())
    }

    fn check_capacity(&self) -> Result<()> {
        if let Some(max_bytes) = self.max_bytes {
            if self.buf.len() > max_bytes {
                return errinput!("batch size {} exceeds maximum {max_bytes}", self.buf.len());
            }
        }
        Ok(())
    }

    fn add_or_update_index(&mut self, column_family: u32, kind: RecordKind) -> Result<()> {
        if !self.update_existing_entry(column_family, kind)? {
            self.add_new_entry(column_family)?;
        }
        Ok(())
    }

    /// In overwrite mode, re-points the latest existing entry for the key at
    /// the record just appended. Returns true if an entry was updated; merge
    /// records always get a fresh entry so operands keep stacking.
    fn update_existing_entry(&mut self, column_family: u32, kind: RecordKind) -> Result<bool> {
        if !self.overwrite_key {
            return Ok(false);
        }

        let record = decode_record_at(&self.buf, self.last_entry_offset)?;
        let key = record.key.to_vec();

        let position = {
            let mut iter = self.iter_cf(column_family);
            iter.seek(&key);
            if !iter.valid() || !iter.matches_key(column_family, &key) {
                return Ok(false);
            }
            // Move onto the last record of this key.
            iter.next_key();
            if iter.valid() {
                iter.prev();
            } else {
                iter.seek_to_last();
            }
            iter.position()
        };
        let Some(position) = position else {
            return Ok(false);
        };

        let existing_offset = self.index.get(position).map(|e| e.offset).unwrap_or(0);
        if self.last_sub_batch_offset <= existing_offset {
            self.last_sub_batch_offset = self.last_entry_offset;
            self.sub_batch_cnt += 1;
        }
        if kind == RecordKind::Merge {
            return Ok(false);
        }
        if let Some(existing) = self.index.get_mut(position) {
            // The key bytes of the old record stay valid in the buffer, so
            // only the record offset moves.
            existing.offset = self.last_entry_offset;
        }
        Ok(true)
    }

    /// Indexes the record at `last_entry_offset`.
    fn add_new_entry(&mut self, column_family: u32) -> Result<()> {
        let record = decode_record_at(&self.buf, self.last_entry_offset)?;
        let entry = IndexEntry::new(
            self.last_entry_offset,
            column_family,
            record.key_offset,
            record.key.len(),
        );
        self.index.insert(&self.buf, &self.comparator, entry);
        Ok(())
    }

    /// Rebuilds the index by re-reading every record in the buffer. Used
    /// after a savepoint rollback truncates the buffer.
    fn rebuild_index(&mut self) -> Result<()> {
        self.index.clear();

        let mut offset = 0;
        let mut found = 0;
        while offset < self.buf.len() {
            let record = decode_record_at(&self.buf, offset)?;
            let (kind, column_family, encoded_len) =
                (record.kind, record.column_family, record.encoded_len);
            match kind {
                RecordKind::Put
                | RecordKind::Delete
                | RecordKind::SingleDelete
                | RecordKind::DeleteRange
                | RecordKind::Merge => {
                    found += 1;
                    self.last_entry_offset = offset;
                    self.add_or_update_index(column_family, kind)?;
                }
                RecordKind::LogData | RecordKind::XidMarker => {}
            }
            offset += encoded_len;
        }

        if found != self.count {
            tracing::warn!(expected = self.count, found, "batch count mismatch on rebuild");
            return errcorruption!("batch has wrong count: expected {}, found {found}", self.count);
        }
        tracing::debug!(records = found, "rebuilt batch index");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memstore::MemStore;

    /// Integer addition over ASCII-encoded operands.
    struct AddOperator;

    impl MergeOperator for AddOperator {
        fn merge(
            &self,
            _key: &[u8],
            existing: Option<&[u8]>,
            operands: &[Vec<u8>],
        ) -> Option<Vec<u8>> {
            let mut total = match existing {
                Some(value) => parse(value)?,
                None => 0,
            };
            for operand in operands {
                total += parse(operand)?;
            }
            Some(total.to_string().into_bytes())
        }
    }

    fn parse(bytes: &[u8]) -> Option<i64> {
        std::str::from_utf8(bytes).ok()?.parse().ok()
    }

    fn batch() -> IndexedBatch {
        IndexedBatch::new(BatchOptions::default())
    }

    fn overwrite_batch() -> IndexedBatch {
        IndexedBatch::new(BatchOptions::default().overwrite_key(true))
    }

    #[test]
    fn test_get_latest_put() {
        let mut batch = batch();
        batch.put(b"k", b"old").expect("put failed");
        batch.put(b"k", b"new").expect("put failed");

        let got = batch.get_from_batch(0, b"k", None).expect("lookup failed");
        assert_eq!(got, BatchGet::Found(b"new".to_vec()));
    }

    #[test]
    fn test_delete_masks_put() {
        let mut batch = batch();
        batch.put(b"k", b"v").expect("put failed");
        batch.delete(b"k").expect("delete failed");
        assert_eq!(
            batch.get_from_batch(0, b"k", None).expect("lookup failed"),
            BatchGet::Deleted
        );

        batch.single_delete(b"s").expect("single delete failed");
        assert_eq!(
            batch.get_from_batch(0, b"s", None).expect("lookup failed"),
            BatchGet::Deleted
        );
    }

    #[test]
    fn test_put_after_delete_wins() {
        let mut batch = batch();
        batch.delete(b"k").expect("delete failed");
        batch.put(b"k", b"back").expect("put failed");
        assert_eq!(
            batch.get_from_batch(0, b"k", None).expect("lookup failed"),
            BatchGet::Found(b"back".to_vec())
        );
    }

    #[test]
    fn test_absent_key_not_found() {
        let mut batch = batch();
        batch.put(b"a", b"1").expect("put failed");
        assert_eq!(
            batch.get_from_batch(0, b"b", None).expect("lookup failed"),
            BatchGet::NotFound
        );
        // Empty batch.
        let empty = IndexedBatch::new(BatchOptions::default());
        assert_eq!(
            empty.get_from_batch(0, b"x", None).expect("lookup failed"),
            BatchGet::NotFound
        );
    }

    #[test]
    fn test_column_families_are_isolated() {
        let mut batch = batch();
        batch.put_cf(1, b"k", b"one").expect("put failed");
        batch.put_cf(2, b"k", b"two").expect("put failed");

        assert_eq!(
            batch.get_from_batch(1, b"k", None).expect("lookup failed"),
            BatchGet::Found(b"one".to_vec())
        );
        assert_eq!(
            batch.get_from_batch(2, b"k", None).expect("lookup failed"),
            BatchGet::Found(b"two".to_vec())
        );
        assert_eq!(
            batch.get_from_batch(0, b"k", None).expect("lookup failed"),
            BatchGet::NotFound
        );
    }

    #[test]
    fn test_merges_fold_over_put() {
        // Merge(+1), Merge(+2), Put(10), Merge(+5): the put masks the older
        // merges and the newer operand folds on top.
        let mut batch = batch();
        batch.merge(b"k", b"+1").expect("merge failed");
        batch.merge(b"k", b"+2").expect("merge failed");
        batch.put(b"k", b"10").expect("put failed");
        batch.merge(b"k", b"+5").expect("merge failed");

        let got = batch
            .get_from_batch(0, b"k", Some(&AddOperator))
            .expect("lookup failed");
        assert_eq!(got, BatchGet::Found(b"15".to_vec()));
    }

    #[test]
    fn test_overwrite_key_stops_at_first_merge() {
        let mut batch = overwrite_batch();
        batch.merge(b"k", b"+1").expect("merge failed");
        batch.merge(b"k", b"+2").expect("merge failed");
        batch.put(b"k", b"10").expect("put failed");
        batch.merge(b"k", b"+5").expect("merge failed");

        let got = batch
            .get_from_batch(0, b"k", Some(&AddOperator))
            .expect("lookup failed");
        assert_eq!(got, BatchGet::MergeInProgress(vec![b"+5".to_vec()]));
    }

    #[test]
    fn test_merges_without_base_stay_in_progress() {
        let mut batch = batch();
        batch.merge(b"k", b"+1").expect("merge failed");
        batch.merge(b"k", b"+2").expect("merge failed");

        let got = batch
            .get_from_batch(0, b"k", Some(&AddOperator))
            .expect("lookup failed");
        // Operands come back newest first.
        assert_eq!(
            got,
            BatchGet::MergeInProgress(vec![b"+2".to_vec(), b"+1".to_vec()])
        );
    }

    #[test]
    fn test_merges_fold_over_delete() {
        let mut batch = batch();
        batch.delete(b"k").expect("delete failed");
        batch.merge(b"k", b"+3").expect("merge failed");
        batch.merge(b"k", b"+4").expect("merge failed");

        let got = batch
            .get_from_batch(0, b"k", Some(&AddOperator))
            .expect("lookup failed");
        assert_eq!(got, BatchGet::Found(b"7".to_vec()));
    }

    #[test]
    fn test_merge_without_operator_is_invalid() {
        let mut batch = batch();
        batch.put(b"k", b"1").expect("put failed");
        batch.merge(b"k", b"+1").expect("merge failed");
        assert!(matches!(
            batch.get_from_batch(0, b"k", None),
            Err(Error::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_failing_merge_operator_is_corruption() {
        let mut batch = batch();
        batch.put(b"k", b"not-a-number").expect("put failed");
        batch.merge(b"k", b"+1").expect("merge failed");
        assert!(matches!(
            batch.get_from_batch(0, b"k", Some(&AddOperator)),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_range_delete_in_lookup_is_unexpected() {
        let mut batch = batch();
        batch.delete_range(b"k", b"m").expect("delete range failed");
        assert!(matches!(
            batch.get_from_batch(0, b"k", None),
            Err(Error::Corruption(_))
        ));
    }

    #[test]
    fn test_log_data_and_markers_not_indexed() {
        let mut batch = batch();
        batch.put(b"k", b"v").expect("put failed");
        batch.put_log_data(b"blob").expect("log data failed");
        batch.mark_begin_prepare().expect("marker failed");
        batch.mark_end_prepare(b"xid").expect("marker failed");
        batch.mark_commit(b"xid").expect("marker failed");

        assert_eq!(batch.count(), 1);
        let mut iter = batch.iter();
        iter.seek_to_first();
        assert!(iter.valid());
        iter.next();
        assert!(!iter.valid());
    }

    #[test]
    fn test_overwrite_mode_collapses_index() {
        let mut batch = overwrite_batch();
        batch.put(b"k", b"1").expect("put failed");
        batch.put(b"k", b"2").expect("put failed");
        batch.put(b"k", b"3").expect("put failed");

        // One index entry, pointing at the newest record.
        let mut iter = batch.iter();
        iter.seek_to_first();
        assert!(iter.valid());
        assert_eq!(iter.entry().expect("entry").value, b"3");
        iter.next();
        assert!(!iter.valid());

        // All three records remain buffered.
        assert_eq!(batch.count(), 3);
        assert_eq!(batch.sub_batch_cnt(), 3);
    }

    #[test]
    fn test_sub_batch_count_without_duplicates() {
        let mut batch = overwrite_batch();
        batch.put(b"a", b"1").expect("put failed");
        batch.put(b"b", b"2").expect("put failed");
        assert_eq!(batch.sub_batch_cnt(), 1);
        batch.put(b"a", b"3").expect("put failed");
        assert_eq!(batch.sub_batch_cnt(), 2);
    }

    #[test]
    fn test_non_overwrite_mode_keeps_duplicates() {
        let mut batch = batch();
        batch.put(b"k", b"1").expect("put failed");
        batch.put(b"k", b"2").expect("put failed");

        let mut iter = batch.iter();
        iter.seek_to_first();
        let mut values = Vec::new();
        while iter.valid() {
            values.push(iter.entry().expect("entry").value.to_vec());
            iter.next();
        }
        assert_eq!(values, vec![b"1".to_vec(), b"2".to_vec()]);
    }

    #[test]
    fn test_savepoint_rollback() {
        let mut batch = batch();
        batch.put(b"a", b"1").expect("put failed");
        batch.set_savepoint();
        batch.put(b"b", b"2").expect("put failed");
        batch.put_log_data(b"blob").expect("log data failed");
        batch.delete(b"a").expect("delete failed");

        assert_eq!(
            batch.get_from_batch(0, b"a", None).expect("lookup failed"),
            BatchGet::Deleted
        );

        batch.rollback_to_savepoint().expect("rollback failed");
        assert_eq!(batch.count(), 1);
        assert_eq!(
            batch.get_from_batch(0, b"a", None).expect("lookup failed"),
            BatchGet::Found(b"1".to_vec())
        );
        assert_eq!(
            batch.get_from_batch(0, b"b", None).expect("lookup failed"),
            BatchGet::NotFound
        );

        // No savepoints left.
        assert_eq!(batch.rollback_to_savepoint(), Err(Error::NotFound));
    }

    #[test]
    fn test_nested_savepoints() {
        let mut batch = batch();
        batch.put(b"a", b"1").expect("put failed");
        batch.set_savepoint();
        batch.put(b"b", b"2").expect("put failed");
        batch.set_savepoint();
        batch.put(b"c", b"3").expect("put failed");

        batch.rollback_to_savepoint().expect("rollback failed");
        assert_eq!(
            batch.get_from_batch(0, b"c", None).expect("lookup failed"),
            BatchGet::NotFound
        );
        assert_eq!(
            batch.get_from_batch(0, b"b", None).expect("lookup failed"),
            BatchGet::Found(b"2".to_vec())
        );

        batch.rollback_to_savepoint().expect("rollback failed");
        assert_eq!(
            batch.get_from_batch(0, b"b", None).expect("lookup failed"),
            BatchGet::NotFound
        );
        assert_eq!(batch.count(), 1);
    }

    #[test]
    fn test_pop_savepoint() {
        let mut batch = batch();
        assert_eq!(batch.pop_savepoint(), Err(Error::NotFound));
        batch.set_savepoint();
        batch.put(b"a", b"1").expect("put failed");
        batch.pop_savepoint().expect("pop failed");
        // The write survives; the savepoint is simply gone.
        assert_eq!(batch.count(), 1);
        assert_eq!(batch.rollback_to_savepoint(), Err(Error::NotFound));
    }

    #[test]
    fn test_clear() {
        let mut batch = batch();
        batch.put(b"a", b"1").expect("put failed");
        batch.set_savepoint();
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.data_size(), 0);
        assert_eq!(batch.sub_batch_cnt(), 1);
        assert_eq!(
            batch.get_from_batch(0, b"a", None).expect("lookup failed"),
            BatchGet::NotFound
        );
        assert_eq!(batch.rollback_to_savepoint(), Err(Error::NotFound));
    }

    #[test]
    fn test_max_bytes_enforced() {
        let mut batch = IndexedBatch::new(BatchOptions::default().max_bytes(32));
        batch.put(b"a", b"1").expect("put failed");
        let before = batch.data_size();
        assert!(matches!(
            batch.put(b"b", b"a value too large for the cap"),
            Err(Error::InvalidArgument(_))
        ));
        // The oversize record was rolled back off the buffer.
        assert_eq!(batch.data_size(), before);
        assert_eq!(batch.count(), 1);
    }

    #[test]
    fn test_get_from_batch_and_store() {
        let store = MemStore::new();
        store.set(b"base", b"committed".to_vec());
        store.set(b"counter", b"10".to_vec());
        store.set(b"gone", b"soon".to_vec());

        let mut batch = batch();
        batch.put(b"fresh", b"pending").expect("put failed");
        batch.delete(b"gone").expect("delete failed");
        batch.merge(b"counter", b"+5").expect("merge failed");
        batch.merge(b"missing", b"+7").expect("merge failed");

        let operator = AddOperator;
        // Batch put wins.
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"fresh", Some(&operator))
                .expect("lookup failed"),
            Some(b"pending".to_vec())
        );
        // Batch delete hides the stored value.
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"gone", Some(&operator))
                .expect("lookup failed"),
            None
        );
        // Untouched keys read through.
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"base", Some(&operator))
                .expect("lookup failed"),
            Some(b"committed".to_vec())
        );
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"absent", Some(&operator))
                .expect("lookup failed"),
            None
        );
        // Pending merges fold over the stored value, or over nothing.
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"counter", Some(&operator))
                .expect("lookup failed"),
            Some(b"15".to_vec())
        );
        assert_eq!(
            batch
                .get_from_batch_and_store(&store, 0, b"missing", Some(&operator))
                .expect("lookup failed"),
            Some(b"7".to_vec())
        );
    }

    #[test]
    fn test_lookup_law_matches_newest_first_replay() {
        // The lookup must agree with replaying the mutation log for the key
        // newest-first under the documented semantics.
        let mut batch = batch();
        batch.put(b"k", b"1").expect("put failed");
        batch.delete(b"k").expect("delete failed");
        batch.merge(b"k", b"+2").expect("merge failed");
        batch.put(b"k", b"30").expect("put failed");
        batch.merge(b"k", b"+4").expect("merge failed");
        batch.merge(b"k", b"+6").expect("merge failed");

        // Newest-first: +6, +4 accumulate; 30 terminates; 30+4+6 = 40.
        assert_eq!(
            batch
                .get_from_batch(0, b"k", Some(&AddOperator))
                .expect("lookup failed"),
            BatchGet::Found(b"40".to_vec())
        );
    }
}
