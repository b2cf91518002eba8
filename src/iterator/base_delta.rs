//! The base/delta merging iterator.
//!
//! Fuses an ordered iterator over committed state (the base) with the
//! pending mutations of one column family (the delta) into a single ordered
//! view. Delta records shadow same-key base records, delta tombstones
//! suppress them, and traversal is bidirectional with direction reversal
//! from any position.
//!
//! Orientation bookkeeping:
//! - when moving forward, `current_at_base` means the base holds the
//!   current output and the delta points at a strictly larger key (or is
//!   exhausted); backward flips the inequality;
//! - `equal_keys` holds exactly when base and delta point at the same key.
//!
//! The delta must not contain merge or log-data records: their absence is
//! asserted in debug builds, and release builds surface them as opaque
//! puts. Range deletions in the delta are skipped, not applied.

use std::cmp::Ordering;
use std::sync::Arc;

use super::StorageIterator;
use crate::batch::iter::BatchIterator;
use crate::batch::record::RecordKind;
use crate::comparator::KeyComparator;
use crate::error::{Error, Result};
use crate::options::ReadOptions;

/// How the iterator has been progressing. The numeric ordering matters:
/// anything below `Backward` counts as forward movement and anything above
/// `Forward` counts as backward movement, so orientation reduces to a
/// comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Direction {
    Undetermined = 0,
    SeekToFirst = 1,
    Seek = 2,
    Forward = 3,
    Backward = 4,
    SeekForPrev = 5,
    SeekToLast = 6,
}

/// Merging iterator over a base iterator and a batch's delta iterator.
///
/// Emitted keys are strictly ordered under the column family's comparator
/// and lie within `[lower_bound, upper_bound)` when bounds are set. The
/// upper bound is enforced here (`checks_upper_bound() == true`); the lower
/// bound is reported but the caller's base iterator, when it enforces
/// bounds itself, is trusted for it.
///
/// The iterator steps the delta one record at a time, so a batch holding
/// several records for one key surfaces each of them; create the batch in
/// overwrite-key mode when merged iteration over repeated writes is needed.
pub struct BaseDeltaIterator<'a, B: StorageIterator> {
    direction: Direction,
    current_at_base: bool,
    equal_keys: bool,
    status: Result<()>,
    base: B,
    delta: BatchIterator<'a>,
    comparator: Arc<dyn KeyComparator>,
    read_options: Option<&'a ReadOptions>,
}

impl<'a, B: StorageIterator> BaseDeltaIterator<'a, B> {
    pub fn new(
        base: B,
        delta: BatchIterator<'a>,
        comparator: Arc<dyn KeyComparator>,
        read_options: Option<&'a ReadOptions>,
    ) -> Self {
        Self {
            direction: Direction::Undetermined,
            current_at_base: true,
            equal_keys: false,
            status: Ok(()),
            base,
            delta,
            comparator,
            read_options,
        }
    }

    fn is_moving_forward(&self) -> bool {
        self.direction < Direction::Backward
    }

    fn is_moving_backward(&self) -> bool {
        self.direction > Direction::Forward
    }

    /// The effective upper bound for the base side: the base iterator's own
    /// bound, falling back to the read options.
    fn base_upper_bound(&self) -> Option<&[u8]> {
        self.base.upper_bound().or_else(|| {
            self.read_options
                .and_then(|opts| opts.iterate_upper_bound.as_deref())
        })
    }

    fn base_lower_bound(&self) -> Option<&[u8]> {
        self.base.lower_bound().or_else(|| {
            self.read_options
                .and_then(|opts| opts.iterate_lower_bound.as_deref())
        })
    }

    fn base_is_within_bounds(&self) -> bool {
        if self.is_moving_backward() {
            if let Some(lower) = self.base_lower_bound() {
                return self.comparator.compare(self.base.key(), lower) != Ordering::Less;
            }
        }
        if self.is_moving_forward() {
            if let Some(upper) = self.base_upper_bound() {
                return self.comparator.compare(self.base.key(), upper) == Ordering::Less;
            }
        }
        true
    }

    /// The delta iterator never enforces bounds itself, so they are always
    /// checked here against the read options.
    fn delta_is_within_bounds(&self) -> bool {
        let Some(opts) = self.read_options else {
            return true;
        };
        if self.is_moving_backward() {
            if let Some(lower) = opts.iterate_lower_bound.as_deref() {
                return self.comparator.compare(self.delta.key(), lower) != Ordering::Less;
            }
        }
        if self.is_moving_forward() {
            if let Some(upper) = opts.iterate_upper_bound.as_deref() {
                return self.comparator.compare(self.delta.key(), upper) == Ordering::Less;
            }
        }
        true
    }

    fn base_valid(&self) -> bool {
        // A base that enforces its own bound in the current direction is
        // trusted; otherwise the bound is checked per step. The trust is
        // per-direction: enforcing an upper bound says nothing about the
        // lower bound a backward scan runs into.
        let enforces_bound = if self.is_moving_forward() {
            self.base.checks_upper_bound()
        } else {
            self.base.checks_lower_bound()
        };
        self.base.valid() && (enforces_bound || self.base_is_within_bounds())
    }

    fn delta_valid(&self) -> bool {
        self.delta.valid() && self.delta_is_within_bounds()
    }

    fn advance_base(&mut self) {
        if self.is_moving_forward() {
            self.base.next();
        } else {
            self.base.prev();
        }
    }

    fn advance_delta(&mut self) {
        if self.is_moving_forward() {
            self.delta.next();
        } else {
            self.delta.prev();
        }
    }

    fn recompute_equal_keys(&mut self) {
        if self.delta_valid()
            && self.base_valid()
            && self.comparator.equal(self.delta.key(), self.base.key())
        {
            self.equal_keys = true;
        }
    }

    /// Steps past the current position: both sides when they sit on the same
    /// key, otherwise whichever side is exposed.
    fn advance(&mut self) {
        if self.equal_keys {
            debug_assert!(self.base_valid() && self.delta_valid());
            self.advance_base();
            self.advance_delta();
        } else if self.current_at_base {
            debug_assert!(self.base_valid());
            self.advance_base();
        } else {
            debug_assert!(self.delta_valid());
            self.advance_delta();
        }
        self.update_current();
    }

    /// Re-selects which side exposes the next user-visible entry, skipping
    /// delta tombstones. Each pass either returns or strictly advances a
    /// sub-iterator, so the loop terminates.
    fn update_current(&mut self) {
        self.status = Ok(());
        loop {
            let mut delta_entry = None;
            if self.delta_valid() {
                match self.delta.entry() {
                    Ok(entry) => delta_entry = Some(entry),
                    Err(e) => {
                        // Expose the decode error and stop.
                        self.status = Err(e);
                        self.current_at_base = false;
                        return;
                    }
                }
            }

            self.equal_keys = false;

            if !self.base_valid() {
                if self.base.status().is_err() {
                    // Expose the base error and stop.
                    self.current_at_base = true;
                    return;
                }

                // Base has finished; delta too means the merge is done.
                let Some(entry) = delta_entry else { return };

                if self.is_moving_forward() {
                    if let Some(upper) = self
                        .read_options
                        .and_then(|opts| opts.iterate_upper_bound.as_deref())
                    {
                        if self.comparator.compare(entry.key, upper) != Ordering::Less {
                            // Out of upper bound -> finished.
                            return;
                        }
                    }
                }
                match entry.kind {
                    RecordKind::Delete | RecordKind::SingleDelete | RecordKind::DeleteRange => {
                        self.advance_delta();
                    }
                    _ => {
                        debug_assert!(!matches!(
                            entry.kind,
                            RecordKind::Merge | RecordKind::LogData
                        ));
                        self.current_at_base = false;
                        return;
                    }
                }
            } else if let Some(entry) = delta_entry {
                // Base and delta are both unfinished.
                let sign = if self.is_moving_forward() { 1 } else { -1 };
                let compare = sign
                    * match self.comparator.compare(entry.key, self.base.key()) {
                        Ordering::Less => -1,
                        Ordering::Equal => 0,
                        Ordering::Greater => 1,
                    };
                if compare <= 0 {
                    // Delta is at or ahead of base in the current direction.
                    if compare == 0 {
                        self.equal_keys = true;
                    }
                    match entry.kind {
                        RecordKind::Delete | RecordKind::SingleDelete => {
                            // A tombstone suppresses the same-key base entry.
                            self.advance_delta();
                            if self.equal_keys {
                                self.advance_base();
                            }
                        }
                        RecordKind::DeleteRange => {
                            // Indexed but never surfaced; same-key base
                            // entries are not suppressed point-wise.
                            self.advance_delta();
                        }
                        _ => {
                            debug_assert!(!matches!(
                                entry.kind,
                                RecordKind::Merge | RecordKind::LogData
                            ));
                            self.current_at_base = false;
                            return;
                        }
                    }
                } else {
                    self.current_at_base = true;
                    return;
                }
            } else {
                // Base is unfinished, delta has finished.
                self.current_at_base = true;
                return;
            }
        }
    }

    #[cfg(debug_assertions)]
    fn assert_invariants(&self) {
        if self.base.status().is_err() {
            assert!(!self.base.valid());
            assert!(!self.valid());
            return;
        }
        if !self.valid() {
            return;
        }
        if !self.base_valid() {
            assert!(!self.current_at_base && self.delta_valid());
            return;
        }
        if !self.delta_valid() {
            assert!(self.current_at_base);
            return;
        }
        let entry = self.delta.entry().expect("delta entry must decode");
        assert!(!matches!(
            entry.kind,
            RecordKind::Merge | RecordKind::LogData
        ));
        let sign = if self.is_moving_forward() { 1 } else { -1 };
        let compare = sign
            * match self.comparator.compare(entry.key, self.base.key()) {
                Ordering::Less => -1,
                Ordering::Equal => 0,
                Ordering::Greater => 1,
            };
        // The exposed side is at or ahead of its peer in the current
        // direction; equal keys always expose the delta.
        if self.current_at_base {
            assert!(compare > 0);
        } else {
            assert!(compare <= 0);
        }
        assert_eq!(self.equal_keys, compare == 0);
    }

    #[cfg(not(debug_assertions))]
    fn assert_invariants(&self) {}
}

impl<B: StorageIterator> StorageIterator for BaseDeltaIterator<'_, B> {
    fn valid(&self) -> bool {
        self.status.is_ok()
            && if self.current_at_base {
                self.base_valid()
            } else {
                self.delta_valid()
            }
    }

    fn seek_to_first(&mut self) {
        self.direction = Direction::SeekToFirst;
        self.base.seek_to_first();
        self.delta.seek_to_first();
        self.update_current();
        self.assert_invariants();
    }

    fn seek_to_last(&mut self) {
        self.direction = Direction::SeekToLast;

        match self.base_upper_bound().map(<[u8]>::to_vec) {
            Some(upper) if !self.base.checks_upper_bound() => {
                // The base does not enforce the bound itself: land just
                // before it, the bound being exclusive.
                self.base.seek(&upper);
                if self.base.valid() {
                    self.base.prev();
                } else {
                    // The bound lies past the base's last key.
                    self.base.seek_to_last();
                }
            }
            _ => self.base.seek_to_last(),
        }

        match self
            .read_options
            .and_then(|opts| opts.iterate_upper_bound.clone())
        {
            Some(upper) => {
                // The delta iterator never enforces bounds itself.
                self.delta.seek(&upper);
                if self.delta.valid() {
                    self.delta.prev();
                } else {
                    self.delta.seek_to_last();
                }
            }
            None => self.delta.seek_to_last(),
        }

        self.update_current();
        self.assert_invariants();
    }

    fn seek(&mut self, target: &[u8]) {
        self.direction = Direction::Seek;
        self.base.seek(target);
        self.delta.seek(target);
        self.update_current();
        self.assert_invariants();
    }

    fn seek_for_prev(&mut self, target: &[u8]) {
        self.direction = Direction::SeekForPrev;
        self.base.seek_for_prev(target);
        self.delta.seek_for_prev(target);
        self.update_current();
        self.assert_invariants();
    }

    fn next(&mut self) {
        if !self.valid() {
            self.status = Err(Error::NotSupported("next() on invalid iterator".to_string()));
            return;
        }

        if self.is_moving_backward() {
            // Reverse direction. In a settled backward state either both
            // sides are valid (the hidden side sits at a larger key) or the
            // invalid side must be re-seeked -- unless it was exhausted by a
            // terminal seek, in which case the exhaustion is genuine.
            self.equal_keys = false;
            if !self.base_valid() {
                debug_assert!(self.delta_valid());
                if self.direction != Direction::SeekToLast {
                    self.base.seek_to_first();
                }
            } else if !self.delta_valid() {
                if self.direction != Direction::SeekToLast {
                    self.delta.seek_to_first();
                }
            } else {
                self.direction = Direction::Forward;
                if self.current_at_base {
                    // Move the delta from behind the base to ahead of it.
                    self.advance_delta();
                } else {
                    self.advance_base();
                }
            }
            self.direction = Direction::Forward;
            self.recompute_equal_keys();
        }

        self.direction = Direction::Forward;
        self.advance();
        self.assert_invariants();
    }

    fn prev(&mut self) {
        if !self.valid() {
            self.status = Err(Error::NotSupported("prev() on invalid iterator".to_string()));
            return;
        }

        if self.is_moving_forward() {
            // Mirror image of the reversal in next().
            self.equal_keys = false;
            if !self.base_valid() {
                debug_assert!(self.delta_valid());
                if self.direction != Direction::SeekToFirst {
                    self.base.seek_to_last();
                }
            } else if !self.delta_valid() {
                if self.direction != Direction::SeekToFirst {
                    self.delta.seek_to_last();
                }
            } else {
                self.direction = Direction::Backward;
                if self.current_at_base {
                    self.advance_delta();
                } else {
                    self.advance_base();
                }
            }
            self.direction = Direction::Backward;
            self.recompute_equal_keys();
        }

        self.direction = Direction::Backward;
        self.advance();
        self.assert_invariants();
    }

    fn key(&self) -> &[u8] {
        debug_assert!(self.valid());
        if self.current_at_base {
            self.base.key()
        } else {
            self.delta.key()
        }
    }

    fn value(&self) -> &[u8] {
        debug_assert!(self.valid());
        if self.current_at_base {
            self.base.value()
        } else {
            self.delta.entry().map(|entry| entry.value).unwrap_or_default()
        }
    }

    /// Prefers this iterator's own sticky status, then the base's, then the
    /// delta's.
    fn status(&self) -> Result<()> {
        self.status.clone()?;
        self.base.status()?;
        self.delta.status()
    }

    fn checks_upper_bound(&self) -> bool {
        true
    }

    fn checks_lower_bound(&self) -> bool {
        false
    }

    fn upper_bound(&self) -> Option<&[u8]> {
        self.base_upper_bound()
    }

    fn lower_bound(&self) -> Option<&[u8]> {
        self.base_lower_bound()
    }
}
