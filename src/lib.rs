pub mod batch;
pub mod comparator;
pub mod error;
pub mod format;
pub mod iterator;
pub mod memstore;
pub mod merge;
pub mod options;

pub use batch::entry::WriteEntry;
pub use batch::iter::BatchIterator;
pub use batch::record::RecordKind;
pub use batch::{BatchGet, IndexedBatch};
pub use comparator::{BytewiseComparator, KeyComparator, ReverseBytewiseComparator};
pub use error::{Error, Result};
pub use iterator::base_delta::BaseDeltaIterator;
pub use iterator::StorageIterator;
pub use memstore::{MemIterator, MemStore, ReadableStore};
pub use merge::{MergeContext, MergeOperator};
pub use options::{BatchOptions, ReadOptions};
