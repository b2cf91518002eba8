/// Construction options for an indexed batch.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Bytes to pre-reserve in the batch buffer (default: 0)
    pub reserved_bytes: usize,

    /// Maximum batch buffer size in bytes; `None` means unlimited
    /// (default: None)
    pub max_bytes: Option<usize>,

    /// Assume a later write for a key overwrites earlier ones: the index
    /// keeps a single entry per key, re-pointed at the latest record
    /// (default: false)
    pub overwrite_key: bool,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            reserved_bytes: 0,
            max_bytes: None,
            overwrite_key: false,
        }
    }
}

impl BatchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-reserve buffer capacity
    pub fn reserved_bytes(mut self, bytes: usize) -> Self {
        self.reserved_bytes = bytes;
        self
    }

    /// Cap the batch buffer size
    pub fn max_bytes(mut self, bytes: usize) -> Self {
        self.max_bytes = Some(bytes);
        self
    }

    /// Enable overwrite-key mode
    pub fn overwrite_key(mut self, overwrite: bool) -> Self {
        self.overwrite_key = overwrite;
        self
    }
}

/// Read options for merging iteration. Bounds restrict emitted keys to
/// `[iterate_lower_bound, iterate_upper_bound)` under the active column
/// family's comparator.
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    pub iterate_lower_bound: Option<Vec<u8>>,
    pub iterate_upper_bound: Option<Vec<u8>>,
}

impl ReadOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the inclusive lower bound for iteration
    pub fn lower_bound(mut self, bound: impl Into<Vec<u8>>) -> Self {
        self.iterate_lower_bound = Some(bound.into());
        self
    }

    /// Set the exclusive upper bound for iteration
    pub fn upper_bound(mut self, bound: impl Into<Vec<u8>>) -> Self {
        self.iterate_upper_bound = Some(bound.into());
        self
    }
}
