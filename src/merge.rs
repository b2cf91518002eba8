/// User-supplied folding function for `Merge` records.
///
/// Given a key, an optional existing value, and the pending merge operands
/// ordered newest first, produces the composed value. Returning `None`
/// signals that the operands could not be composed; callers surface that as
/// a corruption error.
pub trait MergeOperator: Send + Sync {
    fn merge(&self, key: &[u8], existing: Option<&[u8]>, operands: &[Vec<u8>]) -> Option<Vec<u8>>;
}

/// Accumulates merge operands encountered while scanning a key's mutations
/// newest-first. Operands are owned copies so a pending merge can outlive
/// iterator repositioning and be folded later against the committed store.
#[derive(Debug, Default)]
pub struct MergeContext {
    operands: Vec<Vec<u8>>,
}

impl MergeContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pushes the next (older) operand. Operands are pushed in newest-first
    /// scan order, so the stored order is newest-first too.
    pub fn push_operand(&mut self, operand: Vec<u8>) {
        self.operands.push(operand);
    }

    /// Operands, newest first.
    pub fn operands(&self) -> &[Vec<u8>] {
        &self.operands
    }

    pub fn len(&self) -> usize {
        self.operands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operands.is_empty()
    }

    pub fn clear(&mut self) {
        self.operands.clear();
    }

    pub fn into_operands(self) -> Vec<Vec<u8>> {
        self.operands
    }
}
