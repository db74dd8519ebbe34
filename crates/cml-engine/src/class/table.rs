//! Dense id-keyed method tables

use crate::MethodId;

/// Maps method ids to a handler's operation tag
///
/// Handlers fill the table while registering their methods and look ids up
/// on every call. Ids the handler never bound map to `None`.
#[derive(Debug, Clone)]
pub struct MethodTable<Op: Copy> {
    ops: Vec<Option<Op>>,
}

impl<Op: Copy> MethodTable<Op> {
    /// Create an empty table
    pub fn new() -> Self {
        Self { ops: Vec::new() }
    }

    /// Bind `id` to `op`
    pub fn bind(&mut self, id: MethodId, op: Op) {
        let index = usize::from(id);
        if index >= self.ops.len() {
            self.ops.resize(index + 1, None);
        }
        self.ops[index] = Some(op);
    }

    /// Operation bound to `id`
    #[inline]
    pub fn lookup(&self, id: MethodId) -> Option<Op> {
        self.ops.get(usize::from(id)).copied().flatten()
    }

    /// Number of bound ids
    pub fn len(&self) -> usize {
        self.ops.iter().filter(|op| op.is_some()).count()
    }

    /// True if nothing is bound
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<Op: Copy> Default for MethodTable<Op> {
    fn default() -> Self {
        Self::new()
    }
}
