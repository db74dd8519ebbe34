//! Unified call/value stack
//!
//! One stack carries method call records, value references and try markers.
//! Slots are reused across pushes; the vector only grows.

mod item;

pub use item::{CallStackItem, CallerInfo, MethodCallItem, StackItemType, ValueItem, ValueKind};

use crate::error::{EngineError, EngineResult};

/// Default maximum stack depth in slots
pub const DEFAULT_MAX_DEPTH: usize = 64 * 1024;

/// Call stack
#[derive(Debug)]
pub struct CallStack {
    items: Vec<CallStackItem>,
    top: usize,
    max_depth: usize,
}

impl CallStack {
    /// Create an empty stack limited to `max_depth` slots
    pub fn new(max_depth: usize) -> Self {
        Self {
            items: Vec::with_capacity(max_depth.min(256)),
            top: 0,
            max_depth,
        }
    }

    /// Number of used slots
    #[inline]
    pub fn len(&self) -> usize {
        self.top
    }

    /// True if no slots are used
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }

    /// Maximum depth
    #[inline]
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// Push a slot, returning its index
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` at the maximum depth.
    pub fn push(&mut self, item: CallStackItem) -> EngineResult<usize> {
        if self.top >= self.max_depth {
            return Err(EngineError::StackOverflow(self.max_depth));
        }
        if self.top == self.items.len() {
            self.items.push(item);
        } else {
            self.items[self.top] = item;
        }
        self.top += 1;
        Ok(self.top - 1)
    }

    /// Pop the top slot, leaving it `Unused`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the stack is empty.
    pub fn pop(&mut self) -> EngineResult<CallStackItem> {
        if self.top == 0 {
            return Err(EngineError::StackUnderflow);
        }
        self.top -= 1;
        let item = self.items[self.top];
        self.items[self.top].clear();
        Ok(item)
    }

    /// Slot at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadStackIndex` if `index` is not below the top.
    pub fn at(&self, index: usize) -> EngineResult<&CallStackItem> {
        if index >= self.top {
            return Err(EngineError::BadStackIndex {
                index,
                top: self.top,
            });
        }
        Ok(&self.items[index])
    }

    /// Mutable slot at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadStackIndex` if `index` is not below the top.
    pub fn at_mut(&mut self, index: usize) -> EngineResult<&mut CallStackItem> {
        if index >= self.top {
            return Err(EngineError::BadStackIndex {
                index,
                top: self.top,
            });
        }
        Ok(&mut self.items[index])
    }

    /// Top slot
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the stack is empty.
    pub fn top_item(&self) -> EngineResult<&CallStackItem> {
        match self.top {
            0 => Err(EngineError::StackUnderflow),
            top => Ok(&self.items[top - 1]),
        }
    }

    /// Push a second reference to the value slot at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RepushMethod` for method call slots.
    pub fn repush_at(&mut self, index: usize) -> EngineResult<usize> {
        let item = self.at(index)?.repushed()?;
        self.push(item)
    }

    /// Index and catch IP of the nearest try marker, searching down from the top
    pub fn find_next_try(&self) -> Option<(usize, u32)> {
        self.items[..self.top]
            .iter()
            .enumerate()
            .rev()
            .find_map(|(index, item)| match item {
                CallStackItem::Try { catch_ip } => Some((index, *catch_ip)),
                _ => None,
            })
    }

    /// Index of the first parameter of the method call on top of the stack
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the stack does not hold the
    /// call slot and its parameters.
    pub fn first_parm_index(&self, parm_count: usize) -> EngineResult<usize> {
        self.top
            .checked_sub(parm_count + 1)
            .ok_or(EngineError::StackUnderflow)
    }

    /// Used slots, bottom first
    pub fn items(&self) -> &[CallStackItem] {
        &self.items[..self.top]
    }
}

impl Default for CallStack {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DEPTH)
    }
}

// ============================================================================
// Tests
// ============================================================================
