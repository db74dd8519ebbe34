//! Opcode method bodies

use super::OpCode;
use crate::value::Constness;
use crate::ClassId;

/// One declared local
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalInfo {
    /// Local name
    pub name: String,
    /// Local class
    pub class_id: ClassId,
    /// Local constness
    pub constness: Constness,
}

/// Opcode body of a macro-defined method
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OpMethodImpl {
    /// Instructions
    pub opcodes: Vec<OpCode>,
    /// Locals, created fresh on each call
    pub locals: Vec<LocalInfo>,
    /// String literals used by `PushStrPoolItem`
    pub strings: Vec<String>,
}

impl OpMethodImpl {
    /// Body running `opcodes` with no locals
    pub fn new(opcodes: Vec<OpCode>) -> Self {
        Self {
            opcodes,
            locals: Vec::new(),
            strings: Vec::new(),
        }
    }

    /// Add a local
    pub fn with_local(mut self, name: impl Into<String>, class_id: ClassId, constness: Constness) -> Self {
        self.locals.push(LocalInfo {
            name: name.into(),
            class_id,
            constness,
        });
        self
    }

    /// Add a string literal
    pub fn with_string(mut self, text: impl Into<String>) -> Self {
        self.strings.push(text.into());
        self
    }
}
