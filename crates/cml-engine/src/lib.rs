//! CML Macro Engine
//!
//! This crate provides the runtime core of the CML macro language:
//! - **Class model**: `ClassInfo`/`MethodInfo` metadata and the class registry (`class` module)
//! - **Values**: instances held in a generation-checked arena (`value` module)
//! - **Call stack**: tagged stack slots and frame bookkeeping (`stack` module)
//! - **Exceptions**: macro exceptions threaded through `Result` (`exception` module)
//! - **Engine**: id-keyed dispatch and the embedding API (`engine` module)
//! - **Interpreter**: opcode bodies for macro-defined methods (`interp` module)
//! - **Intrinsics**: the built-in classes every program sees (`intrinsics`, `collections`)
//!
//! # Example
//!
//! ```rust,ignore
//! use cml_engine::{ClassRegistry, Engine, Intrinsic};
//!
//! let registry = ClassRegistry::builder().build()?;
//! let mut engine = Engine::new(registry);
//!
//! let text = engine.construct(Intrinsic::String.id(), "text")?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Class metadata, handlers and the registry
pub mod class;

/// Collection base class and Vector
pub mod collections;

/// The per-thread execution engine
pub mod engine;

/// Error types
pub mod error;

/// Macro exception records and error enums
pub mod exception;

/// Opcode interpreter for macro-defined methods
pub mod interp;

/// Built-in intrinsic classes
pub mod intrinsics;

/// Engine configuration
pub mod options;

/// Call stack
pub mod stack;

/// Runtime instances and the value arena
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use class::{
    ClassBuilder, ClassExt, ClassHandler, ClassInfo, ClassRegistry, EnumItem, LiteralValue,
    MemberInfo, MethodExt, MethodInfo, MethodTable, ParmDir, ParmInfo, RegistryBuilder, Visibility,
};
pub use engine::{Dispatch, Engine};
pub use error::{ConfigError, EngineError, EngineResult};
pub use exception::{replace_tokens, ErrorEnum, ExceptReport, ExceptionReporter, MacroException};
pub use interp::{LocalInfo, MacroClass, OpCode, OpMethodImpl};
pub use options::EngineOptions;
pub use stack::{CallStack, CallStackItem, StackItemType};
pub use value::{ClassVal, Constness, DbgFormat, MacroValue, ValueId};

/// Class identifier, assigned in registration order
pub type ClassId = u16;

/// Method identifier, the index into a class's method list
pub type MethodId = u16;

/// Sentinel for "no id"
pub const BAD_ID: u16 = u16::MAX;

// ============================================================================
// Intrinsic class ids
// ============================================================================

/// Intrinsic classes, declared first so their ids are fixed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum Intrinsic {
    /// Root of every class
    Object = 0,
    /// Return type of methods that return nothing
    Void,
    /// Base of classes that can format themselves
    Formattable,
    /// Base of enumerations
    Enum,
    /// The thrown exception value
    Exception,
    /// True/false
    Boolean,
    /// Unsigned 8 bit
    Card1,
    /// Unsigned 16 bit
    Card2,
    /// Unsigned 32 bit
    Card4,
    /// Text
    String,
    /// Byte buffer
    MemBuf,
    /// Base of collections
    Collection,
    /// Base of vectors
    Vector,
}

impl Intrinsic {
    /// Every intrinsic, in id order
    pub const ALL: [Intrinsic; 13] = [
        Intrinsic::Object,
        Intrinsic::Void,
        Intrinsic::Formattable,
        Intrinsic::Enum,
        Intrinsic::Exception,
        Intrinsic::Boolean,
        Intrinsic::Card1,
        Intrinsic::Card2,
        Intrinsic::Card4,
        Intrinsic::String,
        Intrinsic::MemBuf,
        Intrinsic::Collection,
        Intrinsic::Vector,
    ];

    /// Fixed class id
    #[inline]
    pub const fn id(self) -> ClassId {
        self as ClassId
    }

    /// Class path
    pub const fn path(self) -> &'static str {
        match self {
            Intrinsic::Object => "MEng.Object",
            Intrinsic::Void => "MEng.Void",
            Intrinsic::Formattable => "MEng.Formattable",
            Intrinsic::Enum => "MEng.Enum",
            Intrinsic::Exception => "MEng.Exception",
            Intrinsic::Boolean => "MEng.Boolean",
            Intrinsic::Card1 => "MEng.Card1",
            Intrinsic::Card2 => "MEng.Card2",
            Intrinsic::Card4 => "MEng.Card4",
            Intrinsic::String => "MEng.String",
            Intrinsic::MemBuf => "MEng.System.Runtime.MemBuf",
            Intrinsic::Collection => "MEng.System.Runtime.Collection",
            Intrinsic::Vector => "MEng.System.Runtime.Vector",
        }
    }

    /// Parent intrinsic, `None` for Object
    pub const fn parent(self) -> Option<Intrinsic> {
        match self {
            Intrinsic::Object => None,
            Intrinsic::Void | Intrinsic::Formattable | Intrinsic::MemBuf | Intrinsic::Collection => {
                Some(Intrinsic::Object)
            }
            Intrinsic::Enum
            | Intrinsic::Exception
            | Intrinsic::Boolean
            | Intrinsic::Card1
            | Intrinsic::Card2
            | Intrinsic::Card4
            | Intrinsic::String => Some(Intrinsic::Formattable),
            Intrinsic::Vector => Some(Intrinsic::Collection),
        }
    }
}

/// Split a class path into its base path and name
///
/// `"MEng.System.Runtime.MemBuf"` gives `("MEng.System.Runtime", "MemBuf")`.
pub fn split_path(path: &str) -> (&str, &str) {
    match path.rfind('.') {
        Some(dot) => (&path[..dot], &path[dot + 1..]),
        None => ("", path),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intrinsic_ids_are_dense() {
        for (index, intrinsic) in Intrinsic::ALL.iter().enumerate() {
            assert_eq!(intrinsic.id() as usize, index);
        }
    }

    #[test]
    fn test_intrinsic_parents_precede_children() {
        for intrinsic in Intrinsic::ALL {
            if let Some(parent) = intrinsic.parent() {
                assert!(parent.id() < intrinsic.id(), "{:?}", intrinsic);
            }
        }
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("MEng.System.Runtime.MemBuf"), ("MEng.System.Runtime", "MemBuf"));
        assert_eq!(split_path("Root"), ("", "Root"));
    }
}
