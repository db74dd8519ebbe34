//! Engine error types
//!
//! Host-level failures and catchable macro exceptions share one error type so
//! every dispatch path can use `?`. Only [`EngineError::Thrown`] is visible to
//! macro code; everything else indicates a class library or interpreter bug.

use crate::exception::MacroException;
use crate::stack::StackItemType;
use crate::{ClassId, MethodId};

/// Engine execution errors
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    // ========================================================================
    // Dispatch errors
    // ========================================================================
    /// A method-call accessor was used on a slot holding something else
    #[error("Call stack item is not a method call (found {0})")]
    NotACallItem(StackItemType),

    /// A value accessor was used on a slot that does not hold a value
    #[error("Call stack item is not a value (found {0})")]
    NotAValueItem(StackItemType),

    /// An immediate accessor was used on a slot that holds no immediate
    #[error("Call stack item is not an immediate value (found {0})")]
    NotImValueItem(StackItemType),

    /// A slot was reset with a tag that the reset form does not accept
    #[error("Cannot reset a call stack item to {0} with this reset form")]
    BadItemResetType(StackItemType),

    /// No class in the dispatch chain handled the method id
    #[error("Method id {method_id} was not found in class {class_path}")]
    MethodNotFound {
        /// Method id that was dispatched
        method_id: MethodId,
        /// Class the dispatch started from
        class_path: String,
    },

    /// Method id is outside the class's method table
    #[error("Method id {method_id} is not valid for class {class_path}")]
    BadMethodId {
        /// Offending method id
        method_id: MethodId,
        /// Class that was asked
        class_path: String,
    },

    /// Class id is not registered
    #[error("Class id {0} is not registered")]
    BadClassId(ClassId),

    /// Stack overflow
    #[error("Stack overflow (max depth {0})")]
    StackOverflow(usize),

    /// Stack underflow
    #[error("Stack underflow")]
    StackUnderflow,

    /// Stack index beyond the current top
    #[error("Stack index {index} is beyond the stack top {top}")]
    BadStackIndex {
        /// Requested index
        index: usize,
        /// Current stack top
        top: usize,
    },

    /// EndTry found something other than a try marker on the top of stack
    #[error("Expected a try marker on the top of stack (found {0})")]
    ExpectedTry(StackItemType),

    /// Method call slots cannot be repushed
    #[error("Method call items cannot be repushed")]
    RepushMethod,

    /// A value was not of the Rust type the caller expected
    #[error("Value of class {class_path} is not a {expected}")]
    ValueTypeMismatch {
        /// Rust type that was requested
        expected: &'static str,
        /// Class of the value actually found
        class_path: String,
    },

    /// A value handle outlived its value
    #[error("Value handle {0} no longer refers to a live value")]
    StaleValue(String),

    /// Opcode index out of range
    #[error("Bad instruction pointer {ip} in method {method}")]
    BadIp {
        /// Offending IP
        ip: usize,
        /// Method being run
        method: String,
    },

    /// Wrong number of arguments passed by the embedder
    #[error("Method {method} takes {expected} parameters but {got} were passed")]
    ParmCount {
        /// Method name
        method: String,
        /// Declared parameter count
        expected: usize,
        /// Passed argument count
        got: usize,
    },

    /// Argument class does not match the declared parameter class
    #[error("Parameter {parm} of {method} expects {expected}, got {got}")]
    ParmType {
        /// Method name
        method: String,
        /// Parameter name
        parm: String,
        /// Declared class path
        expected: String,
        /// Passed class path
        got: String,
    },

    /// Member index outside the instance's member list
    #[error("Member index {index} is not valid for class {class_path}")]
    BadMemberIndex {
        /// Requested index
        index: usize,
        /// Class of the instance
        class_path: String,
    },

    /// String pool index outside the method's pool
    #[error("String pool index {index} is not valid in method {method}")]
    BadStringIndex {
        /// Requested index
        index: usize,
        /// Method being run
        method: String,
    },

    /// Rethrow with no caught exception
    #[error("There is no caught exception to rethrow")]
    NoException,

    /// ColIndex applied to a non-collection value
    #[error("Class {0} is not a collection")]
    NotACollection(String),

    /// Copy opcode applied to non-copyable classes
    #[error("Cannot copy {src} to {target}")]
    BadCopyOpParms {
        /// Source class path
        src: String,
        /// Target class path
        target: String,
    },

    // ========================================================================
    // Class definition errors
    // ========================================================================
    /// Abstract and base classes cannot be instantiated
    #[error("Class {0} has no value and cannot be instantiated")]
    ClassHasNoValue(String),

    /// Class path already registered
    #[error("Class {0} is already registered")]
    DupClass(String),

    /// Method name already used in the class
    #[error("Method {method} is already defined in class {class_path}")]
    DupMethod {
        /// Method name
        method: String,
        /// Class path
        class_path: String,
    },

    /// Class path not registered
    #[error("Class {0} was not found")]
    ClassNotFound(String),

    /// Imported class not registered
    #[error("Class {class_path} imports {import}, which is not registered")]
    ImportNotFound {
        /// Importing class path
        class_path: String,
        /// Missing import path
        import: String,
    },

    /// Only inherited non-final methods can be overridden
    #[error("Method {method} cannot be overridden in class {class_path}")]
    CannotOverride {
        /// Method name
        method: String,
        /// Class path
        class_path: String,
    },

    /// Parent class is final
    #[error("Class {class_path} cannot derive from final class {parent}")]
    ParentIsFinal {
        /// Derived class path
        class_path: String,
        /// Parent class path
        parent: String,
    },

    /// Value class does not support copying
    #[error("Values of class {0} cannot be copied")]
    NotCopyable(String),

    /// Enum ordinal outside the enum's item list
    #[error("Ordinal {ordinal} is not valid for enum {class_path}")]
    BadEnumOrdinal {
        /// Offending ordinal
        ordinal: u32,
        /// Enum class path
        class_path: String,
    },

    /// Class slot was declared but never initialized
    #[error("Class {0} was not initialized")]
    NotInitialized(String),

    // ========================================================================
    // Macro exceptions
    // ========================================================================
    /// A macro level exception that macro code may catch
    #[error("{0}")]
    Thrown(Box<MacroException>),
}

impl EngineError {
    /// Whether macro code can catch this error
    #[inline]
    pub fn is_catchable(&self) -> bool {
        matches!(self, EngineError::Thrown(_))
    }

    /// The macro exception record, if this is a thrown macro exception
    pub fn exception(&self) -> Option<&MacroException> {
        match self {
            EngineError::Thrown(exc) => Some(exc),
            _ => None,
        }
    }
}

/// Engine execution result
pub type EngineResult<T> = Result<T, EngineError>;

// ============================================================================
// Configuration errors
// ============================================================================

/// Errors loading [`EngineOptions`](crate::EngineOptions)
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file
    #[error("Failed to read engine config: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse TOML
    #[error("Failed to parse engine config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Validation error
    #[error("Invalid engine config: {0}")]
    Validation(String),
}
