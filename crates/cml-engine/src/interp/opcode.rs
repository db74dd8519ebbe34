//! Opcodes
//!
//! Local, parameter and member operands are zero-based indices into the
//! frame's locals, the method's parameters and the instance's members.

use crate::{ClassId, MethodId};

/// One interpreter instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    // ========================================================================
    // Bookkeeping
    // ========================================================================
    /// Do nothing
    NoOp,
    /// Set the current source line
    CurLine(u32),

    // ========================================================================
    // Pushes
    // ========================================================================
    /// Repush a local
    PushLocal(u16),
    /// Repush a parameter
    PushParm(u16),
    /// Push a member of `this`
    PushMember(u16),
    /// Push `this`
    PushThis,
    /// Push the caught exception
    PushException,
    /// Push a string pool literal
    PushStrPoolItem(u16),
    /// Push a writable temp of a class
    PushTempVar(ClassId),
    /// Push a read-only temp of a class
    PushTempConst(ClassId),
    /// Push an immediate Boolean
    PushImBoolean(bool),
    /// Push an immediate Card1
    PushImCard1(u8),
    /// Push an immediate Card2
    PushImCard2(u16),
    /// Push an immediate Card4
    PushImCard4(u32),
    /// Push an enum value
    PushEnum {
        /// Enum class
        class_id: ClassId,
        /// Item ordinal
        ordinal: u32,
    },
    /// Push the current line as a Card4
    PushCurLine,

    // ========================================================================
    // Pops
    // ========================================================================
    /// Pop one slot
    PopTop,
    /// Pop several slots
    MultiPop(u32),
    /// Copy the top value into the return slot, then pop it
    PopToReturn,
    /// Copy the top value into the value below it, then pop both
    Copy,

    // ========================================================================
    // Calls
    // ========================================================================
    /// Call a method of a local
    CallLocal {
        /// Local index
        local: u16,
        /// Method to call
        method: MethodId,
    },
    /// Call a method of a member
    CallMember {
        /// Member index
        member: u16,
        /// Method to call
        method: MethodId,
    },
    /// Call a method of a parameter
    CallParm {
        /// Parameter index
        parm: u16,
        /// Method to call
        method: MethodId,
    },
    /// Call a method of the value `offset` slots below the top
    CallStack {
        /// Distance from the top; 1 is the top slot
        offset: u16,
        /// Method to call
        method: MethodId,
    },
    /// Call a method of `this`
    CallThis(MethodId),
    /// Call the parent class's version of a method of `this`
    CallParent(MethodId),
    /// Call a method of the caught exception
    CallExcept(MethodId),

    // ========================================================================
    // Control
    // ========================================================================
    /// Replace a collection and index with the indexed element
    ColIndex,
    /// Jump
    Jump(u32),
    /// Pop a Boolean and jump if it is true
    CondJump(u32),
    /// Pop a Boolean and jump if it is false
    NotCondJump(u32),
    /// Start a try block whose catch block is at the IP
    Try(u32),
    /// End a try block
    EndTry,
    /// Throw the error enum on the top of stack
    Throw,
    /// Rethrow the caught exception
    Rethrow,
    /// Throw the error enum below `n` token values
    ThrowFmt(u32),
    /// Return from the method
    Return,
}
