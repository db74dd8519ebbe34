//! Tagged call stack slots

use std::fmt;

use crate::error::{EngineError, EngineResult};
use crate::value::ValueId;
use crate::{ClassId, MethodId};

/// Tag of a call stack slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackItemType {
    /// Free slot
    Unused,
    /// Method call record
    MethodCall,
    /// Method local
    Local,
    /// Member of the running instance
    Member,
    /// Parameter being passed
    Parm,
    /// Temp pool value
    TempVal,
    /// Method string pool literal
    StringPool,
    /// The running instance
    This,
    /// Element of a collection
    ColElem,
    /// The thrown exception, inside a catch block
    Exception,
    /// Try block marker
    Try,
}

impl StackItemType {
    /// True for the tags that wrap a value
    #[inline]
    pub fn is_value(self) -> bool {
        self.value_kind().is_some()
    }

    /// Value kind for the value tags
    pub fn value_kind(self) -> Option<ValueKind> {
        match self {
            StackItemType::Local => Some(ValueKind::Local),
            StackItemType::Member => Some(ValueKind::Member),
            StackItemType::Parm => Some(ValueKind::Parm),
            StackItemType::TempVal => Some(ValueKind::TempVal),
            StackItemType::StringPool => Some(ValueKind::StringPool),
            StackItemType::This => Some(ValueKind::This),
            StackItemType::ColElem => Some(ValueKind::ColElem),
            StackItemType::Exception => Some(ValueKind::Exception),
            StackItemType::Unused | StackItemType::MethodCall | StackItemType::Try => None,
        }
    }
}

impl fmt::Display for StackItemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StackItemType::Unused => "Unused",
            StackItemType::MethodCall => "MethodCall",
            StackItemType::Local => "Local",
            StackItemType::Member => "Member",
            StackItemType::Parm => "Parm",
            StackItemType::TempVal => "TempVal",
            StackItemType::StringPool => "StringPool",
            StackItemType::This => "This",
            StackItemType::ColElem => "ColElem",
            StackItemType::Exception => "Exception",
            StackItemType::Try => "Try",
        };
        f.write_str(name)
    }
}

/// The kinds of value a slot can wrap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Method local (owned by the frame)
    Local,
    /// Member of the running instance
    Member,
    /// Parameter being passed
    Parm,
    /// Temp pool value (returned to the pool on pop)
    TempVal,
    /// Method string pool literal
    StringPool,
    /// The running instance
    This,
    /// Element of a collection
    ColElem,
    /// The thrown exception
    Exception,
}

impl From<ValueKind> for StackItemType {
    fn from(kind: ValueKind) -> Self {
        match kind {
            ValueKind::Local => StackItemType::Local,
            ValueKind::Member => StackItemType::Member,
            ValueKind::Parm => StackItemType::Parm,
            ValueKind::TempVal => StackItemType::TempVal,
            ValueKind::StringPool => StackItemType::StringPool,
            ValueKind::This => StackItemType::This,
            ValueKind::ColElem => StackItemType::ColElem,
            ValueKind::Exception => StackItemType::Exception,
        }
    }
}

/// Who made a call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallerInfo {
    /// Calling class; with `method_id` this names the caller's opcode body
    pub class_id: ClassId,
    /// Calling method
    pub method_id: MethodId,
    /// Instance the caller was running against
    pub this: ValueId,
    /// Source line of the call
    pub line: u32,
    /// Opcode index of the call
    pub ip: u32,
}

/// Method call record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodCallItem {
    /// Called class
    pub class_id: ClassId,
    /// Called method
    pub method_id: MethodId,
    /// Caller, absent for embedder calls
    pub caller: Option<CallerInfo>,
}

/// Value slot contents
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ValueItem {
    /// What the value is to the frame
    pub kind: ValueKind,
    /// The referenced value
    pub value: ValueId,
    /// Set for a second push of a slot owned elsewhere on the stack
    pub repush: bool,
}

/// One slot of the call stack
///
/// The variant fully determines which fields exist. Changing tag always goes
/// through one of the reset methods, which replace the whole slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CallStackItem {
    /// Free slot
    #[default]
    Unused,
    /// Method call record
    MethodCall(MethodCallItem),
    /// Wrapped value reference
    Value(ValueItem),
    /// Try marker holding the catch block IP
    Try {
        /// IP of the catch block
        catch_ip: u32,
    },
}

impl CallStackItem {
    /// Current tag
    pub fn item_type(&self) -> StackItemType {
        match self {
            CallStackItem::Unused => StackItemType::Unused,
            CallStackItem::MethodCall(_) => StackItemType::MethodCall,
            CallStackItem::Value(item) => item.kind.into(),
            CallStackItem::Try { .. } => StackItemType::Try,
        }
    }

    // ========================================================================
    // Resets
    // ========================================================================

    /// Make this a method call slot
    pub fn reset_call(&mut self, class_id: ClassId, method_id: MethodId, caller: Option<CallerInfo>) {
        *self = CallStackItem::MethodCall(MethodCallItem {
            class_id,
            method_id,
            caller,
        });
    }

    /// Make this a value slot
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadItemResetType` unless `item_type` is a value tag.
    pub fn reset_value(&mut self, value: ValueId, item_type: StackItemType) -> EngineResult<()> {
        let kind = item_type
            .value_kind()
            .ok_or(EngineError::BadItemResetType(item_type))?;
        *self = CallStackItem::Value(ValueItem {
            kind,
            value,
            repush: false,
        });
        Ok(())
    }

    /// Make this an immediate slot
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadItemResetType` unless `item_type` is `Try`.
    pub fn reset_immediate(&mut self, item_type: StackItemType, value: u32) -> EngineResult<()> {
        match item_type {
            StackItemType::Try => {
                *self = CallStackItem::Try { catch_ip: value };
                Ok(())
            }
            other => Err(EngineError::BadItemResetType(other)),
        }
    }

    /// Return to `Unused`
    #[inline]
    pub fn clear(&mut self) {
        *self = CallStackItem::Unused;
    }

    // ========================================================================
    // Tag queries
    // ========================================================================

    /// True for value slots
    #[inline]
    pub fn is_value(&self) -> bool {
        matches!(self, CallStackItem::Value(_))
    }

    /// True for method call slots
    #[inline]
    pub fn is_method(&self) -> bool {
        matches!(self, CallStackItem::MethodCall(_))
    }

    /// True for immediate slots
    #[inline]
    pub fn is_im_value(&self) -> bool {
        matches!(self, CallStackItem::Try { .. })
    }

    /// True for a repushed value slot
    #[inline]
    pub fn is_repush(&self) -> bool {
        matches!(self, CallStackItem::Value(ValueItem { repush: true, .. }))
    }

    // ========================================================================
    // Checked accessors
    // ========================================================================

    /// The wrapped value
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotAValueItem` for non-value slots.
    pub fn pushed(&self) -> EngineResult<ValueId> {
        match self {
            CallStackItem::Value(item) => Ok(item.value),
            other => Err(EngineError::NotAValueItem(other.item_type())),
        }
    }

    /// The value slot contents
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotAValueItem` for non-value slots.
    pub fn value_item(&self) -> EngineResult<&ValueItem> {
        match self {
            CallStackItem::Value(item) => Ok(item),
            other => Err(EngineError::NotAValueItem(other.item_type())),
        }
    }

    /// The method call record
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotACallItem` for non-call slots.
    pub fn call(&self) -> EngineResult<&MethodCallItem> {
        match self {
            CallStackItem::MethodCall(call) => Ok(call),
            other => Err(EngineError::NotACallItem(other.item_type())),
        }
    }

    /// Called method id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotACallItem` for non-call slots.
    pub fn called_method(&self) -> EngineResult<MethodId> {
        self.call().map(|call| call.method_id)
    }

    /// Called class id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotACallItem` for non-call slots.
    pub fn called_class(&self) -> EngineResult<ClassId> {
        self.call().map(|call| call.class_id)
    }

    /// Caller details, if the call came from macro code
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotACallItem` for non-call slots.
    pub fn caller_info(&self) -> EngineResult<Option<&CallerInfo>> {
        self.call().map(|call| call.caller.as_ref())
    }

    /// Immediate value
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotImValueItem` for non-immediate slots.
    pub fn im_value(&self) -> EngineResult<u32> {
        match self {
            CallStackItem::Try { catch_ip } => Ok(*catch_ip),
            other => Err(EngineError::NotImValueItem(other.item_type())),
        }
    }

    /// A repushed copy of this slot
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RepushMethod` for method call slots and
    /// `EngineError::NotAValueItem` for other non-value slots.
    pub fn repushed(&self) -> EngineResult<CallStackItem> {
        match self {
            CallStackItem::Value(item) => Ok(CallStackItem::Value(ValueItem {
                repush: true,
                ..*item
            })),
            CallStackItem::MethodCall(_) => Err(EngineError::RepushMethod),
            other => Err(EngineError::NotAValueItem(other.item_type())),
        }
    }
}
