//! Runtime instances
//!
//! A [`ClassVal`] is one instance of a macro class. The class-independent part
//! (name, class id, constness, member handles) lives in `ClassVal`; the native
//! backing state is a boxed [`MacroValue`] supplied by the class's handler.
//! Values are owned by the engine's [`ValueArena`] and referenced everywhere
//! else through [`ValueId`] handles.

mod arena;

pub use arena::{ValueArena, ValueId};

use std::any::Any;
use std::fmt;

use crate::collections::CollectVal;
use crate::error::{EngineError, EngineResult};
use crate::ClassId;

/// Whether a value may be modified by macro code
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Constness {
    /// Read-only
    Const,
    /// Writable
    #[default]
    NonConst,
}

/// Debug rendering detail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbgFormat {
    /// One line
    Short,
    /// Multi-line detail
    Long,
}

/// Implements the `as_any`/`as_any_mut` pair of [`MacroValue`]
#[macro_export]
macro_rules! impl_as_any {
    () => {
        fn as_any(&self) -> &dyn ::std::any::Any {
            self
        }

        fn as_any_mut(&mut self) -> &mut dyn ::std::any::Any {
            self
        }
    };
}

/// Native backing state of a macro class instance
pub trait MacroValue: Any + Send + fmt::Debug {
    /// Upcast for downcasting to the concrete type
    fn as_any(&self) -> &dyn Any;

    /// Mutable upcast for downcasting to the concrete type
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Deep copy `src` into `self`
    ///
    /// # Errors
    ///
    /// The default refuses; copyable classes override it.
    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        let _ = src;
        Err(EngineError::NotCopyable(std::any::type_name::<Self>().to_string()))
    }

    /// Text used by `FormatTo` and token substitution
    fn format(&self) -> Option<String> {
        None
    }

    /// Debugger rendering
    fn dbg_format(&self, fmt: DbgFormat) -> String {
        let _ = fmt;
        self.format().unwrap_or_else(|| format!("{:?}", self))
    }

    /// Handles of values this value owns (freed along with it)
    fn owned_values(&self) -> Vec<ValueId> {
        Vec::new()
    }

    /// Collection view, for values of collection classes
    fn as_collection(&self) -> Option<&dyn CollectVal> {
        None
    }

    /// Mutable collection view
    fn as_collection_mut(&mut self) -> Option<&mut dyn CollectVal> {
        None
    }
}

/// Downcast helper used by `copy_from` implementations
pub fn downcast_src<'a, T: MacroValue>(src: &'a dyn MacroValue) -> EngineResult<&'a T> {
    src.as_any()
        .downcast_ref::<T>()
        .ok_or_else(|| EngineError::ValueTypeMismatch {
            expected: std::any::type_name::<T>(),
            class_path: format!("{:?}", src),
        })
}

/// Backing state for classes that carry no native data
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyVal;

impl MacroValue for EmptyVal {
    impl_as_any!();

    fn copy_from(&mut self, _src: &dyn MacroValue) -> EngineResult<()> {
        Ok(())
    }
}

/// One runtime instance of a macro class
#[derive(Debug)]
pub struct ClassVal {
    name: String,
    class_id: ClassId,
    constness: Constness,
    members: Vec<ValueId>,
    data: Box<dyn MacroValue>,
}

impl ClassVal {
    /// Wrap backing state as an instance of `class_id`
    pub fn new(
        name: impl Into<String>,
        class_id: ClassId,
        constness: Constness,
        data: Box<dyn MacroValue>,
    ) -> Self {
        Self {
            name: name.into(),
            class_id,
            constness,
            members: Vec::new(),
            data,
        }
    }

    /// Instance name (local, member or parameter name)
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Class id, fixed at construction
    #[inline]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Constness
    #[inline]
    pub fn constness(&self) -> Constness {
        self.constness
    }

    /// True if read-only
    #[inline]
    pub fn is_const(&self) -> bool {
        self.constness == Constness::Const
    }

    /// Change constness (temp pool reuse)
    #[inline]
    pub fn set_constness(&mut self, constness: Constness) {
        self.constness = constness;
    }

    /// Member value handles, in member index order
    #[inline]
    pub fn members(&self) -> &[ValueId] {
        &self.members
    }

    pub(crate) fn set_members(&mut self, members: Vec<ValueId>) {
        self.members = members;
    }

    /// Member handle by index
    pub fn member(&self, index: usize) -> Option<ValueId> {
        self.members.get(index).copied()
    }

    /// Backing state
    #[inline]
    pub fn data(&self) -> &dyn MacroValue {
        self.data.as_ref()
    }

    /// Mutable backing state
    #[inline]
    pub fn data_mut(&mut self) -> &mut dyn MacroValue {
        self.data.as_mut()
    }

    /// Downcast the backing state
    pub fn downcast_ref<T: MacroValue>(&self) -> Option<&T> {
        self.data.as_any().downcast_ref::<T>()
    }

    /// Mutably downcast the backing state
    pub fn downcast_mut<T: MacroValue>(&mut self) -> Option<&mut T> {
        self.data.as_any_mut().downcast_mut::<T>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Default)]
    struct Counter {
        count: u32,
    }

    impl MacroValue for Counter {
        impl_as_any!();

        fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
            self.count = downcast_src::<Counter>(src)?.count;
            Ok(())
        }

        fn format(&self) -> Option<String> {
            Some(self.count.to_string())
        }
    }

    #[derive(Debug)]
    struct Opaque;

    impl MacroValue for Opaque {
        impl_as_any!();
    }

    #[test]
    fn test_downcast() {
        let mut val = ClassVal::new("c", 3, Constness::NonConst, Box::new(Counter { count: 2 }));
        assert_eq!(val.class_id(), 3);
        assert_eq!(val.downcast_ref::<Counter>().map(|c| c.count), Some(2));
        assert!(val.downcast_ref::<Opaque>().is_none());

        if let Some(counter) = val.downcast_mut::<Counter>() {
            counter.count = 9;
        }
        assert_eq!(val.data().format().as_deref(), Some("9"));
    }

    #[test]
    fn test_copy_from() {
        let mut target = Counter::default();
        target.copy_from(&Counter { count: 5 }).unwrap();
        assert_eq!(target.count, 5);

        assert!(target.copy_from(&Opaque).is_err());
        assert!(matches!(
            Opaque.copy_from(&Counter::default()),
            Err(EngineError::NotCopyable(_))
        ));
    }

    #[test]
    fn test_dbg_format_falls_back_to_debug() {
        assert_eq!(Opaque.dbg_format(DbgFormat::Short), "Opaque");
        assert_eq!(Counter { count: 1 }.dbg_format(DbgFormat::Long), "1");
    }
}
