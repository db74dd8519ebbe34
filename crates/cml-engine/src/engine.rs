//! The execution engine
//!
//! An [`Engine`] owns every value it creates, the call stack and the temp
//! pool. It is single-threaded; the [`ClassRegistry`] it runs against is
//! shared and immutable.
//!
//! # Calling convention
//!
//! A call pushes, in order: the return slot (for non-void methods), one slot
//! per parameter, then a method-call item. While the callee runs, parameter
//! `i` is at `first_parm_index + i` and the return slot at
//! `first_parm_index - 1`. The caller pops everything back afterwards.

use std::fmt;
use std::sync::Arc;

use rustc_hash::FxHashMap;

use crate::class::{ClassRegistry, MethodInfo};
use crate::error::{EngineError, EngineResult};
use crate::exception::{replace_tokens, ExceptReport, ExceptionReporter, MacroException};
use crate::intrinsics::{BooleanVal, Card1Val, Card2Val, Card4Val, ExceptVal, MemBufVal, StringVal};
use crate::options::EngineOptions;
use crate::stack::{CallStack, CallStackItem, CallerInfo, StackItemType, ValueKind};
use crate::value::{ClassVal, Constness, MacroValue, ValueArena, ValueId};
use crate::{ClassId, Intrinsic, MethodId};

/// Where dispatch starts looking for a method
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Start at the named class (parent calls)
    Mono,
    /// Start at the instance's own class
    Poly,
}

/// Single-threaded macro execution engine
pub struct Engine {
    registry: Arc<ClassRegistry>,
    options: EngineOptions,
    values: ValueArena,
    stack: CallStack,
    temps: FxHashMap<ClassId, Vec<ValueId>>,
    string_pool: FxHashMap<(ClassId, MethodId, u16), ValueId>,
    thrown: Option<ValueId>,
    cur_line: u32,
    reporter: Option<Box<dyn ExceptionReporter>>,
}

impl Engine {
    /// Create an engine with default options
    pub fn new(registry: Arc<ClassRegistry>) -> Self {
        Self::with_options(registry, EngineOptions::default())
    }

    /// Create an engine with the given options
    pub fn with_options(registry: Arc<ClassRegistry>, options: EngineOptions) -> Self {
        let stack = CallStack::new(options.max_stack_depth);
        Self {
            registry,
            options,
            values: ValueArena::new(),
            stack,
            temps: FxHashMap::default(),
            string_pool: FxHashMap::default(),
            thrown: None,
            cur_line: 0,
            reporter: None,
        }
    }

    /// Shared class registry
    #[inline]
    pub fn registry(&self) -> &Arc<ClassRegistry> {
        &self.registry
    }

    /// Engine options
    #[inline]
    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Call stack
    #[inline]
    pub fn stack(&self) -> &CallStack {
        &self.stack
    }

    /// Value arena
    #[inline]
    pub fn values(&self) -> &ValueArena {
        &self.values
    }

    /// Install an exception reporter
    pub fn set_reporter(&mut self, reporter: Box<dyn ExceptionReporter>) {
        self.reporter = Some(reporter);
    }

    /// Current source line
    #[inline]
    pub fn cur_line(&self) -> u32 {
        self.cur_line
    }

    /// Set the current source line
    #[inline]
    pub fn set_cur_line(&mut self, line: u32) {
        self.cur_line = line;
    }

    // ========================================================================
    // Values
    // ========================================================================

    /// Create an instance, including its member values
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ClassHasNoValue` for abstract classes.
    pub fn new_value(&mut self, class_id: ClassId, name: &str, constness: Constness) -> EngineResult<ValueId> {
        let registry = Arc::clone(&self.registry);
        let mut value = registry.make_storage(class_id, name, constness)?;

        let info = registry.class(class_id)?;
        let mut members = Vec::with_capacity(info.members().len());
        for member in info.members() {
            match self.new_value(member.class_id, &member.name, member.constness) {
                Ok(id) => members.push(id),
                Err(err) => {
                    for id in members {
                        self.free_value(id)?;
                    }
                    return Err(err);
                }
            }
        }
        value.set_members(members);
        Ok(self.values.insert(value))
    }

    /// Destroy an instance along with its members and owned values
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if the value is already gone.
    pub fn free_value(&mut self, id: ValueId) -> EngineResult<()> {
        let value = self.values.remove(id)?;
        for member in value.members() {
            self.free_value(*member)?;
        }
        for owned in value.data().owned_values() {
            self.free_value(owned)?;
        }
        Ok(())
    }

    /// Borrow an instance
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` for dead handles.
    #[inline]
    pub fn value(&self, id: ValueId) -> EngineResult<&ClassVal> {
        self.values.get(id)
    }

    /// Mutably borrow an instance
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` for dead handles.
    #[inline]
    pub fn value_mut(&mut self, id: ValueId) -> EngineResult<&mut ClassVal> {
        self.values.get_mut(id)
    }

    /// Class of an instance
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` for dead handles.
    pub fn class_of(&self, id: ValueId) -> EngineResult<ClassId> {
        self.value(id).map(ClassVal::class_id)
    }

    /// Borrow an instance's backing state as `T`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the state is not a `T`.
    pub fn value_as<T: MacroValue>(&self, id: ValueId) -> EngineResult<&T> {
        let value = self.value(id)?;
        value.downcast_ref::<T>().ok_or_else(|| EngineError::ValueTypeMismatch {
            expected: std::any::type_name::<T>(),
            class_path: self.registry.path_of(value.class_id()).to_string(),
        })
    }

    /// Mutably borrow an instance's backing state as `T`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the state is not a `T`.
    pub fn value_as_mut<T: MacroValue>(&mut self, id: ValueId) -> EngineResult<&mut T> {
        let registry = Arc::clone(&self.registry);
        let value = self.values.get_mut(id)?;
        let class_id = value.class_id();
        value.downcast_mut::<T>().ok_or_else(|| EngineError::ValueTypeMismatch {
            expected: std::any::type_name::<T>(),
            class_path: registry.path_of(class_id).to_string(),
        })
    }

    /// Deep copy `src` into `target`
    ///
    /// With validation on, `target`'s class must be copyable and `src` must be
    /// of that class or derived from it.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadCopyOpParms` when the classes do not allow the
    /// copy, or the value's own `copy_from` error.
    pub fn copy_value(&mut self, target: ValueId, src: ValueId) -> EngineResult<()> {
        if target == src {
            return Ok(());
        }

        let target_class = self.class_of(target)?;
        let src_class = self.class_of(src)?;
        if self.options.validation {
            let copyable = self.registry.class(target_class)?.is_copyable();
            if !copyable || !self.registry.is_descendant_of(src_class, target_class) {
                return Err(EngineError::BadCopyOpParms {
                    src: self.registry.path_of(src_class).to_string(),
                    target: self.registry.path_of(target_class).to_string(),
                });
            }
        }

        let members = {
            let (target_val, src_val) = self.values.pair_mut(target, src)?;
            target_val.data_mut().copy_from(src_val.data())?;
            target_val
                .members()
                .iter()
                .copied()
                .zip(src_val.members().iter().copied())
                .collect::<Vec<_>>()
        };
        for (target_member, src_member) in members {
            self.copy_value(target_member, src_member)?;
        }
        Ok(())
    }

    // ========================================================================
    // Stack pushes
    // ========================================================================

    /// Push a value reference
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadItemResetType` for non-value tags and
    /// `EngineError::StackOverflow` when full.
    pub fn push_value(&mut self, value: ValueId, item_type: StackItemType) -> EngineResult<usize> {
        let mut item = CallStackItem::default();
        item.reset_value(value, item_type)?;
        self.stack.push(item)
    }

    /// Take a value of `class_id` from the temp pool and push it as a temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ClassHasNoValue` for classes without values.
    pub fn push_pool_value(&mut self, class_id: ClassId, constness: Constness) -> EngineResult<ValueId> {
        let pooled = self.temps.get_mut(&class_id).and_then(Vec::pop);
        let value = match pooled {
            Some(value) => value,
            None => self.new_value(class_id, "$Temp", constness)?,
        };
        self.value_mut(value)?.set_constness(constness);
        self.push_value(value, StackItemType::TempVal)?;
        Ok(value)
    }

    /// Spare temps of `class_id` waiting in the pool
    pub fn pooled_temps(&self, class_id: ClassId) -> usize {
        self.temps.get(&class_id).map_or(0, Vec::len)
    }

    /// Free every pooled temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StaleValue` if a pooled handle is dead.
    pub fn drain_temp_pool(&mut self) -> EngineResult<()> {
        let pooled: Vec<ValueId> = self.temps.drain().flat_map(|(_, pool)| pool).collect();
        for value in pooled {
            self.free_value(value)?;
        }
        Ok(())
    }

    /// Push a Boolean temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_boolean(&mut self, value: bool) -> EngineResult<ValueId> {
        let id = self.push_pool_value(Intrinsic::Boolean.id(), Constness::Const)?;
        self.value_as_mut::<BooleanVal>(id)?.value = value;
        Ok(id)
    }

    /// Push a Card1 temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_card1(&mut self, value: u8) -> EngineResult<ValueId> {
        let id = self.push_pool_value(Intrinsic::Card1.id(), Constness::Const)?;
        self.value_as_mut::<Card1Val>(id)?.value = value;
        Ok(id)
    }

    /// Push a Card2 temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_card2(&mut self, value: u16) -> EngineResult<ValueId> {
        let id = self.push_pool_value(Intrinsic::Card2.id(), Constness::Const)?;
        self.value_as_mut::<Card2Val>(id)?.value = value;
        Ok(id)
    }

    /// Push a Card4 temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_card4(&mut self, value: u32) -> EngineResult<ValueId> {
        let id = self.push_pool_value(Intrinsic::Card4.id(), Constness::Const)?;
        self.value_as_mut::<Card4Val>(id)?.value = value;
        Ok(id)
    }

    /// Push a String temp
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_string(&mut self, value: &str) -> EngineResult<ValueId> {
        let id = self.push_pool_value(Intrinsic::String.id(), Constness::Const)?;
        let text = &mut self.value_as_mut::<StringVal>(id)?.text;
        text.clear();
        text.push_str(value);
        Ok(id)
    }

    /// Push an enum temp set to `ordinal`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadEnumOrdinal` if the ordinal is out of range.
    pub fn push_enum(&mut self, class_id: ClassId, ordinal: u32) -> EngineResult<ValueId> {
        self.registry.class(class_id)?.enum_item(ordinal)?;
        let id = self.push_pool_value(class_id, Constness::Const)?;
        self.value_as_mut::<crate::intrinsics::EnumVal>(id)?.ordinal = ordinal;
        Ok(id)
    }

    /// Push a try marker
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_try(&mut self, catch_ip: u32) -> EngineResult<usize> {
        let mut item = CallStackItem::default();
        item.reset_immediate(StackItemType::Try, catch_ip)?;
        self.stack.push(item)
    }

    /// Push a method call record
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_method_call(
        &mut self,
        class_id: ClassId,
        method_id: MethodId,
        caller: Option<CallerInfo>,
    ) -> EngineResult<usize> {
        let mut item = CallStackItem::default();
        item.reset_call(class_id, method_id, caller);
        self.stack.push(item)
    }

    /// Push the thrown exception value
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackOverflow` when full.
    pub fn push_exception(&mut self) -> EngineResult<usize> {
        let value = self.thrown_value()?;
        self.push_value(value, StackItemType::Exception)
    }

    /// Push a second reference to the value slot at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::RepushMethod` for method call slots.
    pub fn repush_at(&mut self, index: usize) -> EngineResult<usize> {
        self.stack.repush_at(index)
    }

    // ========================================================================
    // Stack pops
    // ========================================================================

    /// Pop the top slot, disposing of owned values
    ///
    /// A non-repushed temp returns to the temp pool and a non-repushed local
    /// is destroyed. Every other kind is a reference and is left alone.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the stack is empty.
    pub fn pop_top(&mut self) -> EngineResult<()> {
        if let CallStackItem::Value(item) = self.stack.pop()? {
            if !item.repush {
                match item.kind {
                    ValueKind::TempVal => {
                        let class_id = self.class_of(item.value)?;
                        let pool = self.temps.entry(class_id).or_default();
                        if pool.len() < self.options.max_pooled_temps {
                            pool.push(item.value);
                        } else {
                            self.free_value(item.value)?;
                        }
                    }
                    ValueKind::Local => self.free_value(item.value)?,
                    _ => {}
                }
            }
        }
        Ok(())
    }

    /// Pop `count` slots
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if fewer slots are used.
    pub fn multi_pop(&mut self, count: usize) -> EngineResult<()> {
        if count > self.stack.len() {
            return Err(EngineError::StackUnderflow);
        }
        for _ in 0..count {
            self.pop_top()?;
        }
        Ok(())
    }

    /// Pop until the stack holds `len` slots
    ///
    /// # Errors
    ///
    /// Propagates disposal failures.
    pub fn pop_back_to(&mut self, len: usize) -> EngineResult<()> {
        while self.stack.len() > len {
            self.pop_top()?;
        }
        Ok(())
    }

    /// Pop the try marker ending a try block
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ExpectedTry` if the top is not a try marker.
    pub fn end_try(&mut self) -> EngineResult<()> {
        let top = self.stack.top_item()?.item_type();
        if top != StackItemType::Try {
            return Err(EngineError::ExpectedTry(top));
        }
        self.stack.pop()?;
        Ok(())
    }

    /// Number of used stack slots
    #[inline]
    pub fn stack_top(&self) -> usize {
        self.stack.len()
    }

    // ========================================================================
    // Parameter access
    // ========================================================================

    /// Index of the first parameter of the running native method
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the frame is not on the stack.
    #[inline]
    pub fn first_parm_index(&self, method: &MethodInfo) -> EngineResult<usize> {
        self.stack.first_parm_index(method.parm_count())
    }

    /// Index of the return slot of the running native method
    ///
    /// # Errors
    ///
    /// Returns `EngineError::StackUnderflow` if the frame is not on the stack.
    pub fn return_index(&self, method: &MethodInfo) -> EngineResult<usize> {
        self.first_parm_index(method)?
            .checked_sub(1)
            .ok_or(EngineError::StackUnderflow)
    }

    /// Value referenced by the slot at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::NotAValueItem` for non-value slots.
    pub fn stack_value_at(&self, index: usize) -> EngineResult<ValueId> {
        self.stack.at(index)?.pushed()
    }

    /// Backing state of the value at `index` as `T`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if it is not a `T`.
    pub fn stack_at_as<T: MacroValue>(&self, index: usize) -> EngineResult<&T> {
        self.value_as::<T>(self.stack_value_at(index)?)
    }

    /// Mutable backing state of the value at `index` as `T`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if it is not a `T`.
    pub fn stack_at_as_mut<T: MacroValue>(&mut self, index: usize) -> EngineResult<&mut T> {
        let id = self.stack_value_at(index)?;
        self.value_as_mut::<T>(id)
    }

    /// Boolean at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Boolean.
    pub fn bool_at(&self, index: usize) -> EngineResult<bool> {
        self.stack_at_as::<BooleanVal>(index).map(|val| val.value)
    }

    /// Card1 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card1.
    pub fn card1_at(&self, index: usize) -> EngineResult<u8> {
        self.stack_at_as::<Card1Val>(index).map(|val| val.value)
    }

    /// Card2 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card2.
    pub fn card2_at(&self, index: usize) -> EngineResult<u16> {
        self.stack_at_as::<Card2Val>(index).map(|val| val.value)
    }

    /// Card4 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card4.
    pub fn card4_at(&self, index: usize) -> EngineResult<u32> {
        self.stack_at_as::<Card4Val>(index).map(|val| val.value)
    }

    /// String text at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a String.
    pub fn string_at(&self, index: usize) -> EngineResult<&str> {
        self.stack_at_as::<StringVal>(index).map(|val| val.text.as_str())
    }

    /// MemBuf bytes at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a MemBuf.
    pub fn membuf_at(&self, index: usize) -> EngineResult<&[u8]> {
        self.stack_at_as::<MemBufVal>(index).map(MemBufVal::bytes)
    }

    /// Mutable MemBuf at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a MemBuf.
    pub fn membuf_at_mut(&mut self, index: usize) -> EngineResult<&mut MemBufVal> {
        self.stack_at_as_mut::<MemBufVal>(index)
    }

    /// Set the Boolean at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Boolean.
    pub fn set_bool_at(&mut self, index: usize, value: bool) -> EngineResult<()> {
        self.stack_at_as_mut::<BooleanVal>(index)?.value = value;
        Ok(())
    }

    /// Set the Card1 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card1.
    pub fn set_card1_at(&mut self, index: usize, value: u8) -> EngineResult<()> {
        self.stack_at_as_mut::<Card1Val>(index)?.value = value;
        Ok(())
    }

    /// Set the Card2 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card2.
    pub fn set_card2_at(&mut self, index: usize, value: u16) -> EngineResult<()> {
        self.stack_at_as_mut::<Card2Val>(index)?.value = value;
        Ok(())
    }

    /// Set the Card4 at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a Card4.
    pub fn set_card4_at(&mut self, index: usize, value: u32) -> EngineResult<()> {
        self.stack_at_as_mut::<Card4Val>(index)?.value = value;
        Ok(())
    }

    /// Replace the String text at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a String.
    pub fn set_string_at(&mut self, index: usize, value: impl Into<String>) -> EngineResult<()> {
        self.stack_at_as_mut::<StringVal>(index)?.text = value.into();
        Ok(())
    }

    /// Mutable String text at `index`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ValueTypeMismatch` if the value is not a String.
    pub fn string_at_mut(&mut self, index: usize) -> EngineResult<&mut String> {
        self.stack_at_as_mut::<StringVal>(index).map(|val| &mut val.text)
    }

    // ========================================================================
    // Exceptions
    // ========================================================================

    fn build_exception(
        &self,
        err_class: ClassId,
        src_path: &str,
        ordinal: u32,
        text: String,
    ) -> EngineResult<MacroException> {
        let info = self.registry.class(err_class)?;
        Ok(MacroException::new(
            err_class,
            src_path,
            ordinal,
            info.partial_name(ordinal)?,
            text,
            self.cur_line,
        ))
    }

    /// Build a macro exception with an explicit message
    ///
    /// The result is meant to be returned, usually with `Err(..)?`.
    pub fn raise(&self, err_class: ClassId, src_path: &str, ordinal: u32, text: impl Into<String>) -> EngineError {
        match self.build_exception(err_class, src_path, ordinal, text.into()) {
            Ok(exc) => self.thrown_error(exc),
            Err(err) => err,
        }
    }

    /// Build a macro exception from the item's template and token values
    pub fn raise_fmt(
        &self,
        err_class: ClassId,
        src_path: &str,
        ordinal: u32,
        tokens: &[&dyn fmt::Display],
    ) -> EngineError {
        let template = match self
            .registry
            .class(err_class)
            .and_then(|info| info.enum_item(ordinal))
        {
            Ok(item) => item.text.clone(),
            Err(err) => return err,
        };
        let values: Vec<String> = tokens.iter().map(|token| token.to_string()).collect();
        self.raise(err_class, src_path, ordinal, replace_tokens(&template, &values))
    }

    /// Wrap a record as a thrown error, reporting it if configured
    pub fn thrown_error(&self, exc: MacroException) -> EngineError {
        if self.options.log_failures {
            tracing::warn!(
                target: "cml::engine",
                error = %exc.error_name,
                class = %exc.src_class_path,
                line = exc.line,
                "{}",
                exc.error_text
            );
        }
        if self.options.except_report == ExceptReport::AtThrow {
            self.report(&exc);
        }
        EngineError::Thrown(Box::new(exc))
    }

    fn report(&self, exc: &MacroException) {
        if let Some(reporter) = &self.reporter {
            reporter.report(exc);
        }
    }

    /// Handle of the engine's thrown-exception value
    ///
    /// # Errors
    ///
    /// Propagates failures creating the value on first use.
    pub fn thrown_value(&mut self) -> EngineResult<ValueId> {
        match self.thrown {
            Some(id) => Ok(id),
            None => {
                let id = self.new_value(Intrinsic::Exception.id(), "$Exception", Constness::NonConst)?;
                self.thrown = Some(id);
                Ok(id)
            }
        }
    }

    /// Store a caught exception in the thrown-exception value
    ///
    /// # Errors
    ///
    /// Propagates failures creating the value on first use.
    pub fn set_thrown(&mut self, exc: MacroException) -> EngineResult<()> {
        let id = self.thrown_value()?;
        self.value_as_mut::<ExceptVal>(id)?.record = Some(exc);
        Ok(())
    }

    /// The last caught exception
    pub fn thrown_exception(&self) -> Option<&MacroException> {
        self.thrown
            .and_then(|id| self.value_as::<ExceptVal>(id).ok())
            .and_then(|val| val.record.as_ref())
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Id of the method `name` in `class_id`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MethodNotFound` if the class has no such method.
    pub fn find_method(&self, class_id: ClassId, name: &str) -> EngineResult<MethodId> {
        let info = self.registry.class(class_id)?;
        info.method_id(name).ok_or_else(|| EngineError::MethodNotFound {
            method_id: crate::BAD_ID,
            class_path: format!("{}.{}", info.path(), name),
        })
    }

    /// Run a method whose call frame is already on the stack
    ///
    /// Handlers are tried from the start class up the parent chain until one
    /// accepts the method id.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::MethodNotFound` if no handler in the chain
    /// accepts the id, or whatever the handler returns.
    pub fn invoke(&mut self, this: ValueId, class_id: ClassId, method_id: MethodId, dispatch: Dispatch) -> EngineResult<()> {
        let registry = Arc::clone(&self.registry);
        let start = match dispatch {
            Dispatch::Mono => class_id,
            Dispatch::Poly => self.class_of(this)?,
        };
        let not_found = || EngineError::MethodNotFound {
            method_id,
            class_path: registry.path_of(start).to_string(),
        };
        let method = registry.class(start)?.method(method_id).map_err(|_| not_found())?;

        tracing::trace!(
            target: "cml::engine",
            class = %registry.path_of(start),
            method = %method.name,
            "invoke"
        );

        let mut current = Some(start);
        while let Some(id) = current {
            if registry.handler(id)?.invoke(self, method, this)? {
                return Ok(());
            }
            current = registry.class(id)?.parent_id();
        }
        Err(not_found())
    }

    /// Call a method from the embedder
    ///
    /// Sets up the return slot, parameters and call record, dispatches
    /// polymorphically and pops the frame again. The caller owns the
    /// returned value, if any, and frees it with [`Engine::free_value`].
    ///
    /// # Errors
    ///
    /// - `EngineError::ParmCount` / `EngineError::ParmType` for bad arguments
    /// - `EngineError::Thrown` for an uncaught macro exception
    pub fn call_method(&mut self, this: ValueId, method_id: MethodId, args: &[ValueId]) -> EngineResult<Option<ValueId>> {
        let registry = Arc::clone(&self.registry);
        let class_id = self.class_of(this)?;
        let method = registry.class(class_id)?.method(method_id)?;

        if args.len() != method.parm_count() {
            return Err(EngineError::ParmCount {
                method: method.name.clone(),
                expected: method.parm_count(),
                got: args.len(),
            });
        }
        if self.options.validation {
            for (arg, parm) in args.iter().zip(&method.parms) {
                let arg_class = self.class_of(*arg)?;
                if !registry.is_descendant_of(arg_class, parm.class_id) {
                    return Err(EngineError::ParmType {
                        method: method.name.clone(),
                        parm: parm.name.clone(),
                        expected: registry.path_of(parm.class_id).to_string(),
                        got: registry.path_of(arg_class).to_string(),
                    });
                }
            }
        }

        let base = self.stack.len();
        let ret = if method.has_return() {
            Some(self.new_value(method.ret_type, "$Return", Constness::NonConst)?)
        } else {
            None
        };

        let result = self.run_call(class_id, method_id, this, ret, args);
        let unwound = self.pop_back_to(base);

        match result.and(unwound) {
            Ok(()) => Ok(ret),
            Err(err) => {
                if let Some(ret) = ret {
                    self.free_value(ret)?;
                }
                if let EngineError::Thrown(exc) = &err {
                    tracing::debug!(target: "cml::engine", error = %exc, "exception escaped to embedder");
                    if self.options.except_report == ExceptReport::NotHandled {
                        self.report(exc);
                    }
                }
                Err(err)
            }
        }
    }

    fn run_call(
        &mut self,
        class_id: ClassId,
        method_id: MethodId,
        this: ValueId,
        ret: Option<ValueId>,
        args: &[ValueId],
    ) -> EngineResult<()> {
        if let Some(ret) = ret {
            self.push_value(ret, StackItemType::Parm)?;
        }
        for arg in args {
            self.push_value(*arg, StackItemType::Parm)?;
        }
        self.push_method_call(class_id, method_id, None)?;
        self.invoke(this, class_id, method_id, Dispatch::Poly)
    }

    /// Call a method by name
    ///
    /// # Errors
    ///
    /// As [`Engine::find_method`] and [`Engine::call_method`].
    pub fn call_by_name(&mut self, this: ValueId, name: &str, args: &[ValueId]) -> EngineResult<Option<ValueId>> {
        let method_id = self.find_method(self.class_of(this)?, name)?;
        self.call_method(this, method_id, args)
    }

    /// Create an instance and run its default constructor
    ///
    /// # Errors
    ///
    /// Creation errors, or the constructor's error (the value is freed).
    pub fn construct(&mut self, class_id: ClassId, name: &str) -> EngineResult<ValueId> {
        let id = self.new_value(class_id, name, Constness::NonConst)?;
        let ctor = self.registry.class(class_id)?.default_ctor().map(|ctor| ctor.id);
        if let Some(ctor) = ctor {
            if let Err(err) = self.call_method(id, ctor, &[]) {
                self.free_value(id)?;
                return Err(err);
            }
        }
        Ok(id)
    }

    // ========================================================================
    // String pool
    // ========================================================================

    /// Pooled value of a method's string literal
    ///
    /// The value is created on first use and kept for the engine's life.
    ///
    /// # Errors
    ///
    /// Propagates value creation failures.
    pub fn string_pool_value(
        &mut self,
        class_id: ClassId,
        method_id: MethodId,
        index: u16,
        text: &str,
    ) -> EngineResult<ValueId> {
        if let Some(id) = self.string_pool.get(&(class_id, method_id, index)) {
            return Ok(*id);
        }
        let id = self.new_value(Intrinsic::String.id(), "$StrPool", Constness::Const)?;
        self.value_as_mut::<StringVal>(id)?.text = text.to_string();
        self.string_pool.insert((class_id, method_id, index), id);
        Ok(id)
    }
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("classes", &self.registry.len())
            .field("values", &self.values.len())
            .field("stack", &self.stack.len())
            .field("cur_line", &self.cur_line)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;

    fn engine() -> Engine {
        Engine::new(ClassRegistry::builder().build().unwrap())
    }

    #[test]
    fn test_temp_pool_reuses_values() {
        let mut engine = engine();
        let first = engine.push_card4(7).unwrap();
        engine.pop_top().unwrap();
        let second = engine.push_card4(9).unwrap();
        assert_eq!(first, second);
        assert_eq!(engine.card4_at(0).unwrap(), 9);
        engine.pop_top().unwrap();
        assert!(engine.values().contains(first));
    }

    #[test]
    fn test_popping_local_frees_it() {
        let mut engine = engine();
        let local = engine
            .new_value(Intrinsic::String.id(), "s", Constness::NonConst)
            .unwrap();
        engine.push_value(local, StackItemType::Local).unwrap();
        engine.repush_at(0).unwrap();

        // The repush is only a reference
        engine.pop_top().unwrap();
        assert!(engine.values().contains(local));

        engine.pop_top().unwrap();
        assert!(!engine.values().contains(local));
    }

    #[test]
    fn test_end_try() {
        let mut engine = engine();
        engine.push_try(5).unwrap();
        engine.end_try().unwrap();

        engine.push_boolean(true).unwrap();
        assert!(matches!(
            engine.end_try(),
            Err(EngineError::ExpectedTry(StackItemType::TempVal))
        ));
    }

    #[test]
    fn test_multi_pop_underflow() {
        let mut engine = engine();
        engine.push_card1(1).unwrap();
        assert!(matches!(engine.multi_pop(2), Err(EngineError::StackUnderflow)));
        engine.multi_pop(1).unwrap();
        assert_eq!(engine.stack_top(), 0);
    }

    #[test]
    fn test_typed_access_mismatch() {
        let mut engine = engine();
        engine.push_string("abc").unwrap();
        assert_eq!(engine.string_at(0).unwrap(), "abc");
        assert!(matches!(
            engine.card4_at(0),
            Err(EngineError::ValueTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_copy_value_checks_classes() {
        let mut engine = engine();
        let a = engine.new_value(Intrinsic::Card4.id(), "a", Constness::NonConst).unwrap();
        let b = engine.new_value(Intrinsic::Card4.id(), "b", Constness::NonConst).unwrap();
        let s = engine.new_value(Intrinsic::String.id(), "s", Constness::NonConst).unwrap();

        engine.value_as_mut::<Card4Val>(b).unwrap().value = 42;
        engine.copy_value(a, b).unwrap();
        assert_eq!(engine.value_as::<Card4Val>(a).unwrap().value, 42);

        assert!(matches!(
            engine.copy_value(a, s),
            Err(EngineError::BadCopyOpParms { .. })
        ));
    }

    #[test]
    fn test_string_pool_is_cached() {
        let mut engine = engine();
        let a = engine.string_pool_value(1, 2, 0, "hello").unwrap();
        let b = engine.string_pool_value(1, 2, 0, "ignored").unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.value_as::<StringVal>(a).unwrap().text, "hello");
    }

    #[test]
    fn test_raise_uses_template_and_line() {
        let mut engine = engine();
        engine.set_cur_line(12);
        let errors = engine
            .registry()
            .find("MEng.System.Runtime.MemBuf.MemBufErrors")
            .unwrap();
        let err = engine.raise_fmt(errors, "MEng.System.Runtime.MemBuf", 0, &[&20, &16]);
        let exc = err.exception().unwrap();
        assert_eq!(exc.error_name, "MemBufErrors.BadIndex");
        assert_eq!(exc.error_text, "Index 20 is beyond the buffer size of 16");
        assert_eq!(exc.line, 12);
    }

    #[test]
    fn test_raise_with_bad_ordinal_is_host_error() {
        let engine = engine();
        let errors = engine
            .registry()
            .find("MEng.System.Runtime.MemBuf.MemBufErrors")
            .unwrap();
        let err = engine.raise(errors, "MEng.System.Runtime.MemBuf", 99, "nope");
        assert!(matches!(err, EngineError::BadEnumOrdinal { ordinal: 99, .. }));
    }

    #[test]
    fn test_call_method_checks_parms() {
        let mut engine = engine();
        let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
        let append = engine.find_method(Intrinsic::String.id(), "Append").unwrap();
        let card = engine.construct(Intrinsic::Card4.id(), "card").unwrap();

        assert!(matches!(
            engine.call_method(text, append, &[]),
            Err(EngineError::ParmCount { expected: 1, got: 0, .. })
        ));
        assert!(matches!(
            engine.call_method(text, append, &[card]),
            Err(EngineError::ParmType { .. })
        ));
        assert_eq!(engine.stack_top(), 0);
    }
}
