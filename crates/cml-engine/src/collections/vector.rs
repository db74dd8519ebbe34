//! MEng.System.Runtime.Vector and derived vector types

use crate::class::{ClassBuilder, ClassExt, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::impl_as_any;
use crate::intrinsics::StringVal;
use crate::value::{Constness, DbgFormat, MacroValue, ValueId};
use crate::{ClassId, Intrinsic};

use super::{index_err, CollectVal};

/// Vector value; owns its elements
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VectorVal {
    elem_id: ClassId,
    elems: Vec<ValueId>,
}

impl VectorVal {
    /// Empty vector of `elem_id` elements
    pub fn new(elem_id: ClassId) -> Self {
        Self {
            elem_id,
            elems: Vec::new(),
        }
    }

    /// Element handles, in order
    #[inline]
    pub fn elems(&self) -> &[ValueId] {
        &self.elems
    }
}

impl CollectVal for VectorVal {
    fn elem_id(&self) -> ClassId {
        self.elem_id
    }

    fn elem_count(&self) -> usize {
        self.elems.len()
    }

    fn elem_at(&self, index: usize) -> Option<ValueId> {
        self.elems.get(index).copied()
    }
}

impl MacroValue for VectorVal {
    impl_as_any!();

    fn dbg_format(&self, _fmt: DbgFormat) -> String {
        format!("[{} elements]", self.elems.len())
    }

    fn owned_values(&self) -> Vec<ValueId> {
        self.elems.clone()
    }

    fn as_collection(&self) -> Option<&dyn CollectVal> {
        Some(self)
    }

    fn as_collection_mut(&mut self) -> Option<&mut dyn CollectVal> {
        Some(self)
    }
}

// ============================================================================
// Element helpers for native code
// ============================================================================

/// Free every element
///
/// # Errors
///
/// Returns `EngineError::ValueTypeMismatch` if `vector` is not a vector.
pub fn remove_all(engine: &mut Engine, vector: ValueId) -> EngineResult<()> {
    let elems = std::mem::take(&mut engine.value_as_mut::<VectorVal>(vector)?.elems);
    for elem in elems {
        engine.free_value(elem)?;
    }
    Ok(())
}

/// Remove and free the element at `index`
///
/// # Errors
///
/// Raises `CollectErrors.IndexErr` if `index` is out of range.
pub fn remove_at(engine: &mut Engine, vector: ValueId, index: usize) -> EngineResult<()> {
    let count = engine.value_as::<VectorVal>(vector)?.elems.len();
    if index >= count {
        let path = engine.registry().path_of(engine.class_of(vector)?).to_string();
        return Err(index_err(engine, index, &path));
    }
    let elem = engine.value_as_mut::<VectorVal>(vector)?.elems.remove(index);
    engine.free_value(elem)
}

/// Create a new default element and insert it at `index`
///
/// # Errors
///
/// Raises `CollectErrors.IndexErr` if `index` is past the end.
pub fn insert_new(engine: &mut Engine, vector: ValueId, index: usize) -> EngineResult<ValueId> {
    let (elem_id, count) = {
        let val = engine.value_as::<VectorVal>(vector)?;
        (val.elem_id, val.elems.len())
    };
    if index > count {
        let path = engine.registry().path_of(engine.class_of(vector)?).to_string();
        return Err(index_err(engine, index, &path));
    }
    let elem = engine.new_value(elem_id, "$Elem", Constness::NonConst)?;
    engine.value_as_mut::<VectorVal>(vector)?.elems.insert(index, elem);
    Ok(elem)
}

/// Create a new default element at the end
///
/// # Errors
///
/// Returns `EngineError::ValueTypeMismatch` if `vector` is not a vector.
pub fn add_new(engine: &mut Engine, vector: ValueId) -> EngineResult<ValueId> {
    let count = engine.value_as::<VectorVal>(vector)?.elems.len();
    insert_new(engine, vector, count)
}

/// Replace the contents of a String vector
///
/// # Errors
///
/// Returns `EngineError::ValueTypeMismatch` unless the elements are Strings.
pub fn set_strings<S: AsRef<str>>(engine: &mut Engine, vector: ValueId, strings: &[S]) -> EngineResult<()> {
    remove_all(engine, vector)?;
    for text in strings {
        let elem = add_new(engine, vector)?;
        engine.value_as_mut::<StringVal>(elem)?.text = text.as_ref().to_string();
    }
    Ok(())
}

/// Texts of a String vector
///
/// # Errors
///
/// Returns `EngineError::ValueTypeMismatch` unless the elements are Strings.
pub fn strings(engine: &Engine, vector: ValueId) -> EngineResult<Vec<String>> {
    engine
        .value_as::<VectorVal>(vector)?
        .elems
        .iter()
        .map(|elem| engine.value_as::<StringVal>(*elem).map(|val| val.text.clone()))
        .collect()
}

// ============================================================================
// Handler
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VecOp {
    BaseCtor,
    GetElemCount,
    IsEmpty,
    RemoveAll,
    RemoveAt,
    Ctor,
    AddObject,
    InsertObject,
}

/// Handler of the vector base and of each derived vector type
#[derive(Debug)]
pub struct VectorClass {
    elem_id: Option<ClassId>,
    table: MethodTable<VecOp>,
}

impl VectorClass {
    /// Handler of the abstract base
    pub fn base() -> Self {
        Self {
            elem_id: None,
            table: MethodTable::new(),
        }
    }

    /// Handler of a vector of `elem_id` elements
    pub fn derived(elem_id: ClassId) -> Self {
        Self {
            elem_id: Some(elem_id),
            table: MethodTable::new(),
        }
    }
}

impl ClassHandler for VectorClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let void = Intrinsic::Void.id();
        let card4 = Intrinsic::Card4.id();
        let methods = match self.elem_id {
            None => vec![
                (MethodInfo::ctor(class.path()), VecOp::BaseCtor),
                (
                    MethodInfo::new("GetElemCount", card4, Visibility::Public, MethodExt::Final).with_const(),
                    VecOp::GetElemCount,
                ),
                (
                    MethodInfo::new("IsEmpty", Intrinsic::Boolean.id(), Visibility::Public, MethodExt::Final)
                        .with_const(),
                    VecOp::IsEmpty,
                ),
                (
                    MethodInfo::new("RemoveAll", void, Visibility::Public, MethodExt::Final),
                    VecOp::RemoveAll,
                ),
                (
                    MethodInfo::new("RemoveAt", void, Visibility::Public, MethodExt::Final).in_parm("AtIndex", card4),
                    VecOp::RemoveAt,
                ),
            ],
            Some(elem_id) => vec![
                (MethodInfo::ctor(class.path()), VecOp::Ctor),
                (
                    MethodInfo::new("AddObject", void, Visibility::Public, MethodExt::Final).in_parm("ToAdd", elem_id),
                    VecOp::AddObject,
                ),
                (
                    MethodInfo::new("InsertObject", void, Visibility::Public, MethodExt::Final)
                        .in_parm("ToInsert", elem_id)
                        .in_parm("AtIndex", card4),
                    VecOp::InsertObject,
                ),
            ],
        };
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        match self.elem_id {
            Some(elem_id) => Ok(Box::new(VectorVal::new(elem_id))),
            None => Err(EngineError::ClassHasNoValue(info.path().to_string())),
        }
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            VecOp::BaseCtor | VecOp::Ctor | VecOp::RemoveAll => remove_all(engine, this)?,
            VecOp::GetElemCount => {
                let count = engine.value_as::<VectorVal>(this)?.elems.len();
                engine.set_card4_at(engine.return_index(method)?, count as u32)?;
            }
            VecOp::IsEmpty => {
                let empty = engine.value_as::<VectorVal>(this)?.elems.is_empty();
                engine.set_bool_at(engine.return_index(method)?, empty)?;
            }
            VecOp::RemoveAt => {
                let index = engine.card4_at(first)?;
                remove_at(engine, this, index as usize)?;
            }
            VecOp::AddObject => {
                let src = engine.stack_value_at(first)?;
                let elem = add_new(engine, this)?;
                engine.copy_value(elem, src)?;
            }
            VecOp::InsertObject => {
                let src = engine.stack_value_at(first)?;
                let index = engine.card4_at(first + 1)?;
                let elem = insert_new(engine, this, index as usize)?;
                engine.copy_value(elem, src)?;
            }
        }
        Ok(true)
    }
}

/// Declare a vector type nested in the class being initialised
///
/// # Errors
///
/// Same as [`ClassBuilder::add_nested_class`].
pub fn add_vector_type(class: &mut ClassBuilder<'_>, name: &str, elem_id: ClassId) -> EngineResult<ClassId> {
    let info = ClassInfo::new(name, class.path(), Intrinsic::Vector.path()).with_ext(ClassExt::Final);
    class.add_nested_class(info, Box::new(VectorClass::derived(elem_id)))
}
