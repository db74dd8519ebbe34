//! Collection classes
//!
//! `MEng.System.Runtime.Collection` is the abstract base of every
//! collection. It owns the shared `CollectErrors` enum, so index failures
//! from any collection type are one catchable error.

mod vector;

pub use vector::{
    add_new, add_vector_type, insert_new, remove_all, remove_at, set_strings, strings, VectorClass, VectorVal,
};

use crate::class::{ClassBuilder, ClassHandler, MethodInfo};
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::value::ValueId;
use crate::{ClassId, Intrinsic};

/// Path of the shared collection error enum
pub const COLLECT_ERRORS_PATH: &str = "MEng.System.Runtime.Collection.CollectErrors";

/// `CollectErrors.IndexErr`
pub const ERR_INDEX: u32 = 0;

/// Element access shared by collection values
pub trait CollectVal {
    /// Class of the elements
    fn elem_id(&self) -> ClassId;

    /// Number of elements
    fn elem_count(&self) -> usize;

    /// Element at `index`
    fn elem_at(&self, index: usize) -> Option<ValueId>;
}

/// Raise `CollectErrors.IndexErr` for `class_path`
pub fn index_err(engine: &Engine, bad_index: impl std::fmt::Display, class_path: &str) -> EngineError {
    match engine.registry().find(COLLECT_ERRORS_PATH) {
        Some(errors) => engine.raise_fmt(errors, class_path, ERR_INDEX, &[&bad_index, &class_path]),
        None => EngineError::ClassNotFound(COLLECT_ERRORS_PATH.to_string()),
    }
}

/// Element of the collection `col` at `index`
///
/// # Errors
///
/// - `EngineError::NotACollection` if `col` is not a collection
/// - `CollectErrors.IndexErr` if `index` is out of range
pub fn elem_at(engine: &Engine, col: ValueId, index: u32) -> EngineResult<ValueId> {
    let value = engine.value(col)?;
    let path = engine.registry().path_of(value.class_id());
    let collection = value
        .data()
        .as_collection()
        .ok_or_else(|| EngineError::NotACollection(path.to_string()))?;
    collection
        .elem_at(index as usize)
        .ok_or_else(|| index_err(engine, index, path))
}

/// Handler of the abstract collection base
#[derive(Debug, Default)]
pub struct CollectClass;

impl ClassHandler for CollectClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        class.add_error_enum(
            "CollectErrors",
            &[("IndexErr", "Index %(1) is not valid for collection %(2)")],
        )?;
        Ok(())
    }

    fn invoke(&self, _engine: &mut Engine, _method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
        Ok(false)
    }
}

/// True if `class_id` is a collection class
pub fn is_collection(engine: &Engine, class_id: ClassId) -> bool {
    engine
        .registry()
        .is_descendant_of(class_id, Intrinsic::Collection.id())
}
