//! Classes whose methods are opcode bodies

use super::OpMethodImpl;
use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodInfo, MethodTable};
use crate::collections::add_vector_type;
use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::value::{Constness, EmptyVal, MacroValue, ValueId};
use crate::{ClassId, BAD_ID};

#[derive(Debug)]
struct PendingMember {
    name: String,
    class_path: String,
    constness: Constness,
}

#[derive(Debug)]
enum PendingMethod {
    New(MethodInfo),
    Override(String),
}

/// Handler for a macro-defined class
///
/// Collects members, nested vector types, imports and method bodies, then
/// declares them when the registry initialises the class. Methods the class
/// neither adds nor overrides fall through to the parent's handler.
///
/// ```rust,ignore
/// let counter = MacroClass::new()
///     .member("Count", "MEng.Card4", Constness::NonConst)
///     .method(MethodInfo::new("Bump", void, Visibility::Public, MethodExt::Final), body);
/// builder.add_class(ClassInfo::from_path("MEng.User.Counter", "MEng.Object"), Box::new(counter))?;
/// ```
#[derive(Debug)]
pub struct MacroClass {
    class_id: ClassId,
    imports: Vec<String>,
    vectors: Vec<(String, String)>,
    members: Vec<PendingMember>,
    pending: Vec<(PendingMethod, OpMethodImpl)>,
    bodies: Vec<OpMethodImpl>,
    table: MethodTable<usize>,
}

impl MacroClass {
    /// Empty class
    pub fn new() -> Self {
        Self {
            class_id: BAD_ID,
            imports: Vec::new(),
            vectors: Vec::new(),
            members: Vec::new(),
            pending: Vec::new(),
            bodies: Vec::new(),
            table: MethodTable::new(),
        }
    }

    /// Import a class by path
    pub fn import(mut self, path: impl Into<String>) -> Self {
        self.imports.push(path.into());
        self
    }

    /// Declare a nested vector type holding `elem_path` elements
    pub fn vector_type(mut self, name: impl Into<String>, elem_path: impl Into<String>) -> Self {
        self.vectors.push((name.into(), elem_path.into()));
        self
    }

    /// Add a member; the class may be one of this class's nested types
    pub fn member(mut self, name: impl Into<String>, class_path: impl Into<String>, constness: Constness) -> Self {
        self.members.push(PendingMember {
            name: name.into(),
            class_path: class_path.into(),
            constness,
        });
        self
    }

    /// Add a new method
    pub fn method(mut self, method: MethodInfo, body: OpMethodImpl) -> Self {
        self.pending.push((PendingMethod::New(method), body));
        self
    }

    /// Replace the body of an inherited non-final method
    pub fn override_method(mut self, name: impl Into<String>, body: OpMethodImpl) -> Self {
        self.pending.push((PendingMethod::Override(name.into()), body));
        self
    }

    /// Id assigned at registration
    #[inline]
    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    fn resolve(class: &ClassBuilder<'_>, path: &str) -> EngineResult<ClassId> {
        class
            .find_class(path)
            .ok_or_else(|| EngineError::ClassNotFound(path.to_string()))
    }
}

impl Default for MacroClass {
    fn default() -> Self {
        Self::new()
    }
}

impl ClassHandler for MacroClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.class_id = class.id();

        for path in &self.imports {
            class.add_import(path)?;
        }
        for (name, elem_path) in &self.vectors {
            let elem_id = Self::resolve(class, elem_path)?;
            add_vector_type(class, name, elem_id)?;
        }
        for member in &self.members {
            let class_id = Self::resolve(class, &member.class_path)?;
            class.add_member(&member.name, class_id, member.constness);
        }

        for (method, body) in std::mem::take(&mut self.pending) {
            let id = match method {
                PendingMethod::New(info) => class.add_method(info)?,
                PendingMethod::Override(name) => class.override_method(&name)?,
            };
            self.table.bind(id, self.bodies.len());
            self.bodies.push(body);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::new(EmptyVal))
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(index) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let body = self.bodies.get(index).ok_or_else(|| EngineError::BadMethodId {
            method_id: method.id,
            class_path: engine.registry().path_of(self.class_id).to_string(),
        })?;
        super::run(engine, self.class_id, method, this, body)?;
        Ok(true)
    }
}
