//! Class metadata and native class handlers
//!
//! Every macro class is described by a [`ClassInfo`] and backed by a
//! [`ClassHandler`]. The handler declares the class's methods during
//! registration and serves calls afterwards, keyed on method ids only.

mod method;
mod registry;
mod table;

pub use method::{MethodExt, MethodInfo, ParmDir, ParmInfo, Visibility};
pub use registry::{ClassBuilder, ClassRegistry, RegistryBuilder};
pub use table::MethodTable;

use crate::engine::Engine;
use crate::error::{EngineError, EngineResult};
use crate::value::{Constness, MacroValue, ValueId};
use crate::{ClassId, MethodId, BAD_ID};

/// How a class may be derived from and instantiated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassExt {
    /// Cannot be derived from
    Final,
    /// Cannot be instantiated
    Abstract,
    /// Instantiable and derivable
    NonFinal,
}

/// One member variable
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberInfo {
    /// Member name
    pub name: String,
    /// Member class
    pub class_id: ClassId,
    /// Member constness
    pub constness: Constness,
}

/// Constant value of a class literal
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LiteralValue {
    /// Boolean literal
    Boolean(bool),
    /// Card1 literal
    Card1(u8),
    /// Card2 literal
    Card2(u16),
    /// Card4 literal
    Card4(u32),
    /// String literal
    String(String),
}

/// One named class constant
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiteralInfo {
    /// Literal name
    pub name: String,
    /// Literal value
    pub value: LiteralValue,
}

/// One enum item
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumItem {
    /// Item name
    pub name: String,
    /// Item text; for error enums a `%(n)` template
    pub text: String,
}

// ============================================================================
// ClassInfo
// ============================================================================

/// Metadata of one class
#[derive(Debug, Clone)]
pub struct ClassInfo {
    name: String,
    base_path: String,
    path: String,
    id: ClassId,
    parent_path: String,
    parent_id: Option<ClassId>,
    ext: ClassExt,
    copyable: bool,
    methods: Vec<MethodInfo>,
    inherited: usize,
    members: Vec<MemberInfo>,
    literals: Vec<LiteralInfo>,
    imports: Vec<ClassId>,
    nested: Vec<String>,
    enum_items: Vec<EnumItem>,
}

impl ClassInfo {
    /// Describe class `name` in scope `base_path`, derived from `parent_path`
    ///
    /// An empty `parent_path` means no parent (only the root class).
    pub fn new(name: impl Into<String>, base_path: impl Into<String>, parent_path: impl Into<String>) -> Self {
        let name = name.into();
        let base_path = base_path.into();
        let path = if base_path.is_empty() {
            name.clone()
        } else {
            format!("{}.{}", base_path, name)
        };
        Self {
            name,
            base_path,
            path,
            id: BAD_ID,
            parent_path: parent_path.into(),
            parent_id: None,
            ext: ClassExt::NonFinal,
            copyable: false,
            methods: Vec::new(),
            inherited: 0,
            members: Vec::new(),
            literals: Vec::new(),
            imports: Vec::new(),
            nested: Vec::new(),
            enum_items: Vec::new(),
        }
    }

    /// Describe a class from its full path
    pub fn from_path(path: &str, parent_path: impl Into<String>) -> Self {
        let (base, name) = crate::split_path(path);
        Self::new(name, base, parent_path)
    }

    /// Set the extension kind
    pub fn with_ext(mut self, ext: ClassExt) -> Self {
        self.ext = ext;
        self
    }

    /// Set the copyable flag
    pub fn with_copyable(mut self, copyable: bool) -> Self {
        self.copyable = copyable;
        self
    }

    /// Set the enum items
    pub fn with_enum_items(mut self, items: Vec<EnumItem>) -> Self {
        self.enum_items = items;
        self
    }

    /// Class name
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Scope path
    #[inline]
    pub fn base_path(&self) -> &str {
        &self.base_path
    }

    /// Full class path
    #[inline]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Class id
    #[inline]
    pub fn id(&self) -> ClassId {
        self.id
    }

    /// Parent class path
    #[inline]
    pub fn parent_path(&self) -> &str {
        &self.parent_path
    }

    /// Parent class id
    #[inline]
    pub fn parent_id(&self) -> Option<ClassId> {
        self.parent_id
    }

    /// Extension kind
    #[inline]
    pub fn ext(&self) -> ClassExt {
        self.ext
    }

    /// True if the class cannot be instantiated
    #[inline]
    pub fn is_abstract(&self) -> bool {
        self.ext == ClassExt::Abstract
    }

    /// True if values can be copied
    #[inline]
    pub fn is_copyable(&self) -> bool {
        self.copyable
    }

    /// Methods, indexed by id
    #[inline]
    pub fn methods(&self) -> &[MethodInfo] {
        &self.methods
    }

    /// Number of methods taken from the parent
    #[inline]
    pub fn inherited_count(&self) -> usize {
        self.inherited
    }

    /// Method by id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadMethodId` if the id is not in this class.
    pub fn method(&self, id: MethodId) -> EngineResult<&MethodInfo> {
        self.methods
            .get(usize::from(id))
            .ok_or_else(|| EngineError::BadMethodId {
                method_id: id,
                class_path: self.path.clone(),
            })
    }

    /// Method by name
    pub fn find_method(&self, name: &str) -> Option<&MethodInfo> {
        self.methods.iter().find(|method| method.name == name)
    }

    /// Method id by name
    pub fn method_id(&self, name: &str) -> Option<MethodId> {
        self.find_method(name).map(|method| method.id)
    }

    /// The default constructor, if declared
    pub fn default_ctor(&self) -> Option<&MethodInfo> {
        self.find_method(&MethodInfo::ctor_name(&self.path))
    }

    /// Members, indexed by member index
    #[inline]
    pub fn members(&self) -> &[MemberInfo] {
        &self.members
    }

    /// Literals
    #[inline]
    pub fn literals(&self) -> &[LiteralInfo] {
        &self.literals
    }

    /// Literal by name
    pub fn find_literal(&self, name: &str) -> Option<&LiteralValue> {
        self.literals
            .iter()
            .find(|literal| literal.name == name)
            .map(|literal| &literal.value)
    }

    /// Imported class ids
    #[inline]
    pub fn imports(&self) -> &[ClassId] {
        &self.imports
    }

    /// Paths of nested types
    #[inline]
    pub fn nested(&self) -> &[String] {
        &self.nested
    }

    /// Enum items (empty for non-enum classes)
    #[inline]
    pub fn enum_items(&self) -> &[EnumItem] {
        &self.enum_items
    }

    /// Enum item by ordinal
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadEnumOrdinal` if the ordinal is out of range.
    pub fn enum_item(&self, ordinal: u32) -> EngineResult<&EnumItem> {
        self.enum_items
            .get(ordinal as usize)
            .ok_or_else(|| EngineError::BadEnumOrdinal {
                ordinal,
                class_path: self.path.clone(),
            })
    }

    /// `Enum.Item` name of an ordinal
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadEnumOrdinal` if the ordinal is out of range.
    pub fn partial_name(&self, ordinal: u32) -> EngineResult<String> {
        let item = self.enum_item(ordinal)?;
        Ok(format!("{}.{}", self.name, item.name))
    }

    pub(crate) fn set_id(&mut self, id: ClassId) {
        self.id = id;
    }

    pub(crate) fn set_parent_id(&mut self, parent_id: Option<ClassId>) {
        self.parent_id = parent_id;
    }

    pub(crate) fn inherit_from(&mut self, parent: &ClassInfo) {
        self.methods = parent.methods.clone();
        self.inherited = self.methods.len();
        self.members = parent.members.clone();
    }

    pub(crate) fn push_method(&mut self, mut method: MethodInfo) -> MethodId {
        let id = self.methods.len() as MethodId;
        method.id = id;
        self.methods.push(method);
        id
    }

    pub(crate) fn push_member(&mut self, member: MemberInfo) -> usize {
        self.members.push(member);
        self.members.len() - 1
    }

    pub(crate) fn push_literal(&mut self, literal: LiteralInfo) {
        self.literals.push(literal);
    }

    pub(crate) fn push_import(&mut self, id: ClassId) {
        if !self.imports.contains(&id) {
            self.imports.push(id);
        }
    }

    pub(crate) fn push_nested(&mut self, path: String) {
        self.nested.push(path);
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Native side of a class
///
/// `init` runs once, in registration order, after the parent's methods and
/// members were inherited. `invoke` serves calls; a handler that does not
/// recognise the method id returns `Ok(false)` without touching anything, so
/// dispatch can continue with the parent class.
pub trait ClassHandler: Send + Sync {
    /// Declare methods, members, nested types and imports
    ///
    /// # Errors
    ///
    /// Registration errors (`DupMethod`, `ImportNotFound`, ...).
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()>;

    /// Create the native backing state of a new instance
    ///
    /// # Errors
    ///
    /// The default returns `EngineError::ClassHasNoValue`.
    fn make_storage(&self, info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Err(EngineError::ClassHasNoValue(info.path().to_string()))
    }

    /// Run `method` against `this`
    ///
    /// Parameters are on the engine's stack starting at
    /// [`Engine::first_parm_index`], with the return slot just below them.
    ///
    /// # Errors
    ///
    /// `EngineError::Thrown` for macro exceptions, other variants for host
    /// failures.
    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool>;
}
