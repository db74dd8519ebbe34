//! Class registration
//!
//! Registration is two-phase. Classes are first declared with
//! [`RegistryBuilder::add_class`], which fixes their ids. [`RegistryBuilder::build`]
//! then initialises them in id order: each class inherits its parent's
//! methods and members, then its handler's `init` adds its own. Nested types
//! declared during `init` get the next ids and are initialised later in the
//! same pass, after their parents.

use std::sync::Arc;

use rustc_hash::FxHashMap;

use super::{ClassHandler, ClassInfo, EnumItem, LiteralInfo, LiteralValue, MemberInfo, MethodExt, MethodInfo};
use crate::error::{EngineError, EngineResult};
use crate::exception::ErrorEnum;
use crate::value::{ClassVal, Constness};
use crate::{intrinsics, ClassId, Intrinsic, MethodId};

struct Pending {
    info: Option<ClassInfo>,
    handler: Option<Box<dyn ClassHandler>>,
}

// ============================================================================
// RegistryBuilder
// ============================================================================

/// Collects class declarations and initialises them into a [`ClassRegistry`]
pub struct RegistryBuilder {
    pending: Vec<Pending>,
    by_path: FxHashMap<String, ClassId>,
}

impl RegistryBuilder {
    /// Builder with the intrinsic classes declared
    pub fn new() -> Self {
        let mut builder = Self {
            pending: Vec::with_capacity(64),
            by_path: FxHashMap::default(),
        };
        for intrinsic in Intrinsic::ALL {
            let (mut info, handler) = intrinsics::intrinsic_class(intrinsic);
            info.set_id(intrinsic.id());
            info.set_parent_id(intrinsic.parent().map(Intrinsic::id));
            builder.by_path.insert(info.path().to_string(), intrinsic.id());
            builder.pending.push(Pending {
                info: Some(info),
                handler: Some(handler),
            });
        }
        builder
    }

    /// Number of declared classes
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// True if nothing is declared
    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Id of a declared class
    pub fn find(&self, path: &str) -> Option<ClassId> {
        self.by_path.get(path).copied()
    }

    /// Declare a class
    ///
    /// # Errors
    ///
    /// - `EngineError::DupClass` if the path is taken
    /// - `EngineError::ClassNotFound` if the parent is not declared
    /// - `EngineError::ParentIsFinal` if the parent is final
    pub fn add_class(&mut self, info: ClassInfo, handler: Box<dyn ClassHandler>) -> EngineResult<ClassId> {
        self.declare(info, handler, None)
    }

    fn declare(
        &mut self,
        mut info: ClassInfo,
        handler: Box<dyn ClassHandler>,
        current: Option<&ClassInfo>,
    ) -> EngineResult<ClassId> {
        if self.by_path.contains_key(info.path()) {
            return Err(EngineError::DupClass(info.path().to_string()));
        }

        let parent_id = if info.parent_path().is_empty() {
            None
        } else {
            let parent_id = self
                .find(info.parent_path())
                .ok_or_else(|| EngineError::ClassNotFound(info.parent_path().to_string()))?;

            // The parent may be the class whose init is running
            let parent = self.pending[usize::from(parent_id)]
                .info
                .as_ref()
                .or(current.filter(|class| class.id() == parent_id));
            if parent.is_some_and(|parent| parent.ext() == super::ClassExt::Final) {
                return Err(EngineError::ParentIsFinal {
                    class_path: info.path().to_string(),
                    parent: info.parent_path().to_string(),
                });
            }
            Some(parent_id)
        };

        let id = self.pending.len() as ClassId;
        info.set_id(id);
        info.set_parent_id(parent_id);
        self.by_path.insert(info.path().to_string(), id);
        self.pending.push(Pending {
            info: Some(info),
            handler: Some(handler),
        });
        Ok(id)
    }

    /// Initialise every declared class
    ///
    /// # Errors
    ///
    /// The first error returned by a handler's `init`.
    pub fn build(mut self) -> EngineResult<Arc<ClassRegistry>> {
        let mut index = 0;
        while index < self.pending.len() {
            let (mut info, mut handler) = match (
                self.pending[index].info.take(),
                self.pending[index].handler.take(),
            ) {
                (Some(info), Some(handler)) => (info, handler),
                _ => return Err(EngineError::NotInitialized(format!("class id {}", index))),
            };

            if let Some(parent_id) = info.parent_id() {
                let parent = self.pending[usize::from(parent_id)]
                    .info
                    .as_ref()
                    .ok_or_else(|| EngineError::NotInitialized(info.parent_path().to_string()))?;
                info.inherit_from(parent);
            }

            handler.init(&mut ClassBuilder {
                registry: &mut self,
                info: &mut info,
            })?;

            tracing::debug!(
                target: "cml::registry",
                class = %info.path(),
                id = info.id(),
                methods = info.methods().len(),
                "registered class"
            );

            self.pending[index].info = Some(info);
            self.pending[index].handler = Some(handler);
            index += 1;
        }

        let mut classes = Vec::with_capacity(self.pending.len());
        for pending in self.pending {
            match (pending.info, pending.handler) {
                (Some(info), Some(handler)) => classes.push(ClassEntry { info, handler }),
                _ => return Err(EngineError::NotInitialized(format!("class id {}", classes.len()))),
            }
        }

        Ok(Arc::new(ClassRegistry {
            classes,
            by_path: self.by_path,
        }))
    }
}

impl Default for RegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ClassBuilder
// ============================================================================

/// View of one class while its handler's `init` runs
pub struct ClassBuilder<'a> {
    registry: &'a mut RegistryBuilder,
    info: &'a mut ClassInfo,
}

impl ClassBuilder<'_> {
    /// Id of the class being initialised
    #[inline]
    pub fn id(&self) -> ClassId {
        self.info.id()
    }

    /// Path of the class being initialised
    #[inline]
    pub fn path(&self) -> &str {
        self.info.path()
    }

    /// Metadata of the class being initialised
    #[inline]
    pub fn info(&self) -> &ClassInfo {
        self.info
    }

    /// Add a method, returning its id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DupMethod` if the name is already used.
    pub fn add_method(&mut self, method: MethodInfo) -> EngineResult<MethodId> {
        if self.info.find_method(&method.name).is_some() {
            return Err(EngineError::DupMethod {
                method: method.name,
                class_path: self.info.path().to_string(),
            });
        }
        Ok(self.info.push_method(method))
    }

    /// Take over an inherited method, returning its id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::CannotOverride` unless the method is inherited and
    /// not final.
    pub fn override_method(&mut self, name: &str) -> EngineResult<MethodId> {
        self.info.methods()[..self.info.inherited_count()]
            .iter()
            .find(|method| method.name == name && method.ext != MethodExt::Final)
            .map(|method| method.id)
            .ok_or_else(|| EngineError::CannotOverride {
                method: name.to_string(),
                class_path: self.info.path().to_string(),
            })
    }

    /// Add a member, returning its index
    pub fn add_member(&mut self, name: impl Into<String>, class_id: ClassId, constness: Constness) -> usize {
        self.info.push_member(MemberInfo {
            name: name.into(),
            class_id,
            constness,
        })
    }

    /// Add a named constant
    pub fn add_literal(&mut self, name: impl Into<String>, value: LiteralValue) {
        self.info.push_literal(LiteralInfo {
            name: name.into(),
            value,
        });
    }

    /// Record that this class uses `path`
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ImportNotFound` if `path` is not declared.
    pub fn add_import(&mut self, path: &str) -> EngineResult<ClassId> {
        let id = self.registry.find(path).ok_or_else(|| EngineError::ImportNotFound {
            class_path: self.info.path().to_string(),
            import: path.to_string(),
        })?;
        self.info.push_import(id);
        Ok(id)
    }

    /// Id of a declared class
    pub fn find_class(&self, path: &str) -> Option<ClassId> {
        self.registry.find(path)
    }

    /// Metadata of an already initialised class
    pub fn class_info(&self, id: ClassId) -> Option<&ClassInfo> {
        self.registry
            .pending
            .get(usize::from(id))
            .and_then(|pending| pending.info.as_ref())
    }

    /// Declare a nested enum type, returning its id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DupClass` if the nested path is taken.
    pub fn add_enum(&mut self, name: &str, items: &[(&str, &str)]) -> EngineResult<ClassId> {
        let items = items
            .iter()
            .map(|(name, text)| EnumItem {
                name: (*name).to_string(),
                text: (*text).to_string(),
            })
            .collect();
        let info = ClassInfo::new(name, self.info.path(), Intrinsic::Enum.path())
            .with_ext(super::ClassExt::Final)
            .with_copyable(true)
            .with_enum_items(items);
        self.add_nested_class(info, Box::new(intrinsics::EnumClass::derived()))
    }

    /// Declare this class's error enum
    ///
    /// Items are `(name, template)` pairs; ordinals follow the slice order.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::DupClass` if the nested path is taken.
    pub fn add_error_enum(&mut self, name: &str, items: &[(&str, &str)]) -> EngineResult<ErrorEnum> {
        let id = self.add_enum(name, items)?;
        Ok(ErrorEnum::new(id, self.info.path()))
    }

    /// Declare a nested type, returning its id
    ///
    /// # Errors
    ///
    /// Same as [`RegistryBuilder::add_class`].
    pub fn add_nested_class(&mut self, info: ClassInfo, handler: Box<dyn ClassHandler>) -> EngineResult<ClassId> {
        let path = info.path().to_string();
        let id = self.registry.declare(info, handler, Some(&*self.info))?;
        self.info.push_nested(path);
        Ok(id)
    }
}

// ============================================================================
// ClassRegistry
// ============================================================================

struct ClassEntry {
    info: ClassInfo,
    handler: Box<dyn ClassHandler>,
}

/// Immutable set of initialised classes, shared by every engine
pub struct ClassRegistry {
    classes: Vec<ClassEntry>,
    by_path: FxHashMap<String, ClassId>,
}

impl ClassRegistry {
    /// Start a registry with the intrinsic classes declared
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    fn entry(&self, id: ClassId) -> EngineResult<&ClassEntry> {
        self.classes
            .get(usize::from(id))
            .ok_or(EngineError::BadClassId(id))
    }

    /// Class metadata by id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadClassId` for unknown ids.
    pub fn class(&self, id: ClassId) -> EngineResult<&ClassInfo> {
        self.entry(id).map(|entry| &entry.info)
    }

    /// Class handler by id
    ///
    /// # Errors
    ///
    /// Returns `EngineError::BadClassId` for unknown ids.
    pub fn handler(&self, id: ClassId) -> EngineResult<&dyn ClassHandler> {
        self.entry(id).map(|entry| entry.handler.as_ref())
    }

    /// Class id by path
    pub fn find(&self, path: &str) -> Option<ClassId> {
        self.by_path.get(path).copied()
    }

    /// Class metadata by path
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ClassNotFound` for unknown paths.
    pub fn find_class(&self, path: &str) -> EngineResult<&ClassInfo> {
        let id = self
            .find(path)
            .ok_or_else(|| EngineError::ClassNotFound(path.to_string()))?;
        self.class(id)
    }

    /// Path of a class, or a placeholder for unknown ids
    pub fn path_of(&self, id: ClassId) -> &str {
        self.class(id).map_or("<unknown>", ClassInfo::path)
    }

    /// Create the storage of a new instance
    ///
    /// This does not build member values; see `Engine::new_value`.
    ///
    /// # Errors
    ///
    /// Returns `EngineError::ClassHasNoValue` for abstract classes and classes
    /// whose handler provides no storage.
    pub fn make_storage(&self, id: ClassId, name: &str, constness: Constness) -> EngineResult<ClassVal> {
        let entry = self.entry(id)?;
        if entry.info.is_abstract() {
            return Err(EngineError::ClassHasNoValue(entry.info.path().to_string()));
        }
        let data = entry.handler.make_storage(&entry.info)?;
        Ok(ClassVal::new(name, id, constness, data))
    }

    /// True if `id` is `ancestor` or derives from it
    pub fn is_descendant_of(&self, id: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(id);
        while let Some(class_id) = current {
            if class_id == ancestor {
                return true;
            }
            current = self.class(class_id).ok().and_then(ClassInfo::parent_id);
        }
        false
    }

    /// Number of classes
    pub fn len(&self) -> usize {
        self.classes.len()
    }

    /// True if there are no classes
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }

    /// Every class, in id order
    pub fn iter(&self) -> impl Iterator<Item = &ClassInfo> {
        self.classes.iter().map(|entry| &entry.info)
    }
}

impl std::fmt::Debug for ClassRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClassRegistry")
            .field("classes", &self.classes.len())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassExt, Visibility};
    use crate::engine::Engine;
    use crate::value::{EmptyVal, MacroValue, ValueId};

    #[derive(Default)]
    struct Plain {
        nested: bool,
    }

    impl ClassHandler for Plain {
        fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
            let path = class.path().to_string();
            class.add_method(MethodInfo::ctor(&path))?;
            class.add_method(MethodInfo::new(
                "Poke",
                Intrinsic::Void.id(),
                Visibility::Public,
                MethodExt::NonFinal,
            ))?;
            if self.nested {
                class.add_error_enum("PlainErrors", &[("Bad", "bad %(1)")])?;
            }
            Ok(())
        }

        fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
            Ok(Box::new(EmptyVal))
        }

        fn invoke(&self, _engine: &mut Engine, _method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
            Ok(false)
        }
    }

    struct Derived;

    impl ClassHandler for Derived {
        fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
            let poke = class.override_method("Poke")?;
            assert_eq!(class.info().method(poke)?.name, "Poke");
            assert!(class.override_method("NoSuch").is_err());
            Ok(())
        }

        fn invoke(&self, _engine: &mut Engine, _method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
            Ok(false)
        }
    }

    #[test]
    fn test_intrinsics_declared_first() {
        let registry = ClassRegistry::builder().build().unwrap();
        for intrinsic in Intrinsic::ALL {
            let info = registry.class(intrinsic.id()).unwrap();
            assert_eq!(info.path(), intrinsic.path());
            assert_eq!(registry.find(intrinsic.path()), Some(intrinsic.id()));
        }
    }

    #[test]
    fn test_dup_class() {
        let mut builder = ClassRegistry::builder();
        builder
            .add_class(ClassInfo::from_path("MEng.User.A", "MEng.Object"), Box::<Plain>::default())
            .unwrap();
        let err = builder
            .add_class(ClassInfo::from_path("MEng.User.A", "MEng.Object"), Box::<Plain>::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::DupClass(_)));
    }

    #[test]
    fn test_parent_must_exist_and_not_be_final() {
        let mut builder = ClassRegistry::builder();
        let err = builder
            .add_class(ClassInfo::from_path("MEng.User.A", "MEng.User.Missing"), Box::<Plain>::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::ClassNotFound(_)));

        builder
            .add_class(
                ClassInfo::from_path("MEng.User.Sealed", "MEng.Object").with_ext(ClassExt::Final),
                Box::<Plain>::default(),
            )
            .unwrap();
        let err = builder
            .add_class(ClassInfo::from_path("MEng.User.B", "MEng.User.Sealed"), Box::<Plain>::default())
            .unwrap_err();
        assert!(matches!(err, EngineError::ParentIsFinal { .. }));
    }

    #[test]
    fn test_inheritance_and_override() {
        let mut builder = ClassRegistry::builder();
        let base = builder
            .add_class(ClassInfo::from_path("MEng.User.Base", "MEng.Object"), Box::<Plain>::default())
            .unwrap();
        let derived = builder
            .add_class(ClassInfo::from_path("MEng.User.Derived", "MEng.User.Base"), Box::new(Derived))
            .unwrap();
        let registry = builder.build().unwrap();

        let base_info = registry.class(base).unwrap();
        let derived_info = registry.class(derived).unwrap();
        assert_eq!(derived_info.inherited_count(), base_info.methods().len());
        assert_eq!(derived_info.method_id("Poke"), base_info.method_id("Poke"));
        assert!(registry.is_descendant_of(derived, base));
        assert!(registry.is_descendant_of(derived, Intrinsic::Object.id()));
        assert!(!registry.is_descendant_of(base, derived));
    }

    #[test]
    fn test_nested_error_enum() {
        let mut builder = ClassRegistry::builder();
        let id = builder
            .add_class(
                ClassInfo::from_path("MEng.User.Nest", "MEng.Object"),
                Box::new(Plain { nested: true }),
            )
            .unwrap();
        let registry = builder.build().unwrap();

        let info = registry.class(id).unwrap();
        assert_eq!(info.nested(), ["MEng.User.Nest.PlainErrors".to_string()]);
        let errors = registry.find_class("MEng.User.Nest.PlainErrors").unwrap();
        assert!(errors.id() > id);
        assert_eq!(errors.parent_id(), Some(Intrinsic::Enum.id()));
        assert_eq!(errors.partial_name(0).unwrap(), "PlainErrors.Bad");
        // Enum base methods were inherited
        assert!(errors.method_id("GetOrdinal").is_some());
    }

    #[test]
    fn test_make_storage() {
        let mut builder = ClassRegistry::builder();
        let id = builder
            .add_class(ClassInfo::from_path("MEng.User.A", "MEng.Object"), Box::<Plain>::default())
            .unwrap();
        let registry = builder.build().unwrap();

        let val = registry.make_storage(id, "a", Constness::Const).unwrap();
        assert_eq!(val.class_id(), id);
        assert!(val.is_const());

        let err = registry
            .make_storage(Intrinsic::Object.id(), "o", Constness::NonConst)
            .unwrap_err();
        assert!(matches!(err, EngineError::ClassHasNoValue(_)));
    }

    #[test]
    fn test_import_not_found() {
        struct Importer;
        impl ClassHandler for Importer {
            fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
                class.add_import("MEng.System.Runtime.MemBuf")?;
                class.add_import("MEng.Nowhere")?;
                Ok(())
            }
            fn invoke(&self, _: &mut Engine, _: &MethodInfo, _: ValueId) -> EngineResult<bool> {
                Ok(false)
            }
        }

        let mut builder = ClassRegistry::builder();
        builder
            .add_class(ClassInfo::from_path("MEng.User.I", "MEng.Object"), Box::new(Importer))
            .unwrap();
        assert!(matches!(
            builder.build(),
            Err(EngineError::ImportNotFound { .. })
        ));
    }

    #[test]
    fn test_dup_method() {
        struct Twice;
        impl ClassHandler for Twice {
            fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
                let method = MethodInfo::new("Same", Intrinsic::Void.id(), Visibility::Public, MethodExt::Final);
                class.add_method(method.clone())?;
                class.add_method(method)?;
                Ok(())
            }
            fn invoke(&self, _: &mut Engine, _: &MethodInfo, _: ValueId) -> EngineResult<bool> {
                Ok(false)
            }
        }

        let mut builder = ClassRegistry::builder();
        builder
            .add_class(ClassInfo::from_path("MEng.User.T", "MEng.Object"), Box::new(Twice))
            .unwrap();
        assert!(matches!(builder.build(), Err(EngineError::DupMethod { .. })));
    }
}
