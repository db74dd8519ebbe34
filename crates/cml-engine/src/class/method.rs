//! Method metadata

use crate::{ClassId, MethodId, BAD_ID};

/// Method visibility
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Visibility {
    /// Callable from any class
    Public,
    /// Callable only from the declaring class
    Private,
}

/// How a method may be overridden
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MethodExt {
    /// Cannot be overridden
    Final,
    /// May be overridden
    NonFinal,
    /// Must be overridden by derived classes
    Required,
}

/// Parameter passing direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParmDir {
    /// Read by the callee
    In,
    /// Written by the callee
    Out,
    /// Read and written by the callee
    InOut,
}

/// One declared parameter
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParmInfo {
    /// Parameter name
    pub name: String,
    /// Passing direction
    pub dir: ParmDir,
    /// Declared class
    pub class_id: ClassId,
}

/// One method signature
///
/// The name is only used while registering and in diagnostics; dispatch goes
/// through [`MethodInfo::id`], the index into the owning class's method list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    /// Method id, assigned when added to a class
    pub id: MethodId,
    /// Method name
    pub name: String,
    /// Return class
    pub ret_type: ClassId,
    /// Visibility
    pub visibility: Visibility,
    /// Override rules
    pub ext: MethodExt,
    /// Does not modify the instance
    pub is_const: bool,
    /// Is a constructor
    pub is_ctor: bool,
    /// Parameters, in call order
    pub parms: Vec<ParmInfo>,
}

impl MethodInfo {
    /// Describe a method
    pub fn new(name: impl Into<String>, ret_type: ClassId, visibility: Visibility, ext: MethodExt) -> Self {
        Self {
            id: BAD_ID,
            name: name.into(),
            ret_type,
            visibility,
            ext,
            is_const: false,
            is_ctor: false,
            parms: Vec::new(),
        }
    }

    /// Describe the default constructor of `class_path`
    pub fn ctor(class_path: &str) -> Self {
        let mut method = Self::new(
            Self::ctor_name(class_path),
            crate::Intrinsic::Void.id(),
            Visibility::Public,
            MethodExt::Final,
        );
        method.is_ctor = true;
        method
    }

    /// Name of the default constructor of `class_path`
    pub fn ctor_name(class_path: &str) -> String {
        format!("ctor1_{}", class_path)
    }

    /// Mark as const
    pub fn with_const(mut self) -> Self {
        self.is_const = true;
        self
    }

    /// Add an `In` parameter
    pub fn in_parm(self, name: impl Into<String>, class_id: ClassId) -> Self {
        self.with_parm(name, ParmDir::In, class_id)
    }

    /// Add an `Out` parameter
    pub fn out_parm(self, name: impl Into<String>, class_id: ClassId) -> Self {
        self.with_parm(name, ParmDir::Out, class_id)
    }

    /// Add an `InOut` parameter
    pub fn in_out_parm(self, name: impl Into<String>, class_id: ClassId) -> Self {
        self.with_parm(name, ParmDir::InOut, class_id)
    }

    fn with_parm(mut self, name: impl Into<String>, dir: ParmDir, class_id: ClassId) -> Self {
        self.parms.push(ParmInfo {
            name: name.into(),
            dir,
            class_id,
        });
        self
    }

    /// Number of parameters
    #[inline]
    pub fn parm_count(&self) -> usize {
        self.parms.len()
    }

    /// True if the method returns a value
    #[inline]
    pub fn has_return(&self) -> bool {
        self.ret_type != crate::Intrinsic::Void.id()
    }
}
