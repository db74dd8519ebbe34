//! Object, Void and Formattable

use crate::class::{ClassBuilder, ClassHandler, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::value::ValueId;
use crate::Intrinsic;

/// Root class; declares nothing
#[derive(Debug, Default)]
pub struct ObjectClass;

impl ClassHandler for ObjectClass {
    fn init(&mut self, _class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        Ok(())
    }

    fn invoke(&self, _engine: &mut Engine, _method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
        Ok(false)
    }
}

/// Return type of methods with no result; has no values
#[derive(Debug, Default)]
pub struct VoidClass;

impl ClassHandler for VoidClass {
    fn init(&mut self, _class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        Ok(())
    }

    fn invoke(&self, _engine: &mut Engine, _method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
        Ok(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FormatOp {
    FormatTo,
}

/// Base of classes with a text form
#[derive(Debug, Default)]
pub struct FormattableClass {
    table: MethodTable<FormatOp>,
}

impl ClassHandler for FormattableClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let id = class.add_method(
            MethodInfo::new("FormatTo", Intrinsic::Void.id(), Visibility::Public, MethodExt::NonFinal)
                .with_const()
                .in_out_parm("TargetStr", Intrinsic::String.id()),
        )?;
        self.table.bind(id, FormatOp::FormatTo);
        Ok(())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        match op {
            FormatOp::FormatTo => {
                let first = engine.first_parm_index(method)?;
                let text = engine.value(this)?.data().format().unwrap_or_default();
                engine.string_at_mut(first)?.push_str(&text);
            }
        }
        Ok(true)
    }
}
