//! MEng.Boolean

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::impl_as_any;
use crate::value::{downcast_src, MacroValue, ValueId};

/// Boolean value
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BooleanVal {
    /// Current value
    pub value: bool,
}

impl MacroValue for BooleanVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.value = downcast_src::<BooleanVal>(src)?.value;
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(if self.value { "True" } else { "False" }.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BoolOp {
    Ctor,
    Equal,
    Negate,
}

/// Handler of MEng.Boolean
#[derive(Debug, Default)]
pub struct BooleanClass {
    table: MethodTable<BoolOp>,
}

impl ClassHandler for BooleanClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let bool_id = class.id();
        let ctor = class.add_method(MethodInfo::ctor(class.path()))?;
        self.table.bind(ctor, BoolOp::Ctor);

        let equal = class.add_method(
            MethodInfo::new("Equal", bool_id, Visibility::Public, MethodExt::Final)
                .with_const()
                .in_parm("Val", bool_id),
        )?;
        self.table.bind(equal, BoolOp::Equal);

        let negate = class.add_method(MethodInfo::new(
            "Negate",
            crate::Intrinsic::Void.id(),
            Visibility::Public,
            MethodExt::Final,
        ))?;
        self.table.bind(negate, BoolOp::Negate);
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<BooleanVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        match op {
            BoolOp::Ctor => engine.value_as_mut::<BooleanVal>(this)?.value = false,
            BoolOp::Equal => {
                let first = engine.first_parm_index(method)?;
                let other = engine.bool_at(first)?;
                let mine = engine.value_as::<BooleanVal>(this)?.value;
                engine.set_bool_at(engine.return_index(method)?, mine == other)?;
            }
            BoolOp::Negate => {
                let val = engine.value_as_mut::<BooleanVal>(this)?;
                val.value = !val.value;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;
    use crate::Intrinsic;

    #[test]
    fn test_negate_and_equal() {
        let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
        let a = engine.construct(Intrinsic::Boolean.id(), "a").unwrap();
        let b = engine.construct(Intrinsic::Boolean.id(), "b").unwrap();

        let equal = engine.call_by_name(a, "Equal", &[b]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(equal).unwrap().value);

        engine.call_by_name(a, "Negate", &[]).unwrap();
        assert!(engine.value_as::<BooleanVal>(a).unwrap().value);

        let equal = engine.call_by_name(a, "Equal", &[b]).unwrap().unwrap();
        assert!(!engine.value_as::<BooleanVal>(equal).unwrap().value);
    }
}
