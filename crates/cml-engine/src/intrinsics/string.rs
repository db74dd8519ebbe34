//! MEng.String

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::impl_as_any;
use crate::value::{downcast_src, MacroValue, ValueId};
use crate::Intrinsic;

/// String value
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StringVal {
    /// Current text
    pub text: String,
}

impl MacroValue for StringVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        let src = downcast_src::<StringVal>(src)?;
        self.text.clone_from(&src.text);
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(self.text.clone())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StrOp {
    Ctor,
    Append,
    Clear,
    GetLength,
    IsEmpty,
    Equal,
}

/// Handler of MEng.String
#[derive(Debug, Default)]
pub struct StringClass {
    table: MethodTable<StrOp>,
}

impl ClassHandler for StringClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let string = class.id();
        let void = Intrinsic::Void.id();
        let boolean = Intrinsic::Boolean.id();

        let methods = [
            (MethodInfo::ctor(class.path()), StrOp::Ctor),
            (
                MethodInfo::new("Append", void, Visibility::Public, MethodExt::Final).in_parm("ToAppend", string),
                StrOp::Append,
            ),
            (MethodInfo::new("Clear", void, Visibility::Public, MethodExt::Final), StrOp::Clear),
            (
                MethodInfo::new("GetLength", Intrinsic::Card4.id(), Visibility::Public, MethodExt::Final).with_const(),
                StrOp::GetLength,
            ),
            (
                MethodInfo::new("IsEmpty", boolean, Visibility::Public, MethodExt::Final).with_const(),
                StrOp::IsEmpty,
            ),
            (
                MethodInfo::new("Equal", boolean, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToComp", string),
                StrOp::Equal,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<StringVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            StrOp::Ctor | StrOp::Clear => engine.value_as_mut::<StringVal>(this)?.text.clear(),
            StrOp::Append => {
                let suffix = engine.string_at(first)?.to_string();
                engine.value_as_mut::<StringVal>(this)?.text.push_str(&suffix);
            }
            StrOp::GetLength => {
                let len = engine.value_as::<StringVal>(this)?.text.chars().count();
                engine.set_card4_at(engine.return_index(method)?, len as u32)?;
            }
            StrOp::IsEmpty => {
                let empty = engine.value_as::<StringVal>(this)?.text.is_empty();
                engine.set_bool_at(engine.return_index(method)?, empty)?;
            }
            StrOp::Equal => {
                let equal = engine.value_as::<StringVal>(this)?.text == engine.string_at(first)?;
                engine.set_bool_at(engine.return_index(method)?, equal)?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;
    use crate::intrinsics::{BooleanVal, Card4Val};

    #[test]
    fn test_append_and_length() {
        let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
        let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
        let suffix = engine.construct(Intrinsic::String.id(), "suffix").unwrap();
        engine.value_as_mut::<StringVal>(suffix).unwrap().text = "héllo".into();

        engine.call_by_name(text, "Append", &[suffix]).unwrap();
        engine.call_by_name(text, "Append", &[suffix]).unwrap();
        assert_eq!(engine.value_as::<StringVal>(text).unwrap().text, "héllohéllo");

        let len = engine.call_by_name(text, "GetLength", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card4Val>(len).unwrap().value, 10);

        engine.call_by_name(text, "Clear", &[]).unwrap();
        let empty = engine.call_by_name(text, "IsEmpty", &[]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(empty).unwrap().value);
    }

    #[test]
    fn test_format_to() {
        let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
        let target = engine.construct(Intrinsic::String.id(), "target").unwrap();
        let number = engine.construct(Intrinsic::Card4.id(), "number").unwrap();
        engine.value_as_mut::<Card4Val>(number).unwrap().value = 42;
        engine.value_as_mut::<StringVal>(target).unwrap().text = "n=".into();

        engine.call_by_name(number, "FormatTo", &[target]).unwrap();
        assert_eq!(engine.value_as::<StringVal>(target).unwrap().text, "n=42");
    }
}
