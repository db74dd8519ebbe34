//! MEng.Exception

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::exception::MacroException;
use crate::impl_as_any;
use crate::intrinsics::EnumVal;
use crate::value::{downcast_src, DbgFormat, MacroValue, ValueId};
use crate::Intrinsic;

/// Exception value; holds the record of a caught exception
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExceptVal {
    /// Caught record, `None` until something is caught
    pub record: Option<MacroException>,
}

impl ExceptVal {
    fn record_or_default(&self) -> MacroException {
        self.record.clone().unwrap_or_default()
    }
}

impl MacroValue for ExceptVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.record.clone_from(&downcast_src::<ExceptVal>(src)?.record);
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(
            self.record
                .as_ref()
                .map(|record| record.error_text.clone())
                .unwrap_or_default(),
        )
    }

    fn dbg_format(&self, fmt: DbgFormat) -> String {
        let record = self.record_or_default();
        match fmt {
            DbgFormat::Short => record.error_name,
            DbgFormat::Long => record.long_format(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExceptOp {
    Ctor,
    Check,
    CheckGreater,
    GetClass,
    GetErrorNum,
    GetErrorText,
    GetLine,
}

/// Handler of MEng.Exception
#[derive(Debug, Default)]
pub struct ExceptionClass {
    table: MethodTable<ExceptOp>,
}

impl ClassHandler for ExceptionClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let boolean = Intrinsic::Boolean.id();
        let card4 = Intrinsic::Card4.id();
        let string = Intrinsic::String.id();
        let getter = |name: &str, ret| MethodInfo::new(name, ret, Visibility::Public, MethodExt::Final).with_const();

        let methods = [
            (MethodInfo::ctor(class.path()), ExceptOp::Ctor),
            (getter("Check", boolean).in_parm("ToCheck", Intrinsic::Enum.id()), ExceptOp::Check),
            (
                getter("CheckGreater", boolean).in_parm("ToCheck", Intrinsic::Enum.id()),
                ExceptOp::CheckGreater,
            ),
            (getter("GetClass", string), ExceptOp::GetClass),
            (getter("GetErrorNum", card4), ExceptOp::GetErrorNum),
            (getter("GetErrorText", string), ExceptOp::GetErrorText),
            (getter("GetLine", card4), ExceptOp::GetLine),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<ExceptVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        if op == ExceptOp::Ctor {
            engine.value_as_mut::<ExceptVal>(this)?.record = None;
            return Ok(true);
        }

        let first = engine.first_parm_index(method)?;
        let ret = engine.return_index(method)?;
        let record = engine.value_as::<ExceptVal>(this)?.record_or_default();
        match op {
            ExceptOp::Check | ExceptOp::CheckGreater => {
                let to_check = engine.stack_value_at(first)?;
                let err_class = engine.class_of(to_check)?;
                let ordinal = engine.value_as::<EnumVal>(to_check)?.ordinal;
                let result = if op == ExceptOp::Check {
                    record.check(err_class, ordinal)
                } else {
                    record.check_greater(err_class, ordinal)
                };
                engine.set_bool_at(ret, result)?;
            }
            ExceptOp::GetClass => engine.set_string_at(ret, record.src_class_path)?,
            ExceptOp::GetErrorNum => engine.set_card4_at(ret, record.error_num)?,
            ExceptOp::GetErrorText => engine.set_string_at(ret, record.error_text)?,
            ExceptOp::GetLine => engine.set_card4_at(ret, record.line)?,
            ExceptOp::Ctor => {}
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dbg_format() {
        let val = ExceptVal {
            record: Some(MacroException::new(20, "MEng.Test", 1, "TestErrors.Bad", "broken", 7)),
        };
        assert_eq!(val.dbg_format(DbgFormat::Short), "TestErrors.Bad");
        assert_eq!(
            val.dbg_format(DbgFormat::Long),
            "Class: MEng.Test\nError: TestErrors.Bad\nError Text: broken\nLine: 7"
        );
        assert_eq!(val.format().as_deref(), Some("broken"));
    }

    #[test]
    fn test_empty_record_formats_empty() {
        let val = ExceptVal::default();
        assert_eq!(val.format().as_deref(), Some(""));
    }
}
