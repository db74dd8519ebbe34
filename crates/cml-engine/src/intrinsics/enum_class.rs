//! MEng.Enum and derived enum types
//!
//! The abstract base declares the methods every enum shares. Each concrete
//! enum is a derived class with its own item list, served by a handler
//! built with [`EnumClass::derived`].

use std::sync::Arc;

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, EnumItem, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::exception::ErrorEnum;
use crate::impl_as_any;
use crate::value::{downcast_src, DbgFormat, MacroValue, ValueId};
use crate::Intrinsic;

/// Enum value
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumVal {
    /// Current ordinal
    pub ordinal: u32,
    items: Arc<[EnumItem]>,
}

impl EnumVal {
    /// Value of an enum with the given items, at ordinal 0
    pub fn new(items: Arc<[EnumItem]>) -> Self {
        Self { ordinal: 0, items }
    }

    /// Number of items
    #[inline]
    pub fn ordinal_count(&self) -> u32 {
        self.items.len() as u32
    }

    /// Current item
    pub fn item(&self) -> Option<&EnumItem> {
        self.items.get(self.ordinal as usize)
    }

    /// Ordinal of the item named `name`
    pub fn ordinal_of_name(&self, name: &str) -> Option<u32> {
        self.items.iter().position(|item| item.name == name).map(|pos| pos as u32)
    }

    /// Ordinal of the item whose text is `text`
    pub fn ordinal_of_text(&self, text: &str) -> Option<u32> {
        self.items.iter().position(|item| item.text == text).map(|pos| pos as u32)
    }
}

impl MacroValue for EnumVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        let src = downcast_src::<EnumVal>(src)?;
        self.ordinal = src.ordinal;
        self.items = Arc::clone(&src.items);
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(self.item().map(|item| item.text.clone()).unwrap_or_default())
    }

    fn dbg_format(&self, fmt: DbgFormat) -> String {
        match (fmt, self.item()) {
            (DbgFormat::Short, Some(item)) => item.name.clone(),
            (DbgFormat::Long, Some(item)) => format!("{} ({}): {}", item.name, self.ordinal, item.text),
            (_, None) => format!("<bad ordinal {}>", self.ordinal),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EnumOp {
    GetOrdinal,
    SetOrdinal,
    GetName,
    GetText,
    Inc,
    Dec,
    IsAtMax,
    IsAtMin,
    FromName,
    FromText,
    Ctor,
    Equal,
    GetOrdinalCount,
}

const ERR_BAD_ORDINAL: u32 = 0;
const ERR_NAME_NOT_FOUND: u32 = 1;
const ERR_TEXT_NOT_FOUND: u32 = 2;

/// Handler of MEng.Enum and of each derived enum
#[derive(Debug)]
pub struct EnumClass {
    derived: bool,
    table: MethodTable<EnumOp>,
    errors: ErrorEnum,
    items: Arc<[EnumItem]>,
}

impl EnumClass {
    /// Handler of the abstract base
    pub fn base() -> Self {
        Self {
            derived: false,
            table: MethodTable::new(),
            errors: ErrorEnum::default(),
            items: Arc::from(Vec::new()),
        }
    }

    /// Handler of a concrete enum type
    ///
    /// The items come from the class info at init time.
    pub fn derived() -> Self {
        Self {
            derived: true,
            ..Self::base()
        }
    }

    fn init_base(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "EnumErrors",
            &[
                ("BadOrdinal", "%(1) is not a valid ordinal for enum %(2)"),
                ("NameNotFound", "%(1) is not a valid item name for enum %(2)"),
                ("TextNotFound", "%(1) is not a valid item text for enum %(2)"),
            ],
        )?;

        let void = Intrinsic::Void.id();
        let boolean = Intrinsic::Boolean.id();
        let card4 = Intrinsic::Card4.id();
        let string = Intrinsic::String.id();
        let method = |name: &str, ret| MethodInfo::new(name, ret, Visibility::Public, MethodExt::Final);

        let methods = [
            (method("GetOrdinal", card4).with_const(), EnumOp::GetOrdinal),
            (method("SetOrdinal", void).in_parm("ToSet", card4), EnumOp::SetOrdinal),
            (method("GetName", string).with_const(), EnumOp::GetName),
            (method("GetText", string).with_const(), EnumOp::GetText),
            (method("Inc", void), EnumOp::Inc),
            (method("Dec", void), EnumOp::Dec),
            (method("IsAtMax", boolean).with_const(), EnumOp::IsAtMax),
            (method("IsAtMin", boolean).with_const(), EnumOp::IsAtMin),
            (method("FromName", void).in_parm("ToFind", string), EnumOp::FromName),
            (method("FromText", void).in_parm("ToFind", string), EnumOp::FromText),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn init_derived(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.items = Arc::from(class.info().enum_items().to_vec());
        let this_enum = class.id();

        let ctor = class.add_method(MethodInfo::ctor(class.path()))?;
        self.table.bind(ctor, EnumOp::Ctor);
        let equal = class.add_method(
            MethodInfo::new("Equal", Intrinsic::Boolean.id(), Visibility::Public, MethodExt::Final)
                .with_const()
                .in_parm("ToComp", this_enum),
        )?;
        self.table.bind(equal, EnumOp::Equal);
        let count = class.add_method(
            MethodInfo::new("GetOrdinalCount", Intrinsic::Card4.id(), Visibility::Public, MethodExt::Final)
                .with_const(),
        )?;
        self.table.bind(count, EnumOp::GetOrdinalCount);
        Ok(())
    }

    fn set_ordinal(&self, engine: &mut Engine, this: ValueId, ordinal: u32) -> EngineResult<()> {
        let count = engine.value_as::<EnumVal>(this)?.ordinal_count();
        if ordinal >= count {
            let path = engine.registry().path_of(engine.class_of(this)?).to_string();
            return Err(self.errors.throw_fmt(engine, ERR_BAD_ORDINAL, &[&ordinal, &path]));
        }
        engine.value_as_mut::<EnumVal>(this)?.ordinal = ordinal;
        Ok(())
    }
}

impl ClassHandler for EnumClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        if self.derived {
            self.init_derived(class)
        } else {
            self.init_base(class)
        }
    }

    fn make_storage(&self, info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        if !self.derived {
            return Err(crate::error::EngineError::ClassHasNoValue(info.path().to_string()));
        }
        Ok(Box::new(EnumVal::new(Arc::clone(&self.items))))
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        let (ordinal, count) = {
            let val = engine.value_as::<EnumVal>(this)?;
            (val.ordinal, val.ordinal_count())
        };

        match op {
            EnumOp::Ctor => engine.value_as_mut::<EnumVal>(this)?.ordinal = 0,
            EnumOp::GetOrdinal => engine.set_card4_at(engine.return_index(method)?, ordinal)?,
            EnumOp::GetOrdinalCount => engine.set_card4_at(engine.return_index(method)?, count)?,
            EnumOp::SetOrdinal => {
                let to_set = engine.card4_at(first)?;
                self.set_ordinal(engine, this, to_set)?;
            }
            EnumOp::GetName | EnumOp::GetText => {
                let item = engine.value_as::<EnumVal>(this)?.item().cloned().unwrap_or(EnumItem {
                    name: String::new(),
                    text: String::new(),
                });
                let text = if op == EnumOp::GetName { item.name } else { item.text };
                engine.set_string_at(engine.return_index(method)?, text)?;
            }
            EnumOp::Inc => self.set_ordinal(engine, this, ordinal.wrapping_add(1))?,
            EnumOp::Dec => self.set_ordinal(engine, this, ordinal.wrapping_sub(1))?,
            EnumOp::IsAtMax => engine.set_bool_at(engine.return_index(method)?, ordinal + 1 >= count)?,
            EnumOp::IsAtMin => engine.set_bool_at(engine.return_index(method)?, ordinal == 0)?,
            EnumOp::FromName | EnumOp::FromText => {
                let to_find = engine.string_at(first)?.to_string();
                let found = {
                    let val = engine.value_as::<EnumVal>(this)?;
                    if op == EnumOp::FromName {
                        val.ordinal_of_name(&to_find)
                    } else {
                        val.ordinal_of_text(&to_find)
                    }
                };
                match found {
                    Some(found) => engine.value_as_mut::<EnumVal>(this)?.ordinal = found,
                    None => {
                        let path = engine.registry().path_of(engine.class_of(this)?).to_string();
                        let err = if op == EnumOp::FromName {
                            ERR_NAME_NOT_FOUND
                        } else {
                            ERR_TEXT_NOT_FOUND
                        };
                        return Err(self.errors.throw_fmt(engine, err, &[&to_find, &path]));
                    }
                }
            }
            EnumOp::Equal => {
                let other = engine.stack_at_as::<EnumVal>(first)?.ordinal;
                engine.set_bool_at(engine.return_index(method)?, ordinal == other)?;
            }
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::{ClassRegistry, RegistryBuilder};
    use crate::error::EngineError;
    use crate::intrinsics::{BooleanVal, Card4Val, StringVal};
    use crate::value::Constness;

    struct Colors;

    impl ClassHandler for Colors {
        fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
            class.add_enum("Color", &[("Red", "red"), ("Green", "green"), ("Blue", "blue")])?;
            Ok(())
        }

        fn invoke(&self, _: &mut Engine, _: &MethodInfo, _: ValueId) -> EngineResult<bool> {
            Ok(false)
        }
    }

    fn setup() -> (Engine, ValueId) {
        let mut builder: RegistryBuilder = ClassRegistry::builder();
        builder
            .add_class(ClassInfo::from_path("MEng.User.Palette", "MEng.Object"), Box::new(Colors))
            .unwrap();
        let registry = builder.build().unwrap();
        let color = registry.find("MEng.User.Palette.Color").unwrap();
        let mut engine = Engine::new(registry);
        let value = engine.construct(color, "color").unwrap();
        (engine, value)
    }

    #[test]
    fn test_inc_to_max_then_fail() {
        let (mut engine, color) = setup();
        engine.call_by_name(color, "Inc", &[]).unwrap();
        engine.call_by_name(color, "Inc", &[]).unwrap();
        let at_max = engine.call_by_name(color, "IsAtMax", &[]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(at_max).unwrap().value);

        let err = engine.call_by_name(color, "Inc", &[]).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.error_name, "EnumErrors.BadOrdinal");
        assert_eq!(exc.error_text, "3 is not a valid ordinal for enum MEng.User.Palette.Color");
    }

    #[test]
    fn test_from_name_and_get_text() {
        let (mut engine, color) = setup();
        let name = engine
            .new_value(Intrinsic::String.id(), "name", Constness::NonConst)
            .unwrap();
        engine.value_as_mut::<StringVal>(name).unwrap().text = "Blue".into();
        engine.call_by_name(color, "FromName", &[name]).unwrap();

        let ordinal = engine.call_by_name(color, "GetOrdinal", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card4Val>(ordinal).unwrap().value, 2);
        let text = engine.call_by_name(color, "GetText", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<StringVal>(text).unwrap().text, "blue");

        engine.value_as_mut::<StringVal>(name).unwrap().text = "Purple".into();
        let err = engine.call_by_name(color, "FromName", &[name]).unwrap_err();
        assert!(matches!(&err, EngineError::Thrown(exc) if exc.error_name == "EnumErrors.NameNotFound"));
    }

    #[test]
    fn test_ordinal_count_and_equal() {
        let (mut engine, color) = setup();
        let class = engine.class_of(color).unwrap();
        let other = engine.construct(class, "other").unwrap();

        let count = engine.call_by_name(color, "GetOrdinalCount", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card4Val>(count).unwrap().value, 3);

        let equal = engine.call_by_name(color, "Equal", &[other]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(equal).unwrap().value);
        engine.call_by_name(other, "Dec", &[]).unwrap_err();
    }
}
