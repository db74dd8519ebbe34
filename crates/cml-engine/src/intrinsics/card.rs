//! MEng.Card1, MEng.Card2 and MEng.Card4
//!
//! The three unsigned classes share one generic value and handler.
//! Arithmetic wraps.

use std::fmt;

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::impl_as_any;
use crate::value::{downcast_src, MacroValue, ValueId};
use crate::Intrinsic;

/// Native integer behind a Card class
pub trait CardType: Copy + Default + PartialEq + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// The intrinsic class this type backs
    const INTRINSIC: Intrinsic;

    /// Wrapping addition
    fn wrapping_add(self, other: Self) -> Self;

    /// Wrapping subtraction
    fn wrapping_sub(self, other: Self) -> Self;

    /// One
    fn one() -> Self;
}

macro_rules! card_type {
    ($ty:ty, $intrinsic:expr) => {
        impl CardType for $ty {
            const INTRINSIC: Intrinsic = $intrinsic;

            #[inline]
            fn wrapping_add(self, other: Self) -> Self {
                <$ty>::wrapping_add(self, other)
            }

            #[inline]
            fn wrapping_sub(self, other: Self) -> Self {
                <$ty>::wrapping_sub(self, other)
            }

            #[inline]
            fn one() -> Self {
                1
            }
        }
    };
}

card_type!(u8, Intrinsic::Card1);
card_type!(u16, Intrinsic::Card2);
card_type!(u32, Intrinsic::Card4);

/// Unsigned value
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CardVal<T> {
    /// Current value
    pub value: T,
}

/// MEng.Card1 value
pub type Card1Val = CardVal<u8>;
/// MEng.Card2 value
pub type Card2Val = CardVal<u16>;
/// MEng.Card4 value
pub type Card4Val = CardVal<u32>;

impl<T: CardType> MacroValue for CardVal<T> {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.value = downcast_src::<CardVal<T>>(src)?.value;
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(self.value.to_string())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CardOp {
    Ctor,
    Equal,
    Add,
    Sub,
    Inc,
    Dec,
}

/// Handler of one Card class
#[derive(Debug)]
pub struct CardClass<T> {
    table: MethodTable<CardOp>,
    _ty: std::marker::PhantomData<T>,
}

impl<T> Default for CardClass<T> {
    fn default() -> Self {
        Self {
            table: MethodTable::new(),
            _ty: std::marker::PhantomData,
        }
    }
}

impl<T: CardType> ClassHandler for CardClass<T> {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let card = class.id();
        let ctor = class.add_method(MethodInfo::ctor(class.path()))?;
        self.table.bind(ctor, CardOp::Ctor);

        let equal = class.add_method(
            MethodInfo::new("Equal", Intrinsic::Boolean.id(), Visibility::Public, MethodExt::Final)
                .with_const()
                .in_parm("Val", card),
        )?;
        self.table.bind(equal, CardOp::Equal);

        for (name, op) in [("Add", CardOp::Add), ("Sub", CardOp::Sub)] {
            let id = class.add_method(
                MethodInfo::new(name, card, Visibility::Public, MethodExt::Final).in_parm("Val", card),
            )?;
            self.table.bind(id, op);
        }
        for (name, op) in [("Inc", CardOp::Inc), ("Dec", CardOp::Dec)] {
            let id = class.add_method(MethodInfo::new(name, card, Visibility::Public, MethodExt::Final))?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<CardVal<T>>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        let mine = engine.value_as::<CardVal<T>>(this)?.value;

        let result = match op {
            CardOp::Ctor => {
                engine.value_as_mut::<CardVal<T>>(this)?.value = T::default();
                return Ok(true);
            }
            CardOp::Equal => {
                let other = engine.stack_at_as::<CardVal<T>>(first)?.value;
                engine.set_bool_at(engine.return_index(method)?, mine == other)?;
                return Ok(true);
            }
            CardOp::Add => mine.wrapping_add(engine.stack_at_as::<CardVal<T>>(first)?.value),
            CardOp::Sub => mine.wrapping_sub(engine.stack_at_as::<CardVal<T>>(first)?.value),
            CardOp::Inc => mine.wrapping_add(T::one()),
            CardOp::Dec => mine.wrapping_sub(T::one()),
        };

        // Arithmetic updates the value and returns the result
        engine.value_as_mut::<CardVal<T>>(this)?.value = result;
        let ret = engine.return_index(method)?;
        engine.stack_at_as_mut::<CardVal<T>>(ret)?.value = result;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::class::ClassRegistry;

    fn card4(engine: &Engine, id: ValueId) -> u32 {
        engine.value_as::<Card4Val>(id).unwrap().value
    }

    #[test]
    fn test_add_and_wrap() {
        let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
        let a = engine.construct(Intrinsic::Card4.id(), "a").unwrap();
        let b = engine.construct(Intrinsic::Card4.id(), "b").unwrap();
        engine.value_as_mut::<Card4Val>(b).unwrap().value = 5;

        let sum = engine.call_by_name(a, "Add", &[b]).unwrap().unwrap();
        assert_eq!(card4(&engine, sum), 5);
        assert_eq!(card4(&engine, a), 5);

        engine.value_as_mut::<Card4Val>(b).unwrap().value = 6;
        engine.call_by_name(a, "Sub", &[b]).unwrap();
        assert_eq!(card4(&engine, a), u32::MAX);

        engine.call_by_name(a, "Inc", &[]).unwrap();
        assert_eq!(card4(&engine, a), 0);
    }

    #[test]
    fn test_card1_dec_wraps() {
        let mut engine = Engine::new(ClassRegistry::builder().build().unwrap());
        let a = engine.construct(Intrinsic::Card1.id(), "a").unwrap();
        let ret = engine.call_by_name(a, "Dec", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card1Val>(ret).unwrap().value, u8::MAX);
    }
}
