//! Intrinsic classes
//!
//! These are declared before any user class, in [`Intrinsic`] order, so every
//! program sees them at fixed ids.

mod boolean;
mod card;
mod enum_class;
mod exception;
mod membuf;
mod object;
mod string;

pub use boolean::{BooleanClass, BooleanVal};
pub use card::{Card1Val, Card2Val, Card4Val, CardClass, CardType, CardVal};
pub use enum_class::{EnumClass, EnumVal};
pub use exception::{ExceptVal, ExceptionClass};
pub use membuf::{MemBufClass, MemBufVal};
pub use object::{FormattableClass, ObjectClass, VoidClass};
pub use string::{StringClass, StringVal};

use crate::class::{ClassExt, ClassHandler, ClassInfo};
use crate::collections::{CollectClass, VectorClass};
use crate::Intrinsic;

/// Metadata and handler of an intrinsic class
pub(crate) fn intrinsic_class(intrinsic: Intrinsic) -> (ClassInfo, Box<dyn ClassHandler>) {
    let parent = intrinsic.parent().map_or("", Intrinsic::path);
    let info = ClassInfo::from_path(intrinsic.path(), parent);
    let value_class = info.clone().with_ext(ClassExt::Final).with_copyable(true);

    match intrinsic {
        Intrinsic::Object => (info.with_ext(ClassExt::Abstract), Box::new(ObjectClass)),
        Intrinsic::Void => (info.with_ext(ClassExt::Final), Box::new(VoidClass)),
        Intrinsic::Formattable => (
            info.with_ext(ClassExt::Abstract),
            Box::<FormattableClass>::default(),
        ),
        Intrinsic::Enum => (info.with_ext(ClassExt::Abstract), Box::new(EnumClass::base())),
        Intrinsic::Exception => (value_class, Box::<ExceptionClass>::default()),
        Intrinsic::Boolean => (value_class, Box::<BooleanClass>::default()),
        Intrinsic::Card1 => (value_class, Box::<CardClass<u8>>::default()),
        Intrinsic::Card2 => (value_class, Box::<CardClass<u16>>::default()),
        Intrinsic::Card4 => (value_class, Box::<CardClass<u32>>::default()),
        Intrinsic::String => (value_class, Box::<StringClass>::default()),
        Intrinsic::MemBuf => (value_class, Box::<MemBufClass>::default()),
        Intrinsic::Collection => (
            info.with_ext(ClassExt::Abstract),
            Box::<CollectClass>::default(),
        ),
        Intrinsic::Vector => (info.with_ext(ClassExt::Abstract), Box::new(VectorClass::base())),
    }
}
