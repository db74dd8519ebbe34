//! MEng.System.Runtime.MemBuf

use crate::class::{ClassBuilder, ClassHandler, ClassInfo, MethodExt, MethodInfo, MethodTable, Visibility};
use crate::engine::Engine;
use crate::error::EngineResult;
use crate::exception::ErrorEnum;
use crate::impl_as_any;
use crate::value::{downcast_src, DbgFormat, MacroValue, ValueId};
use crate::Intrinsic;

/// Byte buffer value
///
/// The allocation size is the vector length; new bytes are zero.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct MemBufVal {
    bytes: Vec<u8>,
}

impl MemBufVal {
    /// Buffer holding `bytes`
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// Buffer contents
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Mutable buffer contents
    #[inline]
    pub fn bytes_mut(&mut self) -> &mut [u8] {
        &mut self.bytes
    }

    /// Allocation size
    #[inline]
    pub fn alloc(&self) -> usize {
        self.bytes.len()
    }

    /// Resize, zero filling any new bytes
    pub fn reallocate(&mut self, size: usize) {
        self.bytes.resize(size, 0);
    }

    /// Grow to at least `size` bytes
    pub fn ensure(&mut self, size: usize) {
        if self.bytes.len() < size {
            self.bytes.resize(size, 0);
        }
    }

    /// Copy `src` to the start, growing if needed
    pub fn copy_in(&mut self, src: &[u8]) {
        self.ensure(src.len());
        self.bytes[..src.len()].copy_from_slice(src);
    }
}

impl MacroValue for MemBufVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.bytes.clone_from(&downcast_src::<MemBufVal>(src)?.bytes);
        Ok(())
    }

    fn dbg_format(&self, fmt: DbgFormat) -> String {
        match fmt {
            DbgFormat::Short => format!("[{} bytes]", self.bytes.len()),
            DbgFormat::Long => self
                .bytes
                .chunks(16)
                .map(|row| row.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" "))
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BufOp {
    Ctor,
    GetAlloc,
    GetAt,
    PutAt,
    Reallocate,
    ImportString,
}

const ERR_BAD_INDEX: u32 = 0;

/// Handler of MEng.System.Runtime.MemBuf
#[derive(Debug, Default)]
pub struct MemBufClass {
    table: MethodTable<BufOp>,
    errors: ErrorEnum,
}

impl MemBufClass {
    fn check_index(&self, engine: &Engine, this: ValueId, index: u32) -> EngineResult<()> {
        let alloc = engine.value_as::<MemBufVal>(this)?.alloc();
        if index as usize >= alloc {
            return Err(self.errors.throw_fmt(engine, ERR_BAD_INDEX, &[&index, &alloc]));
        }
        Ok(())
    }
}

impl ClassHandler for MemBufClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "MemBufErrors",
            &[("BadIndex", "Index %(1) is beyond the buffer size of %(2)")],
        )?;

        let card1 = Intrinsic::Card1.id();
        let card4 = Intrinsic::Card4.id();
        let void = Intrinsic::Void.id();
        let methods = [
            (MethodInfo::ctor(class.path()), BufOp::Ctor),
            (
                MethodInfo::new("GetAlloc", card4, Visibility::Public, MethodExt::Final).with_const(),
                BufOp::GetAlloc,
            ),
            (
                MethodInfo::new("GetAt", card1, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("Index", card4),
                BufOp::GetAt,
            ),
            (
                MethodInfo::new("PutAt", void, Visibility::Public, MethodExt::Final)
                    .in_parm("Index", card4)
                    .in_parm("ToPut", card1),
                BufOp::PutAt,
            ),
            (
                MethodInfo::new("Reallocate", void, Visibility::Public, MethodExt::Final).in_parm("NewSize", card4),
                BufOp::Reallocate,
            ),
            (
                MethodInfo::new("ImportString", card4, Visibility::Public, MethodExt::Final)
                    .in_parm("ToImport", Intrinsic::String.id()),
                BufOp::ImportString,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<MemBufVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            BufOp::Ctor => engine.value_as_mut::<MemBufVal>(this)?.reallocate(0),
            BufOp::GetAlloc => {
                let alloc = engine.value_as::<MemBufVal>(this)?.alloc();
                engine.set_card4_at(engine.return_index(method)?, alloc as u32)?;
            }
            BufOp::GetAt => {
                let index = engine.card4_at(first)?;
                self.check_index(engine, this, index)?;
                let byte = engine.value_as::<MemBufVal>(this)?.bytes()[index as usize];
                engine.set_card1_at(engine.return_index(method)?, byte)?;
            }
            BufOp::PutAt => {
                let index = engine.card4_at(first)?;
                let byte = engine.card1_at(first + 1)?;
                self.check_index(engine, this, index)?;
                engine.value_as_mut::<MemBufVal>(this)?.bytes_mut()[index as usize] = byte;
            }
            BufOp::Reallocate => {
                let size = engine.card4_at(first)?;
                engine.value_as_mut::<MemBufVal>(this)?.reallocate(size as usize);
            }
            BufOp::ImportString => {
                let bytes = engine.string_at(first)?.as_bytes().to_vec();
                engine.value_as_mut::<MemBufVal>(this)?.copy_in(&bytes);
                engine.set_card4_at(engine.return_index(method)?, bytes.len() as u32)?;
            }
        }
        Ok(true)
    }
}
