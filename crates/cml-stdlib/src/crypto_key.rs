//! Symmetric key material
//!
//! Keys are compared in constant time. The debugger only ever sees the key
//! length, never its bytes.

use subtle::ConstantTimeEq;

use cml_engine::value::{downcast_src, DbgFormat};
use cml_engine::{
    impl_as_any, ClassBuilder, ClassHandler, ClassInfo, Engine, EngineResult, ErrorEnum, Intrinsic, MacroValue,
    MethodExt, MethodInfo, MethodTable, ValueId, Visibility,
};

use crate::digest::{MD5HashVal, MD5_HASH_PATH};

/// Key bytes; empty until set
#[derive(Debug, Default, Clone)]
pub struct CryptoKeyVal {
    bytes: Vec<u8>,
}

impl CryptoKeyVal {
    /// Key holding `bytes`
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    /// Key bytes
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Forget the key material
    pub fn reset(&mut self) {
        self.bytes.clear();
    }
}

impl PartialEq for CryptoKeyVal {
    fn eq(&self, other: &Self) -> bool {
        self.bytes.as_slice().ct_eq(other.bytes.as_slice()).into()
    }
}

impl Eq for CryptoKeyVal {}

impl MacroValue for CryptoKeyVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.bytes.clone_from(&downcast_src::<CryptoKeyVal>(src)?.bytes);
        Ok(())
    }

    fn dbg_format(&self, _fmt: DbgFormat) -> String {
        format!("[{} byte key]", self.bytes.len())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeyOp {
    Ctor,
    FromString,
    FromHash,
    FromBuf,
    Equal,
    GetByteCount,
    CopyToMemBuf,
    Reset,
}

const ERR_EMPTY_KEY: u32 = 0;
const ERR_BAD_COUNT: u32 = 1;

/// Handler of MEng.System.Runtime.CryptoKey
#[derive(Debug, Default)]
pub struct CryptoKeyClass {
    table: MethodTable<KeyOp>,
    errors: ErrorEnum,
}

impl CryptoKeyClass {
    fn set_key(&self, engine: &mut Engine, this: ValueId, bytes: &[u8]) -> EngineResult<()> {
        if bytes.is_empty() {
            return Err(self.errors.throw_fmt(engine, ERR_EMPTY_KEY, &[]));
        }
        *engine.value_as_mut::<CryptoKeyVal>(this)? = CryptoKeyVal::from_bytes(bytes);
        Ok(())
    }
}

impl ClassHandler for CryptoKeyClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "CryptoKeyErrors",
            &[
                ("EmptyKey", "The key material cannot be empty"),
                ("BadCount", "%(1) bytes were requested but the buffer holds %(2)"),
            ],
        )?;

        let hash = class.add_import(MD5_HASH_PATH)?;
        let membuf = class.add_import(Intrinsic::MemBuf.path())?;
        let key = class.id();
        let card4 = Intrinsic::Card4.id();
        let void = Intrinsic::Void.id();
        let methods = [
            (MethodInfo::ctor(class.path()), KeyOp::Ctor),
            (
                MethodInfo::new("FromString", void, Visibility::Public, MethodExt::Final)
                    .in_parm("Source", Intrinsic::String.id()),
                KeyOp::FromString,
            ),
            (
                MethodInfo::new("FromHash", void, Visibility::Public, MethodExt::Final).in_parm("Source", hash),
                KeyOp::FromHash,
            ),
            (
                MethodInfo::new("FromBuf", void, Visibility::Public, MethodExt::Final)
                    .in_parm("Source", membuf)
                    .in_parm("ByteCount", card4),
                KeyOp::FromBuf,
            ),
            (
                MethodInfo::new("Equal", Intrinsic::Boolean.id(), Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToComp", key),
                KeyOp::Equal,
            ),
            (
                MethodInfo::new("GetByteCount", card4, Visibility::Public, MethodExt::Final).with_const(),
                KeyOp::GetByteCount,
            ),
            (
                MethodInfo::new("CopyToMemBuf", card4, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .out_parm("ToFill", membuf),
                KeyOp::CopyToMemBuf,
            ),
            (MethodInfo::new("Reset", void, Visibility::Public, MethodExt::Final), KeyOp::Reset),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<CryptoKeyVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            KeyOp::Ctor | KeyOp::Reset => engine.value_as_mut::<CryptoKeyVal>(this)?.reset(),
            KeyOp::FromString => {
                let bytes = engine.string_at(first)?.as_bytes().to_vec();
                self.set_key(engine, this, &bytes)?;
            }
            KeyOp::FromHash => {
                let hash = *engine.stack_at_as::<MD5HashVal>(first)?.bytes();
                self.set_key(engine, this, &hash)?;
            }
            KeyOp::FromBuf => {
                let count = engine.card4_at(first + 1)? as usize;
                let src = engine.membuf_at(first)?;
                if count > src.len() {
                    return Err(self.errors.throw_fmt(engine, ERR_BAD_COUNT, &[&count, &src.len()]));
                }
                let bytes = src[..count].to_vec();
                self.set_key(engine, this, &bytes)?;
            }
            KeyOp::Equal => {
                let equal = engine.value_as::<CryptoKeyVal>(this)? == engine.stack_at_as::<CryptoKeyVal>(first)?;
                engine.set_bool_at(engine.return_index(method)?, equal)?;
            }
            KeyOp::GetByteCount => {
                let count = engine.value_as::<CryptoKeyVal>(this)?.bytes.len();
                engine.set_card4_at(engine.return_index(method)?, count as u32)?;
            }
            KeyOp::CopyToMemBuf => {
                let bytes = engine.value_as::<CryptoKeyVal>(this)?.bytes.clone();
                engine.membuf_at_mut(first)?.copy_in(&bytes);
                engine.set_card4_at(engine.return_index(method)?, bytes.len() as u32)?;
            }
        }
        Ok(true)
    }
}
