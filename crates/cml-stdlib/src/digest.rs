//! MD5 hashes and the digest that produces them

use cml_engine::value::{downcast_src, EmptyVal};
use cml_engine::{
    impl_as_any, ClassBuilder, ClassHandler, ClassInfo, Engine, EngineResult, ErrorEnum, Intrinsic,
    MacroValue, MethodExt, MethodInfo, MethodTable, ValueId, Visibility,
};

/// Path of the hash class
pub const MD5_HASH_PATH: &str = "MEng.System.Runtime.MD5Hash";

/// Bytes in an MD5 hash
pub const MD5_BYTES: usize = 16;

// ============================================================================
// MD5Hash
// ============================================================================

/// Hash value; all zeros until a digest fills it
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MD5HashVal {
    bytes: [u8; MD5_BYTES],
}

impl MD5HashVal {
    /// Hash of `data`
    pub fn digest(data: impl AsRef<[u8]>) -> Self {
        Self {
            bytes: md5::compute(data).0,
        }
    }

    /// Raw hash bytes
    #[inline]
    pub fn bytes(&self) -> &[u8; MD5_BYTES] {
        &self.bytes
    }

    /// Zero the hash
    pub fn reset(&mut self) {
        self.bytes = [0; MD5_BYTES];
    }

    /// Upper-case hex text
    pub fn to_hex(&self) -> String {
        hex::encode_upper(self.bytes)
    }
}

impl MacroValue for MD5HashVal {
    impl_as_any!();

    fn copy_from(&mut self, src: &dyn MacroValue) -> EngineResult<()> {
        self.bytes = downcast_src::<MD5HashVal>(src)?.bytes;
        Ok(())
    }

    fn format(&self) -> Option<String> {
        Some(self.to_hex())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HashOp {
    Ctor,
    CopyToMemBuf,
    Equal,
    GetAsString,
    GetByteCount,
    Reset,
}

/// Handler of MEng.System.Runtime.MD5Hash
#[derive(Debug, Default)]
pub struct MD5HashClass {
    table: MethodTable<HashOp>,
}

impl ClassHandler for MD5HashClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        let hash = class.id();
        let card4 = Intrinsic::Card4.id();
        let methods = [
            (MethodInfo::ctor(class.path()), HashOp::Ctor),
            (
                MethodInfo::new("CopyToMemBuf", card4, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .out_parm("ToFill", Intrinsic::MemBuf.id()),
                HashOp::CopyToMemBuf,
            ),
            (
                MethodInfo::new("Equal", Intrinsic::Boolean.id(), Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("ToComp", hash),
                HashOp::Equal,
            ),
            (
                MethodInfo::new("GetAsString", Intrinsic::String.id(), Visibility::Public, MethodExt::Final)
                    .with_const(),
                HashOp::GetAsString,
            ),
            (
                MethodInfo::new("GetByteCount", card4, Visibility::Public, MethodExt::Final).with_const(),
                HashOp::GetByteCount,
            ),
            (
                MethodInfo::new("Reset", Intrinsic::Void.id(), Visibility::Public, MethodExt::Final),
                HashOp::Reset,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<MD5HashVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            HashOp::Ctor | HashOp::Reset => engine.value_as_mut::<MD5HashVal>(this)?.reset(),
            HashOp::CopyToMemBuf => {
                let bytes = *engine.value_as::<MD5HashVal>(this)?.bytes();
                engine.membuf_at_mut(first)?.copy_in(&bytes);
                engine.set_card4_at(engine.return_index(method)?, MD5_BYTES as u32)?;
            }
            HashOp::Equal => {
                let equal = engine.value_as::<MD5HashVal>(this)? == engine.stack_at_as::<MD5HashVal>(first)?;
                engine.set_bool_at(engine.return_index(method)?, equal)?;
            }
            HashOp::GetAsString => {
                let text = engine.value_as::<MD5HashVal>(this)?.to_hex();
                engine.set_string_at(engine.return_index(method)?, text)?;
            }
            HashOp::GetByteCount => engine.set_card4_at(engine.return_index(method)?, MD5_BYTES as u32)?,
        }
        Ok(true)
    }
}

// ============================================================================
// MD5Digest
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DigestOp {
    Ctor,
    DigestBuf,
    DigestStr,
}

const ERR_BAD_COUNT: u32 = 0;

/// Handler of MEng.System.Runtime.MD5Digest
///
/// The digest keeps no state between calls, so its values carry no data.
#[derive(Debug, Default)]
pub struct MD5DigestClass {
    table: MethodTable<DigestOp>,
    errors: ErrorEnum,
}

impl ClassHandler for MD5DigestClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "DigestErrors",
            &[("BadCount", "%(1) bytes were requested but the buffer holds %(2)")],
        )?;

        let hash = class.add_import(MD5_HASH_PATH)?;
        let void = Intrinsic::Void.id();
        let methods = [
            (MethodInfo::ctor(class.path()), DigestOp::Ctor),
            (
                MethodInfo::new("DigestBuf", void, Visibility::Public, MethodExt::Final)
                    .out_parm("ToFill", hash)
                    .in_parm("SrcBuf", Intrinsic::MemBuf.id())
                    .in_parm("ByteCount", Intrinsic::Card4.id()),
                DigestOp::DigestBuf,
            ),
            (
                MethodInfo::new("DigestStr", void, Visibility::Public, MethodExt::Final)
                    .out_parm("ToFill", hash)
                    .in_parm("SrcStr", Intrinsic::String.id()),
                DigestOp::DigestStr,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::new(EmptyVal))
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, _this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        let hash = match op {
            DigestOp::Ctor => return Ok(true),
            DigestOp::DigestBuf => {
                let count = engine.card4_at(first + 2)? as usize;
                let src = engine.membuf_at(first + 1)?;
                if count > src.len() {
                    return Err(self.errors.throw_fmt(engine, ERR_BAD_COUNT, &[&count, &src.len()]));
                }
                MD5HashVal::digest(&src[..count])
            }
            DigestOp::DigestStr => MD5HashVal::digest(engine.string_at(first + 1)?),
        };
        *engine.stack_at_as_mut::<MD5HashVal>(first)? = hash;
        Ok(true)
    }
}

/// Hash held by an MD5Hash value
///
/// # Errors
///
/// Returns `EngineError::ValueTypeMismatch` if `value` is not an MD5Hash.
pub fn hash_of(engine: &Engine, value: ValueId) -> EngineResult<MD5HashVal> {
    engine.value_as::<MD5HashVal>(value).copied()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cml_engine::intrinsics::{BooleanVal, Card4Val, MemBufVal, StringVal};

    fn setup() -> (Engine, ValueId, ValueId) {
        let mut engine = Engine::new(crate::registry().unwrap());
        let hash_id = engine.registry().find(MD5_HASH_PATH).unwrap();
        let digest_id = engine.registry().find("MEng.System.Runtime.MD5Digest").unwrap();
        let hash = engine.construct(hash_id, "hash").unwrap();
        let digest = engine.construct(digest_id, "digest").unwrap();
        (engine, hash, digest)
    }

    #[test]
    fn test_digest_str_known_value() {
        let (mut engine, hash, digest) = setup();
        let text = engine.construct(Intrinsic::String.id(), "text").unwrap();
        engine.value_as_mut::<StringVal>(text).unwrap().text = "test".into();

        engine.call_by_name(digest, "DigestStr", &[hash, text]).unwrap();
        let hex = engine.call_by_name(hash, "GetAsString", &[]).unwrap().unwrap();
        assert_eq!(
            engine.value_as::<StringVal>(hex).unwrap().text,
            "098F6BCD4621D373CADE4E832627B4F6"
        );
    }

    #[test]
    fn test_digest_buf_matches_digest_str() {
        let (mut engine, hash, digest) = setup();
        let buf = engine.construct(Intrinsic::MemBuf.id(), "buf").unwrap();
        engine.value_as_mut::<MemBufVal>(buf).unwrap().copy_in(b"testing");
        let count = engine.construct(Intrinsic::Card4.id(), "count").unwrap();
        engine.value_as_mut::<Card4Val>(count).unwrap().value = 4;

        engine.call_by_name(digest, "DigestBuf", &[hash, buf, count]).unwrap();
        assert_eq!(hash_of(&engine, hash).unwrap(), MD5HashVal::digest("test"));
    }

    #[test]
    fn test_digest_buf_bad_count() {
        let (mut engine, hash, digest) = setup();
        let buf = engine.construct(Intrinsic::MemBuf.id(), "buf").unwrap();
        let count = engine.construct(Intrinsic::Card4.id(), "count").unwrap();
        engine.value_as_mut::<Card4Val>(count).unwrap().value = 10;

        let err = engine.call_by_name(digest, "DigestBuf", &[hash, buf, count]).unwrap_err();
        let exc = err.exception().unwrap();
        assert_eq!(exc.error_name, "DigestErrors.BadCount");
        assert_eq!(exc.error_text, "10 bytes were requested but the buffer holds 0");
    }

    #[test]
    fn test_equal_reset_and_byte_count() {
        let (mut engine, hash, _) = setup();
        let other = engine.construct(engine.class_of(hash).unwrap(), "other").unwrap();
        *engine.value_as_mut::<MD5HashVal>(hash).unwrap() = MD5HashVal::digest("a");

        let equal = engine.call_by_name(hash, "Equal", &[other]).unwrap().unwrap();
        assert!(!engine.value_as::<BooleanVal>(equal).unwrap().value);

        engine.call_by_name(hash, "Reset", &[]).unwrap();
        let equal = engine.call_by_name(hash, "Equal", &[other]).unwrap().unwrap();
        assert!(engine.value_as::<BooleanVal>(equal).unwrap().value);

        let count = engine.call_by_name(hash, "GetByteCount", &[]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card4Val>(count).unwrap().value, 16);
    }

    #[test]
    fn test_copy_to_membuf_and_format_to() {
        let (mut engine, hash, _) = setup();
        *engine.value_as_mut::<MD5HashVal>(hash).unwrap() = MD5HashVal::digest("test");

        let buf = engine.construct(Intrinsic::MemBuf.id(), "buf").unwrap();
        let count = engine.call_by_name(hash, "CopyToMemBuf", &[buf]).unwrap().unwrap();
        assert_eq!(engine.value_as::<Card4Val>(count).unwrap().value, 16);
        assert_eq!(engine.value_as::<MemBufVal>(buf).unwrap().bytes()[..2], [0x09, 0x8F]);

        let target = engine.construct(Intrinsic::String.id(), "target").unwrap();
        engine.value_as_mut::<StringVal>(target).unwrap().text = "MD5=".into();
        engine.call_by_name(hash, "FormatTo", &[target]).unwrap();
        assert_eq!(
            engine.value_as::<StringVal>(target).unwrap().text,
            "MD5=098F6BCD4621D373CADE4E832627B4F6"
        );
    }

    #[test]
    fn test_hash_is_copyable() {
        let (mut engine, hash, _) = setup();
        let other = engine.construct(engine.class_of(hash).unwrap(), "other").unwrap();
        *engine.value_as_mut::<MD5HashVal>(other).unwrap() = MD5HashVal::digest("x");
        engine.copy_value(hash, other).unwrap();
        assert_eq!(hash_of(&engine, hash).unwrap(), MD5HashVal::digest("x"));
    }
}
