//! Base64 encoding and decoding
//!
//! Encoded output is wrapped at the value's line width with `\n`
//! separators. Decoding skips every whitespace character, so wrapped and
//! unwrapped text decode the same.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use cml_engine::value::DbgFormat;
use cml_engine::{
    impl_as_any, ClassBuilder, ClassHandler, ClassInfo, Engine, EngineResult, ErrorEnum, Intrinsic, MacroValue,
    MethodExt, MethodInfo, MethodTable, ValueId, Visibility,
};

/// Line width used by new values
pub const DEFAULT_LINE_WIDTH: u32 = 76;

const ERR_DECODE: u32 = 0;
const ERR_ENCODE: u32 = 1;

/// Encode `bytes`, breaking lines every `line_width` characters
///
/// A width of zero disables wrapping.
pub fn encode(bytes: &[u8], line_width: u32) -> String {
    let flat = STANDARD.encode(bytes);
    if line_width == 0 || flat.len() <= line_width as usize {
        return flat;
    }
    // base64 output is ASCII, so byte chunks are char boundaries
    flat.as_bytes()
        .chunks(line_width as usize)
        .map(|line| String::from_utf8_lossy(line).into_owned())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Decode `text`, ignoring whitespace
///
/// # Errors
///
/// Returns the codec's error for invalid characters or padding.
pub fn decode(text: &str) -> Result<Vec<u8>, base64::DecodeError> {
    let compact: String = text.chars().filter(|ch| !ch.is_whitespace()).collect();
    STANDARD.decode(compact)
}

/// Per-instance codec settings
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Base64Val {
    /// Maximum encoded line length, 0 for no wrapping
    pub line_width: u32,
}

impl Default for Base64Val {
    fn default() -> Self {
        Self {
            line_width: DEFAULT_LINE_WIDTH,
        }
    }
}

impl MacroValue for Base64Val {
    impl_as_any!();

    fn dbg_format(&self, _fmt: DbgFormat) -> String {
        format!("Line Width = {}", self.line_width)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Base64Op {
    Ctor,
    GetLineWidth,
    SetLineWidth,
    EncodeBuf,
    EncodeStr,
    DecodeToBuf,
    DecodeToStr,
}

/// Handler of MEng.System.Runtime.Base64
#[derive(Debug, Default)]
pub struct Base64Class {
    table: MethodTable<Base64Op>,
    errors: ErrorEnum,
}

impl Base64Class {
    fn decode_at(&self, engine: &Engine, index: usize) -> EngineResult<Vec<u8>> {
        decode(engine.string_at(index)?).map_err(|err| self.errors.throw_fmt(engine, ERR_DECODE, &[&err]))
    }
}

impl ClassHandler for Base64Class {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum("Base64Errors", &[("Decode", "%(1)"), ("Encode", "%(1)")])?;

        let card4 = Intrinsic::Card4.id();
        let string = Intrinsic::String.id();
        let membuf = Intrinsic::MemBuf.id();
        let void = Intrinsic::Void.id();
        let methods = [
            (MethodInfo::ctor(class.path()), Base64Op::Ctor),
            (
                MethodInfo::new("GetLineWidth", card4, Visibility::Public, MethodExt::Final).with_const(),
                Base64Op::GetLineWidth,
            ),
            (
                MethodInfo::new("SetLineWidth", void, Visibility::Public, MethodExt::Final).in_parm("ToSet", card4),
                Base64Op::SetLineWidth,
            ),
            (
                MethodInfo::new("EncodeBuf", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcBuf", membuf)
                    .in_parm("SrcBytes", card4)
                    .out_parm("ToFill", string),
                Base64Op::EncodeBuf,
            ),
            (
                MethodInfo::new("EncodeStr", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcStr", string)
                    .out_parm("ToFill", string),
                Base64Op::EncodeStr,
            ),
            (
                MethodInfo::new("DecodeToBuf", card4, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcStr", string)
                    .out_parm("ToFill", membuf),
                Base64Op::DecodeToBuf,
            ),
            (
                MethodInfo::new("DecodeToStr", void, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("SrcStr", string)
                    .out_parm("ToFill", string),
                Base64Op::DecodeToStr,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<Base64Val>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            Base64Op::Ctor => *engine.value_as_mut::<Base64Val>(this)? = Base64Val::default(),
            Base64Op::GetLineWidth => {
                let width = engine.value_as::<Base64Val>(this)?.line_width;
                engine.set_card4_at(engine.return_index(method)?, width)?;
            }
            Base64Op::SetLineWidth => {
                let width = engine.card4_at(first)?;
                engine.value_as_mut::<Base64Val>(this)?.line_width = width;
            }
            Base64Op::EncodeBuf => {
                let count = engine.card4_at(first + 1)? as usize;
                let src = engine.membuf_at(first)?;
                if count > src.len() {
                    let text = format!("{} bytes were requested but the buffer holds {}", count, src.len());
                    return Err(self.errors.throw_fmt(engine, ERR_ENCODE, &[&text]));
                }
                let width = engine.value_as::<Base64Val>(this)?.line_width;
                let encoded = encode(&src[..count], width);
                engine.set_string_at(first + 2, encoded)?;
            }
            Base64Op::EncodeStr => {
                let width = engine.value_as::<Base64Val>(this)?.line_width;
                let encoded = encode(engine.string_at(first)?.as_bytes(), width);
                engine.set_string_at(first + 1, encoded)?;
            }
            Base64Op::DecodeToBuf => {
                let bytes = self.decode_at(engine, first)?;
                let target = engine.membuf_at_mut(first + 1)?;
                target.reallocate(0);
                target.copy_in(&bytes);
                engine.set_card4_at(engine.return_index(method)?, bytes.len() as u32)?;
            }
            Base64Op::DecodeToStr => {
                let bytes = self.decode_at(engine, first)?;
                let text = String::from_utf8(bytes).map_err(|err| self.errors.throw_fmt(engine, ERR_DECODE, &[&err]))?;
                engine.set_string_at(first + 1, text)?;
            }
        }
        Ok(true)
    }
}
