//! CML Runtime Classes
//!
//! Native bridge classes that expose host capabilities to macro code:
//! - **Base64**: encoding and decoding with line wrapping (`codec` module)
//! - **MD5Hash / MD5Digest**: message digests (`digest` module)
//! - **CryptoKey**: key material with constant-time comparison (`crypto_key` module)
//! - **StringTokenizer**: whitespace tokenizing and quoted list parsing (`string_tok` module)
//! - **USBHID**: raw HID device access (`usb_hid` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use cml_engine::{ClassRegistry, Engine};
//!
//! let mut builder = ClassRegistry::builder();
//! cml_stdlib::register_all(&mut builder)?;
//! let mut engine = Engine::new(builder.build()?);
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;

use cml_engine::{ClassExt, ClassId, ClassInfo, ClassRegistry, EngineResult, Intrinsic, RegistryBuilder};

// ============================================================================
// Modules
// ============================================================================

/// MEng.System.Runtime.Base64
pub mod codec;

/// MEng.System.Runtime.CryptoKey
pub mod crypto_key;

/// MEng.System.Runtime.MD5Hash and MD5Digest
pub mod digest;

/// MEng.System.Runtime.StringTokenizer
pub mod string_tok;

/// MEng.System.Runtime.USBHID
pub mod usb_hid;

pub use codec::{Base64Class, Base64Val};
pub use crypto_key::{CryptoKeyClass, CryptoKeyVal};
pub use digest::{MD5DigestClass, MD5HashClass, MD5HashVal};
pub use string_tok::{StringTokClass, StringTokVal};
pub use usb_hid::{HidBackend, HidError, NullBackend, USBHIDClass, USBHIDVal};

#[cfg(target_os = "linux")]
pub use usb_hid::HidrawBackend;

/// Scope every runtime class lives in
pub const RUNTIME_SCOPE: &str = "MEng.System.Runtime";

// ============================================================================
// Registration
// ============================================================================

/// Declare `MEng.System.Runtime.Base64`
///
/// # Errors
///
/// Returns `EngineError::DupClass` if it is already declared.
pub fn register_base64(builder: &mut RegistryBuilder) -> EngineResult<ClassId> {
    builder.add_class(
        ClassInfo::new("Base64", RUNTIME_SCOPE, Intrinsic::Object.path()).with_ext(ClassExt::Final),
        Box::<Base64Class>::default(),
    )
}

/// Declare `MD5Hash` and `MD5Digest`, returning their ids
///
/// # Errors
///
/// Returns `EngineError::DupClass` if either is already declared.
pub fn register_md5(builder: &mut RegistryBuilder) -> EngineResult<(ClassId, ClassId)> {
    let hash = builder.add_class(
        ClassInfo::new("MD5Hash", RUNTIME_SCOPE, Intrinsic::Formattable.path())
            .with_ext(ClassExt::Final)
            .with_copyable(true),
        Box::<MD5HashClass>::default(),
    )?;
    let digest = builder.add_class(
        ClassInfo::new("MD5Digest", RUNTIME_SCOPE, Intrinsic::Object.path()).with_ext(ClassExt::Final),
        Box::<MD5DigestClass>::default(),
    )?;
    Ok((hash, digest))
}

/// Declare `MEng.System.Runtime.CryptoKey`; `MD5Hash` must come first
///
/// # Errors
///
/// Returns `EngineError::DupClass` if it is already declared.
pub fn register_crypto_key(builder: &mut RegistryBuilder) -> EngineResult<ClassId> {
    builder.add_class(
        ClassInfo::new("CryptoKey", RUNTIME_SCOPE, Intrinsic::Object.path())
            .with_ext(ClassExt::Final)
            .with_copyable(true),
        Box::<CryptoKeyClass>::default(),
    )
}

/// Declare `MEng.System.Runtime.StringTokenizer`
///
/// # Errors
///
/// Returns `EngineError::DupClass` if it is already declared.
pub fn register_string_tok(builder: &mut RegistryBuilder) -> EngineResult<ClassId> {
    builder.add_class(
        ClassInfo::new("StringTokenizer", RUNTIME_SCOPE, Intrinsic::Object.path()).with_ext(ClassExt::Final),
        Box::<StringTokClass>::default(),
    )
}

/// Declare `MEng.System.Runtime.USBHID` over the platform's HID backend
///
/// # Errors
///
/// Returns `EngineError::DupClass` if it is already declared.
pub fn register_usb_hid(builder: &mut RegistryBuilder) -> EngineResult<ClassId> {
    register_usb_hid_with(builder, usb_hid::default_backend())
}

/// Declare `MEng.System.Runtime.USBHID` over a given backend
///
/// # Errors
///
/// Returns `EngineError::DupClass` if it is already declared.
pub fn register_usb_hid_with(builder: &mut RegistryBuilder, backend: Arc<dyn HidBackend>) -> EngineResult<ClassId> {
    builder.add_class(
        ClassInfo::new("USBHID", RUNTIME_SCOPE, Intrinsic::Object.path()).with_ext(ClassExt::Final),
        Box::new(USBHIDClass::new(backend)),
    )
}

/// Declare every runtime class, in dependency order
///
/// # Errors
///
/// Returns `EngineError::DupClass` if any of them is already declared.
pub fn register_all(builder: &mut RegistryBuilder) -> EngineResult<()> {
    register_base64(builder)?;
    register_md5(builder)?;
    register_crypto_key(builder)?;
    register_string_tok(builder)?;
    register_usb_hid(builder)?;
    Ok(())
}

/// Registry holding the intrinsics and every runtime class
///
/// # Errors
///
/// Registration or initialisation failures.
pub fn registry() -> EngineResult<Arc<ClassRegistry>> {
    let mut builder = ClassRegistry::builder();
    register_all(&mut builder)?;
    builder.build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cml_engine::{Engine, EngineError};

    #[test]
    fn test_register_all_paths() {
        let registry = registry().unwrap();
        for name in ["Base64", "MD5Hash", "MD5Digest", "CryptoKey", "StringTokenizer", "USBHID"] {
            let path = format!("{}.{}", RUNTIME_SCOPE, name);
            assert!(registry.find(&path).is_some(), "{} not registered", path);
        }
        assert!(registry.find("MEng.System.Runtime.StringTokenizer.ParmStrList").is_some());
        assert!(registry.find("MEng.System.Runtime.Base64.Base64Errors").is_some());
    }

    #[test]
    fn test_register_twice_is_dup() {
        let mut builder = ClassRegistry::builder();
        register_base64(&mut builder).unwrap();
        assert!(matches!(register_base64(&mut builder), Err(EngineError::DupClass(_))));
    }

    #[test]
    fn test_every_runtime_class_constructs() {
        let registry = registry().unwrap();
        let mut engine = Engine::new(Arc::clone(&registry));
        for name in ["Base64", "MD5Hash", "MD5Digest", "CryptoKey", "StringTokenizer", "USBHID"] {
            let id = registry.find(&format!("{}.{}", RUNTIME_SCOPE, name)).unwrap();
            let value = engine.construct(id, "instance").unwrap();
            assert_eq!(engine.class_of(value).unwrap(), id);
            engine.free_value(value).unwrap();
        }
    }
}
