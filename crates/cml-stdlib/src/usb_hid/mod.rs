//! Raw USB HID device access
//!
//! The class talks to devices through a [`HidBackend`], chosen when the
//! class is registered. Every blocking call takes a millisecond timeout and a
//! zero timeout never blocks.

#[cfg(target_os = "linux")]
mod hidraw;

#[cfg(target_os = "linux")]
pub use hidraw::{parse_hid_id, HidrawBackend, HidrawDevice};

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use cml_engine::value::DbgFormat;
use cml_engine::{
    impl_as_any, ClassBuilder, ClassHandler, ClassInfo, Engine, EngineResult, ErrorEnum, Intrinsic, MacroValue,
    MethodExt, MethodInfo, MethodTable, ValueId, Visibility,
};

// ============================================================================
// Backend
// ============================================================================

/// Native HID failures
#[derive(Debug, Error)]
pub enum HidError {
    /// OS level failure
    #[error("{0}")]
    Io(#[from] std::io::Error),

    /// The device went away or reported an error state
    #[error("The device reported an error or was disconnected")]
    Disconnected,

    /// No HID support on this platform
    #[error("USB HID devices are not supported on this platform")]
    Unsupported,
}

/// One open device
pub trait HidDevice: Send + fmt::Debug {
    /// Read up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// OS failures; a timeout is a short count, not an error.
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, HidError>;

    /// Write up to `buf.len()` bytes, waiting at most `timeout`
    ///
    /// # Errors
    ///
    /// OS failures; a timeout is a short count, not an error.
    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, HidError>;

    /// Flush and release the device
    ///
    /// # Errors
    ///
    /// OS failures while flushing.
    fn close(&mut self) -> Result<(), HidError>;
}

/// Device discovery and opening
pub trait HidBackend: Send + Sync + fmt::Debug {
    /// Path of the first device with these ids
    ///
    /// # Errors
    ///
    /// OS failures while scanning; a missing device is `Ok(None)`.
    fn find_device(&self, vendor_id: u16, product_id: u16) -> Result<Option<String>, HidError>;

    /// Open the device at `path`
    ///
    /// # Errors
    ///
    /// OS failures, or `HidError::Unsupported`.
    fn open(&self, path: &str) -> Result<Box<dyn HidDevice>, HidError>;
}

/// Backend that finds no devices
#[derive(Debug, Default, Clone, Copy)]
pub struct NullBackend;

impl HidBackend for NullBackend {
    fn find_device(&self, _vendor_id: u16, _product_id: u16) -> Result<Option<String>, HidError> {
        Ok(None)
    }

    fn open(&self, _path: &str) -> Result<Box<dyn HidDevice>, HidError> {
        Err(HidError::Unsupported)
    }
}

/// The platform's backend
pub fn default_backend() -> Arc<dyn HidBackend> {
    #[cfg(target_os = "linux")]
    {
        Arc::new(HidrawBackend::new())
    }
    #[cfg(not(target_os = "linux"))]
    {
        Arc::new(NullBackend)
    }
}

// ============================================================================
// Value
// ============================================================================

/// Device handle; closed on drop
#[derive(Debug, Default)]
pub struct USBHIDVal {
    device: Option<Box<dyn HidDevice>>,
    vendor_id: u16,
    product_id: u16,
}

impl USBHIDVal {
    /// True while a device is open
    #[inline]
    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    /// Ids of the open device
    pub fn ids(&self) -> Option<(u16, u16)> {
        self.is_open().then_some((self.vendor_id, self.product_id))
    }

    /// Close the device if open
    ///
    /// # Errors
    ///
    /// The device's flush failure; the device is released either way.
    pub fn close(&mut self) -> Result<(), HidError> {
        match self.device.take() {
            Some(mut device) => {
                tracing::debug!(
                    target: "cml::usb_hid",
                    vendor = self.vendor_id,
                    product = self.product_id,
                    "closing device"
                );
                device.close()
            }
            None => Ok(()),
        }
    }
}

impl Drop for USBHIDVal {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            tracing::warn!(target: "cml::usb_hid", error = %err, "device close failed on drop");
        }
    }
}

impl MacroValue for USBHIDVal {
    impl_as_any!();

    fn dbg_format(&self, fmt: DbgFormat) -> String {
        match (fmt, self.is_open()) {
            (DbgFormat::Short, true) => "[Device is open]".to_string(),
            (DbgFormat::Short, false) => "[Device is closed]".to_string(),
            (DbgFormat::Long, true) => format!(
                "Vendor Id = 0x{:04X}\nProduct Id = 0x{:04X}",
                self.vendor_id, self.product_id
            ),
            (DbgFormat::Long, false) => String::new(),
        }
    }
}

// ============================================================================
// Handler
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HidOp {
    Ctor,
    Close,
    FindDevice,
    Open,
    Read,
    Write,
}

const ERR_CLOSE_FAILED: u32 = 0;
const ERR_DEV_NOT_FOUND: u32 = 1;
const ERR_OPEN_FAILED: u32 = 2;
const ERR_READ_FAILED: u32 = 3;
const ERR_WRITE_FAILED: u32 = 4;

const NOT_OPEN: &str = "The device is not open";

/// Largest single read handed to the device
const READ_CHUNK: usize = 4096;

/// Handler of MEng.System.Runtime.USBHID
#[derive(Debug)]
pub struct USBHIDClass {
    backend: Arc<dyn HidBackend>,
    table: MethodTable<HidOp>,
    errors: ErrorEnum,
}

impl USBHIDClass {
    /// Handler over `backend`
    pub fn new(backend: Arc<dyn HidBackend>) -> Self {
        Self {
            backend,
            table: MethodTable::new(),
            errors: ErrorEnum::default(),
        }
    }

    fn find(&self, vendor_id: u16, product_id: u16) -> Option<String> {
        match self.backend.find_device(vendor_id, product_id) {
            Ok(path) => path,
            Err(err) => {
                tracing::debug!(
                    target: "cml::usb_hid",
                    vendor = vendor_id,
                    product = product_id,
                    error = %err,
                    "device scan failed"
                );
                None
            }
        }
    }

    fn throw_text(&self, engine: &Engine, ordinal: u32, text: &dyn fmt::Display) -> cml_engine::EngineError {
        self.errors.throw_fmt(engine, ordinal, &[text])
    }

    fn open(&self, engine: &mut Engine, this: ValueId, vendor_id: u16, product_id: u16) -> EngineResult<()> {
        let Some(path) = self.find(vendor_id, product_id) else {
            return Err(self.errors.throw_fmt(engine, ERR_DEV_NOT_FOUND, &[&vendor_id, &product_id]));
        };

        let device = self
            .backend
            .open(&path)
            .map_err(|err| self.throw_text(engine, ERR_OPEN_FAILED, &err))?;
        tracing::debug!(target: "cml::usb_hid", %path, vendor = vendor_id, product = product_id, "opened device");

        let val = engine.value_as_mut::<USBHIDVal>(this)?;
        if let Err(err) = val.close() {
            tracing::warn!(target: "cml::usb_hid", error = %err, "closing previous device failed");
        }
        val.device = Some(device);
        val.vendor_id = vendor_id;
        val.product_id = product_id;
        Ok(())
    }

    fn read(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let first = engine.first_parm_index(method)?;
        let count = engine.card4_at(first + 1)? as usize;
        let wait = Duration::from_millis(u64::from(engine.card4_at(first + 2)?));
        let throw_if_not = engine.bool_at(first + 3)?;

        if !engine.value_as::<USBHIDVal>(this)?.is_open() {
            if throw_if_not {
                return Err(self.throw_text(engine, ERR_READ_FAILED, &NOT_OPEN));
            }
            return Ok(false);
        }

        // The buffer only grows as data arrives
        let deadline = Instant::now() + wait;
        let mut chunk = vec![0u8; count.min(READ_CHUNK)];
        let mut got = 0;
        while got < count {
            let want = (count - got).min(READ_CHUNK);
            let remaining = deadline.saturating_duration_since(Instant::now());
            let result = match engine.value_as_mut::<USBHIDVal>(this)?.device.as_mut() {
                Some(device) => device.read(&mut chunk[..want], remaining),
                None => Ok(0),
            };
            let read = result.map_err(|err| self.throw_text(engine, ERR_READ_FAILED, &err))?;
            let target = engine.membuf_at_mut(first)?;
            target.ensure(got + read);
            target.bytes_mut()[got..got + read].copy_from_slice(&chunk[..read]);
            got += read;
            if read < want {
                break;
            }
        }
        tracing::trace!(target: "cml::usb_hid", requested = count, got, "read");

        if got < count && throw_if_not {
            let text = format!("Timed out with {} of {} bytes read", got, count);
            return Err(self.throw_text(engine, ERR_READ_FAILED, &text));
        }
        Ok(got == count)
    }

    fn write(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<()> {
        let first = engine.first_parm_index(method)?;
        let count = engine.card4_at(first + 1)? as usize;
        let wait = Duration::from_millis(u64::from(engine.card4_at(first + 2)?));
        let src = engine.membuf_at(first)?;
        if count > src.len() {
            let text = format!("{} bytes were requested but the buffer holds {}", count, src.len());
            return Err(self.throw_text(engine, ERR_WRITE_FAILED, &text));
        }
        let bytes = src[..count].to_vec();

        if !engine.value_as::<USBHIDVal>(this)?.is_open() {
            return Err(self.throw_text(engine, ERR_WRITE_FAILED, &NOT_OPEN));
        }
        let result = match engine.value_as_mut::<USBHIDVal>(this)?.device.as_mut() {
            Some(device) => device.write(&bytes, wait),
            None => Ok(0),
        };
        let sent = result.map_err(|err| self.throw_text(engine, ERR_WRITE_FAILED, &err))?;
        tracing::trace!(target: "cml::usb_hid", requested = count, sent, "write");
        if sent < count {
            let text = format!("Timed out with {} of {} bytes written", sent, count);
            return Err(self.throw_text(engine, ERR_WRITE_FAILED, &text));
        }
        Ok(())
    }
}

impl Default for USBHIDClass {
    fn default() -> Self {
        Self::new(default_backend())
    }
}

impl ClassHandler for USBHIDClass {
    fn init(&mut self, class: &mut ClassBuilder<'_>) -> EngineResult<()> {
        self.errors = class.add_error_enum(
            "USBHIDErrors",
            &[
                ("CloseFailed", "%(1)"),
                ("DevNotFound", "No device with ids %(1)/%(2) was found"),
                ("OpenFailed", "%(1)"),
                ("ReadFailed", "%(1)"),
                ("WriteFailed", "%(1)"),
            ],
        )?;

        let boolean = Intrinsic::Boolean.id();
        let card2 = Intrinsic::Card2.id();
        let card4 = Intrinsic::Card4.id();
        let membuf = Intrinsic::MemBuf.id();
        let void = Intrinsic::Void.id();
        let methods = [
            (MethodInfo::ctor(class.path()), HidOp::Ctor),
            (MethodInfo::new("Close", void, Visibility::Public, MethodExt::Final), HidOp::Close),
            (
                MethodInfo::new("FindDevice", boolean, Visibility::Public, MethodExt::Final)
                    .with_const()
                    .in_parm("VendorId", card2)
                    .in_parm("ProductId", card2)
                    .out_parm("DevPath", Intrinsic::String.id()),
                HidOp::FindDevice,
            ),
            (
                MethodInfo::new("Open", void, Visibility::Public, MethodExt::Final)
                    .in_parm("VendorId", card2)
                    .in_parm("ProductId", card2),
                HidOp::Open,
            ),
            (
                MethodInfo::new("Read", boolean, Visibility::Public, MethodExt::Final)
                    .out_parm("ToFill", membuf)
                    .in_parm("ToRead", card4)
                    .in_parm("WaitFor", card4)
                    .in_parm("ThrowIfNot", boolean),
                HidOp::Read,
            ),
            (
                MethodInfo::new("Write", void, Visibility::Public, MethodExt::Final)
                    .in_parm("ToWrite", membuf)
                    .in_parm("ToSend", card4)
                    .in_parm("WaitFor", card4),
                HidOp::Write,
            ),
        ];
        for (method, op) in methods {
            let id = class.add_method(method)?;
            self.table.bind(id, op);
        }
        Ok(())
    }

    fn make_storage(&self, _info: &ClassInfo) -> EngineResult<Box<dyn MacroValue>> {
        Ok(Box::<USBHIDVal>::default())
    }

    fn invoke(&self, engine: &mut Engine, method: &MethodInfo, this: ValueId) -> EngineResult<bool> {
        let Some(op) = self.table.lookup(method.id) else {
            return Ok(false);
        };
        let first = engine.first_parm_index(method)?;
        match op {
            HidOp::Ctor | HidOp::Close => {
                let closed = engine.value_as_mut::<USBHIDVal>(this)?.close();
                closed.map_err(|err| self.throw_text(engine, ERR_CLOSE_FAILED, &err))?;
            }
            HidOp::FindDevice => {
                let vendor_id = engine.card2_at(first)?;
                let product_id = engine.card2_at(first + 1)?;
                let path = self.find(vendor_id, product_id);
                let found = path.is_some();
                engine.set_string_at(first + 2, path.unwrap_or_default())?;
                engine.set_bool_at(engine.return_index(method)?, found)?;
            }
            HidOp::Open => {
                let vendor_id = engine.card2_at(first)?;
                let product_id = engine.card2_at(first + 1)?;
                self.open(engine, this, vendor_id, product_id)?;
            }
            HidOp::Read => {
                let done = self.read(engine, method, this)?;
                engine.set_bool_at(engine.return_index(method)?, done)?;
            }
            HidOp::Write => self.write(engine, method, this)?,
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_finds_nothing() {
        assert_eq!(NullBackend.find_device(0x046D, 0xC52B).unwrap(), None);
        assert!(matches!(NullBackend.open("/dev/hidraw0"), Err(HidError::Unsupported)));
    }

    #[test]
    fn test_closed_dbg_format() {
        let val = USBHIDVal::default();
        assert_eq!(val.dbg_format(DbgFormat::Short), "[Device is closed]");
        assert_eq!(val.dbg_format(DbgFormat::Long), "");
        assert_eq!(val.ids(), None);
    }

    #[test]
    fn test_open_dbg_format() {
        #[derive(Debug)]
        struct Stub;

        impl HidDevice for Stub {
            fn read(&mut self, _buf: &mut [u8], _timeout: Duration) -> Result<usize, HidError> {
                Ok(0)
            }

            fn write(&mut self, buf: &[u8], _timeout: Duration) -> Result<usize, HidError> {
                Ok(buf.len())
            }

            fn close(&mut self) -> Result<(), HidError> {
                Ok(())
            }
        }

        let val = USBHIDVal {
            device: Some(Box::new(Stub)),
            vendor_id: 0x46D,
            product_id: 0xC52B,
        };
        assert_eq!(val.dbg_format(DbgFormat::Short), "[Device is open]");
        assert_eq!(val.dbg_format(DbgFormat::Long), "Vendor Id = 0x046D\nProduct Id = 0xC52B");
        assert_eq!(val.ids(), Some((0x46D, 0xC52B)));
    }
}
