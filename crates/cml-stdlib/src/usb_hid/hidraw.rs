//! Linux hidraw backend
//!
//! Devices are found by scanning `<sys_root>/hidrawN/device/uevent` for a
//! `HID_ID=bus:vendor:product` line and opened as `<dev_root>/hidrawN`.
//! Reads and writes wait with `poll(2)` so a zero timeout never blocks.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::unix::fs::OpenOptionsExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use super::{HidBackend, HidDevice, HidError};

/// Default sysfs directory listing hidraw nodes
pub const SYS_ROOT: &str = "/sys/class/hidraw";

/// Default directory holding the device nodes
pub const DEV_ROOT: &str = "/dev";

/// Backend over the kernel's hidraw driver
#[derive(Debug, Clone)]
pub struct HidrawBackend {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl HidrawBackend {
    /// Backend over the system's sysfs and /dev
    pub fn new() -> Self {
        Self::with_roots(SYS_ROOT, DEV_ROOT)
    }

    /// Backend over other directories
    pub fn with_roots(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            dev_root: dev_root.into(),
        }
    }
}

impl Default for HidrawBackend {
    fn default() -> Self {
        Self::new()
    }
}

/// Vendor and product ids from a uevent file's `HID_ID` line
pub fn parse_hid_id(uevent: &str) -> Option<(u16, u16)> {
    let value = uevent.lines().find_map(|line| line.strip_prefix("HID_ID="))?;
    let mut parts = value.trim().split(':');
    let _bus = parts.next()?;
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((u16::try_from(vendor).ok()?, u16::try_from(product).ok()?))
}

impl HidBackend for HidrawBackend {
    fn find_device(&self, vendor_id: u16, product_id: u16) -> Result<Option<String>, HidError> {
        let entries = match fs::read_dir(&self.sys_root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        let mut names: Vec<_> = entries
            .filter_map(Result::ok)
            .map(|entry| entry.file_name())
            .collect();
        names.sort();

        for name in names {
            let uevent = self.sys_root.join(&name).join("device").join("uevent");
            let Ok(text) = fs::read_to_string(&uevent) else {
                continue;
            };
            if parse_hid_id(&text) == Some((vendor_id, product_id)) {
                let path = self.dev_root.join(&name);
                return Ok(Some(path.to_string_lossy().into_owned()));
            }
        }
        Ok(None)
    }

    fn open(&self, path: &str) -> Result<Box<dyn HidDevice>, HidError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .custom_flags(libc::O_NONBLOCK)
            .open(Path::new(path))?;
        Ok(Box::new(HidrawDevice { file }))
    }
}

/// One open hidraw node
#[derive(Debug)]
pub struct HidrawDevice {
    file: File,
}

/// Wait until `fd` is ready for `events`, or `deadline` passes
///
/// Signals interrupting the wait do not end it early.
fn wait_ready(fd: RawFd, events: libc::c_short, deadline: Instant) -> Result<bool, HidError> {
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let mut pfd = libc::pollfd {
            fd,
            events,
            revents: 0,
        };
        let millis = remaining.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
        // SAFETY: pfd is a valid pollfd that outlives the call, and nfds is 1
        let rc = unsafe { libc::poll(&mut pfd, 1, millis) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                continue;
            }
            return Err(err.into());
        }
        if pfd.revents & (libc::POLLERR | libc::POLLNVAL) != 0 {
            return Err(HidError::Disconnected);
        }
        return Ok(rc > 0);
    }
}

fn is_retry(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
}

impl HidDevice for HidrawDevice {
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, HidError> {
        let deadline = Instant::now() + timeout;
        let fd = self.file.as_raw_fd();
        let mut got = 0;
        while got < buf.len() {
            if !wait_ready(fd, libc::POLLIN, deadline)? {
                break;
            }
            match self.file.read(&mut buf[got..]) {
                Ok(0) => break,
                Ok(count) => got += count,
                Err(err) if is_retry(&err) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(got)
    }

    fn write(&mut self, buf: &[u8], timeout: Duration) -> Result<usize, HidError> {
        let deadline = Instant::now() + timeout;
        let fd = self.file.as_raw_fd();
        let mut sent = 0;
        while sent < buf.len() {
            if !wait_ready(fd, libc::POLLOUT, deadline)? {
                break;
            }
            match self.file.write(&buf[sent..]) {
                Ok(0) => break,
                Ok(count) => sent += count,
                Err(err) if is_retry(&err) => {
                    if Instant::now() >= deadline {
                        break;
                    }
                }
                Err(err) => return Err(err.into()),
            }
        }
        Ok(sent)
    }

    fn close(&mut self) -> Result<(), HidError> {
        self.file.flush()?;
        Ok(())
    }
}
