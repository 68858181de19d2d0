//! Driver operations.
//!
//! A published device is bound to something implementing [`DeviceDriver`].
//! Modern drivers implement the trait directly; old-style hook tables go
//! through [`LegacyDriver`], which forwards to the individual hook functions.
//!
//! Every method here may block on hardware. Devfs never calls them while
//! holding its namespace lock.

mod legacy;
mod scheduler;

pub use legacy::{DeviceHooks, LegacyDriver};
pub use scheduler::{
    IoBuffer, IoRequest, IoScheduler, SchedulerFactory, SerialScheduler, SerialSchedulerFactory,
};

use std::fmt;
use std::sync::Arc;

use devfs_types::{OpenFlags, SelectEvent};

use crate::error::{DevfsError, DevfsResult};

/// Opaque per-open state handed out by a driver's `open`.
#[derive(Clone, Copy, Hash, Eq, PartialEq)]
pub struct DeviceCookie(u64);

impl DeviceCookie {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for DeviceCookie {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DeviceCookie({:#x})", self.0)
    }
}

/// Wakes up a thread blocked in `select`.
///
/// Drivers keep a clone of the `Arc` they were handed in
/// [`DeviceDriver::select`] and call [`notify`](Self::notify) once the event
/// is ready.
pub trait SelectSync: Send + Sync {
    fn notify(&self, event: SelectEvent);
}

/// Operations a device driver provides.
///
/// `open`, `close`, `read` and `write` are mandatory. The rest have
/// defaults describing a driver that does not support them.
pub trait DeviceDriver: Send + Sync {
    /// Open the device published at `path` (relative to the devfs root).
    fn open(&self, path: &str, flags: OpenFlags) -> DevfsResult<DeviceCookie>;

    /// Close an open cookie. Outstanding I/O may still complete afterwards.
    fn close(&self, cookie: DeviceCookie) -> DevfsResult<()>;

    /// Release everything associated with a closed cookie.
    fn free(&self, _cookie: DeviceCookie) -> DevfsResult<()> {
        Ok(())
    }

    /// Read into `buf` at byte position `pos`; returns bytes transferred.
    fn read(&self, cookie: DeviceCookie, pos: i64, buf: &mut [u8]) -> DevfsResult<usize>;

    /// Write `buf` at byte position `pos`; returns bytes transferred.
    fn write(&self, cookie: DeviceCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize>;

    /// Device control. `buf` is the in/out argument block of `op`.
    fn control(&self, _cookie: DeviceCookie, op: u32, _buf: &mut [u8]) -> DevfsResult<()> {
        Err(DevfsError::not_supported(format!("control op {op}")))
    }

    /// Whether [`select`](Self::select) is implemented.
    fn supports_select(&self) -> bool {
        false
    }

    fn select(
        &self,
        _cookie: DeviceCookie,
        _event: SelectEvent,
        _sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        Err(DevfsError::not_supported("select"))
    }

    fn deselect(
        &self,
        _cookie: DeviceCookie,
        _event: SelectEvent,
        _sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        Ok(())
    }

    /// Whether the page I/O entry points are implemented.
    fn supports_pages(&self) -> bool {
        false
    }

    /// Scatter read starting at `pos`; fills `vecs` in order.
    fn read_pages(
        &self,
        _cookie: DeviceCookie,
        _pos: i64,
        _vecs: &mut [&mut [u8]],
    ) -> DevfsResult<usize> {
        Err(DevfsError::not_supported("read_pages"))
    }

    /// Gather write starting at `pos`; drains `vecs` in order.
    fn write_pages(&self, _cookie: DeviceCookie, _pos: i64, _vecs: &[&[u8]]) -> DevfsResult<usize> {
        Err(DevfsError::not_supported("write_pages"))
    }
}
