//! Old-style hook tables adapted to [`DeviceDriver`].

use std::fmt;
use std::sync::Arc;

use devfs_types::{OpenFlags, SelectEvent};

use super::{DeviceCookie, DeviceDriver, SelectSync};
use crate::error::{DevfsError, DevfsResult};

type OpenHook = Arc<dyn Fn(&str, OpenFlags) -> DevfsResult<DeviceCookie> + Send + Sync>;
type CookieHook = Arc<dyn Fn(DeviceCookie) -> DevfsResult<()> + Send + Sync>;
type ReadHook = Arc<dyn Fn(DeviceCookie, i64, &mut [u8]) -> DevfsResult<usize> + Send + Sync>;
type WriteHook = Arc<dyn Fn(DeviceCookie, i64, &[u8]) -> DevfsResult<usize> + Send + Sync>;
type ControlHook = Arc<dyn Fn(DeviceCookie, u32, &mut [u8]) -> DevfsResult<()> + Send + Sync>;
type SelectHook =
    Arc<dyn Fn(DeviceCookie, SelectEvent, &Arc<dyn SelectSync>) -> DevfsResult<()> + Send + Sync>;

/// A driver's hook table: one optional function per operation.
///
/// ```ignore
/// let hooks = DeviceHooks::new()
///     .with_open(|_path, _flags| Ok(DeviceCookie::new(1)))
///     .with_close(|_| Ok(()))
///     .with_read(|_, _, buf| { buf.fill(0); Ok(buf.len()) })
///     .with_write(|_, _, buf| Ok(buf.len()));
/// devfs.publish_device("misc/zero", hooks)?;
/// ```
#[derive(Clone, Default)]
pub struct DeviceHooks {
    open: Option<OpenHook>,
    close: Option<CookieHook>,
    free: Option<CookieHook>,
    read: Option<ReadHook>,
    write: Option<WriteHook>,
    control: Option<ControlHook>,
    select: Option<SelectHook>,
    deselect: Option<SelectHook>,
}

impl DeviceHooks {
    /// An empty hook table.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_open<F>(mut self, f: F) -> Self
    where
        F: Fn(&str, OpenFlags) -> DevfsResult<DeviceCookie> + Send + Sync + 'static,
    {
        self.open = Some(Arc::new(f));
        self
    }

    pub fn with_close<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie) -> DevfsResult<()> + Send + Sync + 'static,
    {
        self.close = Some(Arc::new(f));
        self
    }

    pub fn with_free<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie) -> DevfsResult<()> + Send + Sync + 'static,
    {
        self.free = Some(Arc::new(f));
        self
    }

    pub fn with_read<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie, i64, &mut [u8]) -> DevfsResult<usize> + Send + Sync + 'static,
    {
        self.read = Some(Arc::new(f));
        self
    }

    pub fn with_write<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie, i64, &[u8]) -> DevfsResult<usize> + Send + Sync + 'static,
    {
        self.write = Some(Arc::new(f));
        self
    }

    pub fn with_control<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie, u32, &mut [u8]) -> DevfsResult<()> + Send + Sync + 'static,
    {
        self.control = Some(Arc::new(f));
        self
    }

    pub fn with_select<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie, SelectEvent, &Arc<dyn SelectSync>) -> DevfsResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.select = Some(Arc::new(f));
        self
    }

    pub fn with_deselect<F>(mut self, f: F) -> Self
    where
        F: Fn(DeviceCookie, SelectEvent, &Arc<dyn SelectSync>) -> DevfsResult<()>
            + Send
            + Sync
            + 'static,
    {
        self.deselect = Some(Arc::new(f));
        self
    }
}

impl fmt::Debug for DeviceHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceHooks")
            .field("open", &self.open.is_some())
            .field("close", &self.close.is_some())
            .field("free", &self.free.is_some())
            .field("read", &self.read.is_some())
            .field("write", &self.write.is_some())
            .field("control", &self.control.is_some())
            .field("select", &self.select.is_some())
            .field("deselect", &self.deselect.is_some())
            .finish()
    }
}

/// [`DeviceDriver`] implemented by forwarding to a [`DeviceHooks`] table.
///
/// Hook tables predate page I/O, so legacy drivers never support it.
pub struct LegacyDriver {
    open: OpenHook,
    close: CookieHook,
    free: Option<CookieHook>,
    read: ReadHook,
    write: WriteHook,
    control: Option<ControlHook>,
    select: Option<SelectHook>,
    deselect: Option<SelectHook>,
}

impl LegacyDriver {
    /// Adapt a hook table. Fails with `BadValue` unless open, close, read
    /// and write are all present.
    pub fn new(hooks: DeviceHooks) -> DevfsResult<Self> {
        let DeviceHooks {
            open,
            close,
            free,
            read,
            write,
            control,
            select,
            deselect,
        } = hooks;

        match (open, close, read, write) {
            (Some(open), Some(close), Some(read), Some(write)) => Ok(Self {
                open,
                close,
                free,
                read,
                write,
                control,
                select,
                deselect,
            }),
            _ => Err(DevfsError::bad_value(
                "device hooks need open, close, read and write",
            )),
        }
    }
}

impl fmt::Debug for LegacyDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LegacyDriver")
            .field("control", &self.control.is_some())
            .field("select", &self.select.is_some())
            .finish_non_exhaustive()
    }
}

impl DeviceDriver for LegacyDriver {
    fn open(&self, path: &str, flags: OpenFlags) -> DevfsResult<DeviceCookie> {
        (self.open)(path, flags)
    }

    fn close(&self, cookie: DeviceCookie) -> DevfsResult<()> {
        (self.close)(cookie)
    }

    fn free(&self, cookie: DeviceCookie) -> DevfsResult<()> {
        match &self.free {
            Some(free) => free(cookie),
            None => Ok(()),
        }
    }

    fn read(&self, cookie: DeviceCookie, pos: i64, buf: &mut [u8]) -> DevfsResult<usize> {
        (self.read)(cookie, pos, buf)
    }

    fn write(&self, cookie: DeviceCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize> {
        (self.write)(cookie, pos, buf)
    }

    fn control(&self, cookie: DeviceCookie, op: u32, buf: &mut [u8]) -> DevfsResult<()> {
        match &self.control {
            Some(control) => control(cookie, op, buf),
            None => Err(DevfsError::not_supported(format!("control op {op}"))),
        }
    }

    fn supports_select(&self) -> bool {
        self.select.is_some()
    }

    fn select(
        &self,
        cookie: DeviceCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        match &self.select {
            Some(select) => select(cookie, event, sync),
            None => Err(DevfsError::not_supported("select")),
        }
    }

    fn deselect(
        &self,
        cookie: DeviceCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        match &self.deselect {
            Some(deselect) => deselect(cookie, event, sync),
            None => Ok(()),
        }
    }
}
