//! I/O scheduler seam.
//!
//! Raw disk devices can have their reads and writes routed through an
//! [`IoScheduler`] instead of calling the driver directly. Devfs only builds
//! the request and reads back how much was transferred; ordering, merging
//! and DMA are the scheduler's business.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::{DeviceCookie, DeviceDriver};
use crate::error::DevfsResult;

/// Data side of an [`IoRequest`].
pub enum IoBuffer<'a> {
    Read(&'a mut [u8]),
    Write(&'a [u8]),
}

/// One read or write handed to a scheduler.
pub struct IoRequest<'a> {
    pub cookie: DeviceCookie,
    /// Absolute position on the device (partition offset already applied).
    pub pos: i64,
    pub buffer: IoBuffer<'a>,
    /// Bytes actually moved; set by the scheduler on success.
    pub transferred: usize,
}

impl<'a> IoRequest<'a> {
    pub fn read(cookie: DeviceCookie, pos: i64, buf: &'a mut [u8]) -> Self {
        Self {
            cookie,
            pos,
            buffer: IoBuffer::Read(buf),
            transferred: 0,
        }
    }

    pub fn write(cookie: DeviceCookie, pos: i64, buf: &'a [u8]) -> Self {
        Self {
            cookie,
            pos,
            buffer: IoBuffer::Write(buf),
            transferred: 0,
        }
    }

    /// Requested length.
    pub fn len(&self) -> usize {
        match &self.buffer {
            IoBuffer::Read(buf) => buf.len(),
            IoBuffer::Write(buf) => buf.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_write(&self) -> bool {
        matches!(self.buffer, IoBuffer::Write(_))
    }
}

impl fmt::Debug for IoRequest<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IoRequest")
            .field("cookie", &self.cookie)
            .field("pos", &self.pos)
            .field("len", &self.len())
            .field("write", &self.is_write())
            .field("transferred", &self.transferred)
            .finish()
    }
}

/// Processes block I/O for one device.
pub trait IoScheduler: Send + Sync {
    /// Carry out `request`, blocking until it completes, and set
    /// `request.transferred`.
    fn process(&self, request: &mut IoRequest<'_>) -> DevfsResult<()>;
}

/// Decides which scheduler a freshly published raw disk gets.
pub trait SchedulerFactory: Send + Sync {
    /// Build a scheduler for the raw disk at `path`, or `None` to leave the
    /// device unscheduled.
    fn create(&self, path: &str, driver: &Arc<dyn DeviceDriver>) -> Option<Arc<dyn IoScheduler>>;
}

/// Runs one request at a time against the driver.
pub struct SerialScheduler {
    name: String,
    driver: Arc<dyn DeviceDriver>,
    busy: Mutex<()>,
}

impl SerialScheduler {
    pub fn new(name: impl Into<String>, driver: Arc<dyn DeviceDriver>) -> Self {
        Self {
            name: name.into(),
            driver,
            busy: Mutex::new(()),
        }
    }
}

impl fmt::Debug for SerialScheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialScheduler")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl IoScheduler for SerialScheduler {
    fn process(&self, request: &mut IoRequest<'_>) -> DevfsResult<()> {
        let _busy = self.busy.lock();
        trace!(device = %self.name, ?request, "process");

        let cookie = request.cookie;
        let pos = request.pos;
        request.transferred = match &mut request.buffer {
            IoBuffer::Read(buf) => self.driver.read(cookie, pos, buf)?,
            IoBuffer::Write(buf) => self.driver.write(cookie, pos, buf)?,
        };
        Ok(())
    }
}

/// Gives every raw disk a [`SerialScheduler`].
#[derive(Debug, Default, Clone, Copy)]
pub struct SerialSchedulerFactory;

impl SchedulerFactory for SerialSchedulerFactory {
    fn create(&self, path: &str, driver: &Arc<dyn DeviceDriver>) -> Option<Arc<dyn IoScheduler>> {
        Some(Arc::new(SerialScheduler::new(path, Arc::clone(driver))))
    }
}
