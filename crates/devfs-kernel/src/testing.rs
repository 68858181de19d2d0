//! In-memory drivers and sinks.
//!
//! Used by the test suites and handy for wiring devfs up without hardware.
//! All data is ephemeral.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use devfs_types::{DeviceGeometry, DeviceOp, OpenFlags, SelectEvent};
use parking_lot::Mutex;

use crate::driver::{DeviceCookie, DeviceDriver, SelectSync};
use crate::error::{DevfsError, DevfsResult};
use crate::notify::{NodeEvent, NotificationSink};

/// A call a [`RamDisk`] received, in the order it arrived.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCall {
    Open { path: String, flags: OpenFlags },
    Close(DeviceCookie),
    Free(DeviceCookie),
    Read { pos: i64, len: usize },
    Write { pos: i64, len: usize },
    Control { op: u32 },
    Select(SelectEvent),
    Deselect(SelectEvent),
    ReadPages { pos: i64, len: usize },
    WritePages { pos: i64, len: usize },
}

/// A fixed-size disk backed by a byte vector.
///
/// Records every call it receives. Page I/O and select are off unless
/// enabled with [`with_pages`](Self::with_pages) and
/// [`with_select`](Self::with_select).
pub struct RamDisk {
    data: Mutex<Vec<u8>>,
    calls: Mutex<Vec<DriverCall>>,
    next_cookie: AtomicU64,
    pages: bool,
    select: bool,
    geometry: Option<DeviceGeometry>,
    non_blocking: AtomicBool,
    waiters: Mutex<Vec<(SelectEvent, Arc<dyn SelectSync>)>>,
}

impl RamDisk {
    /// A zero-filled disk of `size` bytes.
    pub fn new(size: usize) -> Self {
        Self {
            data: Mutex::new(vec![0; size]),
            calls: Mutex::new(Vec::new()),
            next_cookie: AtomicU64::new(1),
            pages: false,
            select: false,
            geometry: None,
            non_blocking: AtomicBool::new(false),
            waiters: Mutex::new(Vec::new()),
        }
    }

    /// Implement `read_pages`/`write_pages`.
    pub fn with_pages(mut self) -> Self {
        self.pages = true;
        self
    }

    /// Implement `select`. Waiters are woken by [`fire`](Self::fire).
    pub fn with_select(mut self) -> Self {
        self.select = true;
        self
    }

    /// Report `geometry` instead of one derived from the size.
    pub fn with_geometry(mut self, geometry: DeviceGeometry) -> Self {
        self.geometry = Some(geometry);
        self
    }

    pub fn size(&self) -> usize {
        self.data.lock().len()
    }

    /// Copy of the disk contents.
    pub fn contents(&self) -> Vec<u8> {
        self.data.lock().clone()
    }

    pub fn calls(&self) -> Vec<DriverCall> {
        self.calls.lock().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Whether the last blocking-mode control asked for non-blocking I/O.
    pub fn is_non_blocking(&self) -> bool {
        self.non_blocking.load(Ordering::Acquire)
    }

    /// Wake everyone selecting on `event`; returns how many were woken.
    pub fn fire(&self, event: SelectEvent) -> usize {
        let woken: Vec<_> = {
            let mut waiters = self.waiters.lock();
            let (hit, rest): (Vec<_>, Vec<_>) =
                waiters.drain(..).partition(|(e, _)| *e == event);
            *waiters = rest;
            hit
        };
        for (event, sync) in &woken {
            sync.notify(*event);
        }
        woken.len()
    }

    fn record(&self, call: DriverCall) {
        self.calls.lock().push(call);
    }

    fn geometry(&self) -> DeviceGeometry {
        self.geometry.unwrap_or_else(|| DeviceGeometry {
            bytes_per_sector: 512,
            sectors_per_track: u32::try_from(self.size() / 512).unwrap_or(u32::MAX),
            cylinder_count: 1,
            head_count: 1,
            ..Default::default()
        })
    }

    /// Clamp `[pos, pos + len)` to the disk.
    fn span(&self, pos: i64, len: usize) -> DevfsResult<(usize, usize)> {
        let start =
            usize::try_from(pos).map_err(|_| DevfsError::bad_value(format!("position {pos}")))?;
        let size = self.size();
        if start >= size {
            return Ok((size, 0));
        }
        Ok((start, len.min(size - start)))
    }
}

impl DeviceDriver for RamDisk {
    fn open(&self, path: &str, flags: OpenFlags) -> DevfsResult<DeviceCookie> {
        self.record(DriverCall::Open {
            path: path.to_string(),
            flags,
        });
        Ok(DeviceCookie::new(
            self.next_cookie.fetch_add(1, Ordering::Relaxed),
        ))
    }

    fn close(&self, cookie: DeviceCookie) -> DevfsResult<()> {
        self.record(DriverCall::Close(cookie));
        Ok(())
    }

    fn free(&self, cookie: DeviceCookie) -> DevfsResult<()> {
        self.record(DriverCall::Free(cookie));
        Ok(())
    }

    fn read(&self, _cookie: DeviceCookie, pos: i64, buf: &mut [u8]) -> DevfsResult<usize> {
        self.record(DriverCall::Read {
            pos,
            len: buf.len(),
        });
        let (start, len) = self.span(pos, buf.len())?;
        buf[..len].copy_from_slice(&self.data.lock()[start..start + len]);
        Ok(len)
    }

    fn write(&self, _cookie: DeviceCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize> {
        self.record(DriverCall::Write {
            pos,
            len: buf.len(),
        });
        let (start, len) = self.span(pos, buf.len())?;
        self.data.lock()[start..start + len].copy_from_slice(&buf[..len]);
        Ok(len)
    }

    fn control(&self, _cookie: DeviceCookie, op: u32, buf: &mut [u8]) -> DevfsResult<()> {
        self.record(DriverCall::Control { op });
        match DeviceOp::from_repr(op) {
            Some(DeviceOp::GetGeometry) => {
                self.geometry().encode(buf)?;
                Ok(())
            }
            Some(DeviceOp::GetDeviceSize) => {
                let size = (self.size() as u64).to_le_bytes();
                let out = buf
                    .get_mut(..size.len())
                    .ok_or_else(|| DevfsError::bad_value("device size needs 8 bytes"))?;
                out.copy_from_slice(&size);
                Ok(())
            }
            Some(DeviceOp::SetNonBlockingIo) => {
                self.non_blocking.store(true, Ordering::Release);
                Ok(())
            }
            Some(DeviceOp::SetBlockingIo) => {
                self.non_blocking.store(false, Ordering::Release);
                Ok(())
            }
            _ => Err(DevfsError::not_supported(format!("control op {op}"))),
        }
    }

    fn supports_select(&self) -> bool {
        self.select
    }

    fn select(
        &self,
        _cookie: DeviceCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        self.record(DriverCall::Select(event));
        self.waiters.lock().push((event, Arc::clone(sync)));
        Ok(())
    }

    fn deselect(
        &self,
        _cookie: DeviceCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        self.record(DriverCall::Deselect(event));
        self.waiters
            .lock()
            .retain(|(e, s)| !(*e == event && Arc::ptr_eq(s, sync)));
        Ok(())
    }

    fn supports_pages(&self) -> bool {
        self.pages
    }

    fn read_pages(
        &self,
        _cookie: DeviceCookie,
        pos: i64,
        vecs: &mut [&mut [u8]],
    ) -> DevfsResult<usize> {
        let total = vecs.iter().map(|v| v.len()).sum();
        self.record(DriverCall::ReadPages { pos, len: total });

        let (mut at, len) = self.span(pos, total)?;
        let end = at + len;
        let data = self.data.lock();
        for vec in vecs.iter_mut() {
            let take = vec.len().min(end - at);
            vec[..take].copy_from_slice(&data[at..at + take]);
            at += take;
        }
        Ok(len)
    }

    fn write_pages(&self, _cookie: DeviceCookie, pos: i64, vecs: &[&[u8]]) -> DevfsResult<usize> {
        let total = vecs.iter().map(|v| v.len()).sum();
        self.record(DriverCall::WritePages { pos, len: total });

        let (mut at, len) = self.span(pos, total)?;
        let end = at + len;
        let mut data = self.data.lock();
        for vec in vecs {
            let take = vec.len().min(end - at);
            data[at..at + take].copy_from_slice(&vec[..take]);
            at += take;
        }
        Ok(len)
    }
}

/// Notification sink that keeps every event.
#[derive(Debug, Default)]
pub struct EventLog {
    events: Mutex<Vec<NodeEvent>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<NodeEvent> {
        self.events.lock().clone()
    }

    /// Take the recorded events, leaving the log empty.
    pub fn drain(&self) -> Vec<NodeEvent> {
        std::mem::take(&mut *self.events.lock())
    }
}

impl NotificationSink for EventLog {
    fn notify(&self, event: &NodeEvent) {
        self.events.lock().push(event.clone());
    }
}

/// [`SelectSync`] that records the events it was notified of.
#[derive(Debug, Default)]
pub struct SelectLog {
    events: Mutex<Vec<SelectEvent>>,
}

impl SelectLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<SelectEvent> {
        self.events.lock().clone()
    }
}

impl SelectSync for SelectLog {
    fn notify(&self, event: SelectEvent) {
        self.events.lock().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ram_disk_clamps_to_size() {
        let disk = RamDisk::new(8);
        let cookie = disk.open("disk/virtual/raw", OpenFlags::READ_WRITE).unwrap();

        assert_eq!(disk.write(cookie, 6, b"abcd").unwrap(), 2);
        let mut buf = [0u8; 4];
        assert_eq!(disk.read(cookie, 5, &mut buf).unwrap(), 3);
        assert_eq!(&buf[..3], b"\0ab");
        assert_eq!(disk.read(cookie, 8, &mut buf).unwrap(), 0);
        assert!(disk.read(cookie, -1, &mut buf).is_err());
    }

    #[test]
    fn test_ram_disk_pages() {
        let disk = RamDisk::new(16).with_pages();
        let cookie = DeviceCookie::new(1);
        assert_eq!(disk.write_pages(cookie, 2, &[&b"ab"[..], &b"cd"[..]]).unwrap(), 4);

        let mut a = [0u8; 3];
        let mut b = [0u8; 3];
        let mut vecs: [&mut [u8]; 2] = [&mut a, &mut b];
        assert_eq!(disk.read_pages(cookie, 1, &mut vecs).unwrap(), 6);
        assert_eq!(&a, b"\0ab");
        assert_eq!(&b, b"cd\0");
    }

    #[test]
    fn test_fire_wakes_matching_waiters() {
        let disk = RamDisk::new(8).with_select();
        let log = Arc::new(SelectLog::new());
        let sync: Arc<dyn SelectSync> = log.clone();
        let cookie = DeviceCookie::new(1);

        disk.select(cookie, SelectEvent::Read, &sync).unwrap();
        disk.select(cookie, SelectEvent::Write, &sync).unwrap();
        disk.deselect(cookie, SelectEvent::Write, &sync).unwrap();

        assert_eq!(disk.fire(SelectEvent::Write), 0);
        assert_eq!(disk.fire(SelectEvent::Read), 1);
        assert_eq!(log.events(), vec![SelectEvent::Read]);
    }
}
