//! Device bindings: what a device node forwards its I/O to.
//!
//! A binding is immutable once installed and shared through an `Arc`, so
//! I/O paths grab a clone under the lock and then talk to the driver with
//! the lock released. Rebinding (e.g. attaching a scheduler) swaps the whole
//! `Arc`; requests already in flight finish on the old one.

use std::fmt;
use std::sync::Arc;

use tracing::trace;

use crate::driver::{DeviceCookie, DeviceDriver, IoRequest, IoScheduler};
use crate::error::DevfsResult;
use crate::partition::{Partition, translate};
use crate::registry::DriverImage;

#[derive(Clone)]
pub(crate) struct DeviceBinding {
    pub driver: Arc<dyn DeviceDriver>,
    /// Set on partition nodes.
    pub partition: Option<Partition>,
    /// Shared with the raw device for partitions; never a second scheduler.
    pub scheduler: Option<Arc<dyn IoScheduler>>,
    /// Driver image that published the device, if known.
    pub image: Option<Arc<DriverImage>>,
}

impl fmt::Debug for DeviceBinding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBinding")
            .field("partition", &self.partition)
            .field("scheduled", &self.scheduler.is_some())
            .field("image", &self.image.as_ref().map(|i| i.path.display().to_string()))
            .finish_non_exhaustive()
    }
}

impl DeviceBinding {
    pub fn new(
        driver: Arc<dyn DeviceDriver>,
        scheduler: Option<Arc<dyn IoScheduler>>,
        image: Option<Arc<DriverImage>>,
    ) -> Self {
        Self {
            driver,
            partition: None,
            scheduler,
            image,
        }
    }

    pub fn is_partition(&self) -> bool {
        self.partition.is_some()
    }

    /// Apply the partition window, if any.
    fn window(&self, pos: i64, len: usize) -> DevfsResult<(i64, usize)> {
        match &self.partition {
            Some(partition) => translate(&partition.info, pos, len),
            None => Ok((pos, len)),
        }
    }

    pub fn read(&self, cookie: DeviceCookie, pos: i64, buf: &mut [u8]) -> DevfsResult<usize> {
        let (pos, len) = self.window(pos, buf.len())?;
        if len == 0 {
            return Ok(0);
        }
        let buf = &mut buf[..len];

        if let Some(scheduler) = &self.scheduler {
            let mut request = IoRequest::read(cookie, pos, buf);
            scheduler.process(&mut request)?;
            return Ok(request.transferred);
        }
        self.driver.read(cookie, pos, buf)
    }

    pub fn write(&self, cookie: DeviceCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize> {
        let (pos, len) = self.window(pos, buf.len())?;
        if len == 0 {
            return Ok(0);
        }
        let buf = &buf[..len];

        if let Some(scheduler) = &self.scheduler {
            let mut request = IoRequest::write(cookie, pos, buf);
            scheduler.process(&mut request)?;
            return Ok(request.transferred);
        }
        self.driver.write(cookie, pos, buf)
    }

    /// Page reads bypass the scheduler and go straight to the driver.
    pub fn read_pages(
        &self,
        cookie: DeviceCookie,
        pos: i64,
        vecs: &mut [&mut [u8]],
    ) -> DevfsResult<usize> {
        let total = vecs.iter().map(|v| v.len()).sum();
        let (pos, mut remaining) = self.window(pos, total)?;
        if remaining == 0 {
            return Ok(0);
        }

        let mut trimmed: Vec<&mut [u8]> = Vec::with_capacity(vecs.len());
        for vec in vecs.iter_mut() {
            if remaining == 0 {
                break;
            }
            let take = vec.len().min(remaining);
            trimmed.push(&mut vec[..take]);
            remaining -= take;
        }
        trace!(%pos, vecs = trimmed.len(), "read_pages");
        self.driver.read_pages(cookie, pos, &mut trimmed)
    }

    pub fn write_pages(&self, cookie: DeviceCookie, pos: i64, vecs: &[&[u8]]) -> DevfsResult<usize> {
        let total = vecs.iter().map(|v| v.len()).sum();
        let (pos, mut remaining) = self.window(pos, total)?;
        if remaining == 0 {
            return Ok(0);
        }

        let mut trimmed: Vec<&[u8]> = Vec::with_capacity(vecs.len());
        for vec in vecs {
            if remaining == 0 {
                break;
            }
            let take = vec.len().min(remaining);
            trimmed.push(&vec[..take]);
            remaining -= take;
        }
        trace!(%pos, vecs = trimmed.len(), "write_pages");
        self.driver.write_pages(cookie, pos, &trimmed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{SchedulerFactory, SerialSchedulerFactory};
    use crate::testing::{DriverCall, RamDisk};
    use devfs_types::{NodeId, PartitionInfo};

    fn partition_over(disk: &Arc<RamDisk>, scheduled: bool) -> DeviceBinding {
        let driver: Arc<dyn DeviceDriver> = disk.clone();
        let scheduler = scheduled
            .then(|| SerialSchedulerFactory.create("disk/virtual/raw", &driver))
            .flatten();
        DeviceBinding {
            partition: Some(Partition {
                raw: NodeId::new(2),
                info: PartitionInfo::new("disk/virtual/raw", 16, 32),
            }),
            ..DeviceBinding::new(driver, scheduler, None)
        }
    }

    #[test]
    fn test_scheduled_partition_translates_once() {
        let disk = Arc::new(RamDisk::new(64));
        let binding = partition_over(&disk, true);
        let cookie = DeviceCookie::new(1);

        let mut buf = [0u8; 8];
        assert_eq!(binding.read(cookie, 4, &mut buf).unwrap(), 8);
        assert_eq!(disk.calls(), vec![DriverCall::Read { pos: 20, len: 8 }]);
    }

    #[test]
    fn test_past_end_skips_driver() {
        let disk = Arc::new(RamDisk::new(64));
        let binding = partition_over(&disk, false);
        let cookie = DeviceCookie::new(1);

        assert_eq!(binding.write(cookie, 32, b"xx").unwrap(), 0);
        assert!(disk.calls().is_empty());
    }

    #[test]
    fn test_pages_trimmed_to_partition() {
        let disk = Arc::new(RamDisk::new(64).with_pages());
        let binding = partition_over(&disk, true);
        let cookie = DeviceCookie::new(1);

        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        let mut vecs: [&mut [u8]; 2] = [&mut a, &mut b];
        // 8 bytes before the end of the partition
        assert_eq!(binding.read_pages(cookie, 24, &mut vecs).unwrap(), 8);
        assert_eq!(
            disk.calls(),
            vec![DriverCall::ReadPages { pos: 40, len: 8 }]
        );
    }
}
