//! Publish/unpublish protocol, called by driver-loading code.
//!
//! Paths are relative to the devfs root (`"disk/scsi/0/raw"`, never
//! `"/dev/disk/..."`). Missing intermediate directories are created on the
//! way; a path that is still occupied (for example by a node unpublished
//! while a handle keeps it alive) fails with `FileExists`.

use std::sync::Arc;

use devfs_types::{NodeId, NodeKind, PartitionInfo};
use tracing::{debug, instrument};

use crate::binding::DeviceBinding;
use crate::devfs::DevFs;
use crate::driver::{DeviceDriver, DeviceHooks, LegacyDriver};
use crate::error::{DevfsError, DevfsResult};
use crate::node::{DEVICE_PERMS, NodeBody};
use crate::registry::DriverImage;
use crate::tree::components;

impl DevFs {
    /// Publish a device backed by a legacy hook table.
    ///
    /// The table must provide at least open, close, read and write.
    #[instrument(level = "debug", skip(self, hooks))]
    pub fn publish_device(&self, path: &str, hooks: DeviceHooks) -> DevfsResult<NodeId> {
        let driver = LegacyDriver::new(hooks)?;
        self.publish_bound(path, Arc::new(driver), None)
    }

    /// Publish a device backed by a [`DeviceDriver`] implementation.
    #[instrument(level = "debug", skip(self, driver))]
    pub fn publish_driver(&self, path: &str, driver: Arc<dyn DeviceDriver>) -> DevfsResult<NodeId> {
        self.publish_bound(path, driver, None)
    }

    /// Publish a legacy device and remember which driver image it came from,
    /// for `GetDriverForDevice`.
    #[instrument(level = "debug", skip(self, hooks, image), fields(image = %image.path.display()))]
    pub fn publish_device_for_image(
        &self,
        path: &str,
        hooks: DeviceHooks,
        image: &Arc<DriverImage>,
    ) -> DevfsResult<NodeId> {
        let driver = LegacyDriver::new(hooks)?;
        self.publish_bound(path, Arc::new(driver), Some(image.clone()))
    }

    fn publish_bound(
        &self,
        path: &str,
        driver: Arc<dyn DeviceDriver>,
        image: Option<Arc<DriverImage>>,
    ) -> DevfsResult<NodeId> {
        components(path)?;

        // raw disks get a scheduler; build it before taking the lock
        let scheduler = self.scheduler_for(path, &driver);
        let scheduled = scheduler.is_some();
        let binding = DeviceBinding::new(driver, scheduler, image);

        let id = self.locked(|ns| {
            ns.publish_leaf(path, NodeBody::Device(Arc::new(binding)), DEVICE_PERMS)
        })?;
        debug!(path, %id, scheduled, "published device");
        Ok(id)
    }

    /// Publish a symlink at `path` pointing to `target`.
    #[instrument(level = "debug", skip(self))]
    pub fn publish_file_device(&self, path: &str, target: &str) -> DevfsResult<NodeId> {
        let body = NodeBody::Symlink {
            target: target.to_string(),
        };
        let id = self.locked(|ns| ns.publish_leaf(path, body, DEVICE_PERMS))?;
        debug!(path, target, %id, "published file device");
        Ok(id)
    }

    /// Publish a partition of the raw device named in `info.device`.
    ///
    /// The partition must live in the same directory as its raw device.
    /// `info.device` may carry the mount point (`/dev/disk/...`).
    #[instrument(level = "debug", skip(self, info), fields(device = %info.device, offset = info.offset, size = info.size))]
    pub fn publish_partition(&self, path: &str, info: PartitionInfo) -> DevfsResult<NodeId> {
        components(path)?;
        let device = self.strip_mount_point(&info.device)?.to_string();

        let (dir, name) = path
            .rsplit_once('/')
            .ok_or_else(|| DevfsError::bad_value(format!("partition {path} has no directory")))?;
        let (device_dir, _) = device
            .rsplit_once('/')
            .ok_or_else(|| DevfsError::bad_value(format!("device {device} has no directory")))?;
        if dir != device_dir {
            return Err(DevfsError::bad_value(format!(
                "partition {path} is not next to {device}"
            )));
        }

        self.locked(|ns| {
            let raw = ns.resolve(&device)?;
            ns.add_partition(raw, name, info)
        })
    }

    fn strip_mount_point<'a>(&self, device: &'a str) -> DevfsResult<&'a str> {
        let mount = self.config().mount_point.trim_end_matches('/');
        let relative = match device.strip_prefix(mount) {
            Some(rest) if !mount.is_empty() && rest.starts_with('/') => &rest[1..],
            _ => device,
        };
        if relative.starts_with('/') {
            return Err(DevfsError::bad_value(format!(
                "{device} is outside {mount}"
            )));
        }
        Ok(relative)
    }

    /// Make sure the directory `path` exists, creating it and its parents.
    #[instrument(level = "debug", skip(self))]
    pub fn publish_directory(&self, path: &str) -> DevfsResult<NodeId> {
        self.locked(|ns| ns.publish_path(path))
    }

    /// Remove the node at `path`, which must be of `kind`.
    ///
    /// The node disappears from the tree immediately; it is destroyed once
    /// the last VFS reference is dropped.
    #[instrument(level = "debug", skip(self))]
    pub fn unpublish(&self, path: &str, kind: NodeKind) -> DevfsResult<()> {
        self.locked(|ns| ns.unpublish(path, kind)).map(|_| ())
    }

    /// Remove a device. Raw devices with live partitions are refused.
    pub fn unpublish_device(&self, path: &str) -> DevfsResult<()> {
        self.unpublish(path, NodeKind::Device)
    }

    pub fn unpublish_file_device(&self, path: &str) -> DevfsResult<()> {
        self.unpublish(path, NodeKind::Symlink)
    }

    /// Remove a partition, releasing its hold on the raw device.
    #[instrument(level = "debug", skip(self))]
    pub fn unpublish_partition(&self, path: &str) -> DevfsResult<()> {
        self.locked(|ns| {
            components(path)?;
            let id = ns.resolve(path)?;
            if !ns.node(id)?.is_partition() {
                return Err(DevfsError::bad_type(format!("{path} is not a partition")));
            }
            ns.unpublish(path, NodeKind::Device).map(|_| ())
        })
    }

    /// Remove an empty directory.
    pub fn unpublish_directory(&self, path: &str) -> DevfsResult<()> {
        self.unpublish(path, NodeKind::Directory)
    }
}
