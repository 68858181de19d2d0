//! [`VnodeOps`] for [`DevFs`].
//!
//! Tree work happens under the namespace lock; driver and scheduler calls
//! happen after it is dropped, on a cloned device binding.

use std::ops::Bound;
use std::sync::Arc;
use std::time::SystemTime;

use devfs_types::{
    DeviceGeometry, DeviceOp, NodeId, NodeKind, OpenFlags, PartitionInfo, SelectEvent, Stat,
    StatUpdate,
    node::{S_IFBLK, S_IUMSK},
};
use tracing::{debug, trace, warn};

use crate::binding::DeviceBinding;
use crate::cookie::{DirCookie, DirCursor, FileCookie};
use crate::devfs::DevFs;
use crate::driver::{DeviceCookie, SelectSync};
use crate::error::{DevfsError, DevfsResult};
use crate::node::NodeBody;
use crate::notify::NodeEvent;
use crate::ops::{DirEntry, VnodeOps};
use crate::tree::Namespace;

/// Copy `value` plus a NUL terminator into `buf`.
fn copy_c_string(buf: &mut [u8], value: &str) -> DevfsResult<()> {
    let bytes = value.as_bytes();
    if buf.len() <= bytes.len() {
        return Err(DevfsError::BufferOverflow {
            needed: bytes.len() + 1,
        });
    }
    buf[..bytes.len()].copy_from_slice(bytes);
    buf[bytes.len()] = 0;
    Ok(())
}

/// Rewrite a raw disk's geometry so its capacity is the partition's size.
fn partition_geometry(mut geometry: DeviceGeometry, info: &PartitionInfo) -> DeviceGeometry {
    if geometry.bytes_per_sector == 0 {
        geometry.bytes_per_sector = 512;
    }
    let sectors = info.size.max(0) / i64::from(geometry.bytes_per_sector);
    geometry.sectors_per_track = u32::try_from(sectors).unwrap_or(u32::MAX);
    geometry.cylinder_count = 1;
    geometry.head_count = 1;
    geometry
}

impl DevFs {
    /// Open the driver behind `vnode`, or hand out a plain cookie.
    fn open_node(&self, vnode: NodeId, flags: OpenFlags) -> DevfsResult<FileCookie> {
        let device = self.locked(|ns| -> DevfsResult<_> {
            let node = ns.node(vnode)?;
            match node.binding() {
                Some(binding) => Ok(Some((binding.clone(), ns.device_path(vnode)?))),
                None => Ok(None),
            }
        })?;

        let Some((binding, path)) = device else {
            return Ok(FileCookie::plain(flags));
        };
        let cookie = binding.driver.open(&path, flags)?;
        trace!(path = %path, ?cookie, "opened device");
        Ok(FileCookie {
            device: Some(cookie),
            flags,
        })
    }

    fn with_dir_cursor<R>(
        &self,
        vnode: NodeId,
        cookie: &DirCookie,
        f: impl FnOnce(&Namespace, DirCursor) -> DevfsResult<(R, DirCursor)>,
    ) -> DevfsResult<R> {
        self.locked(|ns| {
            let node = ns.node(vnode)?;
            let body = node
                .dir()
                .ok_or_else(|| DevfsError::bad_value(format!("{} is not a directory", node.name)))?;
            let cursor = *body
                .cursors
                .get(&cookie.slot)
                .ok_or_else(|| DevfsError::bad_value("unknown directory cookie"))?;

            let (result, next) = f(&*ns, cursor)?;

            if let Some(body) = ns.node_mut(vnode)?.dir_mut() {
                body.cursors.insert(cookie.slot, next);
            }
            Ok(result)
        })
    }
}

impl VnodeOps for DevFs {
    // ========================================================================
    // Volume
    // ========================================================================

    fn root(&self) -> NodeId {
        self.locked(|ns| ns.root)
    }

    fn unmount(&self) -> DevfsResult<()> {
        self.teardown();
        Ok(())
    }

    fn fsync(&self, _vnode: NodeId) -> DevfsResult<()> {
        Ok(())
    }

    // ========================================================================
    // Vnodes
    // ========================================================================

    fn lookup(&self, dir: NodeId, name: &str) -> DevfsResult<(NodeId, NodeKind)> {
        self.rescan_if_stale(dir)?;

        self.locked(|ns| {
            let id = ns.find_child(dir, name)?;
            ns.acquire(id)?;
            Ok((id, ns.node(id)?.kind()))
        })
    }

    fn get_vnode_name(&self, vnode: NodeId) -> DevfsResult<String> {
        self.locked(|ns| Ok(ns.node(vnode)?.name.clone()))
    }

    fn get_vnode(&self, id: NodeId) -> DevfsResult<NodeKind> {
        self.locked(|ns| {
            ns.acquire(id)?;
            Ok(ns.node(id)?.kind())
        })
    }

    fn put_vnode(&self, id: NodeId) -> DevfsResult<()> {
        self.locked(|ns| ns.release(id))
    }

    fn remove_vnode(&self, id: NodeId) -> DevfsResult<()> {
        self.locked(|ns| {
            let node = ns.node(id)?;
            if node.linked {
                panic!("devfs: remove_vnode on node {id} which is still in a directory");
            }
            if node.has_children() {
                return Err(DevfsError::not_allowed(format!("node {id} has children")));
            }
            if node.refs == 0 {
                ns.destroy(id);
                return Ok(());
            }
            ns.release(id)
        })
    }

    // ========================================================================
    // Files
    // ========================================================================

    fn create(
        &self,
        dir: NodeId,
        name: &str,
        flags: OpenFlags,
        _perms: u32,
    ) -> DevfsResult<(NodeId, FileCookie)> {
        let id = self.locked(|ns| {
            let id = match ns.find_child(dir, name) {
                Ok(id) => id,
                Err(DevfsError::NotFound(_)) => return Err(DevfsError::ReadOnly),
                Err(e) => return Err(e),
            };
            if flags.is_exclusive() {
                return Err(DevfsError::file_exists(name.to_string()));
            }
            ns.acquire(id)?;
            Ok(id)
        })?;

        match self.open_node(id, flags) {
            Ok(cookie) => Ok((id, cookie)),
            Err(e) => {
                self.locked(|ns| ns.release(id))?;
                Err(e)
            }
        }
    }

    fn open(&self, vnode: NodeId, flags: OpenFlags) -> DevfsResult<FileCookie> {
        self.open_node(vnode, flags)
    }

    fn close(&self, vnode: NodeId, cookie: &FileCookie) -> DevfsResult<()> {
        let Some(device) = cookie.device else {
            return Ok(());
        };
        self.binding(vnode)?.driver.close(device)
    }

    fn free_cookie(&self, vnode: NodeId, cookie: FileCookie) -> DevfsResult<()> {
        let Some(device) = cookie.device else {
            return Ok(());
        };
        self.binding(vnode)?.driver.free(device)
    }

    fn read(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        pos: i64,
        buf: &mut [u8],
    ) -> DevfsResult<usize> {
        let binding = self.binding(vnode)?;
        binding.read(cookie.device_or("read")?, pos, buf)
    }

    fn write(&self, vnode: NodeId, cookie: &FileCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize> {
        let binding = self.binding(vnode)?;
        binding.write(cookie.device_or("write")?, pos, buf)
    }

    fn ioctl(&self, vnode: NodeId, cookie: &FileCookie, op: u32, buf: &mut [u8]) -> DevfsResult<()> {
        let binding = self.binding(vnode)?;
        let device = cookie.device_or("ioctl")?;

        match DeviceOp::from_repr(op) {
            Some(DeviceOp::GetGeometry) => match &binding.partition {
                Some(partition) => {
                    let mut raw = [0u8; DeviceGeometry::SIZE];
                    binding.driver.control(device, op, &mut raw)?;
                    let geometry = partition_geometry(DeviceGeometry::decode(&raw)?, &partition.info);
                    geometry.encode(buf)?;
                    Ok(())
                }
                None => binding.driver.control(device, op, buf),
            },
            Some(DeviceOp::GetDriverForDevice) => {
                let image = binding
                    .image
                    .as_ref()
                    .ok_or_else(|| DevfsError::not_found("no driver recorded for device"))?;
                copy_c_string(buf, &image.path.to_string_lossy())
            }
            Some(DeviceOp::GetPartitionInfo) => {
                let partition = binding
                    .partition
                    .as_ref()
                    .ok_or_else(|| DevfsError::bad_value("not a partition"))?;
                if buf.len() != PartitionInfo::SIZE {
                    return Err(DevfsError::bad_value(format!(
                        "partition info needs {} bytes, got {}",
                        PartitionInfo::SIZE,
                        buf.len()
                    )));
                }
                partition.info.encode(buf)?;
                Ok(())
            }
            Some(DeviceOp::SetPartition) => {
                Err(DevfsError::not_allowed("partitions cannot be changed"))
            }
            Some(DeviceOp::GetPathForDevice) => {
                let path = self.device_path(vnode)?;
                let mount = self.config().mount_point.trim_end_matches('/');
                copy_c_string(buf, &format!("{mount}/{path}"))
            }
            Some(legacy) if legacy.is_legacy() => {
                warn!(op = %legacy, "legacy device control refused");
                Err(DevfsError::not_supported(legacy.to_string()))
            }
            _ => binding.driver.control(device, op, buf),
        }
    }

    fn set_flags(
        &self,
        vnode: NodeId,
        cookie: &mut FileCookie,
        flags: OpenFlags,
    ) -> DevfsResult<()> {
        let binding = self
            .binding(vnode)
            .map_err(|_| DevfsError::not_allowed("flags only apply to devices"))?;
        let device = cookie.device_or("set_flags")?;

        let op = if flags.is_non_blocking() {
            DeviceOp::SetNonBlockingIo
        } else {
            DeviceOp::SetBlockingIo
        };
        binding.driver.control(device, op.code(), &mut [])?;
        cookie.flags = flags;
        Ok(())
    }

    fn select(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        let binding = self.binding(vnode)?;
        let device = cookie.device_or("select")?;

        if !binding.driver.supports_select() {
            // no select hook: the device is always ready
            sync.notify(event);
            return Ok(());
        }
        binding.driver.select(device, event, sync)
    }

    fn deselect(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()> {
        let binding = self.binding(vnode)?;
        let device = cookie.device_or("deselect")?;

        if !binding.driver.supports_select() {
            return Ok(());
        }
        binding.driver.deselect(device, event, sync)
    }

    fn read_link(&self, vnode: NodeId, buffer_size: usize) -> DevfsResult<String> {
        self.locked(|ns| {
            let node = ns.node(vnode)?;
            let NodeBody::Symlink { target } = &node.body else {
                return Err(DevfsError::bad_value(format!("{} is not a symlink", node.name)));
            };
            if buffer_size <= target.len() {
                return Err(DevfsError::BufferOverflow {
                    needed: target.len() + 1,
                });
            }
            Ok(target.clone())
        })
    }

    fn can_page(&self, vnode: NodeId, cookie: &FileCookie) -> bool {
        cookie.device.is_some()
            && self
                .binding(vnode)
                .is_ok_and(|binding| binding.driver.supports_pages())
    }

    fn read_pages(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        pos: i64,
        vecs: &mut [&mut [u8]],
    ) -> DevfsResult<usize> {
        let (binding, device) = self.paging_target(vnode, cookie)?;
        binding.read_pages(device, pos, vecs)
    }

    fn write_pages(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        pos: i64,
        vecs: &[&[u8]],
    ) -> DevfsResult<usize> {
        let (binding, device) = self.paging_target(vnode, cookie)?;
        binding.write_pages(device, pos, vecs)
    }

    // ========================================================================
    // Directories
    // ========================================================================

    fn create_dir(&self, _dir: NodeId, _name: &str, _perms: u32) -> DevfsResult<NodeId> {
        Err(DevfsError::ReadOnly)
    }

    fn open_dir(&self, vnode: NodeId) -> DevfsResult<DirCookie> {
        self.rescan_if_stale(vnode)?;

        self.locked(|ns| {
            let node = ns.node_mut(vnode)?;
            let name = node.name.clone();
            let body = node
                .dir_mut()
                .ok_or_else(|| DevfsError::not_a_directory(name))?;

            let slot = body.next_cursor;
            body.next_cursor = slot.checked_add(1).ok_or(DevfsError::NoMemory)?;
            body.cursors.insert(slot, DirCursor::Dot);
            Ok(DirCookie { slot })
        })
    }

    fn close_dir(&self, _vnode: NodeId, _cookie: &DirCookie) -> DevfsResult<()> {
        Ok(())
    }

    fn free_dir_cookie(&self, vnode: NodeId, cookie: DirCookie) -> DevfsResult<()> {
        self.locked(|ns| {
            // the directory may already be gone after an unmount
            if let Ok(node) = ns.node_mut(vnode) {
                if let Some(body) = node.dir_mut() {
                    body.cursors.remove(&cookie.slot);
                }
            }
            Ok(())
        })
    }

    fn read_dir(&self, vnode: NodeId, cookie: &DirCookie) -> DevfsResult<Option<DirEntry>> {
        let fs = self.id();
        self.with_dir_cursor(vnode, cookie, |ns, cursor| {
            let node = ns.node(vnode)?;
            let Some(body) = node.dir() else {
                return Ok((None, cursor));
            };
            let first_child = || body.children.values().next().copied();
            let after = |name: &str| {
                body.children
                    .range::<str, _>((Bound::Excluded(name), Bound::Unbounded))
                    .next()
                    .map(|(_, id)| *id)
            };
            let to_cursor = |next: Option<NodeId>| next.map_or(DirCursor::End, DirCursor::Child);

            let (entry_id, name, kind, next) = match cursor {
                DirCursor::Dot => (vnode, ".".to_string(), NodeKind::Directory, DirCursor::DotDot),
                DirCursor::DotDot => (
                    node.parent,
                    "..".to_string(),
                    NodeKind::Directory,
                    to_cursor(first_child()),
                ),
                DirCursor::Child(child) => {
                    let child_node = ns.node(child)?;
                    (
                        child,
                        child_node.name.clone(),
                        child_node.kind(),
                        to_cursor(after(&child_node.name)),
                    )
                }
                DirCursor::End => return Ok((None, DirCursor::End)),
            };

            let entry = DirEntry {
                dev: fs,
                ino: entry_id,
                name,
                kind,
            };
            Ok((Some(entry), next))
        })
    }

    fn rewind_dir(&self, vnode: NodeId, cookie: &DirCookie) -> DevfsResult<()> {
        self.with_dir_cursor(vnode, cookie, |_, _| Ok(((), DirCursor::Dot)))
    }

    // ========================================================================
    // Attributes
    // ========================================================================

    fn read_stat(&self, vnode: NodeId) -> DevfsResult<Stat> {
        let fs = self.id();
        let blksize = self.config().stat_block_size;

        self.locked(|ns| {
            let node = ns.node(vnode)?;
            let mut stat = Stat {
                dev: fs,
                ino: node.id,
                mode: node.mode(),
                nlink: 1,
                uid: node.uid,
                gid: node.gid,
                size: 0,
                blksize,
                atime: SystemTime::now(),
                mtime: node.modified,
                ctime: node.modified,
                crtime: node.created,
            };

            match &node.body {
                NodeBody::Symlink { target } => {
                    stat.size = i64::try_from(target.len()).unwrap_or(i64::MAX);
                }
                NodeBody::Device(binding) => {
                    if let Some(partition) = &binding.partition {
                        // partitions are block devices whatever their size
                        stat.size = partition.info.size;
                        stat.mode = stat.mode.with_type_bits(S_IFBLK);
                    }
                }
                NodeBody::Directory(_) => {}
            }
            Ok(stat)
        })
    }

    fn write_stat(&self, vnode: NodeId, update: &StatUpdate) -> DevfsResult<()> {
        if update.size.is_some() {
            return Err(DevfsError::bad_value("devices cannot be resized"));
        }

        let fs = self.id();
        self.locked(|ns| {
            let node = ns.node_mut(vnode)?;
            if let Some(mode) = update.mode {
                node.perms = mode & S_IUMSK;
            }
            if let Some(uid) = update.uid {
                node.uid = uid;
            }
            if let Some(gid) = update.gid {
                node.gid = gid;
            }
            if let Some(mtime) = update.mtime {
                node.modified = mtime;
            }
            if let Some(crtime) = update.crtime {
                node.created = crtime;
            }

            debug!(%vnode, fields = ?update.mask(), "stat changed");
            ns.emit(NodeEvent::StatChanged {
                fs,
                node: vnode,
                fields: update.mask(),
            });
            Ok(())
        })
    }
}

impl DevFs {
    fn paging_target(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
    ) -> DevfsResult<(Arc<DeviceBinding>, DeviceCookie)> {
        let not_allowed = || DevfsError::not_allowed("device does not support page I/O");
        let device = cookie.device.ok_or_else(not_allowed)?;
        let binding = self.binding(vnode).map_err(|_| not_allowed())?;
        if !binding.driver.supports_pages() {
            return Err(not_allowed());
        }
        Ok((binding, device))
    }
}
