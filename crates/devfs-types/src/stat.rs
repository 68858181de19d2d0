//! Stat records and stat updates.

use std::time::SystemTime;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::ids::{FsId, NodeId};
use crate::node::FileMode;

/// Node metadata as reported by `read_stat`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stat {
    /// Mounted filesystem.
    pub dev: FsId,
    /// Node ID.
    pub ino: NodeId,
    /// Type and permission bits.
    pub mode: FileMode,
    /// Link count, always 1.
    pub nlink: u32,
    /// Owner.
    pub uid: u32,
    /// Group.
    pub gid: u32,
    /// Logical size; only meaningful for partitions and symlinks.
    pub size: i64,
    /// Preferred I/O block size.
    pub blksize: u32,
    /// Access time (always "now").
    pub atime: SystemTime,
    /// Last modification.
    pub mtime: SystemTime,
    /// Last status change (same as `mtime`).
    pub ctime: SystemTime,
    /// Creation time.
    pub crtime: SystemTime,
}

bitflags! {
    /// Which stat fields changed; carried by stat-changed notifications.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct StatMask: u32 {
        const MODE = 0x0001;
        const UID = 0x0002;
        const GID = 0x0004;
        const SIZE = 0x0008;
        const ATIME = 0x0010;
        const MTIME = 0x0020;
        const CRTIME = 0x0040;
    }
}

/// Attributes to change in a `write_stat` call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatUpdate {
    /// New mode; only the permission bits are applied.
    pub mode: Option<u32>,
    /// New owner.
    pub uid: Option<u32>,
    /// New group.
    pub gid: Option<u32>,
    /// New size. Devices cannot be resized, so this is always rejected.
    pub size: Option<i64>,
    /// New modification time.
    pub mtime: Option<SystemTime>,
    /// New creation time.
    pub crtime: Option<SystemTime>,
}

impl StatUpdate {
    /// Create an empty update.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the mode.
    pub fn with_mode(mut self, mode: u32) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Set the owner.
    pub fn with_uid(mut self, uid: u32) -> Self {
        self.uid = Some(uid);
        self
    }

    /// Set the group.
    pub fn with_gid(mut self, gid: u32) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Set the size.
    pub fn with_size(mut self, size: i64) -> Self {
        self.size = Some(size);
        self
    }

    /// Set the modification time.
    pub fn with_mtime(mut self, mtime: SystemTime) -> Self {
        self.mtime = Some(mtime);
        self
    }

    /// Set the creation time.
    pub fn with_crtime(mut self, crtime: SystemTime) -> Self {
        self.crtime = Some(crtime);
        self
    }

    /// The set of fields this update touches.
    pub fn mask(&self) -> StatMask {
        let mut mask = StatMask::empty();
        mask.set(StatMask::MODE, self.mode.is_some());
        mask.set(StatMask::UID, self.uid.is_some());
        mask.set(StatMask::GID, self.gid.is_some());
        mask.set(StatMask::SIZE, self.size.is_some());
        mask.set(StatMask::MTIME, self.mtime.is_some());
        mask.set(StatMask::CRTIME, self.crtime.is_some());
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_mask() {
        let update = StatUpdate::new().with_mode(0o600).with_gid(5);
        assert_eq!(update.mask(), StatMask::MODE | StatMask::GID);
        assert!(StatUpdate::new().mask().is_empty());
    }

    #[test]
    fn test_update_builder() {
        let update = StatUpdate::new().with_size(10).with_uid(1);
        assert_eq!(update.size, Some(10));
        assert_eq!(update.uid, Some(1));
        assert!(update.mtime.is_none());
    }
}
