//! In-memory nodes.
//!
//! Nodes live in a [`NodeTable`] keyed by ID; parent and child links are IDs
//! into the same table. The payload is a sum type over the three kinds a
//! devfs node can be.

mod table;

pub(crate) use table::NodeTable;

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::thread::ThreadId;
use std::time::SystemTime;

use devfs_types::{FileMode, NodeId, NodeKind};

use crate::binding::DeviceBinding;
use crate::cookie::DirCursor;

/// Permissions of implicitly created directories.
pub const DIRECTORY_PERMS: u32 = 0o755;

/// Permissions of published devices and file devices.
pub const DEVICE_PERMS: u32 = 0o644;

/// One entry in the namespace.
pub(crate) struct Node {
    pub id: NodeId,
    pub name: String,
    /// The root is its own parent.
    pub parent: NodeId,
    pub perms: u32,
    pub uid: u32,
    pub gid: u32,
    pub created: SystemTime,
    pub modified: SystemTime,
    /// References held by the VFS (lookups, `get_vnode`) and by partitions
    /// layered on a raw device.
    pub refs: usize,
    /// Whether the node is reachable from the root.
    pub linked: bool,
    pub body: NodeBody,
}

pub(crate) enum NodeBody {
    Directory(DirectoryBody),
    Device(Arc<DeviceBinding>),
    Symlink { target: String },
}

#[derive(Default)]
pub(crate) struct DirectoryBody {
    /// Children by name; iteration order is the listing order.
    pub children: BTreeMap<String, NodeId>,
    /// Open iteration cursors, keyed by cookie slot.
    pub cursors: HashMap<u64, DirCursor>,
    pub next_cursor: u64,
    /// Scan generation this directory was last probed at.
    pub scanned: u32,
    /// Thread currently probing this directory.
    pub scanning: Option<ThreadId>,
}

impl NodeBody {
    pub fn directory() -> Self {
        NodeBody::Directory(DirectoryBody::default())
    }

    pub fn kind(&self) -> NodeKind {
        match self {
            NodeBody::Directory(_) => NodeKind::Directory,
            NodeBody::Device(_) => NodeKind::Device,
            NodeBody::Symlink { .. } => NodeKind::Symlink,
        }
    }
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        self.body.kind()
    }

    pub fn mode(&self) -> FileMode {
        FileMode::new(self.kind(), self.perms)
    }

    pub fn dir(&self) -> Option<&DirectoryBody> {
        match &self.body {
            NodeBody::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn dir_mut(&mut self) -> Option<&mut DirectoryBody> {
        match &mut self.body {
            NodeBody::Directory(dir) => Some(dir),
            _ => None,
        }
    }

    pub fn binding(&self) -> Option<&Arc<DeviceBinding>> {
        match &self.body {
            NodeBody::Device(binding) => Some(binding),
            _ => None,
        }
    }

    pub fn is_partition(&self) -> bool {
        self.binding().is_some_and(|b| b.is_partition())
    }

    /// True for a directory that still has children.
    pub fn has_children(&self) -> bool {
        self.dir().is_some_and(|d| !d.children.is_empty())
    }
}
