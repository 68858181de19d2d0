//! Typed identifiers for nodes and mounted filesystems.
//!
//! Node IDs come from a per-instance monotonic counter and are never reused
//! for the lifetime of the instance, so a stale ID can only ever miss.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A node identifier (vnode ID), unique within one mounted devfs.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(u64);

/// A mounted filesystem identifier.
#[derive(Clone, Copy, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FsId(u32);

impl NodeId {
    /// Wrap a raw node number.
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw node number (`st_ino`).
    pub const fn raw(&self) -> u64 {
        self.0
    }

    /// The next ID in sequence, or `None` when the space is exhausted.
    pub fn checked_next(&self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl FsId {
    /// Wrap a raw mount ID.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw mount ID (`st_dev`).
    pub const fn raw(&self) -> u32 {
        self.0
    }
}

impl fmt::Debug for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NodeId({})", self.0)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FsId({})", self.0)
    }
}

impl fmt::Display for FsId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<NodeId> for u64 {
    fn from(id: NodeId) -> u64 {
        id.0
    }
}
