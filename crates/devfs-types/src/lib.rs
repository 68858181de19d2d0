//! Shared node, stat and device-control types for devfs.
//!
//! This crate is the leaf of the workspace: typed IDs, node kinds and mode
//! bits, stat records, open flags, select events, and the fixed binary
//! layouts exchanged with drivers through `control` calls. It has **no
//! internal devfs dependencies**.
//!
//! # Key Types
//!
//! |---------------------|--------------------------------------------------|
//! | Type                | Purpose                                          |
//! |---------------------|--------------------------------------------------|
//! | [`NodeId`]          | Node identity, unique per mounted instance       |
//! | [`FsId`]            | Which mounted devfs instance                     |
//! | [`NodeKind`]        | Directory, device or symlink                     |
//! | [`Stat`]            | Result of `read_stat`                            |
//! | [`StatUpdate`]      | Fields a `write_stat` call changes               |
//! | [`DeviceOp`]        | Device control opcodes devfs knows about         |
//! | [`DeviceGeometry`]  | Disk geometry as reported by drivers             |
//! | [`PartitionInfo`]   | Partition descriptor (offset, size, raw device)  |
//! |---------------------|--------------------------------------------------|

pub mod control;
pub mod ids;
pub mod io;
pub mod node;
pub mod stat;

// Re-export primary types at crate root for convenience.
pub use control::{DeviceGeometry, DeviceOp, LayoutError, PartitionInfo};
pub use ids::{FsId, NodeId};
pub use io::{OpenFlags, SelectEvent};
pub use node::{FileMode, NodeKind};
pub use stat::{Stat, StatMask, StatUpdate};
