//! # devfs-kernel
//!
//! Device filesystem: an in-memory namespace where drivers publish devices
//! as filesystem nodes.
//!
//! A mounted [`DevFs`]:
//! - Owns a tree of directories, device nodes and symlinks ("file devices")
//! - Lets drivers publish and unpublish devices at runtime, creating the
//!   directories on the way
//! - Layers partitions over raw disks, translating offsets into the window
//! - Serves the VFS through [`VnodeOps`]: lookup, open, read/write, ioctl,
//!   select, directory iteration, stat
//! - Probes for drivers lazily, once per scan generation per directory
//!
//! Driver calls never run under the namespace lock.

mod binding;
mod dispatch;
mod node;
mod partition;
mod publish;
mod tree;

pub mod config;
pub mod cookie;
pub mod devfs;
pub mod driver;
pub mod error;
pub mod notify;
pub mod ops;
pub mod registry;
pub mod testing;

pub use config::{Credentials, DevfsConfig};
pub use cookie::{DirCookie, FileCookie};
pub use devfs::{DevFs, DevFsBuilder};
pub use driver::{
    DeviceCookie, DeviceDriver, DeviceHooks, IoBuffer, IoRequest, IoScheduler, LegacyDriver,
    SchedulerFactory, SelectSync, SerialScheduler, SerialSchedulerFactory,
};
pub use error::{DevfsError, DevfsResult};
pub use notify::{NodeEvent, NotificationSink, TracingSink};
pub use ops::{DirEntry, VnodeOps};
pub use partition::translate;
pub use registry::{DriverImage, DriverLoader, DriverProbe};

pub use devfs_types::{
    DeviceGeometry, DeviceOp, FileMode, FsId, NodeId, NodeKind, OpenFlags, PartitionInfo,
    SelectEvent, Stat, StatMask, StatUpdate,
};
