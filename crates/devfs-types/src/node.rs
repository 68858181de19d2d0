//! Node kinds and POSIX mode bits.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// File type mask.
pub const S_IFMT: u32 = 0o170000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Character device.
pub const S_IFCHR: u32 = 0o020000;
/// Block device.
pub const S_IFBLK: u32 = 0o060000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;
/// Permission and set-id bits a `write_stat` may change.
pub const S_IUMSK: u32 = 0o7777;

/// What a node is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum NodeKind {
    /// Directory.
    Directory,
    /// Device bound to a driver (raw device or partition).
    Device,
    /// Symbolic link (file device).
    Symlink,
}

impl NodeKind {
    /// Returns true if this is a directory.
    pub fn is_dir(&self) -> bool {
        matches!(self, NodeKind::Directory)
    }

    /// Returns true if this is a device.
    pub fn is_device(&self) -> bool {
        matches!(self, NodeKind::Device)
    }

    /// Returns true if this is a symbolic link.
    pub fn is_symlink(&self) -> bool {
        matches!(self, NodeKind::Symlink)
    }

    /// The `S_IFMT` bits a node of this kind reports.
    ///
    /// Devices report as character devices; partitions are upgraded to
    /// block devices by `read_stat`.
    pub fn type_bits(&self) -> u32 {
        match self {
            NodeKind::Directory => S_IFDIR,
            NodeKind::Device => S_IFCHR,
            NodeKind::Symlink => S_IFLNK,
        }
    }
}

/// A full `st_mode` value (type bits plus permissions).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FileMode(u32);

impl FileMode {
    /// Build a mode from a node kind and permission bits.
    pub fn new(kind: NodeKind, permissions: u32) -> Self {
        Self(kind.type_bits() | (permissions & S_IUMSK))
    }

    /// Wrap a raw `st_mode`.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw `st_mode`.
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Permission bits only.
    pub fn permissions(&self) -> u32 {
        self.0 & S_IUMSK
    }

    /// Type bits only.
    pub fn type_bits(&self) -> u32 {
        self.0 & S_IFMT
    }

    /// The same permissions with different type bits.
    pub fn with_type_bits(&self, type_bits: u32) -> Self {
        Self((type_bits & S_IFMT) | self.permissions())
    }

    /// Returns true for `S_IFBLK`.
    pub fn is_block_device(&self) -> bool {
        self.type_bits() == S_IFBLK
    }

    /// Returns true for `S_IFCHR`.
    pub fn is_char_device(&self) -> bool {
        self.type_bits() == S_IFCHR
    }
}
