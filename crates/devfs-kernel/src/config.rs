//! Mount-time configuration.

use serde::{Deserialize, Serialize};

use crate::error::{DevfsError, DevfsResult};

/// Configuration for one mounted devfs.
///
/// Every field has a default, so an empty TOML document is a valid config.
///
/// ```toml
/// mount_point = "/dev"
/// disk_prefix = "disk/"
/// stat_block_size = 65536
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DevfsConfig {
    /// Where the filesystem is mounted; prefix of paths reported by
    /// `GetPathForDevice`.
    pub mount_point: String,

    /// Device category whose raw nodes are driven through an I/O scheduler.
    pub disk_prefix: String,

    /// Leaf name of raw disk devices.
    pub raw_device_name: String,

    /// `blksize` reported by `read_stat`.
    pub stat_block_size: u32,

    /// Owner of new nodes. Defaults to the effective user.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner: Option<u32>,

    /// Group of the root directory. Defaults to the effective group.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
}

impl Default for DevfsConfig {
    fn default() -> Self {
        Self {
            mount_point: "/dev".to_string(),
            disk_prefix: "disk/".to_string(),
            raw_device_name: "raw".to_string(),
            stat_block_size: 65536,
            owner: None,
            group: None,
        }
    }
}

impl DevfsConfig {
    /// Create the default config.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML.
    pub fn from_toml_str(src: &str) -> DevfsResult<Self> {
        toml::from_str(src).map_err(|e| DevfsError::bad_value(format!("devfs config: {e}")))
    }

    /// Set the mount point.
    pub fn with_mount_point(mut self, mount_point: impl Into<String>) -> Self {
        self.mount_point = mount_point.into();
        self
    }

    /// Set the disk category prefix.
    pub fn with_disk_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.disk_prefix = prefix.into();
        self
    }

    /// Set the stat block size.
    pub fn with_stat_block_size(mut self, size: u32) -> Self {
        self.stat_block_size = size;
        self
    }

    /// Set the owner and group of new nodes.
    pub fn with_credentials(mut self, uid: u32, gid: u32) -> Self {
        self.owner = Some(uid);
        self.group = Some(gid);
        self
    }

    /// Credentials for new nodes: configured values over the effective IDs.
    pub fn credentials(&self) -> Credentials {
        let effective = Credentials::effective();
        Credentials {
            uid: self.owner.unwrap_or(effective.uid),
            gid: self.group.unwrap_or(effective.gid),
        }
    }

    /// Returns true if `path` is a raw device under the disk category,
    /// i.e. a node that gets an I/O scheduler.
    pub fn is_raw_disk(&self, path: &str) -> bool {
        path.starts_with(&self.disk_prefix)
            && path.rsplit('/').next() == Some(self.raw_device_name.as_str())
    }
}

/// Owner and group of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
}

impl Credentials {
    /// The calling process's effective user and group.
    #[cfg(unix)]
    pub fn effective() -> Self {
        Self {
            uid: rustix::process::geteuid().as_raw(),
            gid: rustix::process::getegid().as_raw(),
        }
    }

    /// The calling process's effective user and group.
    #[cfg(not(unix))]
    pub fn effective() -> Self {
        Self { uid: 0, gid: 0 }
    }
}
