//! Driver registry and the loading/probing collaborators.
//!
//! Devfs does not load drivers itself. `add_driver` records a driver image
//! by its on-disk identity and hands it to a [`DriverLoader`] exactly once;
//! the loader publishes whatever devices the driver provides. Lazy directory
//! rescans go through a [`DriverProbe`].

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};
use std::time::SystemTime;

use dashmap::DashMap;

use crate::devfs::DevFs;
use crate::error::DevfsResult;

/// A driver binary on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverImage {
    pub path: PathBuf,
    /// Device the image lives on (`st_dev`).
    pub device: u64,
    /// Inode of the image (`st_ino`).
    pub inode: u64,
    pub modified: Option<SystemTime>,
}

impl DriverImage {
    /// Stat the image at `path`.
    pub fn from_path(path: impl AsRef<Path>) -> DevfsResult<Self> {
        let path = path.as_ref();
        let meta = std::fs::metadata(path)?;
        let (device, inode) = file_identity(path, &meta);
        Ok(Self {
            path: path.to_path_buf(),
            device,
            inode,
            modified: meta.modified().ok(),
        })
    }

    /// Registry key: images are the same driver iff they are the same file.
    pub fn key(&self) -> (u64, u64) {
        (self.device, self.inode)
    }
}

#[cfg(unix)]
fn file_identity(_path: &Path, meta: &std::fs::Metadata) -> (u64, u64) {
    use std::os::unix::fs::MetadataExt;
    (meta.dev(), meta.ino())
}

#[cfg(not(unix))]
fn file_identity(path: &Path, _meta: &std::fs::Metadata) -> (u64, u64) {
    use std::hash::{DefaultHasher, Hash, Hasher};
    let canonical = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    let mut hasher = DefaultHasher::new();
    canonical.hash(&mut hasher);
    (0, hasher.finish())
}

/// Loads a driver image and publishes its devices.
pub trait DriverLoader: Send + Sync {
    /// Load `image`, publishing devices on `devfs` (typically through
    /// [`DevFs::publish_device_for_image`]). Returns how many devices were
    /// published; zero counts as a failed load.
    fn load(&self, devfs: &DevFs, image: &Arc<DriverImage>) -> DevfsResult<usize>;
}

/// Probes for drivers serving a directory.
pub trait DriverProbe: Send + Sync {
    /// Called the first time `path` (relative to the root, `""` for the root
    /// itself) is looked into after the scan generation moved on.
    fn probe(&self, devfs: &DevFs, path: &str) -> DevfsResult<()>;
}

pub(crate) struct DriverRecord {
    pub image: Arc<DriverImage>,
    /// Result of the one and only load attempt.
    pub outcome: OnceLock<DevfsResult<usize>>,
}

/// Every driver image ever added, keyed by file identity.
///
/// Entries are never removed, including those whose load failed, so adding
/// the same image twice replays the first outcome.
#[derive(Default)]
pub(crate) struct DriverRegistry {
    records: DashMap<(u64, u64), Arc<DriverRecord>>,
}

impl DriverRegistry {
    /// The record for `image`, created on first sight.
    pub fn register(&self, image: DriverImage) -> Arc<DriverRecord> {
        // clone out of the shard guard before anyone runs a loader
        self.records
            .entry(image.key())
            .or_insert_with(|| {
                Arc::new(DriverRecord {
                    image: Arc::new(image),
                    outcome: OnceLock::new(),
                })
            })
            .value()
            .clone()
    }

    pub fn images(&self) -> Vec<Arc<DriverImage>> {
        self.records
            .iter()
            .map(|entry| entry.value().image.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}
