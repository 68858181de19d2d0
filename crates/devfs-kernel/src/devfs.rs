//! The mounted filesystem.

use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::thread;

use devfs_types::{FsId, NodeId};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, info, warn};

use crate::binding::DeviceBinding;
use crate::config::DevfsConfig;
use crate::driver::{DeviceDriver, IoScheduler, SchedulerFactory, SerialSchedulerFactory};
use crate::error::{DevfsError, DevfsResult};
use crate::node::NodeBody;
use crate::notify::{NotificationSink, TracingSink};
use crate::registry::{DriverImage, DriverLoader, DriverProbe, DriverRegistry};
use crate::tree::Namespace;

/// One mounted devfs instance.
///
/// All state hangs off this value; there is no process-wide singleton.
/// Share it behind an `Arc` when drivers and the VFS live on different
/// threads.
pub struct DevFs {
    id: FsId,
    config: DevfsConfig,
    namespace: Mutex<Namespace>,
    /// Signalled whenever a directory probe finishes.
    scan_done: Condvar,
    scan_generation: AtomicU32,
    drivers: DriverRegistry,
    probe: Option<Arc<dyn DriverProbe>>,
    loader: Option<Arc<dyn DriverLoader>>,
    schedulers: Option<Arc<dyn SchedulerFactory>>,
    notifications: Arc<dyn NotificationSink>,
}

/// Builder for [`DevFs`].
pub struct DevFsBuilder {
    id: FsId,
    config: DevfsConfig,
    probe: Option<Arc<dyn DriverProbe>>,
    loader: Option<Arc<dyn DriverLoader>>,
    schedulers: Option<Arc<dyn SchedulerFactory>>,
    notifications: Arc<dyn NotificationSink>,
}

impl DevFsBuilder {
    pub fn config(mut self, config: DevfsConfig) -> Self {
        self.config = config;
        self
    }

    /// Probe invoked on lazy directory rescans.
    pub fn probe(mut self, probe: Arc<dyn DriverProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Loader invoked by `add_driver`.
    pub fn loader(mut self, loader: Arc<dyn DriverLoader>) -> Self {
        self.loader = Some(loader);
        self
    }

    /// Scheduler factory for raw disks. Defaults to [`SerialSchedulerFactory`].
    pub fn scheduler_factory(mut self, factory: Arc<dyn SchedulerFactory>) -> Self {
        self.schedulers = Some(factory);
        self
    }

    /// Publish raw disks without a scheduler; I/O goes straight to drivers.
    pub fn without_schedulers(mut self) -> Self {
        self.schedulers = None;
        self
    }

    /// Where namespace events go. Defaults to [`TracingSink`].
    pub fn notifications(mut self, sink: Arc<dyn NotificationSink>) -> Self {
        self.notifications = sink;
        self
    }

    /// Create the root directory and return the mounted filesystem.
    pub fn mount(self) -> DevfsResult<DevFs> {
        let creds = self.config.credentials();
        let namespace = Namespace::new(self.id, creds)?;
        info!(fs = %self.id, mount_point = %self.config.mount_point, root = %namespace.root, "mounted devfs");

        Ok(DevFs {
            id: self.id,
            config: self.config,
            namespace: Mutex::new(namespace),
            scan_done: Condvar::new(),
            scan_generation: AtomicU32::new(1),
            drivers: DriverRegistry::default(),
            probe: self.probe,
            loader: self.loader,
            schedulers: self.schedulers,
            notifications: self.notifications,
        })
    }
}

impl fmt::Debug for DevFs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DevFs")
            .field("id", &self.id)
            .field("mount_point", &self.config.mount_point)
            .field("scan_generation", &self.scan_generation())
            .field("drivers", &self.drivers.len())
            .finish_non_exhaustive()
    }
}

impl DevFs {
    pub fn builder(id: FsId) -> DevFsBuilder {
        DevFsBuilder {
            id,
            config: DevfsConfig::default(),
            probe: None,
            loader: None,
            schedulers: Some(Arc::new(SerialSchedulerFactory)),
            notifications: Arc::new(TracingSink),
        }
    }

    pub fn id(&self) -> FsId {
        self.id
    }

    pub fn config(&self) -> &DevfsConfig {
        &self.config
    }

    /// Run `f` under the namespace lock, then deliver the events it raised.
    pub(crate) fn locked<R>(&self, f: impl FnOnce(&mut Namespace) -> R) -> R {
        let (result, events) = {
            let mut ns = self.namespace.lock();
            let result = f(&mut ns);
            (result, ns.take_events())
        };
        for event in &events {
            self.notifications.notify(event);
        }
        result
    }

    /// Resolve a path relative to the root without taking a reference.
    pub fn resolve(&self, path: &str) -> DevfsResult<NodeId> {
        self.locked(|ns| ns.resolve(path))
    }

    /// Full device path of a node, e.g. `disk/virtual/raw`.
    pub fn device_path(&self, id: NodeId) -> DevfsResult<String> {
        self.locked(|ns| ns.device_path(id))
    }

    /// Number of live nodes, including the root.
    pub fn node_count(&self) -> usize {
        self.locked(|ns| ns.table.len())
    }

    pub(crate) fn binding(&self, id: NodeId) -> DevfsResult<Arc<DeviceBinding>> {
        self.locked(|ns| {
            let node = ns.node(id)?;
            node.binding()
                .cloned()
                .ok_or_else(|| DevfsError::bad_value(format!("{} is not a device", node.name)))
        })
    }

    pub(crate) fn scheduler_for(
        &self,
        path: &str,
        driver: &Arc<dyn DeviceDriver>,
    ) -> Option<Arc<dyn IoScheduler>> {
        if !self.config.is_raw_disk(path) {
            return None;
        }
        self.schedulers.as_ref().and_then(|f| f.create(path, driver))
    }

    // ========================================================================
    // Scanning
    // ========================================================================

    pub fn scan_generation(&self) -> u32 {
        self.scan_generation.load(Ordering::Acquire)
    }

    /// Make every directory probe for drivers again on its next lookup.
    pub fn bump_scan_generation(&self) -> u32 {
        let generation = self.scan_generation.fetch_add(1, Ordering::AcqRel) + 1;
        debug!(generation, "scan generation bumped");
        generation
    }

    /// Probe `dir` if it has not been scanned at the current generation.
    ///
    /// The probe runs unlocked so it can publish into this very directory.
    /// Only one thread probes a directory at a time; other callers wait
    /// until it finishes and then see what it published. The probing
    /// thread itself passes straight through.
    pub(crate) fn rescan_if_stale(&self, dir: NodeId) -> DevfsResult<()> {
        let generation = self.scan_generation();
        let me = thread::current().id();

        let path = {
            let mut ns = self.namespace.lock();
            loop {
                let node = ns.node_mut(dir)?;
                let name = node.name.clone();
                let body = node
                    .dir_mut()
                    .ok_or_else(|| DevfsError::not_a_directory(name))?;
                match body.scanning {
                    Some(owner) if owner == me => return Ok(()),
                    Some(_) => {}
                    None if body.scanned >= generation => return Ok(()),
                    None => break,
                }
                self.scan_done.wait(&mut ns);
            }

            let path = ns.device_path(dir)?;
            if let Some(body) = ns.node_mut(dir)?.dir_mut() {
                body.scanning = Some(me);
            }
            path
        };

        let _scan = ScanGuard {
            devfs: self,
            dir,
            generation,
        };
        if let Some(probe) = &self.probe {
            debug!(path = %path, generation, "probing directory");
            if let Err(e) = probe.probe(self, &path) {
                warn!(path = %path, error = %e, "driver probe failed");
            }
        }
        Ok(())
    }

    // ========================================================================
    // Schedulers
    // ========================================================================

    /// Route I/O for the raw disk at `path` (and its partitions) through
    /// `scheduler`.
    pub fn bind_scheduler(&self, path: &str, scheduler: Arc<dyn IoScheduler>) -> DevfsResult<()> {
        if !self.config.is_raw_disk(path) {
            return Err(DevfsError::bad_value(format!("{path} is not a raw disk")));
        }

        self.locked(|ns| {
            let id = ns.resolve(path)?;
            let node = ns.node(id)?;
            let binding = match node.binding() {
                Some(b) if !b.is_partition() => b,
                _ => return Err(DevfsError::bad_value(format!("{path} is not a raw device"))),
            };
            let rebound = Arc::new(DeviceBinding {
                scheduler: Some(scheduler.clone()),
                ..DeviceBinding::clone(binding)
            });
            ns.node_mut(id)?.body = NodeBody::Device(rebound);

            for part in ns.partitions_of(id) {
                let rebound = match &ns.node(part)?.body {
                    NodeBody::Device(binding) => Arc::new(DeviceBinding {
                        scheduler: Some(scheduler.clone()),
                        ..DeviceBinding::clone(binding)
                    }),
                    _ => continue,
                };
                ns.node_mut(part)?.body = NodeBody::Device(rebound);
            }
            debug!(path, "bound I/O scheduler");
            Ok(())
        })
    }

    // ========================================================================
    // Drivers
    // ========================================================================

    /// Register the driver image at `path` and load it once.
    ///
    /// Images are keyed by file identity, so calling this again (under any
    /// path naming the same file) replays the first outcome instead of
    /// loading twice. Returns the number of devices the load published.
    pub fn add_driver(&self, path: impl AsRef<Path>) -> DevfsResult<usize> {
        let image = DriverImage::from_path(path)?;
        let record = self.drivers.register(image);
        record
            .outcome
            .get_or_init(|| self.load_driver(&record.image))
            .clone()
    }

    fn load_driver(&self, image: &Arc<DriverImage>) -> DevfsResult<usize> {
        let Some(loader) = &self.loader else {
            return Err(DevfsError::not_supported("no driver loader configured"));
        };

        match loader.load(self, image) {
            Ok(0) => {
                warn!(path = %image.path.display(), "driver published no devices");
                Err(DevfsError::bad_value(format!(
                    "{} published no devices",
                    image.path.display()
                )))
            }
            Ok(count) => {
                info!(path = %image.path.display(), count, "driver loaded");
                Ok(count)
            }
            Err(e) => {
                warn!(path = %image.path.display(), error = %e, "driver load failed");
                Err(e)
            }
        }
    }

    /// Every driver image registered so far.
    pub fn driver_images(&self) -> Vec<Arc<DriverImage>> {
        self.drivers.images()
    }

    /// Drop every node regardless of references.
    pub(crate) fn teardown(&self) {
        let nodes = self.locked(|ns| {
            ns.take_events();
            ns.table.drain()
        });
        info!(fs = %self.id, nodes = nodes.len(), "unmounted devfs");
        // bindings (and with them drivers) are dropped here, unlocked
        drop(nodes);
    }
}

/// Marks a directory scanned and wakes waiters when the probe returns,
/// including by unwinding.
struct ScanGuard<'a> {
    devfs: &'a DevFs,
    dir: NodeId,
    generation: u32,
}

impl Drop for ScanGuard<'_> {
    fn drop(&mut self) {
        {
            let mut ns = self.devfs.namespace.lock();
            // the directory may have been unpublished meanwhile
            if let Some(body) = ns.node_mut(self.dir).ok().and_then(|n| n.dir_mut()) {
                body.scanning = None;
                body.scanned = body.scanned.max(self.generation);
            }
        }
        self.devfs.scan_done.notify_all();
    }
}
