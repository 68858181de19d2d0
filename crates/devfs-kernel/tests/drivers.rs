//! Driver images, lazy probing and I/O schedulers.

use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use devfs_kernel::driver::IoRequest;
use devfs_kernel::testing::{DriverCall, RamDisk};
use devfs_kernel::{
    DevFs, DevfsConfig, DevfsError, DevfsResult, DeviceCookie, DeviceHooks, DeviceOp,
    DriverImage, DriverLoader, DriverProbe, FsId, IoScheduler, OpenFlags, VnodeOps,
};

// ============================================================================
// Shared test setup
// ============================================================================

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn zero_hooks() -> DeviceHooks {
    DeviceHooks::new()
        .with_open(|_, _| Ok(DeviceCookie::new(1)))
        .with_close(|_| Ok(()))
        .with_read(|_, _, buf| {
            buf.fill(0);
            Ok(buf.len())
        })
        .with_write(|_, _, buf| Ok(buf.len()))
}

/// Publishes one device per image, named after the image file.
#[derive(Default)]
struct CountingLoader {
    loads: AtomicUsize,
    publish: bool,
}

impl DriverLoader for CountingLoader {
    fn load(&self, devfs: &DevFs, image: &Arc<DriverImage>) -> DevfsResult<usize> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        if !self.publish {
            return Ok(0);
        }
        let name = image
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        devfs.publish_device_for_image(&format!("misc/{name}"), zero_hooks(), image)?;
        Ok(1)
    }
}

fn driver_file(dir: &Path, name: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, b"\x7fELF").unwrap();
    path
}

// ============================================================================
// add_driver
// ============================================================================

#[test]
fn test_add_driver_loads_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    let image = driver_file(dir.path(), "zero");
    let link = dir.path().join("zero-link");
    fs::hard_link(&image, &link).unwrap();

    let loader = Arc::new(CountingLoader {
        publish: true,
        ..Default::default()
    });
    let devfs = DevFs::builder(FsId::new(1))
        .loader(loader.clone())
        .mount()
        .unwrap();

    assert_eq!(devfs.add_driver(&image).unwrap(), 1);
    assert_eq!(devfs.add_driver(&image).unwrap(), 1);
    // same file under another name
    assert_eq!(devfs.add_driver(&link).unwrap(), 1);
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(devfs.driver_images().len(), 1);

    // the device remembers where it came from
    let id = devfs.resolve("misc/zero").unwrap();
    let cookie = devfs.open(id, OpenFlags::read_only()).unwrap();
    let mut buf = [0u8; 512];
    devfs
        .ioctl(id, &cookie, DeviceOp::GetDriverForDevice.code(), &mut buf)
        .unwrap();
    let expected = image.to_string_lossy();
    let len = expected.len();
    assert_eq!(&buf[..len], expected.as_bytes());
    assert_eq!(buf[len], 0);

    let mut short = vec![0u8; len];
    assert_eq!(
        devfs.ioctl(id, &cookie, DeviceOp::GetDriverForDevice.code(), &mut short),
        Err(DevfsError::BufferOverflow { needed: len + 1 })
    );
}

#[test]
fn test_failed_load_is_replayed() {
    let dir = tempfile::tempdir().unwrap();
    let image = driver_file(dir.path(), "broken");
    let loader = Arc::new(CountingLoader::default());
    let devfs = DevFs::builder(FsId::new(1))
        .loader(loader.clone())
        .mount()
        .unwrap();

    assert!(matches!(devfs.add_driver(&image), Err(DevfsError::BadValue(_))));
    assert!(matches!(devfs.add_driver(&image), Err(DevfsError::BadValue(_))));
    assert_eq!(loader.loads.load(Ordering::SeqCst), 1);
    assert_eq!(devfs.driver_images().len(), 1);
}

#[test]
fn test_add_driver_without_loader() {
    let dir = tempfile::tempdir().unwrap();
    let image = driver_file(dir.path(), "zero");
    let devfs = DevFs::builder(FsId::new(1)).mount().unwrap();

    assert!(matches!(
        devfs.add_driver(&image),
        Err(DevfsError::NotSupported(_))
    ));
    assert!(matches!(
        devfs.add_driver(dir.path().join("missing")),
        Err(DevfsError::NotFound(_))
    ));
}

// ============================================================================
// Probing
// ============================================================================

/// Records which directories were probed; probing the root publishes
/// `misc/probed`.
#[derive(Default)]
struct RecordingProbe {
    paths: Mutex<Vec<String>>,
}

impl DriverProbe for RecordingProbe {
    fn probe(&self, devfs: &DevFs, path: &str) -> DevfsResult<()> {
        self.paths.lock().push(path.to_string());
        if path.is_empty() {
            devfs.publish_device("misc/probed", zero_hooks())?;
        }
        Ok(())
    }
}

#[test]
fn test_lookup_probes_once_per_generation() {
    init_tracing();
    let probe = Arc::new(RecordingProbe::default());
    let devfs = DevFs::builder(FsId::new(1))
        .probe(probe.clone())
        .mount()
        .unwrap();
    let root = devfs.root();

    // the probe publishes the very directory being looked up
    let (misc, _) = devfs.lookup(root, "misc").unwrap();
    let (probed, _) = devfs.lookup(misc, "probed").unwrap();
    devfs.lookup(root, "misc").unwrap();
    assert_eq!(*probe.paths.lock(), vec!["", "misc"]);

    // a new generation probes again; the republish fails and is ignored
    assert_eq!(devfs.bump_scan_generation(), 2);
    devfs.lookup(root, "misc").unwrap();
    devfs.open_dir(misc).unwrap();
    assert_eq!(*probe.paths.lock(), vec!["", "misc", "", "misc"]);

    devfs.put_vnode(probed).unwrap();
}

/// Holds the first root scan until the test releases it, then publishes
/// `late` and looks it up again from inside the scan.
struct GatedScan {
    calls: AtomicUsize,
    started: Barrier,
    release: Barrier,
}

impl DriverProbe for GatedScan {
    fn probe(&self, devfs: &DevFs, path: &str) -> DevfsResult<()> {
        if !path.is_empty() || self.calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Ok(());
        }
        self.started.wait();
        self.release.wait();
        devfs.publish_device("late", zero_hooks())?;

        // the scanning thread does not wait on itself
        let (id, _) = devfs.lookup(devfs.root(), "late")?;
        devfs.put_vnode(id)
    }
}

#[test]
fn test_concurrent_lookup_waits_for_running_scan() {
    init_tracing();
    let gate = Arc::new(GatedScan {
        calls: AtomicUsize::new(0),
        started: Barrier::new(2),
        release: Barrier::new(2),
    });
    let devfs = DevFs::builder(FsId::new(1))
        .probe(gate.clone())
        .mount()
        .unwrap();
    let root = devfs.root();

    thread::scope(|s| {
        let scanner = s.spawn(|| devfs.lookup(root, "late"));
        gate.started.wait();

        let waiter = s.spawn(|| devfs.lookup(root, "late"));
        // let the second lookup reach the directory mid-scan
        thread::sleep(Duration::from_millis(50));
        gate.release.wait();

        let (a, _) = scanner.join().unwrap().unwrap();
        let (b, _) = waiter.join().unwrap().unwrap();
        assert_eq!(a, b);
        devfs.put_vnode(a).unwrap();
        devfs.put_vnode(b).unwrap();
    });
    assert_eq!(gate.calls.load(Ordering::SeqCst), 1);
}

// ============================================================================
// Schedulers
// ============================================================================

/// Counts requests, then hands them to the driver.
struct CountingScheduler {
    driver: Arc<RamDisk>,
    requests: AtomicUsize,
}

impl IoScheduler for CountingScheduler {
    fn process(&self, request: &mut IoRequest<'_>) -> DevfsResult<()> {
        use devfs_kernel::{DeviceDriver, IoBuffer};

        self.requests.fetch_add(1, Ordering::SeqCst);
        let (cookie, pos) = (request.cookie, request.pos);
        request.transferred = match &mut request.buffer {
            IoBuffer::Read(buf) => self.driver.read(cookie, pos, buf)?,
            IoBuffer::Write(buf) => self.driver.write(cookie, pos, buf)?,
        };
        Ok(())
    }
}

#[test]
fn test_bind_scheduler_covers_partitions() {
    init_tracing();
    let devfs = DevFs::builder(FsId::new(1))
        .without_schedulers()
        .mount()
        .unwrap();
    let disk = Arc::new(RamDisk::new(4096));
    let raw = devfs.publish_driver("disk/ata/0/raw", disk.clone()).unwrap();
    let part = devfs
        .publish_partition(
            "disk/ata/0/0_0",
            devfs_kernel::PartitionInfo::new("disk/ata/0/raw", 512, 1024),
        )
        .unwrap();

    let scheduler = Arc::new(CountingScheduler {
        driver: disk.clone(),
        requests: AtomicUsize::new(0),
    });
    devfs
        .bind_scheduler("disk/ata/0/raw", scheduler.clone())
        .unwrap();

    let mut buf = [0u8; 16];
    let raw_cookie = devfs.open(raw, OpenFlags::read_only()).unwrap();
    devfs.read(raw, &raw_cookie, 0, &mut buf).unwrap();
    let part_cookie = devfs.open(part, OpenFlags::read_only()).unwrap();
    devfs.read(part, &part_cookie, 0, &mut buf).unwrap();

    assert_eq!(scheduler.requests.load(Ordering::SeqCst), 2);
    assert!(disk.calls().contains(&DriverCall::Read { pos: 512, len: 16 }));

    // only raw disks take a scheduler
    assert!(matches!(
        devfs.bind_scheduler("disk/ata/0/0_0", scheduler.clone()),
        Err(DevfsError::BadValue(_))
    ));
    devfs
        .publish_driver("misc/raw", Arc::new(RamDisk::new(16)))
        .unwrap();
    assert!(matches!(
        devfs.bind_scheduler("misc/raw", scheduler),
        Err(DevfsError::BadValue(_))
    ));
}

// ============================================================================
// Configuration
// ============================================================================

#[test]
fn test_config_from_toml() {
    let config = DevfsConfig::from_toml_str(
        r#"
        mount_point = "/devices"
        stat_block_size = 4096
        owner = 0
        group = 0
        "#,
    )
    .unwrap();
    let devfs = DevFs::builder(FsId::new(9)).config(config).mount().unwrap();
    let id = devfs.publish_device("misc/zero", zero_hooks()).unwrap();
    let cookie = devfs.open(id, OpenFlags::read_only()).unwrap();

    let mut buf = [0u8; 64];
    devfs
        .ioctl(id, &cookie, DeviceOp::GetPathForDevice.code(), &mut buf)
        .unwrap();
    assert!(buf.starts_with(b"/devices/misc/zero\0"));

    let stat = devfs.read_stat(id).unwrap();
    assert_eq!(stat.blksize, 4096);
    assert_eq!((stat.uid, stat.gid), (0, 0));
}
