//! Partition overlays end to end: publish a raw disk, layer partitions on
//! it, and check what the driver actually sees.

use std::sync::Arc;

use devfs_kernel::testing::{DriverCall, RamDisk};
use devfs_kernel::{
    DevFs, DevfsError, DeviceGeometry, DeviceOp, FsId, NodeId, OpenFlags, PartitionInfo,
    VnodeOps,
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

/// A devfs with an 8 KiB disk at `disk/virtual/raw` and `part1` covering
/// bytes 1024..5120 of it.
fn disk_with_partition() -> (DevFs, Arc<RamDisk>, NodeId) {
    init_tracing();
    let fs = DevFs::builder(FsId::new(7)).mount().unwrap();
    let disk = Arc::new(RamDisk::new(8192));
    fs.publish_driver("disk/virtual/raw", disk.clone()).unwrap();
    let part = fs
        .publish_partition(
            "disk/virtual/part1",
            PartitionInfo::new("disk/virtual/raw", 1024, 4096),
        )
        .unwrap();
    (fs, disk, part)
}

fn reads(calls: &[DriverCall]) -> Vec<DriverCall> {
    calls
        .iter()
        .filter(|c| matches!(c, DriverCall::Read { .. }))
        .cloned()
        .collect()
}

// ============================================================================
// Translation
// ============================================================================

#[test]
fn test_partition_reads_reach_driver_at_absolute_offsets() {
    let (fs, disk, part) = disk_with_partition();
    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();

    let mut buf = [0u8; 100];
    assert_eq!(fs.read(part, &cookie, 0, &mut buf).unwrap(), 100);
    assert_eq!(fs.read(part, &cookie, 4090, &mut buf).unwrap(), 6);

    assert_eq!(
        reads(&disk.calls()),
        vec![
            DriverCall::Read { pos: 1024, len: 100 },
            DriverCall::Read { pos: 5114, len: 6 },
        ]
    );
}

#[test]
fn test_partition_open_passes_partition_path() {
    let (fs, disk, part) = disk_with_partition();
    fs.open(part, OpenFlags::READ_WRITE).unwrap();
    assert_eq!(
        disk.calls(),
        vec![DriverCall::Open {
            path: "disk/virtual/part1".to_string(),
            flags: OpenFlags::READ_WRITE,
        }]
    );
}

#[test]
fn test_partition_bound() {
    let (fs, disk, part) = disk_with_partition();
    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();
    disk.clear_calls();

    let mut buf = [0u8; 10];
    assert_eq!(fs.read(part, &cookie, 4096, &mut buf).unwrap(), 0);
    assert!(disk.calls().is_empty());

    assert_eq!(fs.read(part, &cookie, 4095, &mut buf).unwrap(), 1);
    assert_eq!(reads(&disk.calls()), vec![DriverCall::Read { pos: 5119, len: 1 }]);
}

#[test]
fn test_partition_writes_land_inside_window() {
    let (fs, disk, part) = disk_with_partition();
    let cookie = fs.open(part, OpenFlags::READ_WRITE).unwrap();

    assert_eq!(fs.write(part, &cookie, 4094, b"abcd").unwrap(), 2);
    let contents = disk.contents();
    assert_eq!(&contents[5118..5120], b"ab");
    assert_eq!(contents[5120], 0);
}

#[test]
fn test_partition_without_scheduler() {
    let fs = DevFs::builder(FsId::new(7))
        .without_schedulers()
        .mount()
        .unwrap();
    let disk = Arc::new(RamDisk::new(8192));
    fs.publish_driver("disk/virtual/raw", disk.clone()).unwrap();
    let part = fs
        .publish_partition(
            "disk/virtual/part1",
            PartitionInfo::new("disk/virtual/raw", 1024, 4096),
        )
        .unwrap();

    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();
    let mut buf = [0u8; 100];
    fs.read(part, &cookie, 4090, &mut buf).unwrap();
    assert_eq!(
        reads(&disk.calls()),
        vec![DriverCall::Read { pos: 5114, len: 6 }]
    );
}

#[test]
fn test_partition_pages() {
    init_tracing();
    let fs = DevFs::builder(FsId::new(7)).mount().unwrap();
    let disk = Arc::new(RamDisk::new(8192).with_pages());
    fs.publish_driver("disk/virtual/raw", disk.clone()).unwrap();
    let part = fs
        .publish_partition(
            "disk/virtual/part1",
            PartitionInfo::new("disk/virtual/raw", 1024, 4096),
        )
        .unwrap();

    let cookie = fs.open(part, OpenFlags::READ_WRITE).unwrap();
    assert!(fs.can_page(part, &cookie));

    let page = [0x5au8; 512];
    let written = fs
        .write_pages(part, &cookie, 3840, &[&page[..], &page[..]])
        .unwrap();
    assert_eq!(written, 256);
    assert_eq!(
        disk.calls().last(),
        Some(&DriverCall::WritePages { pos: 4864, len: 256 })
    );
}

#[test]
fn test_partition_offset_overflow_is_rejected() {
    init_tracing();
    let fs = DevFs::builder(FsId::new(7)).mount().unwrap();
    let disk = Arc::new(RamDisk::new(64));
    fs.publish_driver("disk/virtual/raw", disk.clone()).unwrap();
    let part = fs
        .publish_partition(
            "disk/virtual/far",
            PartitionInfo::new("disk/virtual/raw", i64::MAX - 10, 100),
        )
        .unwrap();
    let cookie = fs.open(part, OpenFlags::READ_WRITE).unwrap();
    disk.clear_calls();

    let mut buf = [0u8; 4];
    assert!(matches!(
        fs.read(part, &cookie, 50, &mut buf),
        Err(DevfsError::BadValue(_))
    ));
    assert!(matches!(
        fs.write(part, &cookie, 50, b"abcd"),
        Err(DevfsError::BadValue(_))
    ));
    assert!(disk.calls().is_empty());
}

// ============================================================================
// Lifetime
// ============================================================================

#[test]
fn test_raw_device_with_partitions_cannot_be_unpublished() {
    let (fs, _disk, _part) = disk_with_partition();

    assert!(matches!(
        fs.unpublish_device("disk/virtual/raw"),
        Err(DevfsError::NotAllowed(_))
    ));
    // still there and still usable
    let raw = fs.resolve("disk/virtual/raw").unwrap();
    fs.open(raw, OpenFlags::read_only()).unwrap();

    fs.unpublish_partition("disk/virtual/part1").unwrap();
    fs.unpublish_device("disk/virtual/raw").unwrap();
    assert!(fs.resolve("disk/virtual/raw").is_err());
}

#[test]
fn test_referenced_partition_keeps_raw_device_alive() {
    let (fs, _disk, part) = disk_with_partition();
    let virtual_dir = fs.resolve("disk/virtual").unwrap();

    let (looked_up, _) = fs.lookup(virtual_dir, "part1").unwrap();
    assert_eq!(looked_up, part);
    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();

    fs.unpublish_partition("disk/virtual/part1").unwrap();
    fs.unpublish_device("disk/virtual/raw").unwrap();
    assert!(fs.resolve("disk/virtual/part1").is_err());

    // the VFS still holds the partition: I/O keeps working
    let mut buf = [0u8; 4];
    assert_eq!(fs.read(part, &cookie, 0, &mut buf).unwrap(), 4);

    // part1 and raw linger until the last reference goes
    let before = fs.node_count();
    fs.put_vnode(part).unwrap();
    assert_eq!(fs.node_count(), before - 2);
}

// ============================================================================
// Control
// ============================================================================

#[test]
fn test_partition_info_ioctl() {
    let (fs, _disk, part) = disk_with_partition();
    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();

    let mut buf = vec![0u8; PartitionInfo::SIZE];
    fs.ioctl(part, &cookie, DeviceOp::GetPartitionInfo.code(), &mut buf)
        .unwrap();
    let info = PartitionInfo::decode(&buf).unwrap();
    assert_eq!(info.offset, 1024);
    assert_eq!(info.size, 4096);
    assert_eq!(info.device, "disk/virtual/raw");

    let mut short = vec![0u8; PartitionInfo::SIZE - 1];
    assert!(matches!(
        fs.ioctl(part, &cookie, DeviceOp::GetPartitionInfo.code(), &mut short),
        Err(DevfsError::BadValue(_))
    ));

    let raw = fs.resolve("disk/virtual/raw").unwrap();
    let raw_cookie = fs.open(raw, OpenFlags::read_only()).unwrap();
    assert!(matches!(
        fs.ioctl(raw, &raw_cookie, DeviceOp::GetPartitionInfo.code(), &mut buf),
        Err(DevfsError::BadValue(_))
    ));

    assert!(matches!(
        fs.ioctl(part, &cookie, DeviceOp::SetPartition.code(), &mut buf),
        Err(DevfsError::NotAllowed(_))
    ));
}

#[test]
fn test_partition_geometry_ioctl() {
    let (fs, _disk, part) = disk_with_partition();
    let cookie = fs.open(part, OpenFlags::read_only()).unwrap();

    let mut buf = [0u8; DeviceGeometry::SIZE];
    fs.ioctl(part, &cookie, DeviceOp::GetGeometry.code(), &mut buf)
        .unwrap();
    let geometry = DeviceGeometry::decode(&buf).unwrap();
    assert_eq!(geometry.bytes_per_sector, 512);
    assert_eq!(geometry.capacity(), 4096);

    // the raw disk reports its own geometry untouched
    let raw = fs.resolve("disk/virtual/raw").unwrap();
    let raw_cookie = fs.open(raw, OpenFlags::read_only()).unwrap();
    fs.ioctl(raw, &raw_cookie, DeviceOp::GetGeometry.code(), &mut buf)
        .unwrap();
    assert_eq!(DeviceGeometry::decode(&buf).unwrap().capacity(), 8192);
}

#[test]
fn test_partition_stat_reports_block_device() {
    let (fs, _disk, part) = disk_with_partition();
    let stat = fs.read_stat(part).unwrap();
    assert_eq!(stat.size, 4096);
    assert!(stat.mode.is_block_device());

    let raw = fs.resolve("disk/virtual/raw").unwrap();
    let stat = fs.read_stat(raw).unwrap();
    assert_eq!(stat.size, 0);
    assert!(stat.mode.is_char_device());
}

#[test]
fn test_empty_partition_is_still_a_block_device() {
    let (fs, _disk, _part) = disk_with_partition();
    let empty = fs
        .publish_partition(
            "disk/virtual/empty",
            PartitionInfo::new("disk/virtual/raw", 0, 0),
        )
        .unwrap();
    let stat = fs.read_stat(empty).unwrap();
    assert_eq!(stat.size, 0);
    assert!(stat.mode.is_block_device());
}
