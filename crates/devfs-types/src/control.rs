//! Device control opcodes and the binary layouts they exchange.
//!
//! Drivers see `control` buffers as raw bytes, so geometry and partition
//! descriptors have a fixed little-endian layout:
//!
//! ```text
//! DeviceGeometry (20 bytes)
//!   0  u32 bytes_per_sector
//!   4  u32 sectors_per_track
//!   8  u32 cylinder_count
//!  12  u32 head_count
//!  16  u8  device_type
//!  17  u8  removable
//!  18  u8  read_only
//!  19  u8  write_once
//!
//! PartitionInfo (284 bytes)
//!   0  i64 offset
//!   8  i64 size
//!  16  i32 logical_block_size
//!  20  i32 session
//!  24  i32 partition
//!  28  [u8; 256] device path, NUL terminated
//! ```

use bytemuck::{Pod, Zeroable};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, FromRepr};
use thiserror::Error;

/// Length of the device path field in [`PartitionInfo`], including the NUL.
pub const DEVICE_NAME_LENGTH: usize = 256;

/// Errors from encoding or decoding a control buffer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LayoutError {
    /// The buffer does not have the size the layout requires.
    #[error("buffer is {actual} bytes, layout needs {expected}")]
    BufferSize {
        /// Required size.
        expected: usize,
        /// Size that was supplied.
        actual: usize,
    },

    /// The device path does not fit the fixed-size field.
    #[error("device path is {0} bytes, at most {max} fit", max = DEVICE_NAME_LENGTH - 1)]
    DeviceNameTooLong(usize),

    /// The device path is not UTF-8.
    #[error("device path is not valid UTF-8")]
    InvalidDeviceName,
}

/// Device control opcodes devfs knows about.
///
/// Anything else a caller passes to `ioctl` goes straight to the driver.
///
/// Map a numeric opcode back with [`DeviceOp::from_repr`].
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString, FromRepr,
)]
#[strum(serialize_all = "snake_case")]
#[repr(u32)]
pub enum DeviceOp {
    GetDeviceSize = 1,
    SetDeviceSize = 2,
    SetNonBlockingIo = 3,
    SetBlockingIo = 4,
    GetReadStatus = 5,
    GetWriteStatus = 6,
    GetGeometry = 7,
    GetDriverForDevice = 8,
    GetPartitionInfo = 9,
    SetPartition = 10,
    FormatDevice = 11,
    EjectDevice = 12,
    GetIcon = 13,
    GetBiosGeometry = 14,
    GetMediaStatus = 15,
    LoadMedia = 16,
    GetBiosDriveId = 17,
    SetUninterruptableIo = 18,
    SetInterruptableIo = 19,
    FlushDriveCache = 20,
    GetPathForDevice = 21,
    // legacy, private to the old driver API
    GetNextOpenDevice = 1000,
    AddFixedDriver = 1001,
    RemoveFixedDriver = 1002,
}

impl DeviceOp {
    /// The numeric opcode.
    pub fn code(&self) -> u32 {
        *self as u32
    }

    /// Returns true for the old private opcodes devfs refuses.
    pub fn is_legacy(&self) -> bool {
        matches!(
            self,
            DeviceOp::GetNextOpenDevice | DeviceOp::AddFixedDriver | DeviceOp::RemoveFixedDriver
        )
    }
}

/// Disk geometry.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceGeometry {
    pub bytes_per_sector: u32,
    pub sectors_per_track: u32,
    pub cylinder_count: u32,
    pub head_count: u32,
    pub device_type: u8,
    pub removable: bool,
    pub read_only: bool,
    pub write_once: bool,
}

impl DeviceGeometry {
    /// Encoded size in bytes.
    pub const SIZE: usize = 20;

    /// Capacity in bytes described by this geometry.
    pub fn capacity(&self) -> u64 {
        u64::from(self.bytes_per_sector)
            * u64::from(self.sectors_per_track)
            * u64::from(self.cylinder_count)
            * u64::from(self.head_count)
    }

    /// Write the fixed layout into the first [`Self::SIZE`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), LayoutError> {
        let wire = GeometryWire {
            bytes_per_sector: self.bytes_per_sector.to_le(),
            sectors_per_track: self.sectors_per_track.to_le(),
            cylinder_count: self.cylinder_count.to_le(),
            head_count: self.head_count.to_le(),
            device_type: self.device_type,
            removable: u8::from(self.removable),
            read_only: u8::from(self.read_only),
            write_once: u8::from(self.write_once),
        };
        fit(buf, Self::SIZE)?.copy_from_slice(bytemuck::bytes_of(&wire));
        Ok(())
    }

    /// Read the fixed layout from the first [`Self::SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        let wire: GeometryWire = bytemuck::pod_read_unaligned(head(buf, Self::SIZE)?);
        Ok(Self {
            bytes_per_sector: u32::from_le(wire.bytes_per_sector),
            sectors_per_track: u32::from_le(wire.sectors_per_track),
            cylinder_count: u32::from_le(wire.cylinder_count),
            head_count: u32::from_le(wire.head_count),
            device_type: wire.device_type,
            removable: wire.removable != 0,
            read_only: wire.read_only != 0,
            write_once: wire.write_once != 0,
        })
    }
}

/// Partition descriptor: a window over a raw device.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionInfo {
    /// Byte offset of the partition on the raw device.
    pub offset: i64,
    /// Size of the partition in bytes.
    pub size: i64,
    pub logical_block_size: i32,
    pub session: i32,
    pub partition: i32,
    /// Path of the raw device, relative to the devfs root or under the mount point.
    pub device: String,
}

impl PartitionInfo {
    /// Encoded size in bytes.
    pub const SIZE: usize = 28 + DEVICE_NAME_LENGTH;

    /// Create a descriptor for `device` covering `size` bytes at `offset`.
    pub fn new(device: impl Into<String>, offset: i64, size: i64) -> Self {
        Self {
            offset,
            size,
            logical_block_size: 512,
            session: 0,
            partition: 0,
            device: device.into(),
        }
    }

    /// Set the session and partition index.
    pub fn with_index(mut self, session: i32, partition: i32) -> Self {
        self.session = session;
        self.partition = partition;
        self
    }

    /// Write the fixed layout into the first [`Self::SIZE`] bytes of `buf`.
    pub fn encode(&self, buf: &mut [u8]) -> Result<(), LayoutError> {
        let name = self.device.as_bytes();
        if name.len() >= DEVICE_NAME_LENGTH {
            return Err(LayoutError::DeviceNameTooLong(name.len()));
        }
        let mut device = [0u8; DEVICE_NAME_LENGTH];
        device[..name.len()].copy_from_slice(name);

        let wire = PartitionWire {
            offset: self.offset.to_le(),
            size: self.size.to_le(),
            logical_block_size: self.logical_block_size.to_le(),
            session: self.session.to_le(),
            partition: self.partition.to_le(),
            device,
        };
        fit(buf, Self::SIZE)?.copy_from_slice(bytemuck::bytes_of(&wire));
        Ok(())
    }

    /// Read the fixed layout from the first [`Self::SIZE`] bytes of `buf`.
    pub fn decode(buf: &[u8]) -> Result<Self, LayoutError> {
        let wire: PartitionWire = bytemuck::pod_read_unaligned(head(buf, Self::SIZE)?);
        let field = wire.device;
        let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let device = std::str::from_utf8(&field[..end])
            .map_err(|_| LayoutError::InvalidDeviceName)?
            .to_string();

        Ok(Self {
            offset: i64::from_le(wire.offset),
            size: i64::from_le(wire.size),
            logical_block_size: i32::from_le(wire.logical_block_size),
            session: i32::from_le(wire.session),
            partition: i32::from_le(wire.partition),
            device,
        })
    }
}

// ============================================================================
// Wire layouts
// ============================================================================

/// [`DeviceGeometry`] as drivers see it. Integers are little-endian.
#[repr(C)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct GeometryWire {
    bytes_per_sector: u32,
    sectors_per_track: u32,
    cylinder_count: u32,
    head_count: u32,
    device_type: u8,
    removable: u8,
    read_only: u8,
    write_once: u8,
}

/// [`PartitionInfo`] as drivers see it. Packed: the device path follows
/// the integers directly, with no tail padding.
#[repr(C, packed)]
#[derive(Clone, Copy, Pod, Zeroable)]
struct PartitionWire {
    offset: i64,
    size: i64,
    logical_block_size: i32,
    session: i32,
    partition: i32,
    device: [u8; DEVICE_NAME_LENGTH],
}

const _: () = assert!(size_of::<GeometryWire>() == DeviceGeometry::SIZE);
const _: () = assert!(size_of::<PartitionWire>() == PartitionInfo::SIZE);

fn fit(buf: &mut [u8], size: usize) -> Result<&mut [u8], LayoutError> {
    let actual = buf.len();
    buf.get_mut(..size).ok_or(LayoutError::BufferSize {
        expected: size,
        actual,
    })
}

fn head(buf: &[u8], size: usize) -> Result<&[u8], LayoutError> {
    buf.get(..size).ok_or(LayoutError::BufferSize {
        expected: size,
        actual: buf.len(),
    })
}
