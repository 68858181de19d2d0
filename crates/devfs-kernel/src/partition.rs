//! Partition overlays: bounded windows over a raw device.

use std::sync::Arc;

use devfs_types::{NodeId, PartitionInfo};
use tracing::debug;

use crate::binding::DeviceBinding;
use crate::error::{DevfsError, DevfsResult};
use crate::node::NodeBody;
use crate::tree::Namespace;

/// Partition payload of a device node.
#[derive(Debug, Clone)]
pub(crate) struct Partition {
    /// The raw device this partition is a window of. Held referenced for
    /// the partition's whole lifetime.
    pub raw: NodeId,
    pub info: PartitionInfo,
}

/// Map a partition-relative access onto the raw device.
///
/// Negative positions clamp to 0; positions past the end transfer nothing;
/// lengths are clamped to the end of the partition. Returns the absolute
/// position and the length to transfer, or `BadValue` if the absolute
/// position does not fit in an `i64`.
pub fn translate(info: &PartitionInfo, pos: i64, len: usize) -> DevfsResult<(i64, usize)> {
    let pos = pos.max(0);
    if pos > info.size {
        return Ok((pos, 0));
    }
    let remaining = usize::try_from(info.size - pos).unwrap_or(usize::MAX);
    let absolute = pos.checked_add(info.offset).ok_or_else(|| {
        DevfsError::bad_value(format!(
            "position {pos} overflows partition offset {}",
            info.offset
        ))
    })?;
    Ok((absolute, len.min(remaining)))
}

impl Namespace {
    /// Publish a partition named `name` next to the raw device `raw`.
    pub fn add_partition(
        &mut self,
        raw: NodeId,
        name: &str,
        info: PartitionInfo,
    ) -> DevfsResult<NodeId> {
        let device = self.node(raw)?;
        let Some(binding) = device.binding() else {
            return Err(DevfsError::bad_value(format!(
                "{} is not a device",
                device.name
            )));
        };
        if binding.is_partition() {
            return Err(DevfsError::bad_value("nested partitions are not supported"));
        }
        if info.size < 0 {
            return Err(DevfsError::bad_value(format!(
                "negative partition size {}",
                info.size
            )));
        }

        let dir = device.parent;
        // partitions are immutable once published
        if self.find_child(dir, name).is_ok() {
            return Err(DevfsError::bad_value(format!("partition {name} already exists")));
        }

        let perms = device.perms;
        let overlay = DeviceBinding {
            partition: Some(Partition {
                raw,
                info: info.clone(),
            }),
            ..DeviceBinding::clone(binding)
        };

        self.acquire(raw)?;
        let result = self
            .table
            .allocate(
                Some(dir),
                name,
                NodeBody::Device(Arc::new(overlay)),
                perms,
                self.creds,
            )
            .and_then(|id| match self.insert(dir, id) {
                Ok(()) => Ok(id),
                Err(e) => {
                    self.table.remove(id);
                    Err(e)
                }
            });

        match result {
            Ok(id) => {
                debug!(%raw, %id, name, offset = info.offset, size = info.size, "added partition");
                Ok(id)
            }
            Err(e) => {
                self.release(raw)?;
                Err(e)
            }
        }
    }
}
