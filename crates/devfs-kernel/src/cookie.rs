//! Per-open state handed back to the VFS.

use devfs_types::{NodeId, OpenFlags};

use crate::driver::DeviceCookie;
use crate::error::{DevfsError, DevfsResult};

/// Where a directory iteration stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DirCursor {
    Dot,
    DotDot,
    Child(NodeId),
    End,
}

impl DirCursor {
    /// Steer the cursor off a child that is being removed, onto the child
    /// that followed it.
    pub fn skip_removed(&mut self, removed: NodeId, successor: Option<NodeId>) {
        if *self == DirCursor::Child(removed) {
            *self = successor.map_or(DirCursor::End, DirCursor::Child);
        }
    }
}

/// Cookie of an open directory.
#[derive(Debug, PartialEq, Eq)]
pub struct DirCookie {
    pub(crate) slot: u64,
}

/// Cookie of an open file. Devices carry the driver's own cookie.
#[derive(Debug, PartialEq, Eq)]
pub struct FileCookie {
    pub(crate) device: Option<DeviceCookie>,
    pub(crate) flags: OpenFlags,
}

impl FileCookie {
    pub(crate) fn plain(flags: OpenFlags) -> Self {
        Self {
            device: None,
            flags,
        }
    }

    /// The driver cookie, if this is an open device.
    pub fn device(&self) -> Option<DeviceCookie> {
        self.device
    }

    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    pub(crate) fn device_or(&self, what: &str) -> DevfsResult<DeviceCookie> {
        self.device
            .ok_or_else(|| DevfsError::bad_value(format!("{what}: not an open device")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_removed() {
        let a = NodeId::new(3);
        let b = NodeId::new(4);

        let mut cursor = DirCursor::Child(a);
        cursor.skip_removed(b, None);
        assert_eq!(cursor, DirCursor::Child(a));

        cursor.skip_removed(a, Some(b));
        assert_eq!(cursor, DirCursor::Child(b));

        cursor.skip_removed(b, None);
        assert_eq!(cursor, DirCursor::End);

        let mut dot = DirCursor::Dot;
        dot.skip_removed(a, Some(b));
        assert_eq!(dot, DirCursor::Dot);
    }
}
