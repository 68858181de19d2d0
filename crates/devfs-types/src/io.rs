//! Open flags and select events passed through to drivers.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

bitflags! {
    /// Open mode. The empty set means read-only.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct OpenFlags: u32 {
        const WRITE_ONLY = 0x0001;
        const READ_WRITE = 0x0002;
        const CREATE = 0x0200;
        const TRUNCATE = 0x0400;
        const EXCLUSIVE = 0x0800;
        const NON_BLOCKING = 0x4000;
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read_only() -> Self {
        Self::empty()
    }

    /// Returns true if the caller asked for exclusive creation.
    pub fn is_exclusive(&self) -> bool {
        self.contains(Self::EXCLUSIVE)
    }

    /// Returns true if the caller asked for non-blocking I/O.
    pub fn is_non_blocking(&self) -> bool {
        self.contains(Self::NON_BLOCKING)
    }
}

/// Events a caller can wait for with `select`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Display, EnumString)]
#[strum(serialize_all = "snake_case")]
#[repr(u8)]
pub enum SelectEvent {
    Read = 1,
    Write = 2,
    Error = 3,
    PriorityRead = 4,
    PriorityWrite = 5,
    HighPriorityRead = 6,
    HighPriorityWrite = 7,
    Disconnected = 8,
}

impl SelectEvent {
    /// The wire code of this event.
    pub fn code(&self) -> u8 {
        *self as u8
    }
}
