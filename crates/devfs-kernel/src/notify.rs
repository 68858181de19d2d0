//! Node change notifications.
//!
//! Devfs reports namespace changes to a [`NotificationSink`], fire-and-forget.
//! Events raised while the namespace lock is held are queued and delivered
//! after it is released, so a sink may call back into the filesystem.

use std::fmt;

use devfs_types::{FsId, NodeId, StatMask};
use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;
use tracing::trace;

/// A change to the namespace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum NodeEvent {
    /// `name` appeared in `directory`.
    EntryCreated {
        fs: FsId,
        directory: NodeId,
        name: String,
        node: NodeId,
    },
    /// `name` was removed from `directory`.
    EntryRemoved {
        fs: FsId,
        directory: NodeId,
        name: String,
        node: NodeId,
    },
    /// Attributes of `node` changed.
    StatChanged {
        fs: FsId,
        node: NodeId,
        fields: StatMask,
    },
}

impl NodeEvent {
    /// Dotted subject, e.g. `node.entry_created`.
    pub fn subject(&self) -> String {
        let kind: &'static str = self.into();
        format!("node.{kind}")
    }

    /// The node the event is about.
    pub fn node(&self) -> NodeId {
        match self {
            NodeEvent::EntryCreated { node, .. }
            | NodeEvent::EntryRemoved { node, .. }
            | NodeEvent::StatChanged { node, .. } => *node,
        }
    }
}

/// Receives namespace events.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, event: &NodeEvent);
}

/// Default sink: logs every event at trace level.
#[derive(Default, Clone, Copy)]
pub struct TracingSink;

impl fmt::Debug for TracingSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TracingSink")
    }
}

impl NotificationSink for TracingSink {
    fn notify(&self, event: &NodeEvent) {
        trace!(subject = %event.subject(), node = %event.node(), ?event, "devfs event");
    }
}
