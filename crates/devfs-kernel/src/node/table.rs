//! Node table: every live node by ID.

use std::collections::HashMap;
use std::time::SystemTime;

use devfs_types::NodeId;

use super::{Node, NodeBody};
use crate::config::Credentials;
use crate::error::{DevfsError, DevfsResult};

pub(crate) struct NodeTable {
    nodes: HashMap<NodeId, Node>,
    next_id: NodeId,
}

impl NodeTable {
    pub fn new() -> Self {
        Self {
            nodes: HashMap::new(),
            next_id: NodeId::new(1),
        }
    }

    /// Create and insert a node with a fresh ID.
    ///
    /// The group is inherited from `parent` when it exists, otherwise taken
    /// from `creds`. A `None` parent makes the node its own parent (the root).
    /// Linkage into a directory is the caller's job.
    pub fn allocate(
        &mut self,
        parent: Option<NodeId>,
        name: &str,
        body: NodeBody,
        perms: u32,
        creds: Credentials,
    ) -> DevfsResult<NodeId> {
        let id = self.next_id;
        self.next_id = id.checked_next().ok_or(DevfsError::NoMemory)?;

        let gid = parent
            .and_then(|p| self.nodes.get(&p))
            .map(|p| p.gid)
            .unwrap_or(creds.gid);
        let now = SystemTime::now();

        self.nodes.insert(
            id,
            Node {
                id,
                name: name.to_string(),
                parent: parent.unwrap_or(id),
                perms,
                uid: creds.uid,
                gid,
                created: now,
                modified: now,
                refs: 0,
                linked: false,
                body,
            },
        );
        Ok(id)
    }

    pub fn find(&self, id: NodeId) -> DevfsResult<&Node> {
        self.nodes
            .get(&id)
            .ok_or_else(|| DevfsError::not_found(format!("node {id}")))
    }

    pub fn find_mut(&mut self, id: NodeId) -> DevfsResult<&mut Node> {
        self.nodes
            .get_mut(&id)
            .ok_or_else(|| DevfsError::not_found(format!("node {id}")))
    }

    /// Drop a node from the table. The caller has already made sure nothing
    /// references it.
    pub fn remove(&mut self, id: NodeId) -> Option<Node> {
        self.nodes.remove(&id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn values(&self) -> impl Iterator<Item = &Node> {
        self.nodes.values()
    }

    /// Remove every node, returning them.
    pub fn drain(&mut self) -> Vec<Node> {
        self.nodes.drain().map(|(_, node)| node).collect()
    }
}
