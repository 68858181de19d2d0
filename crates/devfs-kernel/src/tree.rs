//! The namespace: node table plus directory structure.
//!
//! Everything here runs with the filesystem lock held. Helpers take
//! `&mut Namespace` and call each other directly instead of re-locking.

use std::ops::Bound;
use std::time::SystemTime;

use devfs_types::{FsId, NodeId, NodeKind, StatMask};
use tracing::{debug, trace, warn};

use crate::config::Credentials;
use crate::error::{DevfsError, DevfsResult};
use crate::node::{DIRECTORY_PERMS, Node, NodeBody, NodeTable};
use crate::notify::NodeEvent;

pub(crate) struct Namespace {
    pub fs: FsId,
    pub table: NodeTable,
    pub root: NodeId,
    pub creds: Credentials,
    /// Events raised under the lock, delivered once it is dropped.
    pending: Vec<NodeEvent>,
}

/// Split a publish path into components.
///
/// Paths are relative to the devfs root: a leading `/` is rejected, empty
/// components are ignored, and `.`/`..` are not valid names.
pub(crate) fn components(path: &str) -> DevfsResult<Vec<&str>> {
    if path.starts_with('/') {
        return Err(DevfsError::bad_value(format!("absolute path: {path}")));
    }
    let parts: Vec<&str> = path.split('/').filter(|c| !c.is_empty()).collect();
    if parts.is_empty() {
        return Err(DevfsError::bad_value("empty path"));
    }
    if parts.iter().any(|c| *c == "." || *c == "..") {
        return Err(DevfsError::bad_value(format!("relative component in {path}")));
    }
    Ok(parts)
}

impl Namespace {
    /// A namespace holding only the root directory.
    pub fn new(fs: FsId, creds: Credentials) -> DevfsResult<Self> {
        let mut table = NodeTable::new();
        let root = table.allocate(None, "", NodeBody::directory(), DIRECTORY_PERMS, creds)?;
        table.find_mut(root)?.linked = true;
        Ok(Self {
            fs,
            table,
            root,
            creds,
            pending: Vec::new(),
        })
    }

    pub fn node(&self, id: NodeId) -> DevfsResult<&Node> {
        self.table.find(id)
    }

    pub fn node_mut(&mut self, id: NodeId) -> DevfsResult<&mut Node> {
        self.table.find_mut(id)
    }

    pub fn emit(&mut self, event: NodeEvent) {
        self.pending.push(event);
    }

    pub fn take_events(&mut self) -> Vec<NodeEvent> {
        std::mem::take(&mut self.pending)
    }

    // ========================================================================
    // Directory structure
    // ========================================================================

    /// Resolve `name` inside `dir`, with `.` and `..` handled first.
    pub fn find_child(&self, dir: NodeId, name: &str) -> DevfsResult<NodeId> {
        let node = self.node(dir)?;
        let body = node
            .dir()
            .ok_or_else(|| DevfsError::not_a_directory(node.name.clone()))?;

        match name {
            "." => Ok(dir),
            ".." => Ok(node.parent),
            _ => body
                .children
                .get(name)
                .copied()
                .ok_or_else(|| DevfsError::not_found(name.to_string())),
        }
    }

    /// Link an allocated node into `dir`.
    pub fn insert(&mut self, dir: NodeId, child: NodeId) -> DevfsResult<()> {
        let name = self.node(child)?.name.clone();
        let fs = self.fs;

        let parent = self.node_mut(dir)?;
        let body = parent
            .dir_mut()
            .ok_or_else(|| DevfsError::bad_value("insert into a non-directory"))?;
        if body.children.contains_key(&name) {
            return Err(DevfsError::file_exists(name));
        }
        body.children.insert(name.clone(), child);
        parent.modified = SystemTime::now();

        let node = self.node_mut(child)?;
        node.parent = dir;
        node.linked = true;

        trace!(%dir, %child, name = %name, "insert");
        self.emit(NodeEvent::EntryCreated {
            fs,
            directory: dir,
            name,
            node: child,
        });
        self.emit(NodeEvent::StatChanged {
            fs,
            node: dir,
            fields: StatMask::MTIME,
        });
        Ok(())
    }

    /// Unlink `child` from `dir`. Cursors pointing at it move to its successor.
    pub fn remove_child(&mut self, dir: NodeId, child: NodeId) -> DevfsResult<()> {
        let name = self.node(child)?.name.clone();
        let fs = self.fs;

        let parent = self.node_mut(dir)?;
        let body = parent
            .dir_mut()
            .ok_or_else(|| DevfsError::bad_value("remove from a non-directory"))?;
        if body.children.get(&name) != Some(&child) {
            return Err(DevfsError::not_found(name));
        }

        let successor = body
            .children
            .range::<str, _>((Bound::Excluded(name.as_str()), Bound::Unbounded))
            .next()
            .map(|(_, id)| *id);
        for cursor in body.cursors.values_mut() {
            cursor.skip_removed(child, successor);
        }
        body.children.remove(&name);
        parent.modified = SystemTime::now();

        self.node_mut(child)?.linked = false;

        trace!(%dir, %child, name = %name, "remove");
        self.emit(NodeEvent::EntryRemoved {
            fs,
            directory: dir,
            name,
            node: child,
        });
        self.emit(NodeEvent::StatChanged {
            fs,
            node: dir,
            fields: StatMask::MTIME,
        });
        Ok(())
    }

    /// Walk `path` from the root.
    pub fn resolve(&self, path: &str) -> DevfsResult<NodeId> {
        let mut current = self.root;
        for part in path.split('/').filter(|c| !c.is_empty()) {
            current = self.find_child(current, part)?;
        }
        // the root itself must still exist (unmount drains the table)
        self.node(current)?;
        Ok(current)
    }

    /// Path of `id` from the root, components joined with `/`.
    pub fn device_path(&self, id: NodeId) -> DevfsResult<String> {
        let mut parts = Vec::new();
        let mut current = self.node(id)?;
        while current.parent != current.id {
            parts.push(current.name.as_str());
            current = self.node(current.parent)?;
        }
        parts.reverse();
        Ok(parts.join("/"))
    }

    /// Make sure every component of `path` exists as a directory, creating
    /// missing ones. Returns the last directory.
    pub fn publish_path(&mut self, path: &str) -> DevfsResult<NodeId> {
        let parts = components(path)?;
        self.walk_creating(&parts)
    }

    /// Create the directories leading to `path` and a new leaf carrying
    /// `body` at its end. Fails with `FileExists` if the leaf is taken.
    pub fn publish_leaf(&mut self, path: &str, body: NodeBody, perms: u32) -> DevfsResult<NodeId> {
        let parts = components(path)?;
        let (leaf, dirs) = parts
            .split_last()
            .ok_or_else(|| DevfsError::bad_value("empty path"))?;

        let dir = self.walk_creating(dirs)?;
        if self.find_child(dir, leaf).is_ok() {
            return Err(DevfsError::file_exists(path.to_string()));
        }

        let id = self
            .table
            .allocate(Some(dir), leaf, body, perms, self.creds)?;
        if let Err(e) = self.insert(dir, id) {
            self.table.remove(id);
            return Err(e);
        }
        Ok(id)
    }

    fn walk_creating(&mut self, parts: &[&str]) -> DevfsResult<NodeId> {
        let mut dir = self.root;
        for part in parts {
            dir = match self.find_child(dir, part) {
                Ok(existing) => {
                    if !self.node(existing)?.kind().is_dir() {
                        return Err(DevfsError::file_exists((*part).to_string()));
                    }
                    existing
                }
                Err(DevfsError::NotFound(_)) => {
                    let id = self.table.allocate(
                        Some(dir),
                        part,
                        NodeBody::directory(),
                        DIRECTORY_PERMS,
                        self.creds,
                    )?;
                    self.insert(dir, id)?;
                    debug!(name = %part, %id, "created directory");
                    id
                }
                Err(e) => return Err(e),
            };
        }
        Ok(dir)
    }

    // ========================================================================
    // Reference counting
    // ========================================================================

    pub fn acquire(&mut self, id: NodeId) -> DevfsResult<()> {
        let node = self.node_mut(id)?;
        node.refs += 1;
        Ok(())
    }

    /// Drop one reference; destroys the node once it is unreferenced and
    /// unlinked.
    ///
    /// Panics on underflow: that means someone released a reference they
    /// never held.
    pub fn release(&mut self, id: NodeId) -> DevfsResult<()> {
        let node = self.node_mut(id)?;
        if node.refs == 0 {
            panic!("devfs: reference count underflow on node {id}");
        }
        node.refs -= 1;
        self.reap_if_unused(id);
        Ok(())
    }

    /// Destroy `id` if nothing references it any more.
    pub fn reap_if_unused(&mut self, id: NodeId) {
        let dead = self
            .node(id)
            .is_ok_and(|n| n.refs == 0 && !n.linked && !n.has_children());
        if dead {
            self.destroy(id);
        }
    }

    /// Remove a node from the table. Partitions give back their hold on the
    /// raw device.
    pub fn destroy(&mut self, id: NodeId) {
        let Some(node) = self.table.remove(id) else {
            return;
        };
        debug!(%id, name = %node.name, kind = %node.kind(), "destroyed node");

        let raw = node
            .binding()
            .and_then(|b| b.partition.as_ref())
            .map(|p| p.raw);
        if let Some(raw) = raw {
            // raw may already be gone after a forced unmount
            if self.node(raw).is_ok() {
                if let Err(e) = self.release(raw) {
                    warn!(%id, %raw, error = %e, "partition could not release its raw device");
                }
            }
        }
    }

    /// IDs of published partitions layered on `raw`. Unpublished ones that
    /// are still referenced keep `raw` alive but are not counted.
    pub fn partitions_of(&self, raw: NodeId) -> Vec<NodeId> {
        self.table
            .values()
            .filter(|n| {
                n.linked
                    && n
                        .binding()
                        .and_then(|b| b.partition.as_ref())
                        .is_some_and(|p| p.raw == raw)
            })
            .map(|n| n.id)
            .collect()
    }

    // ========================================================================
    // Unpublish
    // ========================================================================

    /// Remove the node at `path` from the tree; it is destroyed as soon as
    /// the last reference goes.
    pub fn unpublish(&mut self, path: &str, kind: NodeKind) -> DevfsResult<NodeId> {
        components(path)?;
        let id = self.resolve(path)?;
        let node = self.node(id)?;

        if node.kind() != kind {
            return Err(DevfsError::bad_type(format!(
                "{path} is a {}, not a {kind}",
                node.kind()
            )));
        }
        if node.has_children() {
            return Err(DevfsError::not_allowed(format!("{path} is not empty")));
        }
        if kind.is_device() && !node.is_partition() && !self.partitions_of(id).is_empty() {
            return Err(DevfsError::not_allowed(format!(
                "{path} still has published partitions"
            )));
        }

        let parent = node.parent;
        self.remove_child(parent, id)?;
        self.reap_if_unused(id);
        debug!(path, %id, %kind, "unpublished");
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn namespace() -> Namespace {
        Namespace::new(FsId::new(1), Credentials { uid: 0, gid: 0 }).unwrap()
    }

    fn link(target: &str) -> NodeBody {
        NodeBody::Symlink {
            target: target.to_string(),
        }
    }

    fn children(ns: &Namespace, dir: NodeId) -> Vec<String> {
        ns.node(dir)
            .unwrap()
            .dir()
            .unwrap()
            .children
            .keys()
            .cloned()
            .collect()
    }

    #[test]
    fn test_components() {
        assert_eq!(components("disk//scsi/0/").unwrap(), vec!["disk", "scsi", "0"]);
        assert!(matches!(components("/disk"), Err(DevfsError::BadValue(_))));
        assert!(matches!(components(""), Err(DevfsError::BadValue(_))));
        assert!(matches!(components("a/../b"), Err(DevfsError::BadValue(_))));
    }

    #[test]
    fn test_children_stay_sorted() {
        let mut ns = namespace();
        for name in ["zero", "null", "random", "console"] {
            ns.publish_leaf(&format!("misc/{name}"), link("/x"), 0o644)
                .unwrap();
        }
        let misc = ns.resolve("misc").unwrap();
        assert_eq!(children(&ns, misc), vec!["console", "null", "random", "zero"]);
    }

    #[test]
    fn test_dot_and_dotdot() {
        let mut ns = namespace();
        let leaf = ns.publish_leaf("a/b/c", link("/x"), 0o644).unwrap();
        let b = ns.resolve("a/b").unwrap();
        assert_eq!(ns.find_child(b, ".").unwrap(), b);
        assert_eq!(ns.find_child(b, "..").unwrap(), ns.resolve("a").unwrap());
        assert_eq!(ns.find_child(ns.root, "..").unwrap(), ns.root);
        assert_eq!(ns.device_path(leaf).unwrap(), "a/b/c");
        assert!(matches!(
            ns.find_child(leaf, "x"),
            Err(DevfsError::NotADirectory(_))
        ));
    }

    #[test]
    fn test_publish_conflicts() {
        let mut ns = namespace();
        ns.publish_leaf("misc/null", link("/x"), 0o644).unwrap();
        assert!(matches!(
            ns.publish_leaf("misc/null", link("/y"), 0o644),
            Err(DevfsError::FileExists(_))
        ));
        // a leaf in the middle of a path is an obstruction
        assert!(matches!(
            ns.publish_leaf("misc/null/deeper", link("/y"), 0o644),
            Err(DevfsError::FileExists(_))
        ));
        assert!(matches!(
            ns.publish_path("misc/null"),
            Err(DevfsError::FileExists(_))
        ));
        // existing directories are fine
        assert_eq!(ns.publish_path("misc").unwrap(), ns.resolve("misc").unwrap());
    }

    #[test]
    fn test_insert_rejects_duplicates() {
        let mut ns = namespace();
        let root = ns.root;
        let a = ns
            .table
            .allocate(Some(root), "dup", NodeBody::directory(), 0o755, ns.creds)
            .unwrap();
        let b = ns
            .table
            .allocate(Some(root), "dup", NodeBody::directory(), 0o755, ns.creds)
            .unwrap();
        ns.insert(root, a).unwrap();
        assert!(matches!(ns.insert(root, b), Err(DevfsError::FileExists(_))));
        assert_eq!(children(&ns, root), vec!["dup"]);

        let leaf = ns.publish_leaf("l", link("/x"), 0o644).unwrap();
        assert!(matches!(ns.insert(leaf, b), Err(DevfsError::BadValue(_))));
    }

    #[test]
    fn test_release_reaps_unlinked() {
        let mut ns = namespace();
        let id = ns.publish_leaf("misc/tty", link("/x"), 0o644).unwrap();
        ns.acquire(id).unwrap();

        ns.unpublish("misc/tty", NodeKind::Symlink).unwrap();
        // still referenced, so still in the table
        assert!(ns.node(id).is_ok());
        ns.release(id).unwrap();
        assert!(ns.node(id).is_err());
    }

    #[test]
    #[should_panic(expected = "underflow")]
    fn test_release_underflow_panics() {
        let mut ns = namespace();
        let id = ns.publish_leaf("misc/tty", link("/x"), 0o644).unwrap();
        let _ = ns.release(id);
    }

    #[test]
    fn test_unpublish_checks() {
        let mut ns = namespace();
        ns.publish_leaf("misc/tty", link("/x"), 0o644).unwrap();
        assert!(matches!(
            ns.unpublish("misc/tty", NodeKind::Device),
            Err(DevfsError::BadType(_))
        ));
        assert!(matches!(
            ns.unpublish("misc", NodeKind::Directory),
            Err(DevfsError::NotAllowed(_))
        ));
        assert!(matches!(
            ns.unpublish("misc/nope", NodeKind::Symlink),
            Err(DevfsError::NotFound(_))
        ));

        ns.unpublish("misc/tty", NodeKind::Symlink).unwrap();
        ns.unpublish("misc", NodeKind::Directory).unwrap();
        assert!(children(&ns, ns.root).is_empty());
        assert_eq!(ns.table.len(), 1);
    }

    #[test]
    fn test_events_queued() {
        let mut ns = namespace();
        ns.publish_leaf("null", link("/x"), 0o644).unwrap();
        let events = ns.take_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], NodeEvent::EntryCreated { name, .. } if name == "null"));
        assert!(ns.take_events().is_empty());
    }
}
