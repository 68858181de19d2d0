//! Vnode operations trait.
//!
//! This is the contract between devfs and the VFS layer above it. Nodes are
//! addressed by ID; the VFS holds a reference on every node it got back from
//! [`lookup`](VnodeOps::lookup) or [`get_vnode`](VnodeOps::get_vnode) until it
//! calls [`put_vnode`](VnodeOps::put_vnode).

use std::sync::Arc;

use devfs_types::{FsId, NodeId, NodeKind, OpenFlags, SelectEvent, Stat, StatUpdate};
use serde::{Deserialize, Serialize};

use crate::cookie::{DirCookie, FileCookie};
use crate::driver::SelectSync;
use crate::error::DevfsResult;

/// One directory entry produced by [`VnodeOps::read_dir`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirEntry {
    pub dev: FsId,
    pub ino: NodeId,
    pub name: String,
    pub kind: NodeKind,
}

/// Operations the VFS calls on a mounted devfs.
pub trait VnodeOps: Send + Sync {
    // ========================================================================
    // Volume
    // ========================================================================

    /// ID of the root directory.
    fn root(&self) -> NodeId;

    /// Tear down every node, referenced or not.
    fn unmount(&self) -> DevfsResult<()>;

    /// Nothing is cached, so there is never anything to flush.
    fn fsync(&self, vnode: NodeId) -> DevfsResult<()>;

    // ========================================================================
    // Vnodes
    // ========================================================================

    /// Resolve `name` in `dir` and take a reference on the result.
    fn lookup(&self, dir: NodeId, name: &str) -> DevfsResult<(NodeId, NodeKind)>;

    fn get_vnode_name(&self, vnode: NodeId) -> DevfsResult<String>;

    /// Take a reference on `id`.
    fn get_vnode(&self, id: NodeId) -> DevfsResult<NodeKind>;

    /// Drop a reference taken by `lookup`, `create` or `get_vnode`.
    fn put_vnode(&self, id: NodeId) -> DevfsResult<()>;

    /// Drop the reference on an unpublished node. Panics if the node is
    /// still linked into the tree.
    fn remove_vnode(&self, id: NodeId) -> DevfsResult<()>;

    // ========================================================================
    // Files
    // ========================================================================

    /// Open an existing entry; devfs never creates files.
    fn create(
        &self,
        dir: NodeId,
        name: &str,
        flags: OpenFlags,
        perms: u32,
    ) -> DevfsResult<(NodeId, FileCookie)>;

    fn open(&self, vnode: NodeId, flags: OpenFlags) -> DevfsResult<FileCookie>;

    fn close(&self, vnode: NodeId, cookie: &FileCookie) -> DevfsResult<()>;

    fn free_cookie(&self, vnode: NodeId, cookie: FileCookie) -> DevfsResult<()>;

    fn read(&self, vnode: NodeId, cookie: &FileCookie, pos: i64, buf: &mut [u8])
    -> DevfsResult<usize>;

    fn write(&self, vnode: NodeId, cookie: &FileCookie, pos: i64, buf: &[u8]) -> DevfsResult<usize>;

    fn ioctl(&self, vnode: NodeId, cookie: &FileCookie, op: u32, buf: &mut [u8])
    -> DevfsResult<()>;

    /// Propagate `NON_BLOCKING` to the driver.
    fn set_flags(&self, vnode: NodeId, cookie: &mut FileCookie, flags: OpenFlags)
    -> DevfsResult<()>;

    fn select(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()>;

    fn deselect(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        event: SelectEvent,
        sync: &Arc<dyn SelectSync>,
    ) -> DevfsResult<()>;

    /// Symlink target, provided it fits a buffer of `buffer_size` bytes
    /// including the terminator.
    fn read_link(&self, vnode: NodeId, buffer_size: usize) -> DevfsResult<String>;

    fn can_page(&self, vnode: NodeId, cookie: &FileCookie) -> bool;

    fn read_pages(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        pos: i64,
        vecs: &mut [&mut [u8]],
    ) -> DevfsResult<usize>;

    fn write_pages(
        &self,
        vnode: NodeId,
        cookie: &FileCookie,
        pos: i64,
        vecs: &[&[u8]],
    ) -> DevfsResult<usize>;

    // ========================================================================
    // Directories
    // ========================================================================

    /// Always fails: directories only appear through publishing.
    fn create_dir(&self, dir: NodeId, name: &str, perms: u32) -> DevfsResult<NodeId>;

    fn open_dir(&self, vnode: NodeId) -> DevfsResult<DirCookie>;

    fn close_dir(&self, vnode: NodeId, cookie: &DirCookie) -> DevfsResult<()>;

    fn free_dir_cookie(&self, vnode: NodeId, cookie: DirCookie) -> DevfsResult<()>;

    /// Next entry, `.` and `..` first; `None` at the end.
    fn read_dir(&self, vnode: NodeId, cookie: &DirCookie) -> DevfsResult<Option<DirEntry>>;

    fn rewind_dir(&self, vnode: NodeId, cookie: &DirCookie) -> DevfsResult<()>;

    // ========================================================================
    // Attributes
    // ========================================================================

    fn read_stat(&self, vnode: NodeId) -> DevfsResult<Stat>;

    fn write_stat(&self, vnode: NodeId, update: &StatUpdate) -> DevfsResult<()>;

    // ========================================================================
    // Convenience methods (default implementations)
    // ========================================================================

    /// Read a whole directory from a fresh cookie.
    fn list_dir(&self, vnode: NodeId) -> DevfsResult<Vec<DirEntry>> {
        let cookie = self.open_dir(vnode)?;
        let mut entries = Vec::new();
        let result = loop {
            match self.read_dir(vnode, &cookie) {
                Ok(Some(entry)) => entries.push(entry),
                Ok(None) => break Ok(entries),
                Err(e) => break Err(e),
            }
        };
        self.close_dir(vnode, &cookie)?;
        self.free_dir_cookie(vnode, cookie)?;
        result
    }
}
