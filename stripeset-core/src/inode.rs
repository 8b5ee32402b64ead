//! Per-object contexts
//!
//! Every tracked object carries a sticky known-bad node mask and the
//! registry of lock objects currently bound to it. Both live behind the
//! object's own exclusive section; lock objects are only ever mutated while
//! that section is held.

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::lock::{LockId, LockObject};
use crate::mask::NodeMask;
use crate::types::{ObjectId, ObjectRef};

#[derive(Debug, Default)]
pub(crate) struct InodeCtx {
    pub bad: NodeMask,
    pub locks: HashMap<LockId, LockObject>,
    pub inode_lock: Option<LockId>,
    pub entry_locks: HashMap<String, LockId>,
}

impl InodeCtx {
    /// Merge an operation's outcome into the sticky mask: nodes confirmed
    /// good are cleared, newly failed nodes are added.
    pub fn merge(&mut self, good: NodeMask, bad: NodeMask) -> NodeMask {
        self.bad &= !good;
        self.bad |= bad;
        self.bad
    }
}

#[derive(Debug)]
pub struct Inode {
    id: ObjectId,
    ctx: Mutex<InodeCtx>,
}

impl Inode {
    pub fn new(id: ObjectId) -> Self {
        Inode {
            id,
            ctx: Mutex::new(InodeCtx::default()),
        }
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub(crate) fn ctx(&self) -> MutexGuard<'_, InodeCtx> {
        self.ctx.lock()
    }

    /// Nodes observed inconsistent for this object
    pub fn bad(&self) -> NodeMask {
        self.ctx.lock().bad
    }

    pub fn good(&self) -> NodeMask {
        !self.bad()
    }

    /// Clear known-bad bits after a successful repair
    pub fn mark_repaired(&self, nodes: NodeMask) {
        self.ctx.lock().bad &= !nodes;
    }

    /// Number of lock objects bound to this object
    pub fn lock_count(&self) -> usize {
        self.ctx.lock().locks.len()
    }
}

/// Table of per-object contexts, created lazily on first access
#[derive(Debug, Default)]
pub struct InodeTable {
    inodes: DashMap<ObjectId, Arc<Inode>>,
}

impl InodeTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_or_create(&self, id: ObjectId) -> Arc<Inode> {
        self.inodes
            .entry(id)
            .or_insert_with(|| Arc::new(Inode::new(id)))
            .clone()
    }

    pub fn get(&self, id: &ObjectId) -> Option<Arc<Inode>> {
        self.inodes.get(id).map(|entry| entry.clone())
    }

    /// Drop the context once the object leaves memory
    pub fn forget(&self, id: &ObjectId) -> Option<Arc<Inode>> {
        self.inodes.remove(id).map(|(_, inode)| inode)
    }

    pub fn len(&self) -> usize {
        self.inodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inodes.is_empty()
    }
}

static NEXT_FD: AtomicU64 = AtomicU64::new(1);

/// Open file handle with its own known-bad mask
#[derive(Debug)]
pub struct OpenFile {
    id: u64,
    inode: Arc<Inode>,
    path: String,
    bad: Mutex<NodeMask>,
}

impl OpenFile {
    pub fn open(inode: Arc<Inode>, path: impl Into<String>) -> Arc<Self> {
        Arc::new(OpenFile {
            id: NEXT_FD.fetch_add(1, Ordering::Relaxed),
            inode,
            path: path.into(),
            bad: Mutex::new(NodeMask::EMPTY),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef {
            id: self.inode.id(),
            path: self.path.clone(),
        }
    }

    pub fn bad(&self) -> NodeMask {
        *self.bad.lock()
    }

    pub fn good(&self) -> NodeMask {
        !self.bad()
    }

    pub(crate) fn merge(&self, good: NodeMask, bad: NodeMask) -> NodeMask {
        let mut mask = self.bad.lock();
        *mask &= !good;
        *mask |= bad;
        *mask
    }
}

/// Location an operation targets
#[derive(Clone, Debug, Default)]
pub struct Loc {
    pub path: String,
    pub inode: Option<Arc<Inode>>,
    pub parent: Option<Arc<Inode>>,
    pub name: Option<String>,
}

impl Loc {
    pub fn new(path: impl Into<String>, inode: Arc<Inode>) -> Self {
        Loc {
            path: path.into(),
            inode: Some(inode),
            ..Default::default()
        }
    }

    /// Location of `name` inside the directory `parent`
    pub fn entry(parent: Arc<Inode>, path: impl Into<String>, inode: Option<Arc<Inode>>) -> Self {
        let path = path.into();
        let name = path
            .rsplit_once('/')
            .map(|(_, name)| name.to_string())
            .filter(|name| !name.is_empty());
        Loc {
            path,
            inode,
            parent: Some(parent),
            name,
        }
    }

    /// Path of the containing directory
    pub fn parent_path(&self) -> String {
        match self.path.rsplit_once('/') {
            Some(("", _)) | None => "/".to_string(),
            Some((dir, _)) => dir.to_string(),
        }
    }

    pub fn object_ref(&self) -> Option<ObjectRef> {
        self.inode.as_ref().map(|inode| ObjectRef {
            id: inode.id(),
            path: self.path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_returns_same_context() {
        let table = InodeTable::new();
        let id = ObjectId::new();
        let a = table.get_or_create(id);
        let b = table.get_or_create(id);
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(table.len(), 1);
        assert!(table.forget(&id).is_some());
        assert!(table.get(&id).is_none());
    }

    #[test]
    fn test_merge_clears_confirmed_good() {
        let inode = Inode::new(ObjectId::new());
        inode.ctx().merge(NodeMask::EMPTY, NodeMask::from_nodes([1, 2]));
        assert_eq!(inode.bad(), NodeMask::from_nodes([1, 2]));

        let bad = inode.ctx().merge(NodeMask::single(1), NodeMask::single(4));
        assert_eq!(bad, NodeMask::from_nodes([2, 4]));
        assert!(!inode.good().contains(2));
        assert!(inode.good().contains(1));

        inode.mark_repaired(NodeMask::FULL);
        assert!(inode.bad().is_empty());
    }

    #[test]
    fn test_entry_loc_paths() {
        let dir = Arc::new(Inode::new(ObjectId::new()));
        let loc = Loc::entry(dir.clone(), "/data/file.txt", None);
        assert_eq!(loc.name.as_deref(), Some("file.txt"));
        assert_eq!(loc.parent_path(), "/data");

        let top = Loc::entry(dir, "/file", None);
        assert_eq!(top.parent_path(), "/");
    }
}
