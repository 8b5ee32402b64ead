//! Cooperative distributed locks
//!
//! Operations touching the same inode or directory entry share one lock
//! object. The first operation to reach it takes the real distributed lock;
//! later ones queue behind the current owner and inherit the lock (and its
//! cached size) when the owner is done, so the network lock is taken once
//! per burst of operations instead of once per operation. Version and size
//! deltas accumulate on the lock and are flushed by the last holder.
//!
//! Lock objects live in their object's context and are only mutated under
//! that context's section.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use tracing::{trace, warn};

use crate::error::{StripesetError, StripesetResult};
use crate::fop::{Fop, FopId, Minimum, SizeCache};
use crate::inode::{Inode, InodeCtx, Loc, OpenFile};
use crate::mask::NodeMask;
use crate::select::resolve_minimum;
use crate::size_version;
use crate::types::{LockKind, LockTarget, ObjectId, ObjectRef, SizeVersionDelta};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LockId(u64);

impl fmt::Display for LockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "lock-{}", self.0)
    }
}

pub(crate) struct LockObject {
    pub id: LockId,
    pub target: LockTarget,
    pub owner: Option<FopId>,
    pub waiters: VecDeque<Arc<Fop>>,
    /// Nodes every holder so far has succeeded on
    pub good_mask: NodeMask,
    pub acquired: bool,
    /// Nodes holding the real lock
    pub mask: NodeMask,
    pub have_size: bool,
    pub size: u64,
    pub version: u64,
    pub version_delta: u64,
    pub size_delta: i64,
    pub refs: u32,
}

impl LockObject {
    pub fn kind(&self) -> LockKind {
        self.target.kind
    }
}

impl fmt::Debug for LockObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockObject")
            .field("id", &self.id)
            .field("target", &self.target.to_string())
            .field("owner", &self.owner)
            .field("waiters", &self.waiters.len())
            .field("good_mask", &self.good_mask)
            .field("acquired", &self.acquired)
            .field("mask", &self.mask)
            .field("refs", &self.refs)
            .finish()
    }
}

/// Bounded allocator for lock objects
#[derive(Debug)]
pub struct LockPool {
    capacity: usize,
    live: AtomicUsize,
    next_id: AtomicU64,
}

impl LockPool {
    pub fn new(capacity: usize) -> Self {
        LockPool {
            capacity,
            live: AtomicUsize::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Lock objects currently allocated
    pub fn live(&self) -> usize {
        self.live.load(AtomicOrdering::Acquire)
    }

    fn allocate(&self, target: LockTarget) -> StripesetResult<LockObject> {
        if target.object.id.is_nil() {
            return Err(StripesetError::lock_unavailable(
                target.to_string(),
                "object has no valid id",
            ));
        }

        self.live
            .fetch_update(AtomicOrdering::AcqRel, AtomicOrdering::Acquire, |live| {
                (live < self.capacity).then_some(live + 1)
            })
            .map_err(|_| {
                StripesetError::lock_unavailable(target.to_string(), "lock pool exhausted")
            })?;

        Ok(LockObject {
            id: LockId(self.next_id.fetch_add(1, AtomicOrdering::Relaxed)),
            target,
            owner: None,
            waiters: VecDeque::new(),
            good_mask: NodeMask::FULL,
            acquired: false,
            mask: NodeMask::EMPTY,
            have_size: false,
            size: 0,
            version: 0,
            version_delta: 0,
            size_delta: 0,
            refs: 0,
        })
    }

    fn free(&self) {
        self.live.fetch_sub(1, AtomicOrdering::AcqRel);
    }
}

/// An operation's binding to one lock object
#[derive(Clone, Debug)]
pub(crate) struct LockLink {
    pub inode: Arc<Inode>,
    pub lock: LockId,
    pub object: ObjectId,
    pub name: Option<String>,
}

impl LockLink {
    /// Canonical order: object id, then entry name, whole-object locks last
    fn order(&self, other: &LockLink) -> Ordering {
        self.object
            .cmp(&other.object)
            .then_with(|| match (&self.name, &other.name) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Greater,
                (Some(_), None) => Ordering::Less,
                (Some(a), Some(b)) => a.cmp(b),
            })
    }
}

fn bind(fop: &Arc<Fop>, inode: &Arc<Inode>, target: LockTarget) -> StripesetResult<()> {
    let name = target.name.clone();
    let mut ctx = inode.ctx();
    let InodeCtx {
        locks,
        inode_lock,
        entry_locks,
        ..
    } = &mut *ctx;

    let existing = match &name {
        Some(name) => entry_locks.get(name).copied(),
        None => *inode_lock,
    };

    let id = match existing {
        Some(id) => {
            trace!(fop = fop.id(), lock = %id, target = %target, "LOCK_REUSE_OBJECT");
            id
        }
        None => {
            let lock = fop.set().lock_pool().allocate(target)?;
            let id = lock.id;
            trace!(fop = fop.id(), lock = %id, target = %lock.target, "LOCK_CREATE");
            match &name {
                Some(name) => {
                    entry_locks.insert(name.clone(), id);
                }
                None => *inode_lock = Some(id),
            }
            locks.insert(id, lock);
            id
        }
    };

    let mut st = fop.lock_state();
    if st
        .locks
        .iter()
        .any(|link| link.lock == id && Arc::ptr_eq(&link.inode, inode))
    {
        return Ok(());
    }
    if let Some(lock) = locks.get_mut(&id) {
        lock.refs += 1;
    }

    let link = LockLink {
        inode: inode.clone(),
        lock: id,
        object: inode.id(),
        name,
    };
    let pos = st
        .locks
        .partition_point(|other| other.order(&link) != Ordering::Greater);
    st.locks.insert(pos, link);
    Ok(())
}

fn skip_prepare(fop: &Fop) -> bool {
    !fop.is_top_level() || fop.has_error()
}

/// Bind the whole-object lock of `loc`'s inode
pub fn prepare_inode(fop: &Arc<Fop>, loc: &Loc) -> StripesetResult<()> {
    if skip_prepare(fop) {
        return Ok(());
    }
    let Some(inode) = &loc.inode else {
        return Ok(());
    };
    let target = LockTarget {
        kind: LockKind::Inode,
        object: ObjectRef {
            id: inode.id(),
            path: loc.path.clone(),
        },
        name: None,
    };
    bind(fop, inode, target)
}

pub fn prepare_fd(fop: &Arc<Fop>, fd: &OpenFile) -> StripesetResult<()> {
    if skip_prepare(fop) {
        return Ok(());
    }
    prepare_inode(fop, &Loc::new(fd.path(), fd.inode().clone()))
}

/// Bind the lock on `loc`'s name inside its parent directory
pub fn prepare_entry(fop: &Arc<Fop>, loc: &Loc) -> StripesetResult<()> {
    if skip_prepare(fop) {
        return Ok(());
    }
    let (Some(parent), Some(name)) = (&loc.parent, &loc.name) else {
        return Err(StripesetError::lock_unavailable(
            loc.path.clone(),
            "location has no parent directory entry",
        ));
    };
    let target = LockTarget {
        kind: LockKind::Entry,
        object: ObjectRef {
            id: parent.id(),
            path: loc.parent_path(),
        },
        name: Some(name.clone()),
    };
    bind(fop, parent, target)
}

/// Walk the operation's bindings in order, claiming each lock.
///
/// Stops when a lock is owned by another operation (the operation queues
/// behind it) or needs a network acquisition; both hold a join unit and the
/// walk continues when they complete.
pub fn acquire(fop: &Arc<Fop>) {
    loop {
        let link = {
            let st = fop.lock_state();
            match st.locks.get(st.locked) {
                Some(link) => link.clone(),
                None => return,
            }
        };

        let mut ctx = link.inode.ctx();
        let Some(lock) = ctx.locks.get_mut(&link.lock) else {
            fop.set_error(StripesetError::internal(format!(
                "{} missing from its object",
                link.lock
            )));
            return;
        };

        match lock.owner {
            Some(owner) if owner != fop.id() => {
                trace!(fop = fop.id(), lock = %link.lock, owner, "LOCK_WAIT");
                lock.waiters.push_back(fop.clone());
                fop.lock_state().join.add();
                return;
            }
            _ => lock.owner = Some(fop.id()),
        }

        if !lock.acquired {
            let target = lock.target.clone();
            drop(ctx);
            network_lock(fop, link, target);
            return;
        }

        trace!(fop = fop.id(), lock = %link.lock, "LOCK_REUSE");
        let (have_size, size, good) = (lock.have_size, lock.size, lock.good_mask);
        let mut st = fop.lock_state();
        if have_size {
            st.size = SizeCache::known(size);
        }
        st.mask &= good;
        st.locked += 1;
    }
}

fn network_lock(fop: &Arc<Fop>, link: LockLink, target: LockTarget) {
    let set = fop.set().clone();
    let nodes = set.node_mask() & set.up() & link.inode.good();
    // Every eligible node must grant the lock, but never fewer than K
    let required = resolve_minimum(Minimum::All, nodes.count(), set.fragments());

    trace!(fop = fop.id(), lock = %link.lock, target = %target, nodes = %nodes, "LOCK_ACQUIRE");
    fop.lock_state().join.add();

    let locks = set.backends().locks.clone();
    let fop = fop.clone();
    set.spawn(async move {
        let error = match locks.acquire(nodes, &target).await {
            Ok(granted) if granted.count() >= required => {
                if let Some(lock) = link.inode.ctx().locks.get_mut(&link.lock) {
                    lock.mask = granted;
                    lock.acquired = true;
                }
                {
                    let mut st = fop.lock_state();
                    st.mask &= granted;
                    st.locked += 1;
                }
                trace!(fop = fop.id(), lock = %link.lock, granted = %granted, "LOCKED");
                acquire(&fop);
                None
            }
            Ok(granted) => {
                warn!(
                    fop = fop.id(),
                    target = %target,
                    granted = %granted,
                    required,
                    "Lock granted by too few nodes"
                );
                // Partially granted locks are still released at unlock
                if let Some(lock) = link.inode.ctx().locks.get_mut(&link.lock) {
                    lock.mask = granted;
                }
                Some(StripesetError::lock_unavailable(
                    target.to_string(),
                    format!("granted by {} nodes, need {}", granted.count(), required),
                ))
            }
            Err(e) => {
                warn!(fop = fop.id(), target = %target, error = %e, "Failed to acquire lock");
                Some(StripesetError::lock_unavailable(target.to_string(), e.to_string()))
            }
        };
        fop.resume(error);
    });
}

/// Give up ownership of every lock the operation holds.
///
/// With `update` set and no error, the operation's version/size change is
/// accumulated on its inode lock. The next waiter of each lock inherits it
/// along with the operation's size and mask. When the operation is the
/// lock's sole holder, the accumulated deltas are flushed.
pub fn lock_reuse(fop: &Arc<Fop>, update: bool) {
    let (links, mask, size, error) = {
        let st = fop.lock_state();
        (st.locks.clone(), st.mask, st.size, st.error.clone())
    };

    // Children run under their parent's locks
    if !fop.is_top_level() {
        if update && error.is_none() && size.have {
            size_version::update_size_version(
                fop,
                SizeVersionDelta {
                    version: 1,
                    size: size.delta(),
                },
            );
        }
        return;
    }

    let mut flush = None;

    for link in &links {
        let mut ctx = link.inode.ctx();
        let Some(lock) = ctx.locks.get_mut(&link.lock) else {
            continue;
        };
        if lock.owner != Some(fop.id()) {
            continue;
        }

        trace!(fop = fop.id(), lock = %link.lock, "LOCK_DONE");
        lock.owner = None;

        if lock.kind() == LockKind::Inode {
            if update && error.is_none() {
                lock.version_delta += 1;
                lock.size_delta = lock.size_delta.saturating_add(size.delta());
            }
            if lock.refs == 1 {
                if lock.version_delta > 0 {
                    flush = Some(SizeVersionDelta {
                        version: lock.version_delta,
                        size: lock.size_delta,
                    });
                }
                lock.version_delta = 0;
                lock.size_delta = 0;
            }
            if size.have {
                lock.size = size.post;
                lock.have_size = true;
            }
        }
        lock.good_mask &= mask;

        let Some(waiter) = lock.waiters.pop_front() else {
            continue;
        };
        lock.owner = Some(waiter.id());
        {
            let mut st = waiter.lock_state();
            if lock.kind() == LockKind::Inode {
                st.size = SizeCache {
                    pre: size.post,
                    post: size.post,
                    have: size.have,
                };
            }
            st.mask &= mask;
        }
        drop(ctx);

        trace!(fop = fop.id(), lock = %link.lock, waiter = waiter.id(), "LOCK_HANDOFF");
        let inherited = error.clone().filter(StripesetError::propagates_to_waiters);
        fop.set().spawn(async move {
            if inherited.is_none() {
                acquire(&waiter);
            }
            waiter.resume(inherited);
        });
    }

    if let Some(delta) = flush {
        size_version::update_size_version(fop, delta);
    }
}

/// Drop the operation's references; destroyed locks release the real lock
pub fn unlock(fop: &Arc<Fop>) {
    let links = {
        let mut st = fop.lock_state();
        st.locked = 0;
        std::mem::take(&mut st.locks)
    };

    for link in links {
        let released = {
            let mut ctx = link.inode.ctx();
            let Some(lock) = ctx.locks.get_mut(&link.lock) else {
                continue;
            };
            trace!(fop = fop.id(), lock = %link.lock, refs = lock.refs, "UNLOCK");
            lock.refs = lock.refs.saturating_sub(1);
            if lock.refs > 0 {
                continue;
            }

            let lock = ctx.locks.remove(&link.lock);
            match &link.name {
                Some(name) => {
                    ctx.entry_locks.remove(name);
                }
                None => ctx.inode_lock = None,
            }
            fop.set().lock_pool().free();
            trace!(fop = fop.id(), lock = %link.lock, "LOCK_DESTROY");
            lock.filter(|lock| !lock.mask.is_empty())
        };

        if let Some(lock) = released {
            network_unlock(fop, lock);
        }
    }
}

fn network_unlock(fop: &Arc<Fop>, lock: LockObject) {
    let locks = fop.set().backends().locks.clone();
    fop.lock_state().join.add();

    let task = fop.clone();
    fop.set().spawn(async move {
        let fop = task;
        match locks.release(lock.mask, &lock.target).await {
            Ok(released) => {
                trace!(fop = fop.id(), lock = %lock.id, released = %released, "UNLOCKED");
            }
            Err(e) => {
                warn!(
                    fop = fop.id(),
                    name = fop.name(),
                    target = %lock.target,
                    error = %e,
                    "Entry/inode unlocking failed"
                );
            }
        }
        fop.resume(None);
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn target(id: ObjectId) -> LockTarget {
        LockTarget {
            kind: LockKind::Inode,
            object: ObjectRef {
                id,
                path: "/a".to_string(),
            },
            name: None,
        }
    }

    #[test]
    fn test_pool_capacity() {
        let pool = LockPool::new(2);
        let a = pool.allocate(target(ObjectId::new())).unwrap();
        let b = pool.allocate(target(ObjectId::new())).unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.good_mask, NodeMask::FULL);

        let err = pool.allocate(target(ObjectId::new())).unwrap_err();
        assert!(matches!(err, StripesetError::LockUnavailable { .. }));

        pool.free();
        assert_eq!(pool.live(), 1);
        assert!(pool.allocate(target(ObjectId::new())).is_ok());
    }

    #[test]
    fn test_pool_rejects_nil_object() {
        let pool = LockPool::new(4);
        let err = pool.allocate(target(ObjectId::nil())).unwrap_err();
        assert!(err.to_string().contains("no valid id"));
        assert_eq!(pool.live(), 0);
    }

    #[test]
    fn test_link_order() {
        let inode = Arc::new(Inode::new(ObjectId::new()));
        let link = |object: ObjectId, name: Option<&str>| LockLink {
            inode: inode.clone(),
            lock: LockId(0),
            object,
            name: name.map(str::to_string),
        };
        let low = ObjectId(uuid::Uuid::from_u128(1));
        let high = ObjectId(uuid::Uuid::from_u128(2));

        assert_eq!(link(low, None).order(&link(high, Some("a"))), Ordering::Less);
        assert_eq!(link(low, None).order(&link(low, Some("a"))), Ordering::Greater);
        assert_eq!(link(low, Some("a")).order(&link(low, Some("b"))), Ordering::Less);
        assert_eq!(link(low, None).order(&link(low, None)), Ordering::Equal);
    }
}
