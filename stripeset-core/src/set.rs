//! Erasure set context
//!
//! Shared by every operation issued against one set: geometry, live-node
//! tracking, the round-robin cursor, the lock pool, the per-object context
//! table and the collaborators.

use parking_lot::Mutex;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{info, warn};

use crate::backend::Backends;
use crate::config::StripesetConfig;
use crate::error::StripesetResult;
use crate::fop::{FopBuilder, FopId};
use crate::inode::InodeTable;
use crate::lock::LockPool;
use crate::manager::FopHandler;
use crate::mask::NodeMask;

pub struct ErasureSet {
    name: String,
    nodes: usize,
    fragments: u32,
    node_mask: NodeMask,
    up: AtomicU64,
    cursor: Mutex<usize>,
    auto_heal: bool,
    lock_pool: LockPool,
    inodes: InodeTable,
    backends: Backends,
    runtime: Handle,
    next_fop: AtomicU64,
}

impl ErasureSet {
    /// Create a set with every configured node live.
    ///
    /// Must be called from within a tokio runtime; sends, lock calls and
    /// wake-ups are spawned on it.
    pub fn new(config: &StripesetConfig, backends: Backends) -> StripesetResult<Arc<Self>> {
        config.validate()?;
        let runtime = Handle::try_current()?;
        let node_mask = config.set.node_mask();

        info!(
            set = %config.set.name,
            nodes = config.set.nodes,
            fragments = config.set.fragments,
            members = %node_mask,
            "Erasure set created"
        );

        Ok(Arc::new(ErasureSet {
            name: config.set.name.clone(),
            nodes: config.set.nodes,
            fragments: config.set.fragments as u32,
            node_mask,
            up: AtomicU64::new(node_mask.bits()),
            cursor: Mutex::new(0),
            auto_heal: config.set.auto_heal,
            lock_pool: LockPool::new(config.locks.pool_capacity),
            inodes: InodeTable::new(),
            backends,
            runtime,
            next_fop: AtomicU64::new(1),
        }))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of nodes (N)
    pub fn nodes(&self) -> usize {
        self.nodes
    }

    /// Fragment threshold (K)
    pub fn fragments(&self) -> u32 {
        self.fragments
    }

    /// Configured membership
    pub fn node_mask(&self) -> NodeMask {
        self.node_mask
    }

    /// Nodes currently connected
    pub fn up(&self) -> NodeMask {
        NodeMask::from_bits(self.up.load(Ordering::Acquire))
    }

    pub fn node_up(&self, node: usize) {
        let prev = NodeMask::from_bits(self.up.fetch_or(NodeMask::single(node).bits(), Ordering::AcqRel));
        if !prev.contains(node) {
            info!(set = %self.name, node, "Node is up");
        }
    }

    pub fn node_down(&self, node: usize) {
        let prev = NodeMask::from_bits(
            self.up
                .fetch_and(!NodeMask::single(node).bits(), Ordering::AcqRel),
        );
        if prev.contains(node) {
            let up = self.up() & self.node_mask;
            if up.count() < self.fragments {
                warn!(
                    set = %self.name,
                    node,
                    up = %up,
                    "Node is down; fewer live nodes than fragments"
                );
            } else {
                info!(set = %self.name, node, "Node is down");
            }
        }
    }

    pub fn cursor(&self) -> usize {
        *self.cursor.lock()
    }

    /// Advance the round-robin cursor by one and return the new start
    pub(crate) fn advance_cursor(&self) -> usize {
        let mut cursor = self.cursor.lock();
        *cursor = (*cursor + 1) % self.nodes;
        *cursor
    }

    /// Remember the node a single dispatch chose
    pub(crate) fn settle_cursor(&self, node: usize) {
        *self.cursor.lock() = node % self.nodes;
    }

    pub fn auto_heal(&self) -> bool {
        self.auto_heal
    }

    pub fn lock_pool(&self) -> &LockPool {
        &self.lock_pool
    }

    pub fn inodes(&self) -> &InodeTable {
        &self.inodes
    }

    pub fn backends(&self) -> &Backends {
        &self.backends
    }

    pub(crate) fn next_fop_id(&self) -> FopId {
        self.next_fop.fetch_add(1, Ordering::Relaxed)
    }

    pub(crate) fn spawn<F>(&self, future: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(future);
    }

    /// Start building an operation of the given type
    pub fn fop(self: &Arc<Self>, handler: Arc<dyn FopHandler>) -> FopBuilder {
        FopBuilder::new(self.clone(), handler)
    }
}

impl fmt::Debug for ErasureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErasureSet")
            .field("name", &self.name)
            .field("nodes", &self.nodes)
            .field("fragments", &self.fragments)
            .field("node_mask", &self.node_mask)
            .field("up", &self.up())
            .field("cursor", &self.cursor())
            .finish()
    }
}
