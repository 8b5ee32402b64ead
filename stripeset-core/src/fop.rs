//! Operation records
//!
//! A `Fop` is one in-flight fan-out operation. It is shared (`Arc`) between
//! the manager, every dispatched send, lock wait queues and child
//! operations; all of its mutable state sits in one exclusive section.
//!
//! Section order: an object's section may be held while taking an
//! operation's section, never the other way round.

use parking_lot::{Mutex, MutexGuard};
use std::fmt;
use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::{StripesetError, StripesetResult};
use crate::inode::{Inode, Loc, OpenFile};
use crate::join::Join;
use crate::lock::LockLink;
use crate::manager::{self, FopHandler, State};
use crate::mask::NodeMask;
use crate::reconcile::{ReplyGroup, ReplyGroups};
use crate::set::ErasureSet;
use crate::types::{Credentials, ObjectRef, ReplyValue};

pub type FopId = u64;

/// Requested minimum-agreement policy
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Minimum {
    /// Every eligible node, but never less than the fragment threshold
    All,
    /// The fragment threshold
    Min,
    /// Any single node
    One,
    Exactly(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DispatchPolicy {
    One,
    OneRetry,
    Incremental,
    All,
    Min,
}

/// Which per-object contexts receive good/bad updates
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ContextUpdates {
    pub loc_parent: bool,
    pub loc_inode: bool,
    pub fd_inode: bool,
    pub fd: bool,
}

impl Default for ContextUpdates {
    fn default() -> Self {
        ContextUpdates {
            loc_parent: false,
            loc_inode: true,
            fd_inode: true,
            fd: true,
        }
    }
}

/// Cached (pre, post) size of the operation's object
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SizeCache {
    pub pre: u64,
    pub post: u64,
    pub have: bool,
}

impl SizeCache {
    pub fn known(size: u64) -> Self {
        SizeCache {
            pre: size,
            post: size,
            have: true,
        }
    }

    /// Signed size change, clamped to the range of `i64`
    pub fn delta(&self) -> i64 {
        let delta = i128::from(self.post) - i128::from(self.pre);
        delta.clamp(i128::from(i64::MIN), i128::from(i64::MAX)) as i64
    }
}

/// What a finished operation reports to its caller
#[derive(Clone, Debug, PartialEq)]
pub struct FopAnswer {
    pub value: Option<ReplyValue>,
    pub mask: NodeMask,
    pub good: NodeMask,
    pub bad: NodeMask,
    pub expected: u32,
    pub minimum: u32,
    pub size: SizeCache,
}

pub(crate) struct FopState {
    pub mask: NodeMask,
    pub remaining: NodeMask,
    pub good: NodeMask,
    pub bad: NodeMask,
    pub first: usize,
    pub winds: u32,
    /// Join units released when in-flight sends drain
    pub waves: u32,
    pub join: Join,
    pub state: State,
    pub minimum_policy: Minimum,
    pub minimum: u32,
    pub expected: u32,
    pub policy: Option<DispatchPolicy>,
    pub groups: ReplyGroups,
    pub answer: Option<ReplyGroup>,
    pub locks: Vec<LockLink>,
    pub locked: usize,
    pub size: SizeCache,
    pub creds: Credentials,
    /// First error delivered to the manager; reported at the end
    pub error: Option<StripesetError>,
}

impl FopState {
    /// Record an error for the next step and for the final outcome
    pub fn fail(&mut self, error: StripesetError) {
        if self.error.is_none() {
            self.error = Some(error.clone());
        }
        self.join.fail(error);
    }
}

pub struct Fop {
    id: FopId,
    set: Arc<ErasureSet>,
    handler: Arc<dyn FopHandler>,
    parent: Option<Arc<Fop>>,
    locs: [Option<Loc>; 2],
    fd: Option<Arc<OpenFile>>,
    updates: ContextUpdates,
    state: Mutex<FopState>,
    done: Mutex<Option<oneshot::Sender<StripesetResult<FopAnswer>>>>,
}

impl Fop {
    pub fn id(&self) -> FopId {
        self.id
    }

    pub fn name(&self) -> &'static str {
        self.handler.name()
    }

    pub fn set(&self) -> &Arc<ErasureSet> {
        &self.set
    }

    pub(crate) fn handler(&self) -> &Arc<dyn FopHandler> {
        &self.handler
    }

    pub fn parent(&self) -> Option<&Arc<Fop>> {
        self.parent.as_ref()
    }

    pub fn is_top_level(&self) -> bool {
        self.parent.is_none()
    }

    pub fn loc(&self, idx: usize) -> Option<&Loc> {
        self.locs.get(idx).and_then(|loc| loc.as_ref())
    }

    pub fn fd(&self) -> Option<&Arc<OpenFile>> {
        self.fd.as_ref()
    }

    pub fn updates(&self) -> ContextUpdates {
        self.updates
    }

    pub(crate) fn lock_state(&self) -> MutexGuard<'_, FopState> {
        self.state.lock()
    }

    /// Object whose size/version the operation tracks: the open file's
    /// inode, else the first location's inode.
    pub fn primary_object(&self) -> Option<(Arc<Inode>, ObjectRef)> {
        if let Some(fd) = &self.fd {
            return Some((fd.inode().clone(), fd.object_ref()));
        }
        let loc = self.loc(0)?;
        Some((loc.inode.clone()?, loc.object_ref()?))
    }

    /// Inodes whose good mask restricts node selection
    pub(crate) fn touched_inodes(&self) -> Vec<Arc<Inode>> {
        let mut inodes: Vec<Arc<Inode>> = self
            .locs
            .iter()
            .flatten()
            .filter_map(|loc| loc.inode.clone())
            .collect();
        if let Some(fd) = &self.fd {
            inodes.push(fd.inode().clone());
        }
        inodes
    }

    pub fn mask(&self) -> NodeMask {
        self.state.lock().mask
    }

    pub fn remaining(&self) -> NodeMask {
        self.state.lock().remaining
    }

    pub fn good(&self) -> NodeMask {
        self.state.lock().good
    }

    pub fn bad(&self) -> NodeMask {
        self.state.lock().bad
    }

    pub fn expected(&self) -> u32 {
        self.state.lock().expected
    }

    pub fn minimum(&self) -> u32 {
        self.state.lock().minimum
    }

    pub fn winds(&self) -> u32 {
        self.state.lock().winds
    }

    pub fn jobs(&self) -> u32 {
        self.state.lock().join.jobs()
    }

    pub fn state(&self) -> State {
        self.state.lock().state
    }

    pub fn answer(&self) -> Option<ReplyGroup> {
        self.state.lock().answer.clone()
    }

    pub fn size(&self) -> SizeCache {
        self.state.lock().size
    }

    pub fn creds(&self) -> Credentials {
        self.state.lock().creds
    }

    pub fn error(&self) -> Option<StripesetError> {
        self.state.lock().error.clone()
    }

    pub fn has_error(&self) -> bool {
        let st = self.state.lock();
        st.error.is_some() || st.join.has_error()
    }

    /// Number of lock bindings and how many of them are held
    pub fn lock_progress(&self) -> (usize, usize) {
        let st = self.state.lock();
        (st.locked, st.locks.len())
    }

    /// Fail the operation; the manager unwinds on its next step
    pub fn set_error(&self, error: StripesetError) {
        self.state.lock().fail(error);
    }

    pub fn set_post_size(&self, size: u64) {
        self.state.lock().size.post = size;
    }

    /// Release one join unit, resuming the manager if it was the last one
    pub fn resume(self: &Arc<Self>, error: Option<StripesetError>) {
        manager::resume(self, error);
    }

    pub(crate) fn outcome(&self) -> StripesetResult<FopAnswer> {
        let st = self.state.lock();
        if let Some(error) = &st.error {
            return Err(error.clone());
        }
        Ok(FopAnswer {
            value: st.answer.as_ref().and_then(|group| group.outcome.clone().ok()),
            mask: st.mask,
            good: st.good,
            bad: st.bad,
            expected: st.expected,
            minimum: st.minimum,
            size: st.size,
        })
    }

    pub(crate) fn take_done(&self) -> Option<oneshot::Sender<StripesetResult<FopAnswer>>> {
        self.done.lock().take()
    }
}

impl fmt::Debug for Fop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let st = self.state.lock();
        f.debug_struct("Fop")
            .field("id", &self.id)
            .field("name", &self.handler.name())
            .field("state", &st.state)
            .field("mask", &st.mask)
            .field("remaining", &st.remaining)
            .field("good", &st.good)
            .field("bad", &st.bad)
            .field("winds", &st.winds)
            .field("jobs", &st.join.jobs())
            .finish()
    }
}

/// Handle the caller awaits for the operation's outcome
#[derive(Debug)]
pub struct FopHandle {
    id: FopId,
    rx: oneshot::Receiver<StripesetResult<FopAnswer>>,
}

impl FopHandle {
    pub fn id(&self) -> FopId {
        self.id
    }

    pub async fn wait(self) -> StripesetResult<FopAnswer> {
        self.rx.await?
    }
}

/// Builder for operation records
pub struct FopBuilder {
    set: Arc<ErasureSet>,
    handler: Arc<dyn FopHandler>,
    parent: Option<Arc<Fop>>,
    locs: [Option<Loc>; 2],
    fd: Option<Arc<OpenFile>>,
    mask: NodeMask,
    minimum: Minimum,
    creds: Option<Credentials>,
    updates: ContextUpdates,
}

impl FopBuilder {
    pub(crate) fn new(set: Arc<ErasureSet>, handler: Arc<dyn FopHandler>) -> Self {
        FopBuilder {
            set,
            handler,
            parent: None,
            locs: [None, None],
            fd: None,
            mask: NodeMask::FULL,
            minimum: Minimum::Min,
            creds: None,
            updates: ContextUpdates::default(),
        }
    }

    /// Add a target location; at most two are kept
    pub fn loc(mut self, loc: Loc) -> Self {
        if let Some(slot) = self.locs.iter_mut().find(|slot| slot.is_none()) {
            *slot = Some(loc);
        }
        self
    }

    pub fn fd(mut self, fd: Arc<OpenFile>) -> Self {
        self.fd = Some(fd);
        self
    }

    /// Nodes the operation may be sent to
    pub fn mask(mut self, mask: NodeMask) -> Self {
        self.mask = mask;
        self
    }

    pub fn minimum(mut self, minimum: Minimum) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn creds(mut self, creds: Credentials) -> Self {
        self.creds = Some(creds);
        self
    }

    pub fn updates(mut self, updates: ContextUpdates) -> Self {
        self.updates = updates;
        self
    }

    /// Make this a child of `parent` in a compound chain
    pub fn parent(mut self, parent: &Arc<Fop>) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    fn build(self) -> (Arc<Fop>, FopHandle) {
        let (tx, rx) = oneshot::channel();
        let id = self.set.next_fop_id();
        let creds = self
            .creds
            .or_else(|| self.parent.as_ref().map(|parent| parent.creds()))
            .unwrap_or_default();

        let state = FopState {
            mask: self.mask,
            remaining: NodeMask::EMPTY,
            good: NodeMask::EMPTY,
            bad: NodeMask::EMPTY,
            first: 0,
            winds: 0,
            waves: 0,
            join: Join::default(),
            state: State::START,
            minimum_policy: self.minimum,
            minimum: 0,
            expected: 0,
            policy: None,
            groups: ReplyGroups::new(),
            answer: None,
            locks: Vec::new(),
            locked: 0,
            size: SizeCache::default(),
            creds,
            error: None,
        };

        let fop = Arc::new(Fop {
            id,
            set: self.set,
            handler: self.handler,
            parent: self.parent,
            locs: self.locs,
            fd: self.fd,
            updates: self.updates,
            state: Mutex::new(state),
            done: Mutex::new(Some(tx)),
        });
        (fop, FopHandle { id, rx })
    }

    /// Create the operation and drive it until its first suspension
    pub fn submit(self) -> FopHandle {
        let (fop, handle) = self.build();
        if let Some(parent) = fop.parent() {
            parent.lock_state().join.add();
        }
        manager::start(&fop);
        handle
    }
}
