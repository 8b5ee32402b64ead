//! Standard operation types
//!
//! Every built-in operation follows the same step table:
//!
//! ```text
//! INIT -> LOCK -> GET_SIZE_AND_VERSION -> DISPATCH -> PREPARE_ANSWER
//!      -> REPORT -> LOCK_REUSE -> UNLOCK -> END
//! ```
//!
//! An error on entry to any step up to REPORT jumps to LOCK_REUSE, so locks
//! are always handed on and released. Operations differ only in their
//! [`FopSpec`]: dispatch policy, minimum, which locks they take, whether
//! they track size, and the request body.

use bytes::Bytes;
use std::sync::Arc;
use tracing::debug;

use crate::dispatch;
use crate::error::StripesetError;
use crate::fop::{DispatchPolicy, Fop, FopBuilder, Minimum};
use crate::lock;
use crate::manager::{FopHandler, State, Step};
use crate::set::ErasureSet;
use crate::size_version;
use crate::types::{NodeRequest, ObjectRef, RequestBody};

/// Locks an operation takes before dispatching
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockPlan {
    None,
    /// Whole-object lock on the open file's inode, else on the first
    /// location's inode
    Inode,
    /// Entry lock on the first location's name
    Entry,
    /// Entry locks on the names of both locations
    EntryPair,
}

#[derive(Clone, Debug)]
pub struct FopSpec {
    pub name: &'static str,
    pub policy: DispatchPolicy,
    pub minimum: Minimum,
    pub locks: LockPlan,
    /// Fetch size/version before dispatching
    pub tracks_size: bool,
    /// Record a version/size change on success
    pub updates: bool,
    /// Push deltas left by earlier holders of the inode lock before dispatch
    pub flushes: bool,
    pub body: RequestBody,
}

impl FopSpec {
    fn new(name: &'static str, body: RequestBody) -> Self {
        FopSpec {
            name,
            policy: DispatchPolicy::All,
            minimum: Minimum::Min,
            locks: LockPlan::None,
            tracks_size: false,
            updates: false,
            flushes: false,
            body,
        }
    }

    pub fn lookup() -> Self {
        Self::new("lookup", RequestBody::Lookup)
    }

    pub fn stat() -> Self {
        FopSpec {
            locks: LockPlan::Inode,
            tracks_size: true,
            ..Self::new("stat", RequestBody::Stat)
        }
    }

    pub fn read(offset: u64, len: u64) -> Self {
        FopSpec {
            policy: DispatchPolicy::Min,
            locks: LockPlan::Inode,
            tracks_size: true,
            ..Self::new("read", RequestBody::Read { offset, len })
        }
    }

    pub fn write(offset: u64, data: Bytes) -> Self {
        FopSpec {
            locks: LockPlan::Inode,
            tracks_size: true,
            updates: true,
            ..Self::new("write", RequestBody::Write { offset, data })
        }
    }

    pub fn truncate(size: u64) -> Self {
        FopSpec {
            locks: LockPlan::Inode,
            tracks_size: true,
            updates: true,
            ..Self::new("truncate", RequestBody::Truncate { size })
        }
    }

    pub fn create(name: impl Into<String>) -> Self {
        FopSpec {
            locks: LockPlan::Entry,
            updates: true,
            ..Self::new("create", RequestBody::Create { name: name.into() })
        }
    }

    pub fn unlink(name: impl Into<String>) -> Self {
        FopSpec {
            locks: LockPlan::Entry,
            updates: true,
            ..Self::new("unlink", RequestBody::Unlink { name: name.into() })
        }
    }

    pub fn rename(from: impl Into<String>, to: impl Into<String>) -> Self {
        FopSpec {
            locks: LockPlan::EntryPair,
            updates: true,
            ..Self::new(
                "rename",
                RequestBody::Rename {
                    from: from.into(),
                    to: to.into(),
                },
            )
        }
    }

    /// Flush an open file: deltas still pending on its inode lock are
    /// applied on the nodes before the flush itself is sent
    pub fn flush() -> Self {
        FopSpec {
            locks: LockPlan::Inode,
            flushes: true,
            ..Self::new("flush", RequestBody::Flush)
        }
    }

    pub fn with_policy(mut self, policy: DispatchPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_minimum(mut self, minimum: Minimum) -> Self {
        self.minimum = minimum;
        self
    }

    pub fn with_locks(mut self, locks: LockPlan) -> Self {
        self.locks = locks;
        self
    }

    pub fn into_handler(self) -> Arc<dyn FopHandler> {
        Arc::new(StandardFop::new(self))
    }

    /// Start building an operation of this type on `set`
    pub fn fop(self, set: &Arc<ErasureSet>) -> FopBuilder {
        let minimum = self.minimum;
        set.fop(self.into_handler()).minimum(minimum)
    }
}

#[derive(Debug)]
pub struct StandardFop {
    spec: FopSpec,
}

impl StandardFop {
    pub fn new(spec: FopSpec) -> Self {
        StandardFop { spec }
    }

    pub fn spec(&self) -> &FopSpec {
        &self.spec
    }

    fn prepare_locks(&self, fop: &Arc<Fop>) {
        let prepared = match self.spec.locks {
            LockPlan::None => Ok(()),
            LockPlan::Inode => match (fop.fd(), fop.loc(0)) {
                (Some(fd), _) => lock::prepare_fd(fop, fd),
                (None, Some(loc)) => lock::prepare_inode(fop, loc),
                (None, None) => Ok(()),
            },
            LockPlan::Entry => fop
                .loc(0)
                .map_or(Ok(()), |loc| lock::prepare_entry(fop, loc)),
            LockPlan::EntryPair => [fop.loc(0), fop.loc(1)]
                .into_iter()
                .flatten()
                .try_for_each(|loc| lock::prepare_entry(fop, loc)),
        };
        if let Err(e) = prepared {
            fop.set_error(e);
        }
    }

    /// Fold the chosen reply into the operation
    fn prepare_answer(&self, fop: &Fop) {
        let Some(answer) = fop.answer() else {
            fop.set_error(StripesetError::internal("dispatch finished without an answer"));
            return;
        };
        if let Err(errno) = answer.outcome {
            fop.set_error(StripesetError::NodeFailure { errno });
            return;
        }

        let size = fop.size();
        if !size.have {
            return;
        }
        match &self.spec.body {
            RequestBody::Write { offset, data } => {
                fop.set_post_size(size.pre.max(offset + data.len() as u64));
            }
            RequestBody::Truncate { size } => fop.set_post_size(*size),
            _ => {}
        }
    }

    fn target(&self, fop: &Fop) -> Option<ObjectRef> {
        if let Some((_, object)) = fop.primary_object() {
            return Some(object);
        }
        let loc = fop.loc(0)?;
        let parent = loc.parent.as_ref()?;
        Some(ObjectRef {
            id: parent.id(),
            path: loc.parent_path(),
        })
    }
}

impl FopHandler for StandardFop {
    fn name(&self) -> &'static str {
        self.spec.name
    }

    fn manage(&self, fop: &Arc<Fop>, step: Step) -> State {
        match step {
            Step::Run(State::INIT) => {
                self.prepare_locks(fop);
                State::LOCK
            }
            Step::Run(State::LOCK) => {
                lock::acquire(fop);
                State::GET_SIZE_AND_VERSION
            }
            Step::Run(State::GET_SIZE_AND_VERSION) => {
                if self.spec.tracks_size {
                    size_version::get_size_version(fop);
                }
                State::DISPATCH
            }
            Step::Run(State::DISPATCH) => {
                let flushed = if self.spec.flushes {
                    size_version::flush_size_version(fop)
                } else {
                    Ok(())
                };
                if let Err(e) = flushed.and_then(|_| dispatch::dispatch(fop, self.spec.policy)) {
                    fop.set_error(e);
                }
                State::PREPARE_ANSWER
            }
            Step::Run(State::PREPARE_ANSWER) => {
                self.prepare_answer(fop);
                State::REPORT
            }
            Step::Run(State::REPORT) => {
                debug!(
                    fop = fop.id(),
                    name = self.spec.name,
                    good = %fop.good(),
                    bad = %fop.bad(),
                    "Operation answered"
                );
                State::LOCK_REUSE
            }
            Step::Unwind(State::INIT)
            | Step::Unwind(State::LOCK)
            | Step::Unwind(State::GET_SIZE_AND_VERSION)
            | Step::Unwind(State::DISPATCH)
            | Step::Unwind(State::PREPARE_ANSWER)
            | Step::Unwind(State::REPORT) => {
                debug!(
                    fop = fop.id(),
                    name = self.spec.name,
                    state = %step.state(),
                    error = ?fop.error(),
                    "Operation unwinding"
                );
                State::LOCK_REUSE
            }
            Step::Run(State::LOCK_REUSE) | Step::Unwind(State::LOCK_REUSE) => {
                lock::lock_reuse(fop, self.spec.updates);
                State::UNLOCK
            }
            Step::Run(State::UNLOCK) | Step::Unwind(State::UNLOCK) => {
                lock::unlock(fop);
                State::END
            }
            other => {
                fop.set_error(StripesetError::internal(format!(
                    "unhandled state {} in {}",
                    other.state(),
                    self.spec.name
                )));
                State::END
            }
        }
    }

    fn wind(&self, fop: &Fop, _node: usize) -> NodeRequest {
        NodeRequest {
            fop: fop.id(),
            target: self.target(fop),
            body: self.spec.body.clone(),
            creds: fop.creds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spec_constructors() {
        let write = FopSpec::write(0, Bytes::from_static(b"abc"));
        assert_eq!(write.locks, LockPlan::Inode);
        assert!(write.tracks_size && write.updates);
        assert_eq!(write.body.name(), "write");

        let read = FopSpec::read(0, 10);
        assert_eq!(read.policy, DispatchPolicy::Min);
        assert!(!read.updates);

        let rename = FopSpec::rename("a", "b");
        assert_eq!(rename.locks, LockPlan::EntryPair);

        let flush = FopSpec::flush();
        assert!(flush.flushes && !flush.updates);
        assert_eq!(flush.locks, LockPlan::Inode);

        let lookup = FopSpec::lookup().with_policy(DispatchPolicy::OneRetry);
        assert_eq!(lookup.policy, DispatchPolicy::OneRetry);
        assert_eq!(lookup.locks, LockPlan::None);
    }
}
