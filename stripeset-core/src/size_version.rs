//! Object size and version tracking
//!
//! The authoritative (size, version) of an object is fetched once per lock
//! transaction and cached on the object's inode lock. Modifications add to
//! deltas on the lock; the last holder flushes them in one atomic update.

use std::sync::Arc;
use tracing::{error, trace, warn};

use crate::error::{StripesetError, StripesetResult};
use crate::fop::{Fop, SizeCache};
use crate::types::{Credentials, LockKind, SizeVersionDelta};

/// Make sure the operation knows the size of its object.
///
/// Reuses the operation's own cache, then its parent's, and otherwise
/// fetches from the nodes. Metadata is read with root credentials; the
/// caller's credentials stay on the operation.
pub fn get_size_version(fop: &Arc<Fop>) {
    if fop.size().have {
        return;
    }
    if let Some(parent) = fop.parent() {
        let inherited = parent.size();
        if inherited.have {
            fop.lock_state().size = inherited;
            return;
        }
    }

    let Some((inode, object)) = fop.primary_object() else {
        fop.set_error(StripesetError::metadata_fetch(
            fop.loc(0).map(|loc| loc.path.clone()).unwrap_or_default(),
            "operation has no target object",
        ));
        return;
    };

    let set = fop.set();
    let metadata = set.backends().metadata.clone();
    let nodes = fop.mask();
    let minimum = set.fragments();
    fop.lock_state().join.add();

    let task = fop.clone();
    set.spawn(async move {
        let fop = task;
        let error = match metadata.fetch(nodes, minimum, &object, Credentials::ROOT).await {
            Ok(fetched) => {
                let cached = {
                    let mut ctx = inode.ctx();
                    match ctx.inode_lock {
                        Some(id) => match ctx.locks.get_mut(&id) {
                            Some(lock) => {
                                lock.have_size = true;
                                lock.size = fetched.attr.size;
                                lock.version = fetched.attr.version;
                                true
                            }
                            None => false,
                        },
                        None => false,
                    }
                };

                let mut st = fop.lock_state();
                // Only narrow when the fetch ran under the object's lock
                if cached {
                    st.mask &= fetched.good;
                }
                st.size = SizeCache::known(fetched.attr.size);
                trace!(
                    fop = fop.id(),
                    size = fetched.attr.size,
                    version = fetched.attr.version,
                    "SIZE_VERSION"
                );
                None
            }
            Err(e) => {
                warn!(fop = fop.id(), path = %object.path, error = %e, "Failed to get size and version");
                Some(match e {
                    StripesetError::MetadataFetchFailure { .. } => e,
                    other => StripesetError::metadata_fetch(object.path.clone(), other.to_string()),
                })
            }
        };
        fop.resume(error);
    });
}

/// Publish a version/size change.
///
/// A child hands its post size to its parent; a top-level operation
/// applies the delta on the nodes. Failures are logged, not reported.
pub fn update_size_version(fop: &Arc<Fop>, delta: SizeVersionDelta) {
    if let Some(parent) = fop.parent() {
        parent.set_post_size(fop.size().post);
        return;
    }

    trace!(fop = fop.id(), version = delta.version, size = delta.size, "UPDATE");

    let Some((_, object)) = fop.primary_object() else {
        error!(fop = fop.id(), name = fop.name(), "Unable to update version and size");
        return;
    };

    let set = fop.set();
    let metadata = set.backends().metadata.clone();
    let nodes = fop.mask();
    let minimum = set.fragments();
    fop.lock_state().join.add();

    let task = fop.clone();
    set.spawn(async move {
        let fop = task;
        match metadata
            .apply_delta(nodes, minimum, &object, delta, Credentials::ROOT)
            .await
        {
            Ok(applied) => fop.lock_state().mask &= applied,
            Err(e) => {
                error!(fop = fop.id(), path = %object.path, error = %e, "Failed to update version and size");
            }
        }
        fop.resume(None);
    });
}

/// Flush the deltas accumulated on the operation's only lock, which must be
/// an inode lock it owns.
pub fn flush_size_version(fop: &Arc<Fop>) -> StripesetResult<()> {
    let link = {
        let st = fop.lock_state();
        match st.locks.as_slice() {
            [link] => link.clone(),
            links => {
                return Err(StripesetError::internal(format!(
                    "flush needs exactly one lock, operation holds {}",
                    links.len()
                )))
            }
        }
    };

    let delta = {
        let mut ctx = link.inode.ctx();
        let lock = ctx
            .locks
            .get_mut(&link.lock)
            .ok_or_else(|| StripesetError::internal(format!("{} not found", link.lock)))?;
        if lock.kind() != LockKind::Inode || lock.owner != Some(fop.id()) {
            return Err(StripesetError::internal(format!(
                "{} is not an inode lock owned by the operation",
                link.lock
            )));
        }
        let delta = SizeVersionDelta {
            version: lock.version_delta,
            size: lock.size_delta,
        };
        lock.version_delta = 0;
        lock.size_delta = 0;
        delta
    };

    if delta.version > 0 {
        update_size_version(fop, delta);
    }
    Ok(())
}
