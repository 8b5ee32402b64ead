//! Reply voting and consistency tracking
//!
//! Replies are grouped by identical outcome. When the last in-flight send
//! has replied, the first group that reached the operation's minimum
//! becomes its answer. Nodes that were sent to but disagreed with the
//! answer are marked bad on the operation and, for top-level operations,
//! on the contexts of the objects it touched.

use std::sync::Arc;
use tracing::{info, trace, warn};

use crate::dispatch::{claim_next, wind};
use crate::error::StripesetError;
use crate::fop::{DispatchPolicy, Fop};
use crate::inode::Inode;
use crate::mask::NodeMask;
use crate::types::{HealRequest, NodeErrno, NodeOutcome, NodeReply, ObjectRef};

/// Nodes that returned one identical outcome
#[derive(Clone, Debug, PartialEq)]
pub struct ReplyGroup {
    pub outcome: NodeOutcome,
    pub mask: NodeMask,
    pub count: u32,
}

impl ReplyGroup {
    pub fn is_unreachable(&self) -> bool {
        matches!(self.outcome, Err(NodeErrno::NotConnected))
    }

    /// Whether the group can become the answer under `minimum`
    pub fn qualifies(&self, minimum: u32) -> bool {
        self.count >= minimum && !self.is_unreachable()
    }
}

/// Insertion-ordered reply groups of one dispatch
#[derive(Clone, Debug, Default)]
pub struct ReplyGroups {
    groups: Vec<ReplyGroup>,
    replies: u32,
}

impl ReplyGroups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, reply: NodeReply) {
        self.replies += 1;
        match self.groups.iter_mut().find(|g| g.outcome == reply.outcome) {
            Some(group) => {
                group.mask.insert(reply.node);
                group.count += 1;
            }
            None => self.groups.push(ReplyGroup {
                outcome: reply.outcome,
                mask: NodeMask::single(reply.node),
                count: 1,
            }),
        }
    }

    /// First group, in arrival order of its first member, that qualifies
    pub fn select(&self, minimum: u32) -> Option<&ReplyGroup> {
        self.groups.iter().find(|group| group.qualifies(minimum))
    }

    /// Size of the largest group that could still become the answer
    pub fn leader(&self) -> u32 {
        self.groups
            .iter()
            .filter(|group| !group.is_unreachable())
            .map(|group| group.count)
            .max()
            .unwrap_or(0)
    }

    pub fn replies(&self) -> u32 {
        self.replies
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ReplyGroup> {
        self.groups.iter()
    }

    /// Nodes that did not answer at all
    pub fn unreachable(&self) -> NodeMask {
        self.groups
            .iter()
            .filter(|group| group.is_unreachable())
            .fold(NodeMask::EMPTY, |acc, group| acc | group.mask)
    }

    pub fn all_unreachable(&self) -> bool {
        !self.groups.is_empty() && self.groups.iter().all(ReplyGroup::is_unreachable)
    }

    pub fn clear(&mut self) {
        self.groups.clear();
        self.replies = 0;
    }
}

/// Masks of a finished wave, captured for context propagation
struct Settled {
    good: NodeMask,
    bad: NodeMask,
    mask: NodeMask,
    remaining: NodeMask,
}

/// Handle one node's reply
pub(crate) fn complete(fop: &Arc<Fop>, reply: NodeReply) {
    let nodes = fop.set().nodes();
    let node = reply.node;
    let mut next = None;
    let mut settled = None;
    let mut waves = 0;
    let mut failure = None;

    {
        let mut st = fop.lock_state();
        trace!(fop = fop.id(), node, outcome = ?reply.outcome, "COMPLETE");

        match st.policy {
            Some(DispatchPolicy::OneRetry) if reply.is_unreachable() => {
                next = claim_next(&mut st, nodes, node + 1);
                if next.is_none() {
                    st.groups.insert(reply);
                }
            }
            Some(DispatchPolicy::Incremental) => {
                st.groups.insert(reply);
                // Sends still in flight may yet complete the leading group
                let pending = st.winds.saturating_sub(1);
                if st.groups.leader() + pending < st.minimum {
                    next = claim_next(&mut st, nodes, node + 1);
                }
            }
            _ => st.groups.insert(reply),
        }

        st.winds = st.winds.saturating_sub(1);
        if st.winds == 0 {
            if st.answer.is_none() {
                let minimum = st.minimum;
                // A lone expected reply is the answer whatever the minimum
                let threshold = if st.expected == 1 { 1 } else { minimum };
                match st.groups.select(threshold).cloned() {
                    Some(group) => {
                        let good = group.mask;
                        let bad = st.mask & !(st.remaining | good);
                        let changed = !st.bad.is_superset(bad) || !st.good.is_superset(good);
                        st.bad |= bad;
                        st.good |= good;
                        st.answer = Some(group);
                        if changed && fop.is_top_level() {
                            settled = Some(Settled {
                                good,
                                bad,
                                mask: st.mask,
                                remaining: st.remaining,
                            });
                        }
                    }
                    None => {
                        failure = Some(if st.groups.all_unreachable() {
                            StripesetError::NodeUnreachable {
                                nodes: st.mask & !st.remaining,
                            }
                        } else {
                            StripesetError::ReconciliationFailure {
                                replies: st.groups.replies(),
                                groups: st.groups.len(),
                                minimum,
                            }
                        });
                    }
                }
            }
            waves = std::mem::take(&mut st.waves);
        }
    }

    if let Some(node) = next {
        wind(fop, node);
    }

    if let Some(settled) = settled {
        update_contexts(fop, &settled);
        check_status(fop, &settled);
    }

    for wave in 0..waves {
        fop.resume(if wave == 0 { failure.clone() } else { None });
    }
}

fn update_contexts(fop: &Fop, settled: &Settled) {
    let updates = fop.updates();
    let merge = |inode: Option<&Arc<Inode>>| {
        if let Some(inode) = inode {
            inode.ctx().merge(settled.good, settled.bad);
        }
    };

    if let Some(loc) = fop.loc(0) {
        if updates.loc_parent {
            merge(loc.parent.as_ref());
        }
        if updates.loc_inode {
            merge(loc.inode.as_ref());
        }
    }
    if let Some(loc) = fop.loc(1) {
        merge(loc.inode.as_ref());
    }
    if let Some(fd) = fop.fd() {
        if updates.fd_inode {
            merge(Some(fd.inode()));
        }
        if updates.fd {
            fd.merge(settled.good, settled.bad);
        }
    }
}

/// Schedule repairs when a live node neither answered with the majority
/// nor is still pending.
fn check_status(fop: &Fop, settled: &Settled) {
    let set = fop.set();
    let up = set.up();
    if (up & !(settled.remaining | settled.good)).is_empty() {
        return;
    }

    warn!(
        fop = fop.id(),
        name = fop.name(),
        up = %up,
        mask = %settled.mask,
        remaining = %settled.remaining,
        good = %settled.good,
        bad = %settled.bad,
        "Operation failed on some nodes"
    );

    if !set.auto_heal() {
        return;
    }

    let nodes = set.node_mask() & up;
    let mut targets: Vec<(ObjectRef, Option<Arc<Inode>>, bool)> = Vec::new();
    if let Some(fd) = fop.fd() {
        targets.push((fd.object_ref(), Some(fd.inode().clone()), true));
    } else {
        for loc in [fop.loc(0), fop.loc(1)].into_iter().flatten() {
            if let Some(object) = loc.object_ref() {
                targets.push((object, loc.inode.clone(), false));
            }
        }
    }

    for (object, inode, by_fd) in targets {
        let healer = set.backends().healer.clone();
        let request = HealRequest {
            object,
            by_fd,
            nodes,
        };
        set.spawn(async move {
            let path = request.object.path.clone();
            match healer.heal(request).await {
                Ok(report) => {
                    info!(
                        path = %path,
                        healed = report.healed(),
                        needed = report.needed(),
                        "Heal succeeded on {}/{} nodes",
                        report.healed(),
                        report.needed()
                    );
                    if let Some(inode) = inode {
                        inode.mark_repaired(report.mask & !(report.good | report.bad));
                    }
                }
                Err(e) => warn!(path = %path, error = %e, "Heal failed"),
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ReplyValue;
    use pretty_assertions::assert_eq;

    fn reply(node: usize, outcome: NodeOutcome) -> NodeReply {
        NodeReply { node, outcome }
    }

    #[test]
    fn test_identical_replies_share_a_group() {
        let mut groups = ReplyGroups::new();
        groups.insert(reply(0, Ok(ReplyValue::ok(7))));
        groups.insert(reply(3, Err(NodeErrno::Io)));
        groups.insert(reply(1, Ok(ReplyValue::ok(7))));

        assert_eq!(groups.len(), 2);
        assert_eq!(groups.replies(), 3);
        let first = groups.iter().next().unwrap();
        assert_eq!(first.mask, NodeMask::from_nodes([0, 1]));
        assert_eq!(first.count, 2);
    }

    #[test]
    fn test_select_skips_unreachable_and_small_groups() {
        let mut groups = ReplyGroups::new();
        groups.insert(reply(0, Err(NodeErrno::NotConnected)));
        groups.insert(reply(1, Err(NodeErrno::NotConnected)));
        groups.insert(reply(2, Ok(ReplyValue::ok(1))));
        groups.insert(reply(3, Err(NodeErrno::NotFound)));
        groups.insert(reply(4, Err(NodeErrno::NotFound)));

        let chosen = groups.select(2).unwrap();
        assert_eq!(chosen.outcome, Err(NodeErrno::NotFound));
        assert!(groups.select(3).is_none());
        assert_eq!(groups.unreachable(), NodeMask::from_nodes([0, 1]));
        assert!(!groups.all_unreachable());
    }

    #[test]
    fn test_first_qualifying_group_wins() {
        let mut groups = ReplyGroups::new();
        groups.insert(reply(5, Ok(ReplyValue::ok(2))));
        groups.insert(reply(0, Ok(ReplyValue::ok(1))));
        groups.insert(reply(1, Ok(ReplyValue::ok(1))));
        groups.insert(reply(4, Ok(ReplyValue::ok(2))));

        assert_eq!(groups.select(2).unwrap().outcome, Ok(ReplyValue::ok(2)));
    }

    #[test]
    fn test_leader_ignores_unreachable_groups() {
        let mut groups = ReplyGroups::new();
        assert_eq!(groups.leader(), 0);
        groups.insert(reply(0, Err(NodeErrno::NotConnected)));
        groups.insert(reply(1, Err(NodeErrno::NotConnected)));
        assert_eq!(groups.leader(), 0);
        groups.insert(reply(2, Ok(ReplyValue::ok(1))));
        groups.insert(reply(3, Ok(ReplyValue::ok(1))));
        groups.insert(reply(4, Err(NodeErrno::Io)));
        assert_eq!(groups.leader(), 2);
    }
}
