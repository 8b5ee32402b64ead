//! Fan-out of an operation to its nodes
//!
//! Every policy resets the previous answer, selects the eligible nodes and
//! then sends to some of them. Sends are spawned and never awaited here;
//! each one delivers its reply to [`crate::reconcile::complete`].

use std::sync::Arc;
use tracing::trace;

use crate::error::StripesetResult;
use crate::fop::{DispatchPolicy, Fop, FopState};
use crate::mask::NodeMask;
use crate::reconcile;
use crate::select::{objects_good, select};
use crate::types::NodeReply;

fn start(st: &mut FopState, policy: DispatchPolicy) {
    st.answer = None;
    st.good = NodeMask::EMPTY;
    st.bad = NodeMask::EMPTY;
    st.groups.clear();
    st.policy = Some(policy);
}

/// Claim the first remaining node at or after `idx` (wrapping)
pub(crate) fn claim_next(st: &mut FopState, nodes: usize, idx: usize) -> Option<usize> {
    let node = st.remaining.next_from(idx % nodes.max(1), nodes)?;
    st.remaining.remove(node);
    st.winds += 1;
    Some(node)
}

fn claim_mask(st: &mut FopState, mask: NodeMask) -> NodeMask {
    let mask = mask & st.remaining;
    st.remaining &= !mask;
    st.winds += mask.count();
    mask
}

/// Build the node request and spawn the send
pub(crate) fn wind(fop: &Arc<Fop>, node: usize) {
    trace!(fop = fop.id(), node, "EXECUTE");
    let request = fop.handler().wind(fop, node);
    let transport = fop.set().backends().transport.clone();
    let task = fop.clone();
    fop.set().spawn(async move {
        let outcome = transport.send(node, request).await;
        reconcile::complete(&task, NodeReply { node, outcome });
    });
}

pub fn dispatch(fop: &Arc<Fop>, policy: DispatchPolicy) -> StripesetResult<()> {
    match policy {
        DispatchPolicy::One | DispatchPolicy::OneRetry => one(fop, policy),
        DispatchPolicy::Incremental => incremental(fop),
        DispatchPolicy::All => all(fop),
        DispatchPolicy::Min => min(fop),
    }
}

/// Send to the first eligible node at or after the cursor
fn one(fop: &Arc<Fop>, policy: DispatchPolicy) -> StripesetResult<()> {
    let good = objects_good(fop);
    let set = fop.set();
    let node = {
        let mut st = fop.lock_state();
        start(&mut st, policy);
        select(fop, &mut st, good)?;
        st.expected = 1;
        let first = st.first;
        let node = claim_next(&mut st, set.nodes(), first);
        if let Some(node) = node {
            st.first = node;
            set.settle_cursor(node);
        }
        node
    };
    if let Some(node) = node {
        wind(fop, node);
    }
    Ok(())
}

/// Send to one node at a time; each reply sends to the next
fn incremental(fop: &Arc<Fop>) -> StripesetResult<()> {
    let good = objects_good(fop);
    let node = {
        let mut st = fop.lock_state();
        start(&mut st, DispatchPolicy::Incremental);
        select(fop, &mut st, good)?;
        st.expected = st.remaining.count();
        st.first = 0;
        claim_next(&mut st, fop.set().nodes(), 0)
    };
    if let Some(node) = node {
        wind(fop, node);
    }
    Ok(())
}

/// Send to every eligible node at once
fn all(fop: &Arc<Fop>) -> StripesetResult<()> {
    let good = objects_good(fop);
    let mask = {
        let mut st = fop.lock_state();
        start(&mut st, DispatchPolicy::All);
        select(fop, &mut st, good)?;
        st.expected = st.remaining.count();
        st.first = 0;
        let remaining = st.remaining;
        claim_mask(&mut st, remaining)
    };
    for node in mask.iter() {
        wind(fop, node);
    }
    Ok(())
}

/// Send to K eligible nodes starting at the cursor
fn min(fop: &Arc<Fop>) -> StripesetResult<()> {
    let good = objects_good(fop);
    let set = fop.set();
    let mask = {
        let mut st = fop.lock_state();
        start(&mut st, DispatchPolicy::Min);
        select(fop, &mut st, good)?;
        let nodes = set.nodes();
        let first = st.first;
        let remaining = st.remaining;
        let picked = NodeMask::from_nodes(
            (0..nodes)
                .map(|offset| (first + offset) % nodes)
                .filter(|&node| remaining.contains(node))
                .take(set.fragments() as usize),
        );
        st.expected = picked.count();
        claim_mask(&mut st, picked)
    };
    for node in mask.iter() {
        wind(fop, node);
    }
    Ok(())
}

/// Send to the next remaining node at or after `idx`, returning it
pub fn dispatch_next(fop: &Arc<Fop>, idx: usize) -> Option<usize> {
    let node = claim_next(&mut fop.lock_state(), fop.set().nodes(), idx);
    if let Some(node) = node {
        wind(fop, node);
    }
    node
}

/// Send to every node of `mask` that is still remaining
pub fn dispatch_mask(fop: &Arc<Fop>, mask: NodeMask) {
    let mask = claim_mask(&mut fop.lock_state(), mask);
    trace!(fop = fop.id(), mask = %mask, "EXECUTE");
    for node in mask.iter() {
        wind(fop, node);
    }
}

/// Hold the manager until every in-flight send has replied
pub fn wait_winds(fop: &Fop) {
    let mut st = fop.lock_state();
    if st.winds > 0 {
        st.join.add();
        st.waves += 1;
    }
}
