//! In-memory node cluster
//!
//! `SimCluster` plays every collaborator role for a set of simulated nodes.
//! Nodes can be made unreachable, forced to fail with an errno, or made to
//! return a fixed reply. Calls are counted so tests can check how often the
//! engine talked to the nodes.

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::trace;

use crate::backend::{Healer, LockService, MetadataService, Transport};
use crate::error::{StripesetError, StripesetResult};
use crate::mask::NodeMask;
use crate::types::{
    Credentials, FetchedAttr, HealReport, HealRequest, LockTarget, NodeErrno, NodeOutcome,
    NodeRequest, ObjectAttr, ObjectId, ObjectRef, ReplyValue, RequestBody, SizeVersionDelta,
};

#[derive(Debug, Default)]
struct SimNode {
    unreachable: bool,
    failure: Option<NodeErrno>,
    reply: Option<ReplyValue>,
    attrs: HashMap<ObjectId, ObjectAttr>,
    /// Objects this node missed an update for
    stale: HashSet<ObjectId>,
    /// Lock targets held on this node
    held: Vec<LockTarget>,
}

impl SimNode {
    fn healthy(&self) -> bool {
        !self.unreachable && self.failure.is_none()
    }
}

#[derive(Debug, Default)]
struct Counters {
    lock_acquires: AtomicU64,
    lock_releases: AtomicU64,
    fetches: AtomicU64,
}

#[derive(Debug)]
pub struct SimCluster {
    nodes: Vec<Mutex<SimNode>>,
    sends: Vec<AtomicU64>,
    counters: Counters,
    latency: Mutex<(Duration, Duration)>,
    /// How long a lock request waits for a node held by someone else
    lock_wait: Mutex<Duration>,
    released: Notify,
    requests: Mutex<Vec<(usize, NodeRequest)>>,
    deltas: Mutex<Vec<(ObjectId, SizeVersionDelta)>>,
    heals: Mutex<Vec<HealRequest>>,
}

impl SimCluster {
    pub fn new(nodes: usize) -> Self {
        SimCluster {
            nodes: (0..nodes).map(|_| Mutex::new(SimNode::default())).collect(),
            sends: (0..nodes).map(|_| AtomicU64::new(0)).collect(),
            counters: Counters::default(),
            latency: Mutex::new((Duration::ZERO, Duration::ZERO)),
            lock_wait: Mutex::new(Duration::ZERO),
            released: Notify::new(),
            requests: Mutex::new(Vec::new()),
            deltas: Mutex::new(Vec::new()),
            heals: Mutex::new(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Delay every call by `base` plus a random jitter up to `jitter`
    pub fn set_latency(&self, base: Duration, jitter: Duration) {
        *self.latency.lock() = (base, jitter);
    }

    /// Let lock requests block up to `wait` on nodes where the target is
    /// already held. Zero refuses such nodes immediately.
    pub fn set_lock_wait(&self, wait: Duration) {
        *self.lock_wait.lock() = wait;
    }

    pub fn set_unreachable(&self, node: usize, unreachable: bool) {
        if let Some(n) = self.nodes.get(node) {
            n.lock().unreachable = unreachable;
        }
    }

    /// Make every request to `node` fail with `errno`
    pub fn fail_node(&self, node: usize, errno: NodeErrno) {
        if let Some(n) = self.nodes.get(node) {
            n.lock().failure = Some(errno);
        }
    }

    /// Make every successful request to `node` return `reply`
    pub fn set_reply(&self, node: usize, reply: ReplyValue) {
        if let Some(n) = self.nodes.get(node) {
            n.lock().reply = Some(reply);
        }
    }

    /// Clear injected failures and replies on `node`
    pub fn restore(&self, node: usize) {
        if let Some(n) = self.nodes.get(node) {
            let mut n = n.lock();
            n.unreachable = false;
            n.failure = None;
            n.reply = None;
        }
    }

    /// Store the size/version of `object` on every node of `nodes`
    pub fn set_attr(&self, nodes: NodeMask, object: ObjectId, attr: ObjectAttr) {
        for node in nodes.iter() {
            if let Some(n) = self.nodes.get(node) {
                n.lock().attrs.insert(object, attr);
            }
        }
    }

    pub fn attr(&self, node: usize, object: ObjectId) -> Option<ObjectAttr> {
        self.nodes
            .get(node)
            .and_then(|n| n.lock().attrs.get(&object).copied())
    }

    /// Whether `node` missed an update of `object` that was not repaired yet
    pub fn is_stale(&self, node: usize, object: ObjectId) -> bool {
        self.nodes
            .get(node)
            .is_some_and(|n| n.lock().stale.contains(&object))
    }

    pub fn sends(&self, node: usize) -> u64 {
        self.sends
            .get(node)
            .map_or(0, |count| count.load(Ordering::Relaxed))
    }

    pub fn total_sends(&self) -> u64 {
        self.sends.iter().map(|count| count.load(Ordering::Relaxed)).sum()
    }

    /// Nodes that received at least one request
    pub fn contacted(&self) -> NodeMask {
        NodeMask::from_nodes((0..self.nodes.len()).filter(|&node| self.sends(node) > 0))
    }

    /// Requests in the order they were received
    pub fn requests(&self) -> Vec<(usize, NodeRequest)> {
        self.requests.lock().clone()
    }

    pub fn lock_acquires(&self) -> u64 {
        self.counters.lock_acquires.load(Ordering::Relaxed)
    }

    pub fn lock_releases(&self) -> u64 {
        self.counters.lock_releases.load(Ordering::Relaxed)
    }

    pub fn fetches(&self) -> u64 {
        self.counters.fetches.load(Ordering::Relaxed)
    }

    pub fn deltas(&self) -> Vec<(ObjectId, SizeVersionDelta)> {
        self.deltas.lock().clone()
    }

    pub fn heals(&self) -> Vec<HealRequest> {
        self.heals.lock().clone()
    }

    /// Reset every counter and recorded call
    pub fn reset_counters(&self) {
        for count in &self.sends {
            count.store(0, Ordering::Relaxed);
        }
        self.counters.lock_acquires.store(0, Ordering::Relaxed);
        self.counters.lock_releases.store(0, Ordering::Relaxed);
        self.counters.fetches.store(0, Ordering::Relaxed);
        self.requests.lock().clear();
        self.deltas.lock().clear();
        self.heals.lock().clear();
    }

    async fn delay(&self) {
        let (base, jitter) = *self.latency.lock();
        let extra = if jitter.is_zero() {
            Duration::ZERO
        } else {
            let micros = rand::thread_rng().gen_range(0..=jitter.as_micros() as u64);
            Duration::from_micros(micros)
        };
        let total = base + extra;
        if !total.is_zero() {
            tokio::time::sleep(total).await;
        }
    }

    /// Grant `target` on the free nodes of `pending`; returns the nodes
    /// where it is held by someone else
    fn try_lock(&self, pending: NodeMask, target: &LockTarget, granted: &mut NodeMask) -> NodeMask {
        let mut busy = NodeMask::EMPTY;
        for node in pending.iter() {
            let Some(n) = self.nodes.get(node) else {
                continue;
            };
            let mut n = n.lock();
            if n.unreachable {
                continue;
            }
            if n.held.contains(target) {
                busy.insert(node);
                continue;
            }
            n.held.push(target.clone());
            granted.insert(node);
        }
        busy
    }

    fn healthy(&self, nodes: NodeMask) -> NodeMask {
        NodeMask::from_nodes(
            nodes
                .iter()
                .filter(|&node| self.nodes.get(node).is_some_and(|n| n.lock().healthy())),
        )
    }
}

#[async_trait]
impl Transport for SimCluster {
    async fn send(&self, node: usize, request: NodeRequest) -> NodeOutcome {
        let Some(state) = self.nodes.get(node) else {
            return Err(NodeErrno::NotConnected);
        };
        self.sends[node].fetch_add(1, Ordering::Relaxed);
        self.requests.lock().push((node, request.clone()));
        self.delay().await;

        let mut n = state.lock();
        trace!(node, fop = request.fop, body = request.body.name(), "Simulated send");
        let failed = if n.unreachable {
            Some(NodeErrno::NotConnected)
        } else {
            n.failure
        };
        if let Some(errno) = failed {
            if let Some(target) = &request.target {
                n.stale.insert(target.id);
            }
            return Err(errno);
        }
        if let Some(reply) = &n.reply {
            return Ok(reply.clone());
        }

        let attr = request
            .target
            .as_ref()
            .and_then(|target| n.attrs.get(&target.id).copied())
            .unwrap_or_default();
        Ok(match &request.body {
            RequestBody::Lookup | RequestBody::Stat => ReplyValue::ok(0).with_attr(attr),
            RequestBody::Read { offset, len } => {
                ReplyValue::ok(attr.size.saturating_sub(*offset).min(*len) as i64)
            }
            RequestBody::Write { data, .. } => ReplyValue::ok(data.len() as i64),
            RequestBody::Truncate { .. }
            | RequestBody::Create { .. }
            | RequestBody::Unlink { .. }
            | RequestBody::Rename { .. }
            | RequestBody::Flush => ReplyValue::ok(0),
        })
    }
}

#[async_trait]
impl LockService for SimCluster {
    async fn acquire(&self, nodes: NodeMask, target: &LockTarget) -> StripesetResult<NodeMask> {
        self.counters.lock_acquires.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        let deadline = tokio::time::Instant::now() + *self.lock_wait.lock();
        let mut granted = NodeMask::EMPTY;
        let mut pending = nodes;
        loop {
            let released = self.released.notified();
            pending = self.try_lock(pending, target, &mut granted);
            if pending.is_empty() || tokio::time::timeout_at(deadline, released).await.is_err() {
                break;
            }
        }
        trace!(target = %target, granted = %granted, "Simulated lock");
        Ok(granted)
    }

    async fn release(&self, nodes: NodeMask, target: &LockTarget) -> StripesetResult<NodeMask> {
        self.counters.lock_releases.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        let mut released = NodeMask::EMPTY;
        for node in nodes.iter() {
            let Some(n) = self.nodes.get(node) else {
                continue;
            };
            let mut n = n.lock();
            if let Some(pos) = n.held.iter().position(|held| held == target) {
                n.held.swap_remove(pos);
                released.insert(node);
            }
        }
        self.released.notify_waiters();
        Ok(released)
    }
}

#[async_trait]
impl MetadataService for SimCluster {
    async fn fetch(
        &self,
        nodes: NodeMask,
        minimum: u32,
        object: &ObjectRef,
        _creds: Credentials,
    ) -> StripesetResult<FetchedAttr> {
        self.counters.fetches.fetch_add(1, Ordering::Relaxed);
        self.delay().await;

        let mut groups: Vec<(ObjectAttr, NodeMask)> = Vec::new();
        for node in self.healthy(nodes).iter() {
            let attr = self.attr(node, object.id).unwrap_or_default();
            match groups.iter_mut().find(|(a, _)| *a == attr) {
                Some((_, mask)) => mask.insert(node),
                None => groups.push((attr, NodeMask::single(node))),
            }
        }

        groups
            .into_iter()
            .find(|(_, mask)| mask.count() >= minimum)
            .map(|(attr, good)| FetchedAttr { attr, good })
            .ok_or_else(|| {
                StripesetError::metadata_fetch(object.path.clone(), "no agreement on size and version")
            })
    }

    async fn apply_delta(
        &self,
        nodes: NodeMask,
        minimum: u32,
        object: &ObjectRef,
        delta: SizeVersionDelta,
        _creds: Credentials,
    ) -> StripesetResult<NodeMask> {
        self.delay().await;
        self.deltas.lock().push((object.id, delta));

        let applied = self.healthy(nodes);
        for node in applied.iter() {
            let mut n = self.nodes[node].lock();
            let attr = n.attrs.entry(object.id).or_default();
            attr.version = attr.version.saturating_add(delta.version);
            let size = i128::from(attr.size) + i128::from(delta.size);
            attr.size = size.clamp(0, i128::from(u64::MAX)) as u64;
        }

        if applied.count() < minimum {
            return Err(StripesetError::io(
                "apply_delta",
                format!("applied on {} nodes, need {}", applied.count(), minimum),
            ));
        }
        Ok(applied)
    }
}

#[async_trait]
impl Healer for SimCluster {
    async fn heal(&self, request: HealRequest) -> StripesetResult<HealReport> {
        self.delay().await;
        let healthy = self.healthy(request.nodes);
        let mut good = NodeMask::EMPTY;
        for node in healthy.iter() {
            // Healthy nodes that missed updates are repaired, the rest were sources
            if !self.nodes[node].lock().stale.remove(&request.object.id) {
                good.insert(node);
            }
        }
        let report = HealReport {
            mask: request.nodes,
            good,
            bad: request.nodes & !healthy,
        };
        trace!(path = %request.object.path, healed = report.healed(), "Simulated heal");
        self.heals.lock().push(request);
        Ok(report)
    }
}
