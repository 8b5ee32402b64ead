//! Collaborator interfaces
//!
//! The engine never talks to nodes directly. Sends, distributed locks,
//! metadata calls and repairs go through these traits so a real transport
//! or the in-memory [`crate::sim`] cluster can be plugged in.

use async_trait::async_trait;
use std::sync::Arc;

use crate::error::StripesetResult;
use crate::mask::NodeMask;
use crate::types::{
    Credentials, FetchedAttr, HealReport, HealRequest, LockTarget, NodeOutcome, NodeRequest,
    ObjectRef, SizeVersionDelta,
};

/// Per-node request transport
///
/// Must deliver exactly one outcome per request. Timeouts surface as
/// `NodeErrno::NotConnected`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, node: usize, request: NodeRequest) -> NodeOutcome;
}

/// Distributed lock primitives
#[async_trait]
pub trait LockService: Send + Sync {
    /// Acquire `target` on `nodes`, returning the nodes that granted it
    async fn acquire(&self, nodes: NodeMask, target: &LockTarget) -> StripesetResult<NodeMask>;

    /// Release `target` on `nodes`, returning the nodes that released it
    async fn release(&self, nodes: NodeMask, target: &LockTarget) -> StripesetResult<NodeMask>;
}

/// Object metadata calls used for version/size tracking
#[async_trait]
pub trait MetadataService: Send + Sync {
    /// Fetch size and version agreed by at least `minimum` of `nodes`
    async fn fetch(
        &self,
        nodes: NodeMask,
        minimum: u32,
        object: &ObjectRef,
        creds: Credentials,
    ) -> StripesetResult<FetchedAttr>;

    /// Atomically add `delta` to the stored counters, returning the nodes
    /// that applied it
    async fn apply_delta(
        &self,
        nodes: NodeMask,
        minimum: u32,
        object: &ObjectRef,
        delta: SizeVersionDelta,
        creds: Credentials,
    ) -> StripesetResult<NodeMask>;
}

/// Repair trigger
#[async_trait]
pub trait Healer: Send + Sync {
    async fn heal(&self, request: HealRequest) -> StripesetResult<HealReport>;
}

/// Collaborators of one erasure set
#[derive(Clone)]
pub struct Backends {
    pub transport: Arc<dyn Transport>,
    pub locks: Arc<dyn LockService>,
    pub metadata: Arc<dyn MetadataService>,
    pub healer: Arc<dyn Healer>,
}

impl Backends {
    /// Use one object for every collaborator role
    pub fn shared<T>(backend: Arc<T>) -> Self
    where
        T: Transport + LockService + MetadataService + Healer + 'static,
    {
        Backends {
            transport: backend.clone(),
            locks: backend.clone(),
            metadata: backend.clone(),
            healer: backend,
        }
    }
}
