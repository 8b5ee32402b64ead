// Common test utilities and helpers for integration tests
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use stripeset_core::{
    backend::Backends,
    config::{StripesetConfig, StripesetConfigBuilder},
    inode::{Inode, Loc},
    set::ErasureSet,
    sim::SimCluster,
    types::ObjectId,
    FopAnswer, FopHandle, StripesetResult,
};

/// Upper bound for any single operation in tests
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// An erasure set wired to a simulated cluster
pub struct TestSet {
    pub set: Arc<ErasureSet>,
    pub sim: Arc<SimCluster>,
}

impl TestSet {
    /// A file tracked by the set
    pub fn file(&self, path: &str) -> (Arc<Inode>, Loc) {
        let inode = self.set.inodes().get_or_create(ObjectId::new());
        let loc = Loc::new(path, inode.clone());
        (inode, loc)
    }

    /// A directory tracked by the set
    pub fn dir(&self) -> Arc<Inode> {
        self.set.inodes().get_or_create(ObjectId::new())
    }
}

pub fn test_config(nodes: usize, fragments: usize) -> StripesetConfig {
    StripesetConfigBuilder::new()
        .name("test-set")
        .nodes(nodes)
        .fragments(fragments)
        .build()
        .expect("valid test configuration")
}

/// Must be called from within a tokio runtime
pub fn test_set(nodes: usize, fragments: usize) -> TestSet {
    test_set_with(test_config(nodes, fragments))
}

pub fn test_set_with(config: StripesetConfig) -> TestSet {
    let sim = Arc::new(SimCluster::new(config.set.nodes));
    let set = ErasureSet::new(&config, Backends::shared(sim.clone())).expect("erasure set");
    TestSet { set, sim }
}

/// Wait for an operation's outcome, failing the test if it never comes
pub async fn finish(handle: FopHandle) -> StripesetResult<FopAnswer> {
    tokio::time::timeout(TEST_TIMEOUT, handle.wait())
        .await
        .expect("operation did not finish in time")
}

/// Poll `condition` until it holds or `timeout` passes
pub async fn wait_for_condition<F>(mut condition: F, timeout: Duration) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Property testing utilities
pub mod proptest_utils {
    use proptest::prelude::*;
    use stripeset_core::NodeMask;

    /// Masks over the first `nodes` nodes
    pub fn mask_strategy(nodes: usize) -> impl Strategy<Value = NodeMask> {
        (0u64..(1u64 << nodes)).prop_map(NodeMask::from_bits)
    }
}
