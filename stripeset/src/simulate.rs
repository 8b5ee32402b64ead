//! Concurrent workload against a simulated erasure set

use bytes::Bytes;
use futures::future::join_all;
use rand::Rng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use stripeset_core::{
    backend::Backends,
    config::StripesetConfig,
    fops::FopSpec,
    inode::{Inode, Loc},
    set::ErasureSet,
    sim::SimCluster,
    types::{NodeErrno, ObjectId},
    StripesetError, StripesetResult,
};

use crate::config::SimulationConfig;

/// Outcome of one simulation run
#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub operations: usize,
    pub succeeded: usize,
    pub failed: BTreeMap<&'static str, usize>,
    #[serde(with = "humantime_serde")]
    pub elapsed: Duration,
    pub sends: u64,
    pub lock_acquires: u64,
    pub lock_releases: u64,
    pub fetches: u64,
    pub deltas: usize,
    pub heals: usize,
    /// Known-bad nodes per file at the end of the run
    pub bad_nodes: BTreeMap<String, String>,
}

impl Summary {
    pub fn print(&self) {
        println!("Operations:     {}", self.operations);
        println!("  succeeded:    {}", self.succeeded);
        for (kind, count) in &self.failed {
            println!("  {:<13} {}", format!("{}:", kind), count);
        }
        println!("Elapsed:        {:?}", self.elapsed);
        println!("Node sends:     {}", self.sends);
        println!("Lock acquires:  {}", self.lock_acquires);
        println!("Lock releases:  {}", self.lock_releases);
        println!("Size fetches:   {}", self.fetches);
        println!("Delta flushes:  {}", self.deltas);
        println!("Repairs:        {}", self.heals);
        for (path, bad) in &self.bad_nodes {
            println!("Bad nodes {}: {}", path, bad);
        }
    }
}

fn error_kind(error: &StripesetError) -> &'static str {
    match error {
        StripesetError::QuorumInfeasible { .. } => "infeasible",
        StripesetError::NodeUnreachable { .. } => "unreachable",
        StripesetError::LockUnavailable { .. } => "lock",
        StripesetError::ReconciliationFailure { .. } => "no-quorum",
        StripesetError::NodeFailure { .. } => "node-error",
        StripesetError::MetadataFetchFailure { .. } => "metadata",
        StripesetError::Configuration { .. } => "config",
        StripesetError::Io { .. } => "io",
        StripesetError::NotInitialized { .. } => "uninitialized",
        StripesetError::Internal { .. } => "internal",
    }
}

/// Run the workload described by `simulation` on a fresh simulated set
pub async fn run(config: &StripesetConfig, simulation: &SimulationConfig) -> StripesetResult<Summary> {
    let cluster = Arc::new(SimCluster::new(config.set.nodes));
    cluster.set_latency(simulation.latency, simulation.jitter);
    cluster.set_lock_wait(simulation.lock_wait);
    for &node in &simulation.unreachable {
        cluster.set_unreachable(node, true);
    }
    for &node in &simulation.failing {
        cluster.fail_node(node, NodeErrno::Io);
    }

    let set = ErasureSet::new(config, Backends::shared(cluster.clone()))?;
    for &node in &simulation.down {
        set.node_down(node);
    }

    let files: Vec<(String, Arc<Inode>)> = (0..simulation.files)
        .map(|i| {
            let path = format!("/sim/file-{}", i);
            (path, set.inodes().get_or_create(ObjectId::new()))
        })
        .collect();

    info!(
        set = %set.name(),
        files = files.len(),
        operations = simulation.operations,
        "Starting simulated workload"
    );

    let started = Instant::now();
    let payload = Bytes::from(vec![0x5au8; simulation.write_size]);
    let mut handles = Vec::with_capacity(files.len() * simulation.operations);
    {
        let mut rng = rand::thread_rng();
        for round in 0..simulation.operations {
            for (path, inode) in &files {
                let loc = Loc::new(path.clone(), inode.clone());
                let spec = if rng.gen_bool(simulation.write_ratio) {
                    let offset = (round * simulation.write_size) as u64;
                    FopSpec::write(offset, payload.clone())
                } else {
                    FopSpec::lookup()
                };
                handles.push(spec.fop(&set).loc(loc).submit());
            }
        }
    }

    let mut summary = Summary {
        operations: handles.len(),
        ..Default::default()
    };
    for outcome in join_all(handles.into_iter().map(|handle| handle.wait())).await {
        match outcome {
            Ok(_) => summary.succeeded += 1,
            Err(e) => {
                debug!(error = %e, "Simulated operation failed");
                *summary.failed.entry(error_kind(&e)).or_default() += 1;
            }
        }
    }
    summary.elapsed = started.elapsed();

    // Repairs are fire-and-forget; give them a moment to land
    tokio::time::sleep(simulation.latency + simulation.jitter).await;

    summary.sends = cluster.total_sends();
    summary.lock_acquires = cluster.lock_acquires();
    summary.lock_releases = cluster.lock_releases();
    summary.fetches = cluster.fetches();
    summary.deltas = cluster.deltas().len();
    summary.heals = cluster.heals().len();
    summary.bad_nodes = files
        .iter()
        .filter(|(_, inode)| !inode.bad().is_empty())
        .map(|(path, inode)| (path.clone(), inode.bad().to_string()))
        .collect();

    info!(
        succeeded = summary.succeeded,
        failed = summary.operations - summary.succeeded,
        "Simulated workload finished"
    );
    Ok(summary)
}
