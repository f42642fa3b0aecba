//! Resource graph engine
//!
//! Drives one sync tick for a MoveEngine: discover the source cluster's
//! API surface, resolve which objects (and owners, claims, volumes) belong
//! to the workload, transform them, and create them idempotently at the
//! destination in dependency order. Controllers own a [`ResourceGraph`]
//! per engine so the synced-set survives across ticks.

#![deny(missing_docs)]

pub mod cluster;
pub mod graph;
pub mod probe;
pub mod replicate;
pub mod resolver;
pub mod schedule;
pub mod session;
pub mod transform;

#[cfg(test)]
pub(crate) mod testing;

use tracing::info;

use ferry_common::Result;

pub use cluster::{ClusterOps, CreateOutcome, KubeCluster};
pub use graph::{ResourceGraph, ResourceIdentity, VolumeRecord};
pub use replicate::{ReplicationReport, Replicator};
pub use resolver::{DependencyResolver, ResolveOptions};

/// Run one full resource-sync tick: resolve from the source, replicate to
/// the destination. The graph's pending state is reset first; its
/// synced-set carries over so re-runs only create what is still missing.
pub async fn run_sync<S, D>(
    source: &S,
    destination: &D,
    graph: &mut ResourceGraph,
    opts: ResolveOptions,
) -> Result<ReplicationReport>
where
    S: ClusterOps,
    D: ClusterOps,
{
    graph.begin_tick();

    let namespace = opts.namespace.clone();
    let remote_namespace = opts.remote_namespace.clone();

    let resolver = DependencyResolver::new(source, opts);
    let discovery_order = resolver.resolve(graph).await?;
    info!(
        pending = graph.pending_len(),
        "resolved resource graph for sync"
    );

    let replicator = Replicator::new(source, destination, &namespace, &remote_namespace);
    replicator.replicate(graph, &discovery_order).await
}
