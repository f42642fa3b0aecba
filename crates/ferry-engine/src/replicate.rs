//! Idempotent ordered replication to the destination cluster
//!
//! Kinds on the priority list go first so dependents find what they need
//! (namespaces before anything namespaced, claims after volumes, workloads
//! last); everything else follows in discovery order. Creation is
//! create-if-absent: an object that already exists counts as replicated.

use tracing::{debug, info, warn};

use ferry_common::crd::{ResourceSyncStatus, VolumeSyncStatus};
use ferry_common::Result;

use crate::cluster::{ClusterOps, CreateOutcome};
use crate::graph::ResourceGraph;
use crate::probe::{probe, ProbeRecord};
use crate::transform::transform_object;

/// Kinds created before everything else, in this order
pub const REPLICATION_PRIORITY: &[&str] = &[
    "customresourcedefinition",
    "namespace",
    "storageclass",
    "serviceaccount",
    "secret",
    "configmap",
    "persistentvolume",
    "persistentvolumeclaim",
    "limitrange",
    "statefulset",
    "deployment",
    "daemonset",
    "replicaset",
    "pod",
];

/// Status records accumulated over one replication pass
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReplicationReport {
    /// Per-resource outcomes, in replication order
    pub resources: Vec<ResourceSyncStatus>,
    /// Per-volume outcomes
    pub volumes: Vec<VolumeSyncStatus>,
}

impl ReplicationReport {
    fn merge(&mut self, records: Vec<ProbeRecord>) {
        for record in records {
            match record {
                ProbeRecord::Resource(rs) => self.resources.push(rs),
                ProbeRecord::Volume(vs) => self.volumes.push(vs),
            }
        }
    }
}

/// Compute the kind processing order for one pass: priority kinds with
/// pending objects first, then the rest of the discovered kinds in
/// discovery order, then stragglers the discovery walk never named.
pub fn replication_order(graph: &ResourceGraph, discovery_order: &[String]) -> Vec<String> {
    let pending = graph.pending_kinds();
    let mut order: Vec<String> = Vec::with_capacity(pending.len());

    for kind in REPLICATION_PRIORITY {
        if pending.contains(*kind) {
            order.push((*kind).to_string());
        }
    }
    for kind in discovery_order {
        if pending.contains(kind.as_str()) && !order.contains(kind) {
            order.push(kind.clone());
        }
    }
    for kind in &pending {
        if !order.contains(kind) {
            order.push(kind.clone());
        }
    }
    order
}

/// Creates graph objects at the destination and probes how they landed
pub struct Replicator<'a, S: ClusterOps, D: ClusterOps> {
    source: &'a S,
    destination: &'a D,
    /// Destination namespace rewrite, empty for none
    remote_namespace: String,
    /// Source namespace kept for volume cross-references
    source_namespace: String,
}

impl<'a, S: ClusterOps, D: ClusterOps> Replicator<'a, S, D> {
    /// Replicator between one cluster pair
    pub fn new(
        source: &'a S,
        destination: &'a D,
        source_namespace: &str,
        remote_namespace: &str,
    ) -> Self {
        Self {
            source,
            destination,
            remote_namespace: remote_namespace.to_string(),
            source_namespace: source_namespace.to_string(),
        }
    }

    /// Replicate every pending object not yet in the synced-set.
    ///
    /// Per-object failures are logged and skipped so one bad object never
    /// blocks the rest of the pass.
    pub async fn replicate(
        &self,
        graph: &mut ResourceGraph,
        discovery_order: &[String],
    ) -> Result<ReplicationReport> {
        let mut report = ReplicationReport::default();
        let order = replication_order(graph, discovery_order);

        for kind in &order {
            for identity in graph.pending_of_kind(kind) {
                if graph.is_synced(&identity) {
                    debug!(resource = %identity.display(), "already synced, skipping");
                    continue;
                }
                let mut obj = match graph.get(&identity) {
                    Some(o) => o.clone(),
                    None => continue,
                };

                let namespaced = !identity.namespace.is_empty();
                let remote_ns = (!self.remote_namespace.is_empty())
                    .then_some(self.remote_namespace.as_str());
                transform_object(&mut obj, remote_ns, namespaced);

                match self.destination.create(&obj).await {
                    Ok(outcome) => {
                        if outcome == CreateOutcome::AlreadyExists {
                            debug!(resource = %identity.display(), "already exists at destination");
                        } else {
                            info!(resource = %identity.display(), "created at destination");
                        }
                        graph.mark_synced(identity);
                        let records =
                            probe(self.destination, self.source, &obj, &self.source_namespace)
                                .await;
                        report.merge(records);
                    }
                    Err(e) => {
                        warn!(resource = %identity.display(), error = %e, "create failed, continuing");
                    }
                }
            }
        }

        info!(
            resources = report.resources.len(),
            volumes = report.volumes.len(),
            synced_total = graph.synced_len(),
            "replication pass complete"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceIdentity;
    use crate::testing::FakeCluster;
    use serde_json::{json, Value};

    fn graph_with(objs: Vec<Value>) -> ResourceGraph {
        let mut graph = ResourceGraph::new();
        for obj in objs {
            let id = ResourceIdentity::from_object(&obj).unwrap();
            graph.track(id, obj);
        }
        graph
    }

    fn secret(name: &str) -> Value {
        json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": name, "namespace": "shop"}
        })
    }

    #[test]
    fn test_priority_kinds_sort_first() {
        let graph = graph_with(vec![
            json!({"apiVersion": "apps/v1", "kind": "Deployment",
                   "metadata": {"name": "web", "namespace": "shop"}}),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "shop"}}),
            json!({"apiVersion": "example.io/v1", "kind": "Widget",
                   "metadata": {"name": "w", "namespace": "shop"}}),
            secret("creds"),
        ]);

        let discovery = vec!["widget".to_string(), "secret".to_string()];
        let order = replication_order(&graph, &discovery);

        assert_eq!(order, vec!["namespace", "secret", "deployment", "widget"]);
    }

    #[test]
    fn test_unknown_kinds_still_replicated() {
        let graph = graph_with(vec![json!({
            "apiVersion": "example.io/v1", "kind": "Gadget",
            "metadata": {"name": "g", "namespace": "shop"}
        })]);

        // Not on the priority list, never named by discovery either.
        let order = replication_order(&graph, &[]);
        assert_eq!(order, vec!["gadget"]);
    }

    #[tokio::test]
    async fn test_replication_is_idempotent_across_passes() {
        let source = FakeCluster::new(Vec::new());
        let dest = FakeCluster::new(Vec::new());
        let mut graph = graph_with(vec![secret("creds")]);

        let replicator = Replicator::new(&source, &dest, "shop", "shop-dr");
        replicator.replicate(&mut graph, &[]).await.unwrap();
        replicator.replicate(&mut graph, &[]).await.unwrap();

        assert_eq!(dest.created_count(), 1);
        assert_eq!(graph.synced_len(), 1);
    }

    #[tokio::test]
    async fn test_already_exists_counts_as_replicated() {
        let source = FakeCluster::new(Vec::new());
        let dest = FakeCluster::new(Vec::new());
        dest.insert(json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "creds", "namespace": "shop-dr"}
        }));

        let mut graph = graph_with(vec![secret("creds")]);
        let replicator = Replicator::new(&source, &dest, "shop", "shop-dr");
        let report = replicator.replicate(&mut graph, &[]).await.unwrap();

        assert_eq!(dest.created_count(), 0);
        assert!(graph.is_synced(&ResourceIdentity::new("Secret", "v1", "creds", "shop")));
        assert_eq!(report.resources.len(), 1);
        assert_eq!(report.resources[0].phase, "Synced");
    }

    #[tokio::test]
    async fn test_objects_land_in_destination_namespace() {
        let source = FakeCluster::new(Vec::new());
        let dest = FakeCluster::new(Vec::new());
        let mut graph = graph_with(vec![secret("creds")]);

        let replicator = Replicator::new(&source, &dest, "shop", "shop-dr");
        replicator.replicate(&mut graph, &[]).await.unwrap();

        assert!(dest.has("secret", "shop-dr", "creds"));
        assert!(!dest.has("secret", "shop", "creds"));
    }

    #[tokio::test]
    async fn test_namespaces_created_before_workloads() {
        let source = FakeCluster::new(Vec::new());
        let dest = FakeCluster::new(Vec::new());
        let mut graph = graph_with(vec![
            json!({"apiVersion": "apps/v1", "kind": "Deployment",
                   "metadata": {"name": "web", "namespace": "shop"}}),
            json!({"apiVersion": "v1", "kind": "Namespace", "metadata": {"name": "shop-dr"}}),
        ]);

        let replicator = Replicator::new(&source, &dest, "shop", "shop-dr");
        replicator.replicate(&mut graph, &[]).await.unwrap();

        let created = dest.created.lock().unwrap();
        assert_eq!(created[0]["kind"], "Namespace");
        assert_eq!(created[1]["kind"], "Deployment");
    }

    #[tokio::test]
    async fn test_transform_applied_before_create() {
        let source = FakeCluster::new(Vec::new());
        let dest = FakeCluster::new(Vec::new());
        let mut graph = graph_with(vec![json!({
            "apiVersion": "v1", "kind": "Secret",
            "metadata": {"name": "creds", "namespace": "shop", "resourceVersion": "7"},
            "status": {"x": 1}
        })]);

        let replicator = Replicator::new(&source, &dest, "shop", "shop-dr");
        replicator.replicate(&mut graph, &[]).await.unwrap();

        let created = dest.created.lock().unwrap();
        assert!(created[0]["metadata"].get("resourceVersion").is_none());
        assert!(created[0].get("status").is_none());
    }
}
