//! Dependency resolution: which source objects belong in the graph
//!
//! Walks every discoverable API type, applies the denylist and scope
//! policy, and decides per object whether it is replicated directly or
//! brought in through its owner. Pods additionally have their volume
//! chains parsed so claims, volumes, and storage classes ride along.

use std::collections::{HashSet, VecDeque};

use serde_json::Value;
use tracing::{debug, warn};

use ferry_common::{Error, Result, PROVISIONED_BY_ANNOTATION};

use crate::cluster::ClusterOps;
use crate::graph::{ResourceGraph, ResourceIdentity, VolumeRecord};

/// Kinds never replicated in either direction
const DENYLIST: &[&str] = &["lease", "node", "event"];

/// What the resolver selects from
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Source namespace; namespaced kinds are only evaluated when set
    pub namespace: String,
    /// Destination namespace; the namespace object itself is renamed to it
    pub remote_namespace: String,
    /// Label selector applied to every list call
    pub label_selector: Option<String>,
}

/// Owner reference as read off an object's metadata
#[derive(Debug, Clone)]
struct OwnerRef {
    api_version: String,
    kind: String,
    name: String,
}

fn owner_refs(obj: &Value) -> Vec<OwnerRef> {
    obj["metadata"]["ownerReferences"]
        .as_array()
        .map(|refs| {
            refs.iter()
                .filter_map(|r| {
                    Some(OwnerRef {
                        api_version: r["apiVersion"].as_str().unwrap_or_default().to_string(),
                        kind: r["kind"].as_str()?.to_string(),
                        name: r["name"].as_str()?.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn is_sts_pod(obj: &Value) -> bool {
    owner_refs(obj).iter().any(|o| o.kind == "StatefulSet")
}

fn is_dynamically_provisioned(pv: &Value) -> bool {
    pv["metadata"]["annotations"][PROVISIONED_BY_ANNOTATION]
        .as_str()
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Selects source objects into a [`ResourceGraph`] for one tick
pub struct DependencyResolver<'a, C: ClusterOps> {
    source: &'a C,
    opts: ResolveOptions,
}

impl<'a, C: ClusterOps> DependencyResolver<'a, C> {
    /// Resolver over one source cluster
    pub fn new(source: &'a C, opts: ResolveOptions) -> Self {
        Self { source, opts }
    }

    /// Walk all discoverable types and populate the graph.
    ///
    /// Returns the lowercased kinds in discovery order; replication uses
    /// it to order the kinds that fall outside the priority list. A kind
    /// served from several API groups is evaluated once.
    pub async fn resolve(&self, graph: &mut ResourceGraph) -> Result<Vec<String>> {
        let api_types = self.source.api_types().await?;
        let mut seen: HashSet<String> = HashSet::new();
        let mut order = Vec::new();

        for api in &api_types {
            let kind = api.resource.kind.to_lowercase();
            if !seen.insert(kind.clone()) {
                continue;
            }
            if DENYLIST.contains(&kind.as_str()) {
                debug!(kind = %kind, "kind denylisted, skipping");
                continue;
            }
            order.push(kind.clone());

            if kind == "namespace" {
                self.resolve_namespaces(graph, &api.resource.api_version)
                    .await?;
                continue;
            }

            if api.namespaced {
                if self.opts.namespace.is_empty() {
                    continue;
                }
                let objs = self
                    .source
                    .list(
                        &api.resource.kind,
                        &api.resource.api_version,
                        Some(&self.opts.namespace),
                        self.opts.label_selector.as_deref(),
                    )
                    .await?;
                for obj in objs {
                    self.evaluate(graph, obj).await?;
                }
            } else if kind == "storageclass" {
                // The only cluster-scoped kind replicated by policy
                let objs = self
                    .source
                    .list(
                        &api.resource.kind,
                        &api.resource.api_version,
                        None,
                        self.opts.label_selector.as_deref(),
                    )
                    .await?;
                for obj in objs {
                    self.evaluate(graph, obj).await?;
                }
            }
        }

        debug!(
            pending = graph.pending_len(),
            kinds = order.len(),
            "dependency resolution complete"
        );
        Ok(order)
    }

    /// Namespace special case: with both namespaces configured, the single
    /// source namespace object is fetched and renamed to the destination
    /// namespace; otherwise all namespaces matching the selector are taken.
    async fn resolve_namespaces(&self, graph: &mut ResourceGraph, api_version: &str) -> Result<()> {
        if !self.opts.namespace.is_empty() && !self.opts.remote_namespace.is_empty() {
            let mut obj = self
                .source
                .get("Namespace", api_version, None, &self.opts.namespace)
                .await?
                .ok_or_else(|| {
                    Error::validation(format!(
                        "source namespace {:?} not found",
                        self.opts.namespace
                    ))
                })?;
            obj["metadata"]["name"] = Value::String(self.opts.remote_namespace.clone());
            if let Some(id) = ResourceIdentity::from_object(&obj) {
                graph.track(id, obj);
            }
        } else {
            let objs = self
                .source
                .list(
                    "Namespace",
                    api_version,
                    None,
                    self.opts.label_selector.as_deref(),
                )
                .await?;
            for obj in objs {
                if let Some(id) = ResourceIdentity::from_object(&obj) {
                    graph.track(id, obj);
                }
            }
        }
        Ok(())
    }

    /// Evaluate one listed object. Pod volume chains are parsed before the
    /// inclusion decision: an excluded pod (owned by a controller) still
    /// contributes its claims and volumes.
    async fn evaluate(&self, graph: &mut ResourceGraph, obj: Value) -> Result<()> {
        let kind = obj["kind"].as_str().unwrap_or_default().to_lowercase();
        if kind == "pod" {
            if let Err(e) = self.parse_pod_volumes(graph, &obj).await {
                warn!(
                    pod = obj["metadata"]["name"].as_str().unwrap_or_default(),
                    error = %e,
                    "failed to parse pod volumes"
                );
            }
        }

        if self.should_include(graph, &obj).await? {
            if let Some(id) = ResourceIdentity::from_object(&obj) {
                graph.track(id, obj);
            }
        }
        Ok(())
    }

    /// Per-object inclusion decision
    async fn should_include(&self, graph: &mut ResourceGraph, obj: &Value) -> Result<bool> {
        let kind = obj["kind"].as_str().unwrap_or_default().to_lowercase();
        match kind.as_str() {
            "node" | "event" => Ok(false),
            "service" | "endpoints" => {
                if let Some(id) = ResourceIdentity::from_object(obj) {
                    debug!(resource = %id.display(), "tracking exposed surface, not replicated");
                    graph.track_exposed(id);
                }
                Ok(false)
            }
            "pod" | "replicaset" => self.decide_workload(graph, obj).await,
            _ => Ok(true),
        }
    }

    /// Owner-chain walk for pods and replica sets.
    ///
    /// If any owner is already tracked the child is skipped; the owner's
    /// controller recreates it at the destination. An owner that is not
    /// tracked yet is fetched and tracked instead of the child, except a
    /// ReplicaSet owner, whose own owners get walked one level further so
    /// a Deployment wins over its ReplicaSet. The walk is an explicit
    /// worklist with a visited set, so shared owners are fetched once.
    async fn decide_workload(&self, graph: &mut ResourceGraph, obj: &Value) -> Result<bool> {
        let namespace = obj["metadata"]["namespace"].as_str().unwrap_or_default();
        let mut worklist: VecDeque<OwnerRef> = owner_refs(obj).into();
        if worklist.is_empty() {
            return Ok(true);
        }

        let mut include = true;
        let mut visited: HashSet<ResourceIdentity> = HashSet::new();

        while let Some(owner) = worklist.pop_front() {
            let owner_id =
                ResourceIdentity::new(&owner.kind, &owner.api_version, &owner.name, namespace);
            if !visited.insert(owner_id.clone()) {
                continue;
            }

            if graph.is_tracked(&owner_id) {
                debug!(
                    child = obj["metadata"]["name"].as_str().unwrap_or_default(),
                    owner = %owner_id.display(),
                    "already created by owner, skipping child"
                );
                include = false;
                continue;
            }

            if owner_id.kind == "replicaset" {
                match self
                    .source
                    .get("ReplicaSet", &owner.api_version, Some(namespace), &owner.name)
                    .await?
                {
                    Some(rs) => {
                        include = false;
                        let rs_owners = owner_refs(&rs);
                        if rs_owners.is_empty() {
                            graph.track(owner_id, rs);
                        } else {
                            // The ReplicaSet is itself owned; bring in its
                            // owner (Deployment) rather than the ReplicaSet.
                            worklist.extend(rs_owners);
                        }
                    }
                    None => {
                        warn!(owner = %owner_id.display(), "owner not found, keeping child");
                    }
                }
            } else {
                match self
                    .source
                    .get(&owner.kind, &owner.api_version, Some(namespace), &owner.name)
                    .await?
                {
                    Some(o) => {
                        graph.track(owner_id, o);
                        include = false;
                    }
                    None => {
                        warn!(owner = %owner_id.display(), "owner not found, keeping child");
                    }
                }
            }
        }

        Ok(include)
    }

    /// Walk a pod's volumes: track its claims, resolve their bound
    /// volumes, and divert dynamically provisioned volumes to their
    /// storage class.
    async fn parse_pod_volumes(&self, graph: &mut ResourceGraph, pod: &Value) -> Result<()> {
        let namespace = pod["metadata"]["namespace"].as_str().unwrap_or_default();
        let stateful = is_sts_pod(pod);
        let volumes = match pod["spec"]["volumes"].as_array() {
            Some(v) => v,
            None => return Ok(()),
        };

        for volume in volumes {
            let claim_name = match volume["persistentVolumeClaim"]["claimName"].as_str() {
                Some(c) => c,
                None => continue,
            };

            let pvc = match self
                .source
                .get("PersistentVolumeClaim", "v1", Some(namespace), claim_name)
                .await?
            {
                Some(p) => p,
                None => {
                    warn!(pvc = %claim_name, namespace = %namespace, "claim not found");
                    continue;
                }
            };
            let pvc_id = match ResourceIdentity::from_object(&pvc) {
                Some(id) => id,
                None => continue,
            };

            if self.should_include(graph, &pvc).await? {
                graph.track(pvc_id.clone(), pvc.clone());
            }

            let pv_name = match pvc["spec"]["volumeName"].as_str() {
                Some(n) if !n.is_empty() => n,
                _ => continue, // unbound claim
            };
            let pv = match self
                .source
                .get("PersistentVolume", "v1", None, pv_name)
                .await?
            {
                Some(p) => p,
                None => {
                    warn!(pv = %pv_name, "bound volume not found");
                    continue;
                }
            };
            let pv_id = match ResourceIdentity::from_object(&pv) {
                Some(id) => id,
                None => continue,
            };

            let dynamic = is_dynamically_provisioned(&pv);
            if dynamic {
                self.include_storage_class(graph, &pv).await?;
            } else if !stateful {
                // Static volumes of ordinary pods are replicated directly;
                // StatefulSet claims are recreated by their controller.
                graph.track(pv_id.clone(), pv.clone());
            }

            graph.record_volume(
                VolumeRecord {
                    pvc: pvc_id,
                    pv: Some(pv_id),
                    dynamically_provisioned: dynamic,
                },
                stateful,
            );
        }
        Ok(())
    }

    /// A dynamically provisioned volume is represented at the destination
    /// by its storage class only
    async fn include_storage_class(&self, graph: &mut ResourceGraph, pv: &Value) -> Result<()> {
        let sc_name = match pv["spec"]["storageClassName"].as_str() {
            Some(n) if !n.is_empty() => n,
            _ => return Ok(()),
        };
        match self
            .source
            .get("StorageClass", "storage.k8s.io/v1", None, sc_name)
            .await?
        {
            Some(sc) => {
                if let Some(id) = ResourceIdentity::from_object(&sc) {
                    graph.track(id, sc);
                }
            }
            None => warn!(storage_class = %sc_name, "storage class not found"),
        }
        Ok(())
    }
}
