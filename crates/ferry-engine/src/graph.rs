//! Resource graph: identities, pending objects, and the synced-set
//!
//! The graph tracks every object selected for replication during a tick,
//! keyed by [`ResourceIdentity`]. The synced-set is the idempotency guard:
//! it grows monotonically across ticks and is never drained, so an
//! identity is created at the destination at most once per engine
//! lifetime. Pending structures are reset at the start of each tick.

use std::collections::{BTreeMap, BTreeSet};

use serde_json::Value;

/// Dedup key for every tracked object.
///
/// The kind is stored lowercased so lookups are insensitive to the casing
/// a caller happened to have (discovery kinds vs ownerReference kinds).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ResourceIdentity {
    /// Lowercased kind
    pub kind: String,
    /// API version as served (e.g. "apps/v1")
    pub api_version: String,
    /// Object name
    pub name: String,
    /// Namespace, empty for cluster-scoped objects
    pub namespace: String,
}

impl ResourceIdentity {
    /// Identity from explicit parts
    pub fn new(kind: &str, api_version: &str, name: &str, namespace: &str) -> Self {
        Self {
            kind: kind.to_lowercase(),
            api_version: api_version.to_string(),
            name: name.to_string(),
            namespace: namespace.to_string(),
        }
    }

    /// Identity read off a full JSON object, `None` if the name is missing
    pub fn from_object(obj: &Value) -> Option<Self> {
        let kind = obj["kind"].as_str()?;
        let api_version = obj["apiVersion"].as_str().unwrap_or_default();
        let name = obj["metadata"]["name"].as_str()?;
        let namespace = obj["metadata"]["namespace"].as_str().unwrap_or_default();
        Some(Self::new(kind, api_version, name, namespace))
    }

    /// Display string for logging
    pub fn display(&self) -> String {
        if self.namespace.is_empty() {
            format!("{}/{}", self.kind, self.name)
        } else {
            format!("{}/{}/{}", self.kind, self.namespace, self.name)
        }
    }
}

/// Links a claim to its bound volume and records how the volume was
/// provisioned. Dynamically provisioned volumes are never replicated
/// directly; their storage class is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeRecord {
    /// Claim identity
    pub pvc: ResourceIdentity,
    /// Bound volume identity, when resolved
    pub pv: Option<ResourceIdentity>,
    /// Whether the volume carries the provisioned-by annotation
    pub dynamically_provisioned: bool,
}

/// Per-engine graph state.
///
/// One instance exists per MoveEngine and lives across ticks; only the
/// pending structures are per-tick. BTree containers keep iteration order
/// stable between ticks, which replication ordering relies on within a
/// kind.
#[derive(Debug, Default)]
pub struct ResourceGraph {
    /// Objects selected during the current tick, by identity
    pending: BTreeMap<ResourceIdentity, Value>,
    /// Identities already created at the destination (monotonic)
    synced: BTreeSet<ResourceIdentity>,
    /// Service/Endpoints-like objects: tracked, never replicated
    exposed: BTreeSet<ResourceIdentity>,
    /// Claim-to-volume links for ordinary pods
    volumes: BTreeMap<ResourceIdentity, VolumeRecord>,
    /// Claim-to-volume links for StatefulSet-owned pods
    sts_volumes: BTreeMap<ResourceIdentity, VolumeRecord>,
}

impl ResourceGraph {
    /// Empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear per-tick state, preserving the synced-set
    pub fn begin_tick(&mut self) {
        self.pending.clear();
        self.exposed.clear();
        self.volumes.clear();
        self.sts_volumes.clear();
    }

    /// Track an object for replication. Returns false when the identity is
    /// already pending, so callers never overwrite an earlier selection.
    pub fn track(&mut self, identity: ResourceIdentity, object: Value) -> bool {
        if self.pending.contains_key(&identity) {
            return false;
        }
        self.pending.insert(identity, object);
        true
    }

    /// Whether an identity is pending or already synced
    pub fn is_tracked(&self, identity: &ResourceIdentity) -> bool {
        self.pending.contains_key(identity) || self.synced.contains(identity)
    }

    /// Pending objects in identity order
    pub fn pending(&self) -> impl Iterator<Item = (&ResourceIdentity, &Value)> {
        self.pending.iter()
    }

    /// Distinct lowercased kinds with pending objects
    pub fn pending_kinds(&self) -> BTreeSet<String> {
        self.pending.keys().map(|id| id.kind.clone()).collect()
    }

    /// Pending identities of one kind, in identity order
    pub fn pending_of_kind(&self, kind: &str) -> Vec<ResourceIdentity> {
        let kind = kind.to_lowercase();
        self.pending
            .keys()
            .filter(|id| id.kind == kind)
            .cloned()
            .collect()
    }

    /// Look up a pending object
    pub fn get(&self, identity: &ResourceIdentity) -> Option<&Value> {
        self.pending.get(identity)
    }

    /// Record an identity as created at the destination
    pub fn mark_synced(&mut self, identity: ResourceIdentity) {
        self.synced.insert(identity);
    }

    /// Whether an identity was already created at the destination
    pub fn is_synced(&self, identity: &ResourceIdentity) -> bool {
        self.synced.contains(identity)
    }

    /// Track a Service/Endpoints-like identity without replicating it
    pub fn track_exposed(&mut self, identity: ResourceIdentity) {
        self.exposed.insert(identity);
    }

    /// Exposed-surface identities tracked this tick
    pub fn exposed(&self) -> impl Iterator<Item = &ResourceIdentity> {
        self.exposed.iter()
    }

    /// Record a claim-to-volume link. `stateful` selects the StatefulSet
    /// index, whose claims are recreated by the controller rather than
    /// eagerly.
    pub fn record_volume(&mut self, record: VolumeRecord, stateful: bool) {
        let index = if stateful {
            &mut self.sts_volumes
        } else {
            &mut self.volumes
        };
        index.entry(record.pvc.clone()).or_insert(record);
    }

    /// Volume record for a claim, searching both indexes
    pub fn volume_for(&self, pvc: &ResourceIdentity) -> Option<&VolumeRecord> {
        self.volumes.get(pvc).or_else(|| self.sts_volumes.get(pvc))
    }

    /// All volume records from ordinary pods
    pub fn volumes(&self) -> impl Iterator<Item = &VolumeRecord> {
        self.volumes.values()
    }

    /// All volume records from StatefulSet-owned pods
    pub fn sts_volumes(&self) -> impl Iterator<Item = &VolumeRecord> {
        self.sts_volumes.values()
    }

    /// Number of pending objects
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of identities ever synced
    pub fn synced_len(&self) -> usize {
        self.synced.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id(kind: &str, name: &str) -> ResourceIdentity {
        ResourceIdentity::new(kind, "v1", name, "default")
    }

    #[test]
    fn test_identity_lowercases_kind() {
        let a = ResourceIdentity::new("ConfigMap", "v1", "cfg", "default");
        let b = ResourceIdentity::new("configmap", "v1", "cfg", "default");
        assert_eq!(a, b);
    }

    #[test]
    fn test_identity_from_object() {
        let obj = json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "web", "namespace": "shop"}
        });
        let id = ResourceIdentity::from_object(&obj).unwrap();
        assert_eq!(id.kind, "deployment");
        assert_eq!(id.namespace, "shop");
        assert_eq!(id.display(), "deployment/shop/web");
    }

    #[test]
    fn test_track_is_first_writer_wins() {
        let mut graph = ResourceGraph::new();
        assert!(graph.track(id("secret", "creds"), json!({"v": 1})));
        assert!(!graph.track(id("secret", "creds"), json!({"v": 2})));
        assert_eq!(graph.get(&id("secret", "creds")).unwrap()["v"], 1);
    }

    #[test]
    fn test_synced_set_survives_tick_reset() {
        let mut graph = ResourceGraph::new();
        graph.track(id("secret", "creds"), json!({}));
        graph.mark_synced(id("secret", "creds"));

        graph.begin_tick();
        assert_eq!(graph.pending_len(), 0);
        assert!(graph.is_synced(&id("secret", "creds")));
        assert!(graph.is_tracked(&id("secret", "creds")));
    }

    #[test]
    fn test_volume_indexes_are_separate() {
        let mut graph = ResourceGraph::new();
        graph.record_volume(
            VolumeRecord {
                pvc: id("persistentvolumeclaim", "data-0"),
                pv: Some(ResourceIdentity::new("persistentvolume", "v1", "pv-1", "")),
                dynamically_provisioned: false,
            },
            true,
        );

        assert_eq!(graph.volumes().count(), 0);
        assert_eq!(graph.sts_volumes().count(), 1);
        assert!(graph
            .volume_for(&id("persistentvolumeclaim", "data-0"))
            .is_some());
    }

    #[test]
    fn test_pending_of_kind_filters() {
        let mut graph = ResourceGraph::new();
        graph.track(id("secret", "a"), json!({}));
        graph.track(id("configmap", "b"), json!({}));
        graph.track(id("secret", "c"), json!({}));

        let secrets = graph.pending_of_kind("Secret");
        assert_eq!(secrets.len(), 2);
        assert!(secrets.iter().all(|i| i.kind == "secret"));
    }
}
