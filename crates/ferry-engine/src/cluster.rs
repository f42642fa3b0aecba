//! Cluster access boundary for the graph engine
//!
//! Dependency resolution and replication only need four operations against
//! a cluster: enumerate served API types, list, get, and create. They are
//! expressed as a trait so the engine logic is testable against an
//! in-memory cluster; [`KubeCluster`] is the real implementation backed by
//! a `kube::Client` plus the REST mapping built from discovery.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject, ListParams, PostParams};
use kube::Client;
use serde_json::Value;
use tracing::debug;

use ferry_common::kube_utils::{is_already_exists, is_not_found};
use ferry_common::{Error, Result};
use ferry_pair::{DiscoveredApi, RestMapper};

/// Result of a create call at the destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    /// The object was created
    Created,
    /// The object already existed; treated as success
    AlreadyExists,
}

/// The operations the graph engine performs against one cluster
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Enumerate the API types the cluster serves, in discovery order
    async fn api_types(&self) -> Result<Vec<DiscoveredApi>>;

    /// List objects of a kind, optionally namespace- and label-restricted.
    /// A kind the cluster does not serve lists as empty, not as an error.
    async fn list(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>>;

    /// Fetch a single object, `None` when absent
    async fn get(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>>;

    /// Create an object from its full JSON representation
    async fn create(&self, obj: &Value) -> Result<CreateOutcome>;
}

/// Real cluster access over a kube client and its discovery-derived mapping
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    mapper: RestMapper,
}

impl KubeCluster {
    /// Wrap a client with the REST mapping discovered from the same cluster
    pub fn new(client: Client, mapper: RestMapper) -> Self {
        Self { client, mapper }
    }

    fn dynamic_api(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
    ) -> Api<DynamicObject> {
        let ar = self.mapper.resolve(kind, api_version);
        match namespace {
            Some(ns) if self.mapper.is_namespaced(kind).unwrap_or(true) => {
                Api::namespaced_with(self.client.clone(), ns, &ar)
            }
            _ => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// Serialize a DynamicObject to JSON with apiVersion/kind filled in.
///
/// DynamicObject drops its TypeMeta when the object came from a typed
/// list, so the identity the graph keys on is re-stamped explicitly.
fn to_value(obj: &DynamicObject, api_version: &str, kind: &str) -> Result<Value> {
    let mut value = serde_json::to_value(obj)
        .map_err(|e| Error::serialization_for_kind(kind, e.to_string()))?;
    if let Some(map) = value.as_object_mut() {
        map.insert("apiVersion".into(), Value::String(api_version.into()));
        map.insert("kind".into(), Value::String(kind.into()));
    }
    Ok(value)
}

#[async_trait]
impl ClusterOps for KubeCluster {
    async fn api_types(&self) -> Result<Vec<DiscoveredApi>> {
        ferry_pair::discover_api_types(&self.client).await
    }

    async fn list(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
        label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let api = self.dynamic_api(kind, api_version, namespace);
        let mut params = ListParams::default();
        if let Some(sel) = label_selector {
            params = params.labels(sel);
        }

        let list = match api.list(&params).await {
            Ok(l) => l,
            Err(e) if is_not_found(&e) => {
                debug!(kind = %kind, "kind not served, listing as empty");
                return Ok(Vec::new());
            }
            Err(e) => return Err(Error::Kube { source: e }),
        };

        list.items
            .iter()
            .map(|obj| to_value(obj, api_version, kind))
            .collect()
    }

    async fn get(
        &self,
        kind: &str,
        api_version: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        let api = self.dynamic_api(kind, api_version, namespace);
        match api.get_opt(name).await {
            Ok(Some(obj)) => Ok(Some(to_value(&obj, api_version, kind)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(Error::Kube { source: e }),
        }
    }

    async fn create(&self, obj: &Value) -> Result<CreateOutcome> {
        let kind = obj["kind"].as_str().unwrap_or_default().to_string();
        let api_version = obj["apiVersion"].as_str().unwrap_or_default();
        let namespace = obj["metadata"]["namespace"].as_str().map(String::from);

        let dyn_obj: DynamicObject = serde_json::from_value(obj.clone())
            .map_err(|e| Error::serialization_for_kind(&kind, e.to_string()))?;

        let api = self.dynamic_api(&kind, api_version, namespace.as_deref());
        match api.create(&PostParams::default(), &dyn_obj).await {
            Ok(_) => Ok(CreateOutcome::Created),
            Err(e) if is_already_exists(&e) => Ok(CreateOutcome::AlreadyExists),
            Err(e) => Err(Error::Kube { source: e }),
        }
    }
}
