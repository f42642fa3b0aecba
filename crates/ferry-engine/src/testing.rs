//! In-memory cluster for exercising the resolver and replicator

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::discovery::ApiResource;
use serde_json::Value;

use ferry_common::Result;
use ferry_pair::DiscoveredApi;

use crate::cluster::{ClusterOps, CreateOutcome};

type Key = (String, String, String);

/// Map-backed stand-in for a cluster. Tracks create calls and counts gets
/// so tests can assert on fetch behavior.
#[derive(Default)]
pub(crate) struct FakeCluster {
    objects: Mutex<BTreeMap<Key, Value>>,
    types: Vec<DiscoveredApi>,
    pub(crate) created: Mutex<Vec<Value>>,
    pub(crate) get_calls: AtomicUsize,
}

pub(crate) fn api_type(kind: &str, api_version: &str, namespaced: bool) -> DiscoveredApi {
    let (group, version) = match api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), api_version.to_string()),
    };
    DiscoveredApi {
        resource: ApiResource {
            group,
            version,
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            plural: format!("{}s", kind.to_lowercase()),
        },
        namespaced,
    }
}

fn key_of(obj: &Value) -> Key {
    (
        obj["kind"].as_str().unwrap_or_default().to_lowercase(),
        obj["metadata"]["namespace"]
            .as_str()
            .unwrap_or_default()
            .to_string(),
        obj["metadata"]["name"].as_str().unwrap_or_default().to_string(),
    )
}

impl FakeCluster {
    pub(crate) fn new(types: Vec<DiscoveredApi>) -> Self {
        Self {
            types,
            ..Default::default()
        }
    }

    pub(crate) fn insert(&self, obj: Value) {
        self.objects.lock().unwrap().insert(key_of(&obj), obj);
    }

    pub(crate) fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    pub(crate) fn has(&self, kind: &str, namespace: &str, name: &str) -> bool {
        self.objects.lock().unwrap().contains_key(&(
            kind.to_lowercase(),
            namespace.to_string(),
            name.to_string(),
        ))
    }
}

#[async_trait]
impl ClusterOps for FakeCluster {
    async fn api_types(&self) -> Result<Vec<DiscoveredApi>> {
        Ok(self.types.clone())
    }

    async fn list(
        &self,
        kind: &str,
        _api_version: &str,
        namespace: Option<&str>,
        _label_selector: Option<&str>,
    ) -> Result<Vec<Value>> {
        let kind = kind.to_lowercase();
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), _)| {
                *k == kind && namespace.map(|want| ns == want).unwrap_or(true)
            })
            .map(|(_, v)| v.clone())
            .collect())
    }

    async fn get(
        &self,
        kind: &str,
        _api_version: &str,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Option<Value>> {
        self.get_calls.fetch_add(1, Ordering::SeqCst);
        let key = (
            kind.to_lowercase(),
            namespace.unwrap_or_default().to_string(),
            name.to_string(),
        );
        Ok(self.objects.lock().unwrap().get(&key).cloned())
    }

    async fn create(&self, obj: &Value) -> Result<CreateOutcome> {
        let key = key_of(obj);
        let mut objects = self.objects.lock().unwrap();
        if objects.contains_key(&key) {
            return Ok(CreateOutcome::AlreadyExists);
        }
        objects.insert(key, obj.clone());
        self.created.lock().unwrap().push(obj.clone());
        Ok(CreateOutcome::Created)
    }
}
