//! Cluster pair provider
//!
//! A [`ClusterPair`](ferry_common::crd::ClusterPair) bundles the kubeconfig
//! for the remote side of a migration. This crate turns a validated pair
//! into an authenticated `kube::Client` plus a REST-mapping table built
//! from API discovery, which is everything the engine needs to talk to the
//! destination cluster.

use std::collections::HashMap;

use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::{ApiResource, Discovery, Scope};
use kube::{Api, Client, Config};
use tracing::{debug, info};

use ferry_common::crd::ClusterPair;
use ferry_common::kube_utils::build_api_resource;
use ferry_common::{Error, Result};

/// Fetch a ClusterPair by name
pub async fn get(client: &Client, name: &str, namespace: &str) -> Result<ClusterPair> {
    let api: Api<ClusterPair> = Api::namespaced(client.clone(), namespace);
    api.get(name).await.map_err(|e| Error::Kube { source: e })
}

/// Validate a ClusterPair's embedded kubeconfig.
///
/// A pair is usable when the kubeconfig parses, names a current context,
/// and that context exists. Returns the parsed kubeconfig on success.
pub fn validate(pair: &ClusterPair) -> Result<Kubeconfig> {
    let name = pair.metadata.name.as_deref().unwrap_or_default();

    let kubeconfig: Kubeconfig = serde_yaml::from_str(&pair.spec.kubeconfig)
        .map_err(|e| Error::pair(name, format!("kubeconfig does not parse: {}", e)))?;

    let current = kubeconfig
        .current_context
        .as_deref()
        .filter(|c| !c.is_empty())
        .ok_or_else(|| Error::pair(name, "kubeconfig has no current context"))?;

    if !kubeconfig.contexts.iter().any(|c| c.name == current) {
        return Err(Error::pair(
            name,
            format!("current context {:?} not found in kubeconfig", current),
        ));
    }

    Ok(kubeconfig)
}

/// Build an authenticated client for the remote cluster of a pair
pub async fn remote_client(pair: &ClusterPair) -> Result<Client> {
    let name = pair.metadata.name.as_deref().unwrap_or_default();
    let kubeconfig = validate(pair)?;

    let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| Error::pair(name, format!("failed to build remote config: {}", e)))?;

    Client::try_from(config)
        .map_err(|e| Error::pair(name, format!("failed to build remote client: {}", e)))
}

/// REST-mapping table for one cluster, built from an API discovery pass.
///
/// Maps a lowercased kind name to its canonical ApiResource. When a kind
/// was never discovered the caller falls back to a group/version/kind
/// guess via [`build_api_resource`].
#[derive(Debug, Default, Clone)]
pub struct RestMapper {
    by_kind: HashMap<String, (ApiResource, bool)>,
}

impl RestMapper {
    /// Build the table from a completed discovery run.
    ///
    /// The first (recommended) version of each kind wins when a kind is
    /// served from several groups.
    pub fn from_discovery(discovery: &Discovery) -> Self {
        let mut by_kind = HashMap::new();
        for group in discovery.groups() {
            for (ar, caps) in group.recommended_resources() {
                let key = ar.kind.to_lowercase();
                let namespaced = caps.scope == Scope::Namespaced;
                by_kind.entry(key).or_insert((ar, namespaced));
            }
        }
        Self { by_kind }
    }

    /// Resolve a kind to its ApiResource, guessing from the apiVersion
    /// carried on the object when mapping lookup fails.
    pub fn resolve(&self, kind: &str, api_version: &str) -> ApiResource {
        match self.by_kind.get(&kind.to_lowercase()) {
            Some((ar, _)) => ar.clone(),
            None => {
                debug!(kind = %kind, api_version = %api_version, "no REST mapping, guessing resource");
                build_api_resource(api_version, kind)
            }
        }
    }

    /// Whether the cluster serves this kind namespaced (None if unknown)
    pub fn is_namespaced(&self, kind: &str) -> Option<bool> {
        self.by_kind.get(&kind.to_lowercase()).map(|(_, ns)| *ns)
    }

    /// Insert a mapping directly (tests and fallback wiring)
    pub fn insert(&mut self, ar: ApiResource, namespaced: bool) {
        self.by_kind.insert(ar.kind.to_lowercase(), (ar, namespaced));
    }
}

/// An authenticated handle to the remote cluster plus its REST mapping
#[derive(Clone)]
pub struct RemoteCluster {
    /// Client for the remote cluster
    pub client: Client,
    /// REST-mapping table built from the remote cluster's discovery
    pub mapper: RestMapper,
}

/// Discovered API types of a cluster, in discovery order
#[derive(Debug, Clone)]
pub struct DiscoveredApi {
    /// Resource description (group, version, kind, plural)
    pub resource: ApiResource,
    /// Whether instances are namespaced
    pub namespaced: bool,
}

/// Connect to the remote cluster of a pair and run discovery against it
pub async fn connect(pair: &ClusterPair) -> Result<RemoteCluster> {
    let name = pair.metadata.name.as_deref().unwrap_or_default();
    let client = remote_client(pair).await?;

    let discovery = Discovery::new(client.clone())
        .run()
        .await
        .map_err(|e| Error::pair(name, format!("remote discovery failed: {}", e)))?;

    let mapper = RestMapper::from_discovery(&discovery);
    info!(pair = %name, "connected to remote cluster");

    Ok(RemoteCluster { client, mapper })
}

/// Enumerate the API types a cluster serves, preserving discovery order
pub async fn discover_api_types(client: &Client) -> Result<Vec<DiscoveredApi>> {
    let discovery = Discovery::new(client.clone())
        .run()
        .await
        .map_err(|e| Error::Kube { source: e })?;

    let mut types = Vec::new();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            types.push(DiscoveredApi {
                resource: ar,
                namespaced: caps.scope == Scope::Namespaced,
            });
        }
    }
    Ok(types)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::api::ObjectMeta;

    fn test_pair(name: &str, kubeconfig: &str) -> ClusterPair {
        ClusterPair {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: ferry_common::crd::ClusterPairSpec {
                kubeconfig: kubeconfig.to_string(),
            },
            status: None,
        }
    }

    const GOOD_KUBECONFIG: &str = r#"
apiVersion: v1
kind: Config
current-context: remote
clusters:
  - name: remote
    cluster:
      server: https://remote.example:6443
contexts:
  - name: remote
    context:
      cluster: remote
      user: admin
users:
  - name: admin
    user:
      token: abc
"#;

    #[test]
    fn test_validate_accepts_complete_kubeconfig() {
        let pair = test_pair("prod-pair", GOOD_KUBECONFIG);
        let kc = validate(&pair).expect("should validate");
        assert_eq!(kc.current_context.as_deref(), Some("remote"));
    }

    #[test]
    fn test_validate_rejects_garbage() {
        let pair = test_pair("prod-pair", ":::");
        let err = validate(&pair).unwrap_err();
        assert!(err.to_string().contains("prod-pair"));
    }

    #[test]
    fn test_validate_rejects_missing_current_context() {
        let pair = test_pair("prod-pair", "apiVersion: v1\nkind: Config\n");
        let err = validate(&pair).unwrap_err();
        assert!(err.to_string().contains("no current context"));
    }

    #[test]
    fn test_validate_rejects_dangling_context() {
        let pair = test_pair(
            "prod-pair",
            "apiVersion: v1\nkind: Config\ncurrent-context: ghost\n",
        );
        let err = validate(&pair).unwrap_err();
        assert!(err.to_string().contains("ghost"));
    }

    #[test]
    fn test_rest_mapper_falls_back_to_guess() {
        let mapper = RestMapper::default();
        let ar = mapper.resolve("Deployment", "apps/v1");
        assert_eq!(ar.plural, "deployments");
        assert_eq!(ar.group, "apps");
    }

    #[test]
    fn test_rest_mapper_prefers_discovered_mapping() {
        let mut mapper = RestMapper::default();
        mapper.insert(
            ApiResource {
                group: "apps".into(),
                version: "v1".into(),
                api_version: "apps/v1".into(),
                kind: "Deployment".into(),
                plural: "deployments".into(),
            },
            true,
        );
        let ar = mapper.resolve("deployment", "extensions/v1beta1");
        assert_eq!(ar.group, "apps");
        assert_eq!(mapper.is_namespaced("Deployment"), Some(true));
    }
}
