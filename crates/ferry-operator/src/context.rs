//! Shared state handed to every reconciler

use std::collections::HashMap;
use std::sync::Arc;

use kube::discovery::Discovery;
use kube::Client;
use tokio::sync::{Mutex, OnceCell};

use ferry_common::crd::ClusterPair;
use ferry_common::Result;
use ferry_engine::ResourceGraph;
use ferry_mover::MoverRegistry;
use ferry_pair::{RemoteCluster, RestMapper};

/// Context shared by the controllers.
///
/// Remote-cluster handles are cached per ClusterPair so reconciles after
/// the first skip the discovery round trip. Resource graphs are kept per
/// engine because the synced-set must survive between ticks.
pub struct Context {
    /// Client for the cluster the operator runs in
    pub client: Client,
    /// Registered data-mover plugins
    pub movers: Arc<MoverRegistry>,
    local_mapper: OnceCell<RestMapper>,
    remotes: Mutex<HashMap<String, RemoteCluster>>,
    graphs: Mutex<HashMap<String, Arc<Mutex<ResourceGraph>>>>,
}

impl Context {
    /// New context over the local client and the plugin registry
    pub fn new(client: Client, movers: Arc<MoverRegistry>) -> Self {
        Self {
            client,
            movers,
            local_mapper: OnceCell::new(),
            remotes: Mutex::new(HashMap::new()),
            graphs: Mutex::new(HashMap::new()),
        }
    }

    /// REST mapping for the local cluster, discovered on first use
    pub async fn local_mapper(&self) -> Result<RestMapper> {
        let mapper = self
            .local_mapper
            .get_or_try_init(|| async {
                let discovery = Discovery::new(self.client.clone()).run().await?;
                Ok::<_, ferry_common::Error>(RestMapper::from_discovery(&discovery))
            })
            .await?;
        Ok(mapper.clone())
    }

    /// Remote cluster handle for a pair, cached by pair name
    pub async fn remote(&self, pair: &ClusterPair) -> Result<RemoteCluster> {
        let key = pair.metadata.name.clone().unwrap_or_default();
        let mut remotes = self.remotes.lock().await;
        if let Some(remote) = remotes.get(&key) {
            return Ok(remote.clone());
        }
        let remote = ferry_pair::connect(pair).await?;
        remotes.insert(key, remote.clone());
        Ok(remote)
    }

    /// Resource graph for one engine, created on first use
    pub async fn graph(&self, key: &str) -> Arc<Mutex<ResourceGraph>> {
        let mut graphs = self.graphs.lock().await;
        graphs
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(ResourceGraph::new())))
            .clone()
    }
}
