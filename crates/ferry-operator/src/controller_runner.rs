//! Controller runner - builds controller futures for each CRD
//!
//! `build_controllers` returns a Vec of boxed futures the binary joins.
//! Keeping construction pure makes the wiring testable without a cluster.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use futures::StreamExt;
use kube::runtime::watcher::Config as WatcherConfig;
use kube::runtime::Controller;
use kube::{Api, Client};

use ferry_common::crd::{ClusterPair, MoveEngine, SyncSession};
use ferry_common::WATCH_NAMESPACE_ENV;
use ferry_mover::MoverRegistry;

use crate::controller::{cluster_pair, move_engine, sync_session};
use crate::Context;

/// Watcher timeout (seconds) - must be less than client read_timeout (30s)
/// so the API server closes idle watches before the client gives up on them.
const WATCH_TIMEOUT_SECS: u32 = 25;

/// Build the MoveEngine, SyncSession, and ClusterPair controller futures
pub fn build_controllers(
    client: Client,
    movers: Arc<MoverRegistry>,
) -> Vec<Pin<Box<dyn Future<Output = ()> + Send>>> {
    let ctx = Arc::new(Context::new(client.clone(), movers));

    let engines: Api<MoveEngine> = scoped_api(&client);
    let sessions: Api<SyncSession> = scoped_api(&client);
    let pairs: Api<ClusterPair> = scoped_api(&client);

    tracing::info!("- MoveEngine controller");
    tracing::info!("- SyncSession controller");
    tracing::info!("- ClusterPair controller");

    vec![
        Box::pin(
            Controller::new(engines, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .shutdown_on_signal()
                .run(move_engine::reconcile, move_engine::error_policy, ctx.clone())
                .for_each(log_reconcile_result("MoveEngine")),
        ),
        Box::pin(
            Controller::new(sessions, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .shutdown_on_signal()
                .run(sync_session::reconcile, sync_session::error_policy, ctx.clone())
                .for_each(log_reconcile_result("SyncSession")),
        ),
        Box::pin(
            Controller::new(pairs, WatcherConfig::default().timeout(WATCH_TIMEOUT_SECS))
                .shutdown_on_signal()
                .run(cluster_pair::reconcile, cluster_pair::error_policy, ctx)
                .for_each(log_reconcile_result("ClusterPair")),
        ),
    ]
}

/// Cluster-wide Api unless WATCH_NAMESPACE restricts the operator
fn scoped_api<K>(client: &Client) -> Api<K>
where
    K: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>,
    <K as kube::Resource>::DynamicType: Default,
{
    match std::env::var(WATCH_NAMESPACE_ENV) {
        Ok(ns) if !ns.is_empty() => Api::namespaced(client.clone(), &ns),
        _ => Api::all(client.clone()),
    }
}

fn log_reconcile_result<T: std::fmt::Debug, E: std::fmt::Debug>(
    controller_name: &'static str,
) -> impl Fn(Result<T, E>) -> std::future::Ready<()> {
    move |result| {
        match result {
            Ok(action) => tracing::debug!(?action, "{} reconciliation completed", controller_name),
            Err(e) => tracing::error!(error = ?e, "{} reconciliation error", controller_name),
        }
        std::future::ready(())
    }
}
