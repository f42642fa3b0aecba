//! kubeferry operator binary
//!
//! Installs the CRDs on startup, registers the data-mover plugins, and
//! runs the MoveEngine, SyncSession, and ClusterPair controllers until
//! signaled.

use std::sync::Arc;

use clap::Parser;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use kube::api::{Patch, PatchParams};
use kube::{Api, Client, CustomResourceExt};

use ferry_common::crd::{ClusterPair, MoveEngine, SyncSession};
use ferry_common::FIELD_MANAGER;
use ferry_mover::{MoverRegistry, NoopMover};
use ferry_operator::controller_runner;

#[derive(Parser, Debug)]
#[command(name = "kubeferry-operator", version, about, long_about = None)]
struct Cli {
    /// Generate CRD manifests and exit
    #[arg(long)]
    crd: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if cli.crd {
        print!("{}", crd_manifests()?);
        return Ok(());
    }

    ferry_common::telemetry::init_logging();
    tracing::info!("kubeferry operator starting...");

    let client = Client::try_default()
        .await
        .map_err(|e| anyhow::anyhow!("Failed to create Kubernetes client: {}", e))?;

    // The operator installs its own CRDs on startup so the schema always
    // matches the operator version.
    ensure_crds_installed(&client).await?;

    let mut movers = MoverRegistry::new();
    movers.register(Arc::new(NoopMover::new()));
    let movers = Arc::new(movers);

    tracing::info!("Starting controllers:");
    let controllers = controller_runner::build_controllers(client, movers);
    futures::future::join_all(controllers).await;

    tracing::info!("Controllers terminated, shutting down");
    Ok(())
}

/// All three CRD manifests as one multi-document YAML stream
fn crd_manifests() -> anyhow::Result<String> {
    let mut out = String::new();
    for crd in [MoveEngine::crd(), SyncSession::crd(), ClusterPair::crd()] {
        out.push_str("---\n");
        out.push_str(
            &serde_yaml::to_string(&crd)
                .map_err(|e| anyhow::anyhow!("Failed to serialize CRD: {}", e))?,
        );
    }
    Ok(out)
}

/// Ensure all kubeferry CRDs are installed via server-side apply
async fn ensure_crds_installed(client: &Client) -> anyhow::Result<()> {
    let crds: Api<CustomResourceDefinition> = Api::all(client.clone());
    let params = PatchParams::apply(FIELD_MANAGER).force();

    for crd in [MoveEngine::crd(), SyncSession::crd(), ClusterPair::crd()] {
        let name = crd.metadata.name.clone().unwrap_or_default();
        crds.patch(&name, &params, &Patch::Apply(&crd))
            .await
            .map_err(|e| anyhow::anyhow!("Failed to install CRD {}: {}", name, e))?;
        tracing::info!(crd = %name, "CRD installed");
    }
    Ok(())
}
