//! Post-create status probes
//!
//! After an object is created at the destination, a kind-specific probe
//! reads back how it landed. Probe failures never abort replication; they
//! are recorded as reason strings on the status record.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use serde_json::Value;
use tracing::{debug, warn};

use ferry_common::crd::{ResourceSyncStatus, VolumeSyncStatus};
use ferry_common::PROVISIONED_BY_ANNOTATION;

use crate::cluster::ClusterOps;

/// Total time a claim is polled for binding at the destination
pub const PVC_WAIT_TIMEOUT: Duration = Duration::from_secs(5);
/// Interval between claim polls
pub const PVC_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Phase recorded for every successfully replicated object
const PHASE_SYNCED: &str = "Synced";

/// A probe result, routed to the matching status index
#[derive(Debug, Clone, PartialEq)]
pub enum ProbeRecord {
    /// Goes to the per-resource status index
    Resource(ResourceSyncStatus),
    /// Goes to the per-volume status index
    Volume(VolumeSyncStatus),
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn base_status(obj: &Value) -> ResourceSyncStatus {
    ResourceSyncStatus {
        kind: obj["kind"].as_str().unwrap_or_default().to_string(),
        name: obj["metadata"]["name"].as_str().unwrap_or_default().to_string(),
        phase: PHASE_SYNCED.to_string(),
        synced_time: now_rfc3339(),
        ..Default::default()
    }
}

fn is_dynamically_provisioned(pv: &Value) -> bool {
    pv["metadata"]["annotations"][PROVISIONED_BY_ANNOTATION]
        .as_str()
        .map(|v| !v.is_empty())
        .unwrap_or(false)
}

/// Probe one just-created object at the destination.
///
/// `obj` is the transformed object as created, so its namespace is the
/// destination namespace. `source_namespace` is kept for cross-references
/// in volume records.
pub async fn probe<D, S>(
    destination: &D,
    source: &S,
    obj: &Value,
    source_namespace: &str,
) -> Vec<ProbeRecord>
where
    D: ClusterOps,
    S: ClusterOps,
{
    let kind = obj["kind"].as_str().unwrap_or_default().to_lowercase();
    match kind.as_str() {
        "deployment" => vec![ProbeRecord::Resource(
            deployment_status(destination, obj).await,
        )],
        "persistentvolumeclaim" => {
            pvc_status(destination, source, obj, source_namespace).await
        }
        "persistentvolume" => {
            let name = obj["metadata"]["name"].as_str().unwrap_or_default();
            match destination.get("PersistentVolume", "v1", None, name).await {
                Ok(Some(pv)) => vec![ProbeRecord::Volume(
                    pv_status(source, &pv, source_namespace).await,
                )],
                Ok(None) => vec![ProbeRecord::Volume(VolumeSyncStatus {
                    remote_volume: name.to_string(),
                    reason: "volume not found at destination".to_string(),
                    synced_time: now_rfc3339(),
                    ..Default::default()
                })],
                Err(e) => vec![ProbeRecord::Volume(VolumeSyncStatus {
                    remote_volume: name.to_string(),
                    reason: e.to_string(),
                    synced_time: now_rfc3339(),
                    ..Default::default()
                })],
            }
        }
        "namespace" => vec![ProbeRecord::Resource(
            namespace_status(destination, obj).await,
        )],
        _ => vec![ProbeRecord::Resource(base_status(obj))],
    }
}

/// Read the first condition off the destination deployment
async fn deployment_status<D: ClusterOps>(destination: &D, obj: &Value) -> ResourceSyncStatus {
    let mut rs = base_status(obj);
    let namespace = obj["metadata"]["namespace"].as_str();
    let name = obj["metadata"]["name"].as_str().unwrap_or_default();
    let api_version = obj["apiVersion"].as_str().unwrap_or("apps/v1");

    match destination.get("Deployment", api_version, namespace, name).await {
        Ok(Some(deploy)) => {
            if let Some(cond) = deploy["status"]["conditions"].as_array().and_then(|c| c.first()) {
                rs.status = cond["type"].as_str().unwrap_or_default().to_string();
                rs.reason = cond["reason"].as_str().unwrap_or_default().to_string();
            }
        }
        Ok(None) => rs.reason = "deployment not found at destination".to_string(),
        Err(e) => rs.reason = e.to_string(),
    }
    rs
}

/// Poll the destination claim until it binds, then probe its volume.
///
/// A lost claim stops the poll without escalating; a claim that never
/// binds within the window is reported with whatever phase it last had.
async fn pvc_status<D, S>(
    destination: &D,
    source: &S,
    obj: &Value,
    source_namespace: &str,
) -> Vec<ProbeRecord>
where
    D: ClusterOps,
    S: ClusterOps,
{
    let mut rs = base_status(obj);
    let mut records = Vec::new();
    let namespace = obj["metadata"]["namespace"].as_str();
    let name = obj["metadata"]["name"].as_str().unwrap_or_default();

    let started = tokio::time::Instant::now();
    loop {
        match destination
            .get("PersistentVolumeClaim", "v1", namespace, name)
            .await
        {
            Ok(Some(pvc)) => {
                let phase = pvc["status"]["phase"].as_str().unwrap_or_default();
                rs.status = phase.to_string();
                if let Some(cond) = pvc["status"]["conditions"].as_array().and_then(|c| c.first()) {
                    rs.reason = cond["reason"].as_str().unwrap_or_default().to_string();
                }

                if phase == "Bound" {
                    if let Some(pv_name) = pvc["spec"]["volumeName"].as_str() {
                        match destination.get("PersistentVolume", "v1", None, pv_name).await {
                            Ok(Some(pv)) => {
                                records.push(ProbeRecord::Volume(
                                    pv_status(source, &pv, source_namespace).await,
                                ));
                            }
                            Ok(None) | Err(_) => {
                                warn!(pv = %pv_name, "bound volume not readable at destination");
                            }
                        }
                    }
                    break;
                }
                if phase == "Lost" {
                    debug!(pvc = %name, "claim reported lost, not escalating");
                    break;
                }
            }
            Ok(None) => rs.reason = "claim not found at destination".to_string(),
            Err(e) => rs.reason = e.to_string(),
        }

        if started.elapsed() >= PVC_WAIT_TIMEOUT {
            break;
        }
        tokio::time::sleep(PVC_POLL_INTERVAL).await;
    }

    records.push(ProbeRecord::Resource(rs));
    records
}

/// Volume record for a destination volume.
///
/// For a dynamically provisioned volume the owning claim is cross-
/// referenced: the source claim's bound volume name goes into `volume`,
/// the destination's into `remote_volume`.
async fn pv_status<S: ClusterOps>(
    source: &S,
    pv: &Value,
    source_namespace: &str,
) -> VolumeSyncStatus {
    let name = pv["metadata"]["name"].as_str().unwrap_or_default();
    let mut vs = VolumeSyncStatus {
        remote_volume: name.to_string(),
        status: pv["status"]["phase"].as_str().unwrap_or_default().to_string(),
        synced_time: now_rfc3339(),
        ..Default::default()
    };

    if !is_dynamically_provisioned(pv) {
        vs.volume = name.to_string();
        return vs;
    }

    let claim_ref = &pv["spec"]["claimRef"];
    if claim_ref["kind"].as_str() != Some("PersistentVolumeClaim") {
        return vs;
    }
    let claim_name = claim_ref["name"].as_str().unwrap_or_default();
    let claim_namespace = claim_ref["namespace"].as_str().unwrap_or_default();

    vs.pvc = claim_name.to_string();
    vs.remote_namespace = claim_namespace.to_string();
    vs.namespace = if source_namespace.is_empty() {
        claim_namespace.to_string()
    } else {
        source_namespace.to_string()
    };

    match source
        .get("PersistentVolumeClaim", "v1", Some(&vs.namespace), claim_name)
        .await
    {
        Ok(Some(pvc)) => {
            if let Some(vol) = pvc["spec"]["volumeName"].as_str() {
                vs.volume = vol.to_string();
            }
        }
        Ok(None) => warn!(pvc = %claim_name, "source claim not found for volume cross-reference"),
        Err(e) => vs.reason = e.to_string(),
    }
    vs
}

/// Read the destination namespace's phase
async fn namespace_status<D: ClusterOps>(destination: &D, obj: &Value) -> ResourceSyncStatus {
    let mut rs = base_status(obj);
    let name = obj["metadata"]["name"].as_str().unwrap_or_default();
    match destination.get("Namespace", "v1", None, name).await {
        Ok(Some(ns)) => {
            rs.status = ns["status"]["phase"].as_str().unwrap_or_default().to_string();
        }
        Ok(None) => rs.reason = "namespace not found at destination".to_string(),
        Err(e) => rs.reason = e.to_string(),
    }
    rs
}
