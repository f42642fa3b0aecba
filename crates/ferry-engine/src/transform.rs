//! Object transforms applied before creation at the destination
//!
//! Server-assigned metadata and status never survive the trip; a handful
//! of kinds need extra surgery so the destination cluster can re-own the
//! object (cluster IPs, volume bindings, claim references).

use serde_json::Value;

/// Headless services keep this sentinel as their cluster IP
const HEADLESS_CLUSTER_IP: &str = "None";

/// Metadata fields the destination API server assigns itself
const TRANSIENT_METADATA: &[&str] = &[
    "creationTimestamp",
    "resourceVersion",
    "selfLink",
    "uid",
    "managedFields",
    "generation",
];

/// Transform an object in place for creation at the destination.
///
/// `namespaced` reflects the destination cluster's scope for the kind;
/// the namespace rewrite only applies to namespaced objects.
pub fn transform_object(obj: &mut Value, remote_namespace: Option<&str>, namespaced: bool) {
    let kind = obj["kind"].as_str().unwrap_or_default().to_lowercase();

    strip_transient_fields(obj);

    if let (Some(ns), true) = (remote_namespace, namespaced) {
        if !ns.is_empty() {
            obj["metadata"]["namespace"] = Value::String(ns.to_string());
        }
    }

    match kind.as_str() {
        "service" => transform_service(obj),
        "persistentvolumeclaim" => transform_pvc(obj),
        "persistentvolume" => transform_pv(obj),
        _ => {}
    }
}

/// Remove server-assigned metadata and the status subtree
pub fn strip_transient_fields(obj: &mut Value) {
    if let Some(meta) = obj["metadata"].as_object_mut() {
        for field in TRANSIENT_METADATA {
            meta.remove(*field);
        }
    }
    if let Some(map) = obj.as_object_mut() {
        map.remove("status");
    }
}

/// Blank the cluster IP so the destination assigns its own, unless the
/// service is headless
fn transform_service(obj: &mut Value) {
    let is_headless = obj["spec"]["clusterIP"].as_str() == Some(HEADLESS_CLUSTER_IP);
    if !is_headless {
        if let Some(spec) = obj["spec"].as_object_mut() {
            if spec.contains_key("clusterIP") {
                spec.insert("clusterIP".into(), Value::String(String::new()));
            }
            spec.remove("clusterIPs");
        }
    }
}

/// Let the destination rebind the claim to a fresh volume
fn transform_pvc(obj: &mut Value) {
    if let Some(meta) = obj["metadata"].as_object_mut() {
        meta.remove("annotations");
    }
    if let Some(spec) = obj["spec"].as_object_mut() {
        spec.remove("volumeName");
    }
}

/// Drop the source-side claim binding from a statically provisioned volume
fn transform_pv(obj: &mut Value) {
    if let Some(meta) = obj["metadata"].as_object_mut() {
        meta.remove("annotations");
    }
    if let Some(spec) = obj["spec"].as_object_mut() {
        spec.remove("claimRef");
    }
}
