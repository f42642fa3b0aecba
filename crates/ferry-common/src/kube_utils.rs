//! Kubernetes helpers shared by the engine and the controllers

use std::time::Duration;

use kube::api::{Api, Patch, PatchParams};
use kube::discovery::ApiResource;
use kube::Client;
use tracing::trace;

use crate::Error;

/// Known irregular plurals; everything else goes through the fallback rules
const KIND_PLURALS: &[(&str, &str)] = &[
    ("endpoints", "endpoints"),
    ("networkpolicy", "networkpolicies"),
    ("podsecuritypolicy", "podsecuritypolicies"),
    ("ingress", "ingresses"),
    ("storageclass", "storageclasses"),
    ("priorityclass", "priorityclasses"),
    ("runtimeclass", "runtimeclasses"),
];

/// Pluralize a Kubernetes resource kind
///
/// Uses a lookup table for irregular kinds, falling back to simple
/// pluralization rules.
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Split an apiVersion string into (group, version)
///
/// Core-group resources have no slash: `"v1"` -> `("", "v1")`.
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// Used as the fallback when REST-mapping lookup against the destination
/// cluster fails: the version is used exactly and the plural is guessed.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Patch the status sub-resource of a namespaced resource.
///
/// Serializes `status` into `{ "status": <status> }` and applies it via
/// merge-patch. This is the pattern all kubeferry controllers use.
pub async fn patch_resource_status<T>(
    client: &Client,
    name: &str,
    namespace: &str,
    status: &impl serde::Serialize,
    field_manager: &str,
) -> std::result::Result<(), kube::Error>
where
    T: kube::Resource<Scope = k8s_openapi::NamespaceResourceScope>
        + Clone
        + serde::de::DeserializeOwned
        + std::fmt::Debug,
    <T as kube::Resource>::DynamicType: Default,
{
    let api: Api<T> = Api::namespaced(client.clone(), namespace);
    let patch = serde_json::json!({ "status": status });
    api.patch_status(name, &PatchParams::apply(field_manager), &Patch::Merge(&patch))
        .await?;
    Ok(())
}

/// Poll `check_fn` at `poll_interval` until it returns true or `timeout` elapses.
///
/// Check errors are treated as "not yet" and retried; only the timeout
/// produces an error.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> crate::Result<()>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = crate::Result<bool>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("polling condition not yet met, retrying");
            }
            Err(e) => {
                trace!("polling check returned error (retrying): {}", e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Whether a kube error is a 404 NotFound API response
pub fn is_not_found(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 404)
}

/// Whether a kube error is a 409 AlreadyExists/Conflict API response
pub fn is_already_exists(err: &kube::Error) -> bool {
    matches!(err, kube::Error::Api(ae) if ae.code == 409)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_version() {
        assert_eq!(
            parse_api_version("apps/v1"),
            ("apps".to_string(), "v1".to_string())
        );
        assert_eq!(parse_api_version("v1"), (String::new(), "v1".to_string()));
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
        assert_eq!(pluralize_kind("StorageClass"), "storageclasses");
        assert_eq!(pluralize_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize_kind("Ingress"), "ingresses");
    }

    #[test]
    fn test_build_api_resource_guesses_plural() {
        let ar = build_api_resource("apps/v1", "ReplicaSet");
        assert_eq!(ar.group, "apps");
        assert_eq!(ar.version, "v1");
        assert_eq!(ar.plural, "replicasets");
        assert_eq!(ar.api_version, "apps/v1");

        let core = build_api_resource("v1", "Pod");
        assert_eq!(core.group, "");
        assert_eq!(core.plural, "pods");
    }

    #[tokio::test]
    async fn test_poll_until_times_out() {
        let result = poll_until(
            Duration::from_millis(20),
            Duration::from_millis(5),
            "never became true",
            || async { Ok(false) },
        )
        .await;
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("never became true"));
    }

    #[tokio::test]
    async fn test_poll_until_succeeds() {
        let mut calls = 0;
        let result = poll_until(
            Duration::from_secs(1),
            Duration::from_millis(1),
            "timeout",
            || {
                calls += 1;
                let done = calls >= 3;
                async move { Ok(done) }
            },
        )
        .await;
        assert!(result.is_ok());
        assert_eq!(calls, 3);
    }
}
