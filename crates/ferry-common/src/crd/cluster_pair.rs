//! ClusterPair Custom Resource Definition
//!
//! A ClusterPair holds the connectivity bundle for the remote side of a
//! migration. It is immutable once validated; a failed validation is
//! terminal for that pairing until a new spec is provided.

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Validation outcome for a ClusterPair
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum PairState {
    /// The kubeconfig parsed and names a usable context
    Validated,
    /// The kubeconfig is unusable; respecify the pair
    Invalid,
}

impl std::fmt::Display for PairState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Validated => write!(f, "Validated"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Status of a ClusterPair
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairStatus {
    /// Validation outcome
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<PairState>,

    /// Human-readable validation detail
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Specification for a ClusterPair
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeferry.io",
    version = "v1alpha1",
    kind = "ClusterPair",
    plural = "clusterpairs",
    shortname = "cpair",
    namespaced,
    status = "ClusterPairStatus",
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Age","type":"date","jsonPath":".metadata.creationTimestamp"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct ClusterPairSpec {
    /// Kubeconfig YAML for the remote cluster
    pub kubeconfig: String,
}
