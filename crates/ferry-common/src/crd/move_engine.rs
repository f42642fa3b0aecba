//! MoveEngine Custom Resource Definition
//!
//! A MoveEngine represents one workload's cross-cluster migration pairing.
//! The active side discovers and replicates resources, schedules sync runs
//! via a cron expression, and mirrors its status to a standby MoveEngine it
//! creates in the destination cluster.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Which side of the pairing this engine drives
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum EngineMode {
    /// Source cluster: discovers resources, schedules syncs, drives the pairing
    #[default]
    Active,
    /// Destination cluster: mirrors status, runs restore sessions
    Standby,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Active => write!(f, "active"),
            Self::Standby => write!(f, "standby"),
        }
    }
}

/// Lifecycle state of a MoveEngine
///
/// Transitions are monotonic: unset -> Initializing -> {Initialized |
/// InitializationFailed}, Initialized -> Ready. Sync runs are only
/// scheduled from Ready.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum EngineState {
    /// Initialization started (standby mirror + mover Init in flight)
    Initializing,
    /// Mirror created and mover initialized
    Initialized,
    /// Initialization failed; terminal until the spec changes
    InitializationFailed,
    /// Handshake complete; sync runs may be scheduled
    Ready,
    /// Spec failed validation
    Invalid,
}

impl std::fmt::Display for EngineState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Initializing => write!(f, "Initializing"),
            Self::Initialized => write!(f, "Initialized"),
            Self::InitializationFailed => write!(f, "InitializationFailed"),
            Self::Ready => write!(f, "Ready"),
            Self::Invalid => write!(f, "Invalid"),
        }
    }
}

/// Phase of the current sync run as mirrored into the engine status
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SyncPhase {
    /// The sync session is running
    Running,
    /// The local side of the sync completed
    Completed,
    /// The sync failed
    Failed,
    /// Both sides completed; the run is done
    Synced,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
            Self::Synced => write!(f, "Synced"),
        }
    }
}

/// Per-resource replication outcome
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ResourceSyncStatus {
    /// Resource kind
    pub kind: String,
    /// Resource name
    pub name: String,
    /// Replication phase (always "Synced" once recorded)
    pub phase: String,
    /// Kind-specific detail (deployment condition type, PVC phase, ...)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Failure or condition reason, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// When the resource was replicated (RFC 3339)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub synced_time: String,
}

/// Per-volume replication outcome
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSyncStatus {
    /// Source namespace of the claim
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,
    /// Destination namespace of the claim
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_namespace: String,
    /// Claim name
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pvc: String,
    /// Volume phase at the destination
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub status: String,
    /// Failure reason, if any
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub reason: String,
    /// Bound volume name at the source
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub volume: String,
    /// Volume name at the destination
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_volume: String,
    /// When the volume was probed (RFC 3339)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub synced_time: String,
}

/// Status of a MoveEngine
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MoveEngineStatus {
    /// Current lifecycle state (unset until initialization begins)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<EngineState>,

    /// Previous lifecycle state
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_state: Option<EngineState>,

    /// When the most recent run reached Synced (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub synced_time: Option<String>,

    /// When the run before that reached Synced (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_synced_time: Option<String>,

    /// Name of the current SyncSession
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_session: Option<String>,

    /// Phase of the current sync run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_phase: Option<SyncPhase>,

    /// Per-resource replication outcomes from the latest tick
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<ResourceSyncStatus>,

    /// Per-volume replication outcomes from the latest tick
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeSyncStatus>,
}

/// Specification for a MoveEngine
///
/// One instance exists per workload pairing. Created by the operator or
/// CLI; only the MoveEngine controller mutates its status.
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeferry.io",
    version = "v1alpha1",
    kind = "MoveEngine",
    plural = "moveengines",
    shortname = "meng",
    namespaced,
    status = "MoveEngineStatus",
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"Sync-Period","type":"string","jsonPath":".spec.syncPeriod"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#,
    printcolumn = r#"{"name":"Sync-Session","type":"string","jsonPath":".status.syncSession"}"#,
    printcolumn = r#"{"name":"Sync-Phase","type":"string","jsonPath":".status.syncPhase"}"#,
    printcolumn = r#"{"name":"Synced-Time","type":"date","jsonPath":".status.syncedTime"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct MoveEngineSpec {
    /// Name of the ClusterPair giving access to both clusters
    pub pair_ref: String,

    /// Source namespace of the workload
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Destination namespace (resources are renamed into it)
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub remote_namespace: String,

    /// Standard 5-field cron expression for scheduled sync runs
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub sync_period: String,

    /// Which side of the pairing this engine drives
    #[serde(default)]
    pub mode: EngineMode,

    /// Data mover plugin id
    pub plugin: String,

    /// Whether API resources are replicated along with volume data
    #[serde(default)]
    pub include_resources: bool,

    /// Label selector restricting which objects are discovered
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label_selector: Option<String>,

    /// Mover-specific parameters passed through to the plugin
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub plugin_parameters: BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_spec(yaml: &str) -> MoveEngineSpec {
        serde_yaml::from_str(yaml).expect("parse spec")
    }

    #[test]
    fn test_move_engine_spec_roundtrip() {
        let spec = parse_spec(
            r#"
pairRef: prod-pair
namespace: wordpress
remoteNamespace: wordpress-dr
syncPeriod: "*/5 * * * *"
mode: active
plugin: rsync
includeResources: true
pluginParameters:
  bandwidth: "100M"
"#,
        );

        assert_eq!(spec.pair_ref, "prod-pair");
        assert_eq!(spec.namespace, "wordpress");
        assert_eq!(spec.remote_namespace, "wordpress-dr");
        assert_eq!(spec.sync_period, "*/5 * * * *");
        assert_eq!(spec.mode, EngineMode::Active);
        assert!(spec.include_resources);
        assert_eq!(spec.plugin_parameters["bandwidth"], "100M");
    }

    #[test]
    fn test_move_engine_spec_defaults() {
        let spec = parse_spec(
            r#"
pairRef: prod-pair
plugin: rsync
"#,
        );

        assert_eq!(spec.mode, EngineMode::Active);
        assert!(!spec.include_resources);
        assert!(spec.namespace.is_empty());
        assert!(spec.sync_period.is_empty());
        assert!(spec.plugin_parameters.is_empty());
    }

    #[test]
    fn test_mode_serializes_lowercase() {
        assert_eq!(
            serde_json::to_string(&EngineMode::Standby).unwrap(),
            "\"standby\""
        );
        assert_eq!(EngineMode::Active.to_string(), "active");
    }

    #[test]
    fn test_state_display_matches_wire_value() {
        for state in [
            EngineState::Initializing,
            EngineState::Initialized,
            EngineState::InitializationFailed,
            EngineState::Ready,
            EngineState::Invalid,
        ] {
            let wire = serde_json::to_string(&state).unwrap();
            assert_eq!(wire, format!("\"{}\"", state));
        }
    }

    #[test]
    fn test_status_skips_unset_fields() {
        let status = MoveEngineStatus {
            state: Some(EngineState::Ready),
            ..Default::default()
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"state": "Ready"}));
    }
}
