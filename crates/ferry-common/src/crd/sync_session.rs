//! SyncSession Custom Resource Definition
//!
//! A SyncSession represents one scheduled execution of data movement,
//! delegated to a Data Mover plugin. The active engine creates a backup
//! session per tick; once it completes, a matching restore session is
//! created at the destination.

use std::collections::BTreeMap;

use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Direction of the data movement
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SessionMode {
    /// Read volume data out of the source cluster
    #[default]
    Backup,
    /// Write volume data into the destination cluster
    Restore,
}

impl std::fmt::Display for SessionMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backup => write!(f, "backup"),
            Self::Restore => write!(f, "restore"),
        }
    }
}

/// State of a SyncSession; terminal once Completed or Failed
#[derive(Clone, Copy, Debug, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum SyncState {
    /// The mover accepted the sync and it is in flight
    Running,
    /// The mover reported success
    Completed,
    /// The mover reported failure
    Failed,
}

impl std::fmt::Display for SyncState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "Running"),
            Self::Completed => write!(f, "Completed"),
            Self::Failed => write!(f, "Failed"),
        }
    }
}

/// Status of a SyncSession
#[derive(Clone, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SyncSessionStatus {
    /// Current state (unset until the mover Sync call is issued)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<SyncState>,

    /// Identifier the mover returned for this sync
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_id: Option<String>,

    /// When the session reached Completed (RFC 3339)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion_time: Option<String>,

    /// Failure reason when state is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Specification for a SyncSession
#[derive(CustomResource, Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[kube(
    group = "kubeferry.io",
    version = "v1alpha1",
    kind = "SyncSession",
    plural = "syncsessions",
    shortname = "ssn",
    namespaced,
    status = "SyncSessionStatus",
    printcolumn = r#"{"name":"Plugin","type":"string","jsonPath":".spec.plugin"}"#,
    printcolumn = r#"{"name":"Engine","type":"string","jsonPath":".spec.moveEngine"}"#,
    printcolumn = r#"{"name":"Mode","type":"string","jsonPath":".spec.mode"}"#,
    printcolumn = r#"{"name":"State","type":"string","jsonPath":".status.state"}"#
)]
#[serde(rename_all = "camelCase")]
pub struct SyncSessionSpec {
    /// Data mover plugin id
    pub plugin: String,

    /// Name of the owning MoveEngine
    pub move_engine: String,

    /// Workload namespace the data belongs to
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub namespace: String,

    /// Direction of the movement
    #[serde(default)]
    pub mode: SessionMode,

    /// Mover configuration for this run
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub config: BTreeMap<String, String>,
}
