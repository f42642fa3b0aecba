//! Session bookkeeping: status merging, mirror specs, session payloads
//!
//! Pure helpers the controllers build on. Status merging shifts the
//! previous value into its last-* slot so the engine keeps one step of
//! history; mirror and session builders produce the objects the active
//! side creates on either cluster.

use chrono::{DateTime, SecondsFormat, Utc};
use kube::api::ObjectMeta;

use ferry_common::crd::{
    EngineMode, EngineState, MoveEngine, MoveEngineStatus, ResourceSyncStatus, SessionMode,
    SyncPhase, SyncSession, SyncSessionSpec, SyncState, VolumeSyncStatus,
};

/// Partial status update applied onto a MoveEngine status
#[derive(Debug, Default, Clone)]
pub struct StatusPatch {
    /// New lifecycle state
    pub state: Option<EngineState>,
    /// New synced timestamp (RFC 3339)
    pub synced_time: Option<String>,
    /// Current sync-session name
    pub sync_session: Option<String>,
    /// Current sync phase
    pub sync_phase: Option<SyncPhase>,
    /// Replacement per-resource outcomes
    pub resources: Option<Vec<ResourceSyncStatus>>,
    /// Replacement per-volume outcomes
    pub volumes: Option<Vec<VolumeSyncStatus>>,
}

impl StatusPatch {
    /// Patch that only moves the lifecycle state
    pub fn state(state: EngineState) -> Self {
        Self {
            state: Some(state),
            ..Default::default()
        }
    }

    /// Patch that only moves the sync phase
    pub fn phase(phase: SyncPhase) -> Self {
        Self {
            sync_phase: Some(phase),
            ..Default::default()
        }
    }
}

/// Merge a patch into a status, shifting replaced values into their
/// last-* slots. Setting a value equal to the current one is a no-op, so
/// re-delivered reconciles never erase history.
pub fn merge_status(current: &mut MoveEngineStatus, patch: &StatusPatch) {
    if let Some(state) = patch.state {
        if current.state != Some(state) {
            current.last_state = current.state;
            current.state = Some(state);
        }
    }
    if let Some(ref time) = patch.synced_time {
        current.last_synced_time = current.synced_time.take();
        current.synced_time = Some(time.clone());
    }
    if let Some(ref session) = patch.sync_session {
        current.sync_session = Some(session.clone());
    }
    if let Some(phase) = patch.sync_phase {
        if current.sync_phase != Some(phase) {
            current.sync_phase = Some(phase);
        }
    }
    if let Some(ref resources) = patch.resources {
        current.resources = resources.clone();
    }
    if let Some(ref volumes) = patch.volumes {
        current.volumes = volumes.clone();
    }
}

/// Build the mirrored MoveEngine created at the destination cluster.
///
/// Same spec and name, mode forced to standby, living in the destination
/// namespace.
pub fn standby_engine(engine: &MoveEngine) -> MoveEngine {
    let mut spec = engine.spec.clone();
    spec.mode = EngineMode::Standby;
    MoveEngine {
        metadata: ObjectMeta {
            name: engine.metadata.name.clone(),
            namespace: Some(engine.spec.remote_namespace.clone()),
            ..Default::default()
        },
        spec,
        status: None,
    }
}

/// Session name for one tick: `ss-<engine>-<timestamp>`
pub fn sync_session_name(engine_name: &str, now: DateTime<Utc>) -> String {
    format!("ss-{}-{}", engine_name, now.format("%Y%m%d%H%M%S"))
}

/// The backup session the active side creates locally per tick
pub fn backup_session(engine: &MoveEngine, name: &str) -> SyncSession {
    session(engine, name, SessionMode::Backup, &engine.metadata)
}

/// The restore session mirrored to the destination once backup completes
pub fn restore_session(engine: &MoveEngine, name: &str) -> SyncSession {
    let meta = ObjectMeta {
        namespace: Some(engine.spec.remote_namespace.clone()),
        ..Default::default()
    };
    let mut restore = session(engine, name, SessionMode::Restore, &meta);
    restore.spec.namespace = engine.spec.remote_namespace.clone();
    restore
}

fn session(engine: &MoveEngine, name: &str, mode: SessionMode, meta: &ObjectMeta) -> SyncSession {
    SyncSession {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: meta.namespace.clone(),
            ..Default::default()
        },
        spec: SyncSessionSpec {
            plugin: engine.spec.plugin.clone(),
            move_engine: engine.metadata.name.clone().unwrap_or_default(),
            namespace: engine.spec.namespace.clone(),
            mode,
            config: engine.spec.plugin_parameters.clone(),
        },
        status: None,
    }
}

/// Translate a sync-session state into the engine's phase mirror, with
/// whether the engine should keep polling
pub fn translate_sync_state(state: SyncState) -> (SyncPhase, bool) {
    match state {
        SyncState::Running => (SyncPhase::Running, true),
        SyncState::Completed => (SyncPhase::Completed, false),
        SyncState::Failed => (SyncPhase::Failed, false),
    }
}

/// Current time in the status timestamp format
pub fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
