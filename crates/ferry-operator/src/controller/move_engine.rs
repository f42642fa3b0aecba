//! MoveEngine reconciler
//!
//! Drives the engine lifecycle (validate, initialize, handshake with the
//! standby, ready) and then the sync loop: on every due schedule tick the
//! active side replicates the resource graph, creates a backup
//! SyncSession locally, and mirrors the session name to the standby. Once
//! the backup completes it creates the matching restore session on the
//! destination and stamps the round `Synced` when both sides report
//! `Completed`.

use std::sync::Arc;

use chrono::Utc;
use kube::api::{Api, PostParams};
use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info};

use ferry_common::crd::{
    ClusterPair, EngineMode, EngineState, MoveEngine, MoveEngineStatus, SyncPhase, SyncSession,
};
use ferry_common::kube_utils::{is_already_exists, patch_resource_status};
use ferry_common::{Error, FIELD_MANAGER};
use ferry_engine::schedule::{self, Tick};
use ferry_engine::session::{self, StatusPatch};
use ferry_engine::{KubeCluster, ReplicationReport, ResolveOptions};
use ferry_mover::{MoverParams, PARAM_ENGINE_NAME, PARAM_ENGINE_NAMESPACE};
use ferry_pair::RemoteCluster;

use super::RETRY_INTERVAL;
use crate::context::Context;

/// Reconcile one MoveEngine according to its lifecycle state
pub async fn reconcile(engine: Arc<MoveEngine>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = engine.name_any();
    let namespace = engine
        .namespace()
        .ok_or_else(|| Error::internal_with_context("engine", "MoveEngine without a namespace"))?;
    debug!(engine = %name, namespace = %namespace, "reconciling MoveEngine");

    let state = engine.status.as_ref().and_then(|s| s.state);
    match state {
        None => {
            validate(&engine)?;
            initialize(&engine, &ctx).await?;
            Ok(Action::requeue(RETRY_INTERVAL))
        }
        Some(EngineState::Initializing) => {
            debug!(engine = %name, "initialization in flight");
            Ok(Action::requeue(RETRY_INTERVAL))
        }
        Some(EngineState::Initialized) => ensure_ready(&engine, &ctx).await,
        Some(EngineState::Ready) => handle_sync(&engine, &ctx).await,
        Some(EngineState::InitializationFailed) | Some(EngineState::Invalid) => {
            info!(engine = %name, state = ?state, "engine is terminal, skipping");
            Ok(Action::await_change())
        }
    }
}

/// Retryable failures poll again shortly; everything else waits for a
/// spec or status change.
pub fn error_policy(engine: Arc<MoveEngine>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(engine = %engine.name_any(), error = %err, "MoveEngine reconcile failed");
    if err.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

fn validate(engine: &MoveEngine) -> Result<(), Error> {
    let name = engine.name_any();
    if engine.spec.pair_ref.is_empty() {
        return Err(Error::validation_for(
            name,
            "spec.pairRef must name a ClusterPair",
        ));
    }
    if engine.spec.plugin.is_empty() {
        return Err(Error::validation_for(
            name,
            "spec.plugin must name a data mover",
        ));
    }
    if !engine.spec.sync_period.is_empty() {
        schedule::validate(&engine.spec.sync_period)
            .map_err(|e| Error::validation_for(name, format!("spec.syncPeriod: {}", e)))?;
    }
    Ok(())
}

/// Mover parameters for an engine: the spec's plugin parameters plus the
/// engine's own coordinates.
fn mover_params(engine: &MoveEngine) -> MoverParams {
    let mut params = engine.spec.plugin_parameters.clone();
    params.insert(PARAM_ENGINE_NAME.to_string(), engine.name_any());
    params.insert(
        PARAM_ENGINE_NAMESPACE.to_string(),
        engine.namespace().unwrap_or_default(),
    );
    params
}

async fn initialize(engine: &MoveEngine, ctx: &Context) -> Result<(), Error> {
    let name = engine.name_any();
    apply_patch(ctx, engine, StatusPatch::state(EngineState::Initializing)).await?;

    if engine.spec.mode == EngineMode::Active {
        if let Err(err) = create_standby(engine, ctx).await {
            error!(engine = %name, error = %err, "failed to create standby MoveEngine");
            return Err(fail_initialization(engine, ctx, err).await);
        }
    }

    if let Err(err) = ctx.movers.init(&engine.spec.plugin, &mover_params(engine)).await {
        error!(engine = %name, plugin = %engine.spec.plugin, error = %err, "plugin initialization failed");
        return Err(fail_initialization(engine, ctx, err).await);
    }

    info!(engine = %name, "MoveEngine initialized");
    apply_patch(ctx, engine, StatusPatch::state(EngineState::Initialized)).await
}

/// Record the initialization failure on the status. A failed status write
/// is aggregated with the original failure so neither is lost.
async fn fail_initialization(engine: &MoveEngine, ctx: &Context, primary: Error) -> Error {
    let patch = StatusPatch::state(EngineState::InitializationFailed);
    match apply_patch(ctx, engine, patch).await {
        Ok(()) => primary,
        Err(write_err) => Error::aggregate(primary, write_err),
    }
}

/// Create the mirrored standby engine on the destination cluster. A
/// mirror left over from a previous attempt counts as success.
async fn create_standby(engine: &MoveEngine, ctx: &Context) -> Result<(), Error> {
    let remote = remote_for(engine, ctx).await?;
    let standby = session::standby_engine(engine);
    let api: Api<MoveEngine> = Api::namespaced(remote.client.clone(), &engine.spec.remote_namespace);
    match api.create(&PostParams::default(), &standby).await {
        Ok(_) => {
            info!(engine = %engine.name_any(), namespace = %engine.spec.remote_namespace, "created standby MoveEngine");
            Ok(())
        }
        Err(e) if is_already_exists(&e) => {
            debug!(engine = %engine.name_any(), "standby MoveEngine already present");
            Ok(())
        }
        Err(e) => Err(e.into()),
    }
}

/// Initialized -> Ready handshake. The standby promotes itself; the
/// active side polls again until the mirror reports Ready.
async fn ensure_ready(engine: &MoveEngine, ctx: &Context) -> Result<Action, Error> {
    let standby_state = if engine.spec.mode == EngineMode::Active {
        let remote = remote_for(engine, ctx).await?;
        standby_status(&remote, engine).await?.state
    } else {
        None
    };

    if can_promote(engine.spec.mode, standby_state) {
        info!(engine = %engine.name_any(), "engine is ready");
        apply_patch(ctx, engine, StatusPatch::state(EngineState::Ready)).await?;
    } else {
        debug!(engine = %engine.name_any(), "standby MoveEngine not ready yet");
    }
    Ok(Action::requeue(RETRY_INTERVAL))
}

/// Whether an Initialized engine may move to Ready. The standby needs no
/// handshake; the active side waits for its mirror.
fn can_promote(mode: EngineMode, standby_state: Option<EngineState>) -> bool {
    match mode {
        EngineMode::Standby => true,
        EngineMode::Active => standby_state == Some(EngineState::Ready),
    }
}

/// Ready-state sync orchestration
async fn handle_sync(engine: &MoveEngine, ctx: &Context) -> Result<Action, Error> {
    let status = engine.status.clone().unwrap_or_default();
    let active = engine.spec.mode == EngineMode::Active;

    // Active with no session in flight, or the previous round settled:
    // drive the schedule.
    if active
        && (status.sync_session.is_none()
            || status.sync_phase == Some(SyncPhase::Synced)
            || status.sync_phase == Some(SyncPhase::Failed))
    {
        return ensure_next_sync(engine, ctx).await;
    }

    // Standby with no session recorded yet: the active side will fill it
    // in when it triggers a sync.
    if !active && status.sync_session.is_none() {
        return Ok(Action::await_change());
    }

    // Active with a completed backup: drive the restore side.
    if active && status.sync_phase == Some(SyncPhase::Completed) {
        return finish_sync(engine, ctx, &status).await;
    }

    // A session is in flight on this side; mirror its state.
    if status.sync_session.is_some() && status.sync_phase != Some(SyncPhase::Synced) {
        return track_session(engine, ctx, &status).await;
    }

    Ok(Action::await_change())
}

/// Trigger a sync when the schedule is due, otherwise requeue for the
/// next tick.
async fn ensure_next_sync(engine: &MoveEngine, ctx: &Context) -> Result<Action, Error> {
    let name = engine.name_any();
    let expr = engine.spec.sync_period.as_str();
    if expr.is_empty() {
        return Err(Error::validation_for(
            name,
            "active MoveEngine has no spec.syncPeriod schedule",
        ));
    }

    let status = engine.status.clone().unwrap_or_default();
    let last_sync = schedule::last_sync_time(&status);
    if let Tick::NotDue(delay) = schedule::check(expr, last_sync, Utc::now())? {
        debug!(engine = %name, delay_secs = delay.as_secs(), "sync not due yet");
        return Ok(Action::requeue(delay));
    }

    // The schedule has elapsed. Replicate resources first so the target
    // namespace exists before the data mover runs.
    let report = if engine.spec.include_resources {
        Some(run_resource_sync(engine, ctx).await?)
    } else {
        None
    };

    let session_name = session::sync_session_name(&name, Utc::now());
    let backup = session::backup_session(engine, &session_name);
    let api: Api<SyncSession> =
        Api::namespaced(ctx.client.clone(), &engine.namespace().unwrap_or_default());
    api.create(&PostParams::default(), &backup).await?;
    info!(engine = %name, session = %session_name, "created backup SyncSession");

    let mut patch = StatusPatch {
        sync_session: Some(session_name),
        sync_phase: Some(SyncPhase::Running),
        ..Default::default()
    };
    if let Some(report) = report {
        patch.resources = Some(report.resources);
        patch.volumes = Some(report.volumes);
    }
    apply_patch(ctx, engine, patch.clone()).await?;
    update_standby_status(engine, ctx, &patch).await?;

    // The session tracks itself from here; come back at the next tick.
    match schedule::check(expr, last_sync, Utc::now())? {
        Tick::NotDue(delay) => Ok(Action::requeue(delay)),
        Tick::Due => Ok(Action::requeue(RETRY_INTERVAL)),
    }
}

/// Run one resource-replication tick through the graph engine
async fn run_resource_sync(engine: &MoveEngine, ctx: &Context) -> Result<ReplicationReport, Error> {
    let remote = remote_for(engine, ctx).await?;
    let source = KubeCluster::new(ctx.client.clone(), ctx.local_mapper().await?);
    let destination = KubeCluster::new(remote.client.clone(), remote.mapper.clone());

    let opts = ResolveOptions {
        namespace: engine.spec.namespace.clone(),
        remote_namespace: engine.spec.remote_namespace.clone(),
        label_selector: engine.spec.label_selector.clone(),
    };

    let graph = ctx.graph(&graph_key(engine)).await;
    let mut graph = graph.lock().await;
    ferry_engine::run_sync(&source, &destination, &mut graph, opts).await
}

/// The backup finished locally. Ensure the restore session exists on the
/// destination and stamp the round Synced once the standby completes.
async fn finish_sync(
    engine: &MoveEngine,
    ctx: &Context,
    status: &MoveEngineStatus,
) -> Result<Action, Error> {
    let name = engine.name_any();
    let session_name = status.sync_session.as_deref().ok_or_else(|| {
        Error::internal_with_context("engine", "completed sync phase without a session name")
    })?;

    let remote = remote_for(engine, ctx).await?;
    let api: Api<SyncSession> =
        Api::namespaced(remote.client.clone(), &engine.spec.remote_namespace);
    if api.get_opt(session_name).await?.is_none() {
        let restore = session::restore_session(engine, session_name);
        api.create(&PostParams::default(), &restore).await?;
        info!(engine = %name, session = %session_name, "created restore SyncSession on destination");
        return Ok(Action::requeue(RETRY_INTERVAL));
    }

    let standby = standby_status(&remote, engine).await?;
    if standby.sync_phase != Some(SyncPhase::Completed) {
        debug!(engine = %name, session = %session_name, "restore still running on destination");
        return Ok(Action::requeue(RETRY_INTERVAL));
    }

    let patch = StatusPatch {
        sync_phase: Some(SyncPhase::Synced),
        synced_time: Some(session::now_rfc3339()),
        ..Default::default()
    };
    apply_patch(ctx, engine, patch.clone()).await?;
    update_standby_status(engine, ctx, &patch).await?;
    info!(engine = %name, session = %session_name, "sync round complete");
    Ok(Action::await_change())
}

/// Mirror the in-flight session's state into the engine status
async fn track_session(
    engine: &MoveEngine,
    ctx: &Context,
    status: &MoveEngineStatus,
) -> Result<Action, Error> {
    let name = engine.name_any();
    let session_name = status.sync_session.as_deref().ok_or_else(|| {
        Error::internal_with_context("engine", "sync phase set without a session name")
    })?;

    let api: Api<SyncSession> =
        Api::namespaced(ctx.client.clone(), &engine.namespace().unwrap_or_default());
    // On the standby the session name is mirrored into the status before
    // the active side creates the restore session here, so an absent
    // session means "not yet", never a dead end.
    let Some(sync) = api.get_opt(session_name).await? else {
        debug!(engine = %name, session = %session_name, "session not created on this side yet");
        return Ok(Action::requeue(RETRY_INTERVAL));
    };

    let Some(state) = sync.status.as_ref().and_then(|s| s.state) else {
        debug!(engine = %name, session = %session_name, "session not picked up yet");
        return Ok(Action::requeue(RETRY_INTERVAL));
    };

    let (phase, keep_polling) = session::translate_sync_state(state);
    if status.sync_phase != Some(phase) {
        info!(engine = %name, session = %session_name, phase = ?phase, "session progressed");
        apply_patch(ctx, engine, StatusPatch::phase(phase)).await?;
    }
    if keep_polling {
        return Ok(Action::requeue(RETRY_INTERVAL));
    }
    // Completed or Failed. The status write above re-triggers the
    // reconcile, which takes the settle path.
    Ok(Action::await_change())
}

/// Resolve and connect the engine's ClusterPair
async fn remote_for(engine: &MoveEngine, ctx: &Context) -> Result<RemoteCluster, Error> {
    let namespace = engine.namespace().unwrap_or_default();
    let pair: ClusterPair =
        ferry_pair::get(&ctx.client, &engine.spec.pair_ref, &namespace).await?;
    ferry_pair::validate(&pair)?;
    ctx.remote(&pair).await
}

async fn standby_status(
    remote: &RemoteCluster,
    engine: &MoveEngine,
) -> Result<MoveEngineStatus, Error> {
    let api: Api<MoveEngine> =
        Api::namespaced(remote.client.clone(), &engine.spec.remote_namespace);
    let standby = api.get(&engine.name_any()).await?;
    Ok(standby.status.unwrap_or_default())
}

/// Merge a patch into the engine's status and write it back.
///
/// The status is re-read from the API first: a reconcile can patch more
/// than once (Initializing then Initialized), and merging onto the
/// snapshot taken at reconcile start would shift the wrong value into
/// `lastState`.
async fn apply_patch(ctx: &Context, engine: &MoveEngine, patch: StatusPatch) -> Result<(), Error> {
    let name = engine.name_any();
    let namespace = engine.namespace().unwrap_or_default();
    let api: Api<MoveEngine> = Api::namespaced(ctx.client.clone(), &namespace);

    let mut status = api.get(&name).await?.status.unwrap_or_default();
    session::merge_status(&mut status, &patch);
    patch_resource_status::<MoveEngine>(&ctx.client, &name, &namespace, &status, FIELD_MANAGER)
        .await?;
    Ok(())
}

/// Apply the same patch to the standby mirror's status
async fn update_standby_status(
    engine: &MoveEngine,
    ctx: &Context,
    patch: &StatusPatch,
) -> Result<(), Error> {
    let remote = remote_for(engine, ctx).await?;
    let api: Api<MoveEngine> =
        Api::namespaced(remote.client.clone(), &engine.spec.remote_namespace);
    let standby = api.get(&engine.name_any()).await?;

    let mut status = standby.status.unwrap_or_default();
    session::merge_status(&mut status, patch);
    patch_resource_status::<MoveEngine>(
        &remote.client,
        &engine.name_any(),
        &engine.spec.remote_namespace,
        &status,
        FIELD_MANAGER,
    )
    .await?;
    Ok(())
}

fn graph_key(engine: &MoveEngine) -> String {
    format!(
        "{}/{}",
        engine.namespace().unwrap_or_default(),
        engine.name_any()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_common::crd::MoveEngineSpec;
    use kube::api::ObjectMeta;

    fn engine(mode: EngineMode) -> MoveEngine {
        MoveEngine {
            metadata: ObjectMeta {
                name: Some("db-move".to_string()),
                namespace: Some("prod".to_string()),
                ..Default::default()
            },
            spec: MoveEngineSpec {
                pair_ref: "pair-west".to_string(),
                namespace: "prod".to_string(),
                remote_namespace: "prod-dr".to_string(),
                sync_period: "*/5 * * * *".to_string(),
                mode,
                plugin: "noop".to_string(),
                include_resources: true,
                label_selector: None,
                plugin_parameters: Default::default(),
            },
            status: None,
        }
    }

    #[test]
    fn test_validate_accepts_complete_spec() {
        assert!(validate(&engine(EngineMode::Active)).is_ok());
    }

    #[test]
    fn test_validate_requires_pair_ref() {
        let mut e = engine(EngineMode::Active);
        e.spec.pair_ref = String::new();
        let err = validate(&e).unwrap_err();
        assert!(err.to_string().contains("pairRef"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_validate_requires_plugin() {
        let mut e = engine(EngineMode::Active);
        e.spec.plugin = String::new();
        assert!(validate(&e).is_err());
    }

    #[test]
    fn test_validate_rejects_bad_cron() {
        let mut e = engine(EngineMode::Active);
        e.spec.sync_period = "every five minutes".to_string();
        let err = validate(&e).unwrap_err();
        assert!(err.to_string().contains("syncPeriod"));
    }

    #[test]
    fn test_validate_allows_empty_sync_period() {
        // A standby engine never consults the schedule; the active side
        // surfaces the missing schedule at tick time instead.
        let mut e = engine(EngineMode::Standby);
        e.spec.sync_period = String::new();
        assert!(validate(&e).is_ok());
    }

    #[test]
    fn test_mover_params_carry_engine_coordinates() {
        let mut e = engine(EngineMode::Active);
        e.spec
            .plugin_parameters
            .insert("bucket".to_string(), "backups".to_string());

        let params = mover_params(&e);
        assert_eq!(params.get(PARAM_ENGINE_NAME).unwrap(), "db-move");
        assert_eq!(params.get(PARAM_ENGINE_NAMESPACE).unwrap(), "prod");
        assert_eq!(params.get("bucket").unwrap(), "backups");
    }

    #[test]
    fn test_graph_key_is_namespaced() {
        assert_eq!(graph_key(&engine(EngineMode::Active)), "prod/db-move");
    }

    #[test]
    fn test_active_stays_initialized_until_standby_is_ready() {
        // The active side re-polls every pass and never promotes while
        // the standby lags, so no sync session can be created early.
        let lagging = [
            None,
            Some(EngineState::Initializing),
            Some(EngineState::Initialized),
            Some(EngineState::InitializationFailed),
        ];
        for state in lagging {
            assert!(!can_promote(EngineMode::Active, state));
        }
        assert!(can_promote(EngineMode::Active, Some(EngineState::Ready)));
    }

    #[test]
    fn test_standby_promotes_without_a_handshake() {
        assert!(can_promote(EngineMode::Standby, None));
    }

    #[test]
    fn test_back_to_back_state_patches_shift_last_state() {
        // initialize() writes Initializing and then Initialized within one
        // reconcile. Each patch merges onto the freshly read status, so
        // the second write must record the first as lastState.
        let mut live = MoveEngineStatus::default();
        session::merge_status(&mut live, &StatusPatch::state(EngineState::Initializing));
        session::merge_status(&mut live, &StatusPatch::state(EngineState::Initialized));

        assert_eq!(live.state, Some(EngineState::Initialized));
        assert_eq!(live.last_state, Some(EngineState::Initializing));
    }
}
