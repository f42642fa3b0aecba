//! SyncSession reconciler
//!
//! A SyncSession is one sync round handed to a data mover. An unstarted
//! session dispatches the mover's Sync call and only then records
//! `Running`, so a failed dispatch leaves the session untouched for a
//! clean retry. A running session polls the mover's Status call and
//! settles to `Completed` or `Failed`; settled sessions are never
//! touched again.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use ferry_common::crd::{SyncSession, SyncSessionStatus, SyncState};
use ferry_common::kube_utils::patch_resource_status;
use ferry_common::{Error, FIELD_MANAGER};
use ferry_engine::session::now_rfc3339;
use ferry_mover::{
    MoverParams, MoverStatus, StatusReport, PARAM_ENGINE_NAME, PARAM_ENGINE_NAMESPACE, PARAM_MODE,
    PARAM_SYNC_ID,
};

use super::RETRY_INTERVAL;
use crate::context::Context;

/// Reconcile one SyncSession through the mover
pub async fn reconcile(session: Arc<SyncSession>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = session.name_any();
    let state = session.status.as_ref().and_then(|s| s.state);
    match state {
        None => start_sync(&session, &ctx).await,
        Some(SyncState::Running) => poll_sync(&session, &ctx).await,
        Some(SyncState::Completed) | Some(SyncState::Failed) => {
            debug!(session = %name, state = ?state, "session already settled");
            Ok(Action::await_change())
        }
    }
}

/// Retryable failures (mover busy, transient API errors) poll again
/// shortly; everything else waits for a change.
pub fn error_policy(session: Arc<SyncSession>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(session = %session.name_any(), error = %err, "SyncSession reconcile failed");
    if err.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}

/// Dispatch the mover's Sync call, then record Running with the sync id.
///
/// The order matters: if the dispatch fails the session status stays
/// unset, and the next reconcile retries the dispatch from scratch.
async fn start_sync(session: &SyncSession, ctx: &Context) -> Result<Action, Error> {
    let name = session.name_any();
    let params = session_params(session);
    let sync_id = ctx.movers.sync(&session.spec.plugin, &params).await?;
    info!(session = %name, plugin = %session.spec.plugin, sync_id = %sync_id, "data mover sync started");

    let status = SyncSessionStatus {
        state: Some(SyncState::Running),
        sync_id: Some(sync_id),
        ..Default::default()
    };
    patch_status(ctx, session, &status).await?;
    Ok(Action::requeue(RETRY_INTERVAL))
}

/// Poll the mover and settle the session when the run finishes
async fn poll_sync(session: &SyncSession, ctx: &Context) -> Result<Action, Error> {
    let name = session.name_any();
    let current = session.status.clone().unwrap_or_default();

    let mut params = session_params(session);
    if let Some(ref id) = current.sync_id {
        params.insert(PARAM_SYNC_ID.to_string(), id.clone());
    }

    let report = ctx.movers.status(&session.spec.plugin, &params).await?;
    match evaluate_report(&current, &report)? {
        Poll::InProgress => {
            debug!(session = %name, "sync still in progress");
            Ok(Action::requeue(RETRY_INTERVAL))
        }
        Poll::Settled(next) => {
            match next.state {
                Some(SyncState::Completed) => info!(session = %name, "sync completed"),
                _ => warn!(
                    session = %name,
                    reason = %next.reason.as_deref().unwrap_or(""),
                    "sync failed"
                ),
            }
            patch_status(ctx, session, &next).await?;
            Ok(Action::await_change())
        }
    }
}

/// What one status poll concluded
#[derive(Debug, Clone, PartialEq)]
enum Poll {
    /// Keep polling
    InProgress,
    /// Write this terminal status and stop
    Settled(SyncSessionStatus),
}

/// Translate a mover status report into the session's next move.
///
/// `Invalid` and `Canceled` cannot legitimately appear for a session this
/// controller started, so they surface as invariant errors instead of a
/// status write.
fn evaluate_report(current: &SyncSessionStatus, report: &StatusReport) -> Result<Poll, Error> {
    let settled = |state: SyncState, completion: Option<String>, reason: Option<String>| {
        Poll::Settled(SyncSessionStatus {
            state: Some(state),
            sync_id: current.sync_id.clone(),
            completion_time: completion,
            reason,
        })
    };

    match report.status {
        MoverStatus::InProgress => Ok(Poll::InProgress),
        MoverStatus::Completed => Ok(settled(SyncState::Completed, Some(now_rfc3339()), None)),
        MoverStatus::Errored | MoverStatus::Unknown => Ok(settled(
            SyncState::Failed,
            None,
            Some(report.message.clone().unwrap_or_default()),
        )),
        MoverStatus::Failed => Ok(settled(SyncState::Failed, None, Some(String::new()))),
        MoverStatus::Invalid | MoverStatus::Canceled => Err(Error::internal_with_context(
            "sync-session",
            format!("mover reported {} for a session it accepted", report.status),
        )),
    }
}

/// Mover parameters for a session: its config plus the engine
/// coordinates and the direction, so a plugin can tell a backup
/// invocation from a restore one. Status polls also carry the sync id.
fn session_params(session: &SyncSession) -> MoverParams {
    let mut params = session.spec.config.clone();
    params.insert(PARAM_ENGINE_NAME.to_string(), session.spec.move_engine.clone());
    params.insert(
        PARAM_ENGINE_NAMESPACE.to_string(),
        session.spec.namespace.clone(),
    );
    params.insert(PARAM_MODE.to_string(), session.spec.mode.to_string());
    params
}

async fn patch_status(
    ctx: &Context,
    session: &SyncSession,
    status: &SyncSessionStatus,
) -> Result<(), Error> {
    patch_resource_status::<SyncSession>(
        &ctx.client,
        &session.name_any(),
        &session.namespace().unwrap_or_default(),
        status,
        FIELD_MANAGER,
    )
    .await?;
    Ok(())
}
