//! ClusterPair reconciler
//!
//! Validates a pair's embedded kubeconfig once and records the outcome.
//! A pair is immutable after validation; respecifying it means creating
//! a new object.

use std::sync::Arc;

use kube::runtime::controller::Action;
use kube::ResourceExt;
use tracing::{debug, error, info, warn};

use ferry_common::crd::{ClusterPair, ClusterPairStatus, PairState};
use ferry_common::kube_utils::patch_resource_status;
use ferry_common::{Error, FIELD_MANAGER};

use super::RETRY_INTERVAL;
use crate::context::Context;

/// Validate the pair and stamp `Validated` or `Invalid`
pub async fn reconcile(pair: Arc<ClusterPair>, ctx: Arc<Context>) -> Result<Action, Error> {
    let name = pair.name_any();
    if let Some(state) = pair.status.as_ref().and_then(|s| s.state) {
        debug!(pair = %name, state = %state, "pair already evaluated");
        return Ok(Action::await_change());
    }

    let status = match ferry_pair::validate(&pair) {
        Ok(_) => {
            info!(pair = %name, "cluster pair validated");
            ClusterPairStatus {
                state: Some(PairState::Validated),
                message: None,
            }
        }
        Err(err) => {
            warn!(pair = %name, error = %err, "cluster pair failed validation");
            ClusterPairStatus {
                state: Some(PairState::Invalid),
                message: Some(err.to_string()),
            }
        }
    };

    patch_resource_status::<ClusterPair>(
        &ctx.client,
        &name,
        &pair.namespace().unwrap_or_default(),
        &status,
        FIELD_MANAGER,
    )
    .await?;
    Ok(Action::await_change())
}

/// Status-write failures retry; there is nothing else to fail here
pub fn error_policy(pair: Arc<ClusterPair>, err: &Error, _ctx: Arc<Context>) -> Action {
    error!(pair = %pair.name_any(), error = %err, "ClusterPair reconcile failed");
    if err.is_retryable() {
        Action::requeue(RETRY_INTERVAL)
    } else {
        Action::await_change()
    }
}
