//! Reconcilers for the kubeferry CRDs

pub mod cluster_pair;
pub mod move_engine;
pub mod sync_session;

use std::time::Duration;

/// Requeue interval used while waiting on another actor
pub const RETRY_INTERVAL: Duration = Duration::from_secs(5);
