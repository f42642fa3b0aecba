//! Custom Resource Definitions for kubeferry
//!
//! Three CRDs drive a migration: a [`ClusterPair`] names the two clusters,
//! a [`MoveEngine`] is the long-lived pairing for one workload, and each
//! scheduled run of data movement is a [`SyncSession`].

mod cluster_pair;
mod move_engine;
mod sync_session;

pub use cluster_pair::{ClusterPair, ClusterPairSpec, ClusterPairStatus, PairState};
pub use move_engine::{
    EngineMode, EngineState, MoveEngine, MoveEngineSpec, MoveEngineStatus, ResourceSyncStatus,
    SyncPhase, VolumeSyncStatus,
};
pub use sync_session::{
    SessionMode, SyncSession, SyncSessionSpec, SyncSessionStatus, SyncState,
};

/// API group for all kubeferry CRDs
pub const API_GROUP: &str = "kubeferry.io";
