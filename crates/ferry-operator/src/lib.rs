//! kubeferry operator: the controllers that drive cross-cluster migration
//!
//! Three reconcilers run side by side. The MoveEngine controller owns the
//! engine lifecycle and the sync schedule, the SyncSession controller
//! drives the data-mover plugin through one sync round, and the
//! ClusterPair controller validates remote-cluster credentials.

#![deny(missing_docs)]

pub mod context;
pub mod controller;
pub mod controller_runner;

pub use context::Context;
