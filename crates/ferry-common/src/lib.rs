//! Common types for kubeferry: CRDs, errors, and Kubernetes utilities

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod kube_utils;
pub mod telemetry;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Field manager name used for all status patches written by the operator
pub const FIELD_MANAGER: &str = "kubeferry-operator";

/// Annotation carried by dynamically provisioned PersistentVolumes
pub const PROVISIONED_BY_ANNOTATION: &str = "pv.kubernetes.io/provisioned-by";

/// Environment variable naming the namespace the operator watches
pub const WATCH_NAMESPACE_ENV: &str = "WATCH_NAMESPACE";
