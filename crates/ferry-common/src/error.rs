//! Error types for the kubeferry operator
//!
//! Errors are structured with fields to aid debugging in production.
//! Each variant carries contextual information like the engine name,
//! the plugin id, and the underlying cause.

use thiserror::Error;

/// Default context value when no specific context is available
pub const UNKNOWN_CONTEXT: &str = "unknown";

/// Main error type for kubeferry operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// Validation error for CRD specs
    #[error("validation error for {engine}: {message}")]
    Validation {
        /// Name of the MoveEngine with invalid configuration
        engine: String,
        /// Description of what's invalid
        message: String,
    },

    /// Cluster pair error (missing pair, unusable kubeconfig, remote unreachable)
    #[error("pair error [{pair}]: {message}")]
    Pair {
        /// Name of the ClusterPair
        pair: String,
        /// Description of what failed
        message: String,
    },

    /// Data mover plugin error
    #[error("mover error [{plugin}]: {message}")]
    Mover {
        /// Plugin id
        plugin: String,
        /// Description of what failed
        message: String,
        /// Whether this error is retryable (busy lease, transient RPC)
        retryable: bool,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {message}")]
    Serialization {
        /// Description of what failed
        message: String,
        /// The resource kind being serialized (if known)
        kind: Option<String>,
    },

    /// Internal/state-machine invariant violation
    #[error("internal error [{context}]: {message}")]
    Internal {
        /// Description of what failed
        message: String,
        /// Context where the error occurred (e.g., "engine", "sync-session")
        context: String,
    },

    /// Two failures that must both be surfaced (e.g., a mirror-create
    /// failure followed by a failed status write)
    #[error("{primary}; additionally: {secondary}")]
    Aggregate {
        /// The original failure
        primary: Box<Error>,
        /// The follow-up failure that occurred while handling the first
        secondary: Box<Error>,
    },
}

impl Error {
    /// Create a validation error without engine context
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            engine: UNKNOWN_CONTEXT.to_string(),
            message: msg.into(),
        }
    }

    /// Create a validation error with engine context
    pub fn validation_for(engine: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Validation {
            engine: engine.into(),
            message: msg.into(),
        }
    }

    /// Create a pair error
    pub fn pair(pair: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Pair {
            pair: pair.into(),
            message: msg.into(),
        }
    }

    /// Create a retryable mover error (lease busy, transport hiccup)
    pub fn mover(plugin: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Mover {
            plugin: plugin.into(),
            message: msg.into(),
            retryable: true,
        }
    }

    /// Create a non-retryable mover error
    pub fn mover_permanent(plugin: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Mover {
            plugin: plugin.into(),
            message: msg.into(),
            retryable: false,
        }
    }

    /// Create a serialization error
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: None,
        }
    }

    /// Create a serialization error with resource kind context
    pub fn serialization_for_kind(kind: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Serialization {
            message: msg.into(),
            kind: Some(kind.into()),
        }
    }

    /// Create an internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: UNKNOWN_CONTEXT.to_string(),
        }
    }

    /// Create an internal error with context
    pub fn internal_with_context(context: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::Internal {
            message: msg.into(),
            context: context.into(),
        }
    }

    /// Combine a primary failure with a secondary one so neither is swallowed
    pub fn aggregate(primary: Error, secondary: Error) -> Self {
        Self::Aggregate {
            primary: Box::new(primary),
            secondary: Box::new(secondary),
        }
    }

    /// Check if this error is retryable
    ///
    /// Validation and serialization errors require a spec change and are not
    /// retried. Internal errors signal invariant violations and are fatal.
    /// Kubernetes errors retry unless they are 4xx responses, with two
    /// exceptions: 404 (the other side of a cross-cluster handshake has not
    /// created the object yet) and 409 (update conflict) are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => !matches!(
                source,
                kube::Error::Api(ae) if (400..500).contains(&ae.code) && ae.code != 404 && ae.code != 409
            ),
            Error::Validation { .. } => false,
            Error::Pair { .. } => true,
            Error::Mover { retryable, .. } => *retryable,
            Error::Serialization { .. } => false,
            Error::Internal { .. } => false,
            Error::Aggregate { primary, .. } => primary.is_retryable(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_errors_are_not_retryable() {
        let err = Error::validation("pairRef not given");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("pairRef not given"));
    }

    #[test]
    fn validation_error_carries_engine_name() {
        let err = Error::validation_for("wordpress", "syncPeriod is invalid");
        assert!(err.to_string().contains("wordpress"));
        assert!(err.to_string().contains("syncPeriod is invalid"));
    }

    #[test]
    fn mover_busy_is_retryable_but_reported_failure_is_not() {
        assert!(Error::mover("rsync", "plugin is not available").is_retryable());
        assert!(!Error::mover_permanent("rsync", "disk full").is_retryable());
    }

    fn api_error(code: u16) -> Error {
        Error::from(kube::Error::Api(kube::core::ErrorResponse {
            status: "Failure".to_string(),
            message: format!("code {}", code),
            reason: String::new(),
            code,
        }))
    }

    #[test]
    fn conflict_and_not_found_api_errors_are_retryable() {
        // 409 update conflicts and 404s from a cross-cluster handshake
        // that has not caught up yet both resolve on a later pass.
        assert!(api_error(409).is_retryable());
        assert!(api_error(404).is_retryable());
        assert!(api_error(500).is_retryable());

        assert!(!api_error(400).is_retryable());
        assert!(!api_error(403).is_retryable());
        assert!(!api_error(422).is_retryable());
    }

    #[test]
    fn internal_errors_are_fatal() {
        let err = Error::internal_with_context("sync-session", "unrecognized status value");
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("[sync-session]"));
    }

    #[test]
    fn aggregate_keeps_both_messages_and_primary_retryability() {
        let err = Error::aggregate(
            Error::pair("prod-pair", "remote cluster unreachable"),
            Error::internal("status write failed"),
        );
        let text = err.to_string();
        assert!(text.contains("remote cluster unreachable"));
        assert!(text.contains("status write failed"));
        assert!(err.is_retryable());

        let fatal = Error::aggregate(
            Error::validation("bad cron"),
            Error::internal("status write failed"),
        );
        assert!(!fatal.is_retryable());
    }
}
