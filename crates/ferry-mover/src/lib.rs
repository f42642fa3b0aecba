//! Data Mover plugin contract
//!
//! The actual volume-data transfer is delegated to out-of-process movers.
//! This crate defines the three-call contract (`Init`/`Sync`/`Status`) the
//! orchestrator consumes, and a [`MoverRegistry`] that owns one lease per
//! plugin so at most one call is in flight against a mover at a time. A
//! call against a busy plugin fails fast instead of queuing.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{debug, warn};

use ferry_common::{Error, Result};

/// Key-value parameters handed to mover calls
pub type MoverParams = BTreeMap<String, String>;

/// Parameter key carrying the owning engine's name
pub const PARAM_ENGINE_NAME: &str = "engineName";
/// Parameter key carrying the owning engine's namespace
pub const PARAM_ENGINE_NAMESPACE: &str = "engineNamespace";
/// Parameter key carrying the sync id to query status for
pub const PARAM_SYNC_ID: &str = "syncID";
/// Parameter key carrying the session direction, "backup" or "restore"
pub const PARAM_MODE: &str = "mode";

/// Init may trigger slow external setup (volume provisioning, seeding)
pub const INIT_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Sync and Status are bounded dispatch calls
pub const CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Status codes a mover reports for a sync run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MoverStatus {
    /// The run finished successfully
    Completed,
    /// The run is still transferring data
    InProgress,
    /// The mover rejected the request as malformed
    Invalid,
    /// The run was canceled externally
    Canceled,
    /// The run hit an error the mover reported
    Errored,
    /// The run finished unsuccessfully
    Failed,
    /// The mover could not determine the run's state
    Unknown,
}

impl MoverStatus {
    /// Whether this code ends the run one way or another
    pub fn is_terminal(self) -> bool {
        !matches!(self, MoverStatus::InProgress)
    }
}

impl fmt::Display for MoverStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            MoverStatus::Completed => "Completed",
            MoverStatus::InProgress => "InProgress",
            MoverStatus::Invalid => "Invalid",
            MoverStatus::Canceled => "Canceled",
            MoverStatus::Errored => "Errored",
            MoverStatus::Failed => "Failed",
            MoverStatus::Unknown => "Unknown",
        };
        f.write_str(s)
    }
}

/// Outcome of a Status call: the code plus any error text the mover attached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    /// Reported status code
    pub status: MoverStatus,
    /// Mover-supplied detail, usually only set for failure codes
    pub message: Option<String>,
}

impl StatusReport {
    /// Report a bare code with no detail text
    pub fn of(status: MoverStatus) -> Self {
        Self {
            status,
            message: None,
        }
    }
}

/// The contract an out-of-process data mover exposes to the orchestrator.
///
/// Implementations wrap whatever transport the plugin registered over.
/// All three calls are request/response round trips; the registry applies
/// the per-call timeouts, so implementations do not need their own.
#[async_trait]
pub trait DataMover: Send + Sync {
    /// Plugin id this mover registered under
    fn name(&self) -> &str;

    /// One-time setup for an engine session (provision receiving volumes,
    /// exchange endpoints). May be slow.
    async fn init(&self, config: &MoverParams) -> Result<()>;

    /// Kick off one data-transfer run, returning its sync id
    async fn sync(&self, params: &MoverParams) -> Result<String>;

    /// Report the state of a previously started run
    async fn status(&self, params: &MoverParams) -> Result<StatusReport>;
}

struct PluginEntry {
    mover: Arc<dyn DataMover>,
    lease: Arc<Semaphore>,
}

/// Registry of known mover plugins with a single-flight lease per plugin.
///
/// Owned by the operator process; plugins are registered at startup (or
/// when their transport connects) and looked up by id on every call.
#[derive(Default)]
pub struct MoverRegistry {
    plugins: HashMap<String, PluginEntry>,
}

impl MoverRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a plugin under its own name, replacing any previous entry
    pub fn register(&mut self, mover: Arc<dyn DataMover>) {
        let name = mover.name().to_string();
        debug!(plugin = %name, "registering data mover");
        self.plugins.insert(
            name,
            PluginEntry {
                mover,
                lease: Arc::new(Semaphore::new(1)),
            },
        );
    }

    /// Whether a plugin id is known
    pub fn contains(&self, plugin: &str) -> bool {
        self.plugins.contains_key(plugin)
    }

    fn checkout(&self, plugin: &str) -> Result<(Arc<dyn DataMover>, OwnedSemaphorePermit)> {
        let entry = self
            .plugins
            .get(plugin)
            .ok_or_else(|| Error::mover(plugin, "plugin not registered"))?;
        let permit = entry
            .lease
            .clone()
            .try_acquire_owned()
            .map_err(|_| Error::mover(plugin, "plugin not available"))?;
        Ok((entry.mover.clone(), permit))
    }

    /// Run the plugin's Init under the long setup timeout
    pub async fn init(&self, plugin: &str, config: &MoverParams) -> Result<()> {
        let (mover, _permit) = self.checkout(plugin)?;
        match tokio::time::timeout(INIT_TIMEOUT, mover.init(config)).await {
            Ok(res) => res,
            Err(_) => Err(Error::mover(
                plugin,
                format!("init timed out after {:?}", INIT_TIMEOUT),
            )),
        }
    }

    /// Start a transfer run, returning the mover's sync id
    pub async fn sync(&self, plugin: &str, params: &MoverParams) -> Result<String> {
        let (mover, _permit) = self.checkout(plugin)?;
        match tokio::time::timeout(CALL_TIMEOUT, mover.sync(params)).await {
            Ok(res) => res,
            Err(_) => Err(Error::mover(
                plugin,
                format!("sync dispatch timed out after {:?}", CALL_TIMEOUT),
            )),
        }
    }

    /// Query a run's status. A timed-out call is reported as `Unknown`
    /// rather than an error so the state machine can terminalize the run.
    pub async fn status(&self, plugin: &str, params: &MoverParams) -> Result<StatusReport> {
        let (mover, _permit) = self.checkout(plugin)?;
        match tokio::time::timeout(CALL_TIMEOUT, mover.status(params)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(plugin = %plugin, "status call timed out");
                Ok(StatusReport {
                    status: MoverStatus::Unknown,
                    message: Some(format!("status call timed out after {:?}", CALL_TIMEOUT)),
                })
            }
        }
    }
}

/// A mover that moves nothing and reports instant success.
///
/// Stands in when an engine only replicates resource definitions, and
/// doubles as a test double for the state machines.
pub struct NoopMover {
    name: String,
}

impl NoopMover {
    /// Conventional plugin id for the noop mover
    pub const PLUGIN: &'static str = "noop";

    /// Noop mover under the conventional id
    pub fn new() -> Self {
        Self::named(Self::PLUGIN)
    }

    /// Noop mover under an arbitrary id
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for NoopMover {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataMover for NoopMover {
    fn name(&self) -> &str {
        &self.name
    }

    async fn init(&self, _config: &MoverParams) -> Result<()> {
        Ok(())
    }

    async fn sync(&self, params: &MoverParams) -> Result<String> {
        let engine = params
            .get(PARAM_ENGINE_NAME)
            .map(String::as_str)
            .unwrap_or("unnamed");
        Ok(format!("noop-{}", engine))
    }

    async fn status(&self, _params: &MoverParams) -> Result<StatusReport> {
        Ok(StatusReport::of(MoverStatus::Completed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    struct StalledMover {
        gate: Arc<Notify>,
    }

    #[async_trait]
    impl DataMover for StalledMover {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn init(&self, _config: &MoverParams) -> Result<()> {
            self.gate.notified().await;
            Ok(())
        }

        async fn sync(&self, _params: &MoverParams) -> Result<String> {
            self.gate.notified().await;
            Ok("stalled-1".into())
        }

        async fn status(&self, _params: &MoverParams) -> Result<StatusReport> {
            self.gate.notified().await;
            Ok(StatusReport::of(MoverStatus::InProgress))
        }
    }

    fn registry_with(mover: Arc<dyn DataMover>) -> MoverRegistry {
        let mut reg = MoverRegistry::new();
        reg.register(mover);
        reg
    }

    #[tokio::test]
    async fn test_noop_flow() {
        let reg = registry_with(Arc::new(NoopMover::new()));
        let mut params = MoverParams::new();
        params.insert(PARAM_ENGINE_NAME.into(), "wordpress".into());

        reg.init("noop", &params).await.unwrap();
        let sync_id = reg.sync("noop", &params).await.unwrap();
        assert_eq!(sync_id, "noop-wordpress");
        let report = reg.status("noop", &params).await.unwrap();
        assert_eq!(report.status, MoverStatus::Completed);
    }

    #[tokio::test]
    async fn test_unregistered_plugin_is_retryable() {
        let reg = MoverRegistry::new();
        let err = reg.init("ghost", &MoverParams::new()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("not registered"));
    }

    #[tokio::test]
    async fn test_busy_plugin_fails_fast() {
        let gate = Arc::new(Notify::new());
        let reg = Arc::new(registry_with(Arc::new(StalledMover { gate: gate.clone() })));

        let reg2 = reg.clone();
        let first = tokio::spawn(async move { reg2.sync("stalled", &MoverParams::new()).await });
        // Let the first call park inside the mover before contending.
        tokio::task::yield_now().await;

        let err = reg.sync("stalled", &MoverParams::new()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("not available"));

        gate.notify_one();
        let sync_id = first.await.unwrap().unwrap();
        assert_eq!(sync_id, "stalled-1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_timeout_maps_to_unknown() {
        let gate = Arc::new(Notify::new());
        let reg = registry_with(Arc::new(StalledMover { gate }));

        let report = reg.status("stalled", &MoverParams::new()).await.unwrap();
        assert_eq!(report.status, MoverStatus::Unknown);
        assert!(report.message.unwrap().contains("timed out"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_sync_timeout_is_an_error() {
        let gate = Arc::new(Notify::new());
        let reg = registry_with(Arc::new(StalledMover { gate }));

        let err = reg.sync("stalled", &MoverParams::new()).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("timed out"));
    }

    #[tokio::test]
    async fn test_lease_released_after_call() {
        let reg = registry_with(Arc::new(NoopMover::new()));
        let params = MoverParams::new();
        for _ in 0..3 {
            reg.sync("noop", &params).await.unwrap();
        }
    }
}
