//! Logging initialization for the operator binary

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Initialize structured logging.
///
/// Honors `RUST_LOG`; defaults to `info` for kubeferry crates and `warn`
/// for everything else.
pub fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("warn,ferry_common=info,ferry_pair=info,ferry_mover=info,ferry_engine=info,ferry_operator=info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true))
        .init();
}
