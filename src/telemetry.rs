//! Structured logging setup.

use tracing_subscriber::{fmt, EnvFilter};

/// Initialize the global `tracing` subscriber. Respects `RUST_LOG`, falling
/// back to `info` for this crate and `warn` for dependencies.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("agentcore=info,tower_http=info,warn"));

    fmt().with_env_filter(filter).with_target(true).init();
}
