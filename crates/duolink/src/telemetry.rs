//! Opt-in log output for embedders and tests.

use tracing_subscriber::EnvFilter;

/// Env var read before `RUST_LOG`.
pub const LOG_ENV: &str = "DUOLINK_LOG";

/// Installs a global `fmt` subscriber. Filters come from `DUOLINK_LOG`, then
/// `RUST_LOG`, and default to `warn`. A no-op if a subscriber is already set.
pub fn init() {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    let _ = tracing_subscriber::fmt().with_env_filter(filter).with_target(false).try_init();
}
