//! Tracing subscriber install helper.
//!
//! This lives in the core crate for convenience but is only ever called
//! from the daemon binary — library code only emits `tracing` events, it
//! never installs a global subscriber itself.

use tracing_subscriber::EnvFilter;

/// Install a `fmt` subscriber honoring `RUST_LOG`, falling back to `filter`
/// when the environment variable is unset.
pub fn init_tracing(default_filter: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .init();
}
