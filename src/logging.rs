//! Structured logging setup, replacing the teacher's hand-rolled
//! `util::log`/`LogLevel` with `tracing`, the ecosystem's idiomatic way of
//! doing this (per the networked-service repos in the retrieval pack).

use tracing_subscriber::EnvFilter;

/// Installs a global `tracing` subscriber. Honors `RUST_LOG`, defaulting to
/// `info` when unset.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
