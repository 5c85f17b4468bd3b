//! Process-wide tracing setup, shared by every binary in the workspace.

use tracing_subscriber::{fmt, EnvFilter};

/// Install a `tracing` subscriber reading its filter from `RUST_LOG`,
/// falling back to `default_filter` (e.g. `"info"`) when unset.
///
/// Must be called once, near the top of `main`, before any other code
/// logs.
pub fn init(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}
