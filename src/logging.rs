//! Tracing subscriber setup for binaries and tests embedding the crate.

use tracing_subscriber::{fmt, EnvFilter};

use crate::types::{KestrelError, Result};

/// Installs a global fmt subscriber filtered by `filter` (e.g. `"kestrel=debug"`).
///
/// Fails if the filter does not parse or a subscriber is already installed.
pub fn init_logging(filter: &str) -> Result<()> {
    fmt()
        .with_env_filter(
            EnvFilter::try_new(filter).map_err(|_| KestrelError::Invalid("invalid log filter"))?,
        )
        .with_target(true)
        .with_thread_ids(true)
        .try_init()
        .map_err(|_| KestrelError::Invalid("logging already initialized"))
}

/// Installs a stderr subscriber honouring `RUST_LOG`, once per process.
///
/// Safe to call from every test.
pub fn init_test_logging() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
        let _ = fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_ansi(false)
            .try_init();
    });
}
