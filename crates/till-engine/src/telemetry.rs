//! # Telemetry
//!
//! Tracing setup for the host process.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes the global tracing subscriber.
///
/// Default level is INFO; override with `RUST_LOG` (e.g.
/// `RUST_LOG=till_engine=debug,till_db=debug`). Safe to call once at
/// startup; subsequent calls are ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::default().add_directive(Level::INFO.into()));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
