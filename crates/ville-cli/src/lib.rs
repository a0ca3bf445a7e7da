//! `ville-cli` – shared pieces of the `ville-gateway` and `ville-mock-fleet`
//! binaries.
//!
//! - [`config`] – TOML configuration with `VILLE_*` environment overrides.
//! - [`service`] – the [`Gateway`][service::Gateway] service object.
//! - [`telemetry`] – `tracing` subscriber and optional OTLP export.

pub mod config;
pub mod service;
pub mod telemetry;

use tokio::sync::watch;
use tracing::warn;

/// Install a Ctrl-C / SIGTERM handler that flips the returned receiver to
/// `true`.
pub fn shutdown_signal() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    if let Err(e) = ctrlc::set_handler(move || {
        let _ = tx.send(true);
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; graceful shutdown on Ctrl-C will not be available");
    }
    rx
}
