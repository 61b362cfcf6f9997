//! Tracing subscriber setup
//!
//! The library itself only emits `tracing` events; installing a subscriber is
//! left to the embedding binary, which can call [`init_tracing`] once at
//! startup.

use tracing_subscriber::EnvFilter;

/// Install a global tracing subscriber honoring `RUST_LOG`.
///
/// Defaults to `info` for this crate when no filter is configured. Calling it
/// twice is harmless; the second call is ignored.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("gateway_control_plane=info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}
