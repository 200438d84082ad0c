// SPDX-License-Identifier: GPL-3.0-only

//! Log subscriber setup

/// Install a `tracing` fmt subscriber filtered by `RUST_LOG` (default `warn`)
///
/// Examples: `RUST_LOG=debug`, `RUST_LOG=camera_pipeline=debug`.
/// Calling this more than once is harmless; later calls keep the first
/// subscriber.
pub fn init() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_target(true)
        .with_level(true)
        .try_init();
}
