// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # Structured Logging
//!
//! Initializes the `tracing` subscriber with environment-based filtering
//! via `RUST_LOG`, falling back to the verbosity derived from `-v`.
//!
//! Out of scope per §1 (logging configuration is the host runtime's
//! concern for its own subsystems); this crate still owns its own
//! subscriber setup as ambient engineering a real binary needs.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initializes the global tracing subscriber. Call exactly once, early in
/// `main()` — a second call panics.
///
/// `RUST_LOG` overrides `default_level` when set, following the usual
/// `tracing_subscriber::EnvFilter` directive syntax, e.g.
/// `RUST_LOG=ddpoa_node=debug,ddpoa_engine=trace`.
pub fn init_logging(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_thread_ids(false)
                .with_file(false)
                .with_line_number(false),
        )
        .init();

    tracing::info!("logging initialized");
}
