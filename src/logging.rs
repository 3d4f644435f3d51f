//! # Logging
//!
//! Structured logging for the whole crate goes through `tracing`. The
//! managers attach the same fields everywhere so lines can be filtered:
//!
//! | field     | example                 |
//! |-----------|-------------------------|
//! | `manager` | `manager=TracerManager` |
//! | `service` | `service=jaeger`        |
//! | `state`   | `state=READY`           |
//!
//! ## Usage
//!
//! ```bash
//! # lifecycle transitions and health summaries
//! RUST_LOG=info cargo run
//!
//! # every hook call, probe result and state change
//! RUST_LOG=debug cargo run
//! ```
//!
//! With `RUST_LOG=info` a normal start looks like:
//!
//! ```text
//! INFO Initializing managers flags=InitFlags { with_tracers: true, with_health_check: true, with_metrics: false } service="svc"
//! INFO Initializing manager=HealthManager count=2
//! INFO Ready manager=HealthManager count=2
//! INFO Health check summary overall=HEALTHY healthy=2 total=2
//! ```

use crate::config::ServiceConfig;
use tracing_subscriber::EnvFilter;

/// Installs the global subscriber, filtered by `RUST_LOG`.
///
/// Panics if a global subscriber is already set; use [`try_setup_tracing`]
/// where that can happen (tests, embedding).
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

pub fn try_setup_tracing() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    install(EnvFilter::from_default_env())
}

/// Like [`try_setup_tracing`], but without `RUST_LOG` the level follows the
/// config: `debug` in debug mode, `info` otherwise.
pub fn setup_tracing_for(config: &ServiceConfig) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    install(filter_for(config))
}

fn filter_for(config: &ServiceConfig) -> EnvFilter {
    let level = if config.debug_mode() { "debug" } else { "info" };
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

fn install(filter: EnvFilter) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .try_init()
}
