//! Structured logging.
//!
//! # Design Decisions
//! - Uses tracing crate for structured logging
//! - Log level configurable via `RUST_LOG`, falling back to a crate default
//! - Initialisation is idempotent so tests can call it freely

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_FILTER: &str = "https_listener=debug";

/// Install a global `tracing` subscriber.
///
/// Returns `false` if a subscriber was already installed.
pub fn init_logging() -> bool {
    init_logging_with(DEFAULT_FILTER)
}

/// Install a global `tracing` subscriber with an explicit default filter.
pub fn init_logging_with(default_filter: &str) -> bool {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
