//! Structured logging.
//!
//! # Responsibilities
//! - Initialize the `tracing` subscriber once per process
//! - Pick the level from `RUST_LOG`, falling back to the configured filter
//!
//! # Design Decisions
//! - Debug mode lowers the default filter to `debug`
//! - Re-initialization is a no-op so tests and embedders can call it freely

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Default filter when neither `RUST_LOG` nor config supplies one.
pub fn default_filter(debug: bool) -> String {
    if debug {
        "switchyard=debug,tower_http=debug".to_string()
    } else {
        "switchyard=info,tower_http=info".to_string()
    }
}

/// Install the global subscriber. Returns false if one was already set.
pub fn init_tracing(filter: Option<&str>, debug: bool) -> bool {
    let fallback = filter
        .map(str::to_string)
        .unwrap_or_else(|| default_filter(debug));

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback.into()))
        .with(tracing_subscriber::fmt::layer())
        .try_init()
        .is_ok()
}
