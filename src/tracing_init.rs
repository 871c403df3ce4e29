//! Optional `tracing_subscriber` bootstrap.
//!
//! The core never installs a subscriber on its own — embedding applications
//! own that decision. This helper exists so a standalone binary or test
//! harness can opt in with a single call, the way the reference config
//! crate's `init_tracing` does.

use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::Environment;

/// Install a `tracing_subscriber` using `filter` and `format`
/// (`Config::log_filter`/`Config::log_format`, typically). `format =
/// "json"` selects JSON output; anything else falls back to pretty text.
/// Infallible — if a subscriber is already installed (common across
/// repeated calls in tests), this silently continues rather than panicking.
pub fn init_tracing(environment: Environment, filter: &str, format: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let result = if format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(false)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .try_init()
    };

    match result {
        Ok(()) => info!(?environment, format, "tracing initialized"),
        Err(_) => debug!("tracing subscriber already installed, skipping"),
    }
}
