//! Tracing subscriber setup.

use tracing_error::ErrorLayer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

/// Install the global tracing subscriber: env-filtered fmt output plus an
/// [`ErrorLayer`] so spans are captured into error traces.
///
/// Filtering follows `RUST_LOG` (default `info`). Safe to call more than
/// once; subsequent calls are no-ops, which keeps test setups simple.
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .with(ErrorLayer::default())
        .try_init();
}
