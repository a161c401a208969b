//! `tracing-subscriber` wiring for binaries and tests that want readable
//! output from this crate's `trace!`/`debug!`/`warn!` calls: an `EnvFilter`
//! defaulted to `kv_remote=info` unless `RUST_LOG` is set, layered with an
//! `fmt` layer.

use tracing_subscriber::{prelude::*, EnvFilter};

/// Install a global `tracing` subscriber: `kv_remote=info` unless
/// overridden by `RUST_LOG`. Safe to call more than once — later calls are
/// silently ignored, matching `tracing_subscriber::registry().init()`'s own
/// behavior of warning rather than panicking if a subscriber is already set.
pub fn init() {
    let filter = if std::env::var(EnvFilter::DEFAULT_ENV)
        .unwrap_or_default()
        .is_empty()
    {
        EnvFilter::new("kv_remote=info")
    } else {
        EnvFilter::from_default_env()
    };

    let _ = tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .with(filter)
        .try_init();
}
