//! Tracing subscriber setup

use tracing_subscriber::EnvFilter;

/// Install the global fmt subscriber filtered by `level`
///
/// `level` takes `EnvFilter` directives (`info`, `suv_engine=debug`, ...). An
/// unparsable filter falls back to `info`. Calling this twice is harmless.
pub fn init(level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}
