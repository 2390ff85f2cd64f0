//! Diagnostic logging. Progress lines for operators go to stdout separately.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

/// Installs a stderr `fmt` subscriber filtered by `RUST_LOG`, falling back to `default_level`.
///
/// Calling this more than once keeps the first subscriber.
pub fn init_tracing(default_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    let _ = Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .try_init();
}
