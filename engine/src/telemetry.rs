use tracing::{Subscriber, subscriber::set_global_default};
use tracing_log::LogTracer;
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt};

/// Build a tracing subscriber that writes formatted spans/events to stdout.
///
/// `default_level` is used as the `RUST_LOG` fallback when the env var is
/// unset (e.g. `"info"`).
pub fn get_subscriber(default_level: String) -> impl Subscriber + Send + Sync {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let formatting_layer = tracing_subscriber::fmt::layer().with_target(true);
    Registry::default().with(env_filter).with(formatting_layer)
}

/// Register `subscriber` as the global default and redirect `log` records
/// (emitted by sqlx and other dependencies) through `tracing`.
pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) {
    LogTracer::init().expect("Failed to set logger");
    set_global_default(subscriber).expect("Failed to set subscriber");
}

/// Log an error along with its full `anyhow` source chain, since `{:?}` on
/// an `anyhow::Error` only prints the top-level context by default in
/// non-debug builds.
pub fn log_error(err: &(dyn std::error::Error + 'static)) {
    let mut chain = String::new();
    let mut cause: Option<&(dyn std::error::Error + 'static)> = err.source();
    while let Some(e) = cause {
        chain.push_str(&format!("\nCaused by:\n\t{e}"));
        cause = e.source();
    }
    tracing::error!("{}{}", err, chain);
}
