use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global `tracing` subscriber. `RUST_LOG` wins over `filter`.
/// Later calls are no-ops so tests and embedders can call it freely.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(true))
        .try_init();
}
