use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Structured JSON logging for the server process. Tests use the
/// separate `test_bootstrap` initializer instead.
pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,actix_web=info,reqwest=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().with_target(false).with_ansi(false).json())
        .init();
}
