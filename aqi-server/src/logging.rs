use aqi_core::config::LoggingConfig;
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Stdout logging, plus daily-rotated JSON files when a directory is configured.
///
/// `RUST_LOG` overrides the default filter.
pub fn init_logging(cfg: &LoggingConfig) {
    let file_layer = cfg.directory.as_ref().map(|dir| {
        fmt::layer()
            .with_writer(rolling::daily(dir, "aqi.log"))
            .with_ansi(false)
            .json()
    });

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,aqi_core=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}
