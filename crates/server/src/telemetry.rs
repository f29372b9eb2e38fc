use govform_core::config::{LogFormat, LogsConfig};
use tracing_subscriber::EnvFilter;

/// Installs the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
pub fn init(config: &LogsConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("{},tower_http=info", config.level).into());

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
    };
    if let Err(e) = result {
        tracing::debug!(error = %e, "Tracing subscriber already installed");
    }
}
