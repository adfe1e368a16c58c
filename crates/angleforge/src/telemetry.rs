//! Global log and tracing setup.

use tracing_subscriber::{
    fmt,
    layer::{Layer, SubscriberExt},
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};
use crate::error::AngleforgeError;

/// Installs the global tracing subscriber and routes `log` records into it.
///
/// `RUST_LOG`, when set, takes precedence over `logging.level`.
pub fn init(logging: &LoggingConfig) -> Result<(), AngleforgeError> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&logging.level).map_err(|e| {
            AngleforgeError::Telemetry(format!("invalid log level '{}': {}", logging.level, e))
        })?,
    };

    let fmt_layer = match logging.format {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(true)
            .with_target(true)
            .boxed(),
        LogFormat::Compact => fmt::layer().compact().with_target(true).boxed(),
    };

    let subscriber = tracing_subscriber::registry().with(env_filter).with(fmt_layer);
    tracing::subscriber::set_global_default(subscriber).map_err(|e| {
        AngleforgeError::Telemetry(format!("failed to install tracing subscriber: {}", e))
    })?;

    tracing_log::LogTracer::init()
        .map_err(|e| AngleforgeError::Telemetry(format!("failed to bridge log records: {}", e)))
}
