//! Logging setup for the bridge binary.
//!
//! Libraries in the workspace only emit `tracing` events; this module
//! installs the subscriber that prints them.

use tracing_subscriber::{fmt, EnvFilter, Registry};

/// Environment variable overriding the log filter.
pub const LOG_ENV: &str = "ONVIF2MQTT_LOG";

const DEFAULT_FILTER: &str = "info";

/// Output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogMode {
    /// One line per event
    #[default]
    Compact,
    /// Multi-line output with source locations, for debugging
    Pretty,
    /// Newline-delimited JSON, for log collectors
    Json,
}

#[derive(Debug, thiserror::Error)]
pub enum LoggingError {
    #[error("Failed to initialize tracing subscriber: {0}")]
    TracingInit(String),

    #[error("Invalid log filter {filter:?}: {reason}")]
    InvalidFilter { filter: String, reason: String },
}

/// Install the global subscriber.
///
/// The filter comes from `ONVIF2MQTT_LOG`, then `RUST_LOG`, then `info`.
pub fn init_logging(mode: LogMode) -> Result<(), LoggingError> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let filter = create_env_filter(
        std::env::var(LOG_ENV)
            .or_else(|_| std::env::var("RUST_LOG"))
            .ok()
            .as_deref(),
    )?;

    let result = match mode {
        LogMode::Compact => Registry::default()
            .with(fmt::layer().with_target(false).compact())
            .with(filter)
            .try_init(),
        LogMode::Pretty => Registry::default()
            .with(
                fmt::layer()
                    .pretty()
                    .with_file(true)
                    .with_line_number(true),
            )
            .with(filter)
            .try_init(),
        LogMode::Json => Registry::default()
            .with(fmt::layer().json())
            .with(filter)
            .try_init(),
    };

    result.map_err(|e| LoggingError::TracingInit(e.to_string()))
}

fn create_env_filter(directives: Option<&str>) -> Result<EnvFilter, LoggingError> {
    let directives = directives
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .unwrap_or(DEFAULT_FILTER);

    EnvFilter::try_new(directives).map_err(|e| LoggingError::InvalidFilter {
        filter: directives.to_string(),
        reason: e.to_string(),
    })
}

/// Whether a global subscriber is already installed.
pub fn is_initialized() -> bool {
    tracing::dispatcher::has_been_set()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter() {
        assert!(create_env_filter(None).is_ok());
        assert!(create_env_filter(Some("  ")).is_ok());
        assert!(create_env_filter(Some("onvif_events=debug,warn")).is_ok());
        assert!(matches!(
            create_env_filter(Some("onvif_events=loud")),
            Err(LoggingError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn test_second_init_fails() {
        let _ = init_logging(LogMode::Compact);
        assert!(is_initialized());
        assert!(matches!(
            init_logging(LogMode::Json),
            Err(LoggingError::TracingInit(_))
        ));
    }
}
