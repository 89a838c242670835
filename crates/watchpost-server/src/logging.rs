//! Logging initialization.

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingSettings;

/// Initialize tracing from the logging settings.
///
/// `RUST_LOG` overrides the configured level; the default level is INFO.
/// Format `json` switches to structured JSON output.
pub fn init(settings: &LoggingSettings) {
    let default_directive = settings.level.clone().unwrap_or_else(|| "info".to_string());
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

    match settings.format.as_deref() {
        Some("json") => tracing_subscriber::registry()
            .with(fmt::layer().json())
            .with(filter)
            .init(),
        _ => tracing_subscriber::registry()
            .with(fmt::layer())
            .with(filter)
            .init(),
    }
}
