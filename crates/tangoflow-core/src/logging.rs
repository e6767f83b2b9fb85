/*!
 * Logging functionality for Tangoflow.
 *
 * Tracing subscriber setup plus the spans used around connection passes
 * and signal operations.
 */
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::LoggingConfig;
use crate::error::{Error, Result};

/// Initialize the logging system with default configuration
pub fn init() -> Result<()> {
    init_with_filter("info")
}

/// Initialize the logging system with a specific filter
///
/// # Arguments
///
/// * `filter` - The log filter string (e.g., "info", "debug", "tangoflow_devices=trace")
pub fn init_with_filter(filter: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(filter)
        .try_init()
        .map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))
}

/// Initialize the logging system from the `[logging]` section
pub fn init_from_config(config: &LoggingConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .map_err(|e| Error::config(format!("Invalid log filter '{}': {}", config.level, e)))?;

    let registry = tracing_subscriber::registry().with(filter);
    let result = match (config.json_format, config.stdout) {
        (true, true) => registry.with(fmt::layer().json()).try_init(),
        (true, false) => registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .try_init(),
        (false, true) => registry.with(fmt::layer().with_target(true)).try_init(),
        (false, false) => registry
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .try_init(),
    };

    result.map_err(|e| Error::runtime(format!("Failed to initialize logging: {}", e)))
}

/// A type alias for a tracing span
pub type Span = tracing::Span;

/// Create a span covering one connection pass of a device
pub fn connect_span(device: &str) -> Span {
    tracing::debug_span!("connect", device = %device)
}

/// Create a span for an operation on one endpoint of a device
pub fn signal_span(device: &str, endpoint: &str) -> Span {
    tracing::debug_span!("signal", device = %device, endpoint = %endpoint)
}
