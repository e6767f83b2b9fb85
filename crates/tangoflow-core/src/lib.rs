/*!
 * Tangoflow Core
 *
 * This crate provides the shared foundation of Tangoflow: the value types
 * exchanged with device servers, readings and descriptors, configuration,
 * logging, and small async utilities.
 */

#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod logging;
pub mod prelude;
pub mod types;
pub mod utils;

/// Re-export of dependencies that are part of the public API
pub mod deps {
    pub use chrono;
    pub use futures;
    pub use serde;
    pub use tokio;
    pub use tracing;
}

/// Tangoflow core crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Library initialization
pub fn init() -> Result<(), error::Error> {
    logging::init()?;
    tracing::info!("Tangoflow Core {} initialized", VERSION);
    Ok(())
}
