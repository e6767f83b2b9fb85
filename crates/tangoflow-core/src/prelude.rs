/*!
 * Prelude module for Tangoflow Core.
 *
 * Re-exports commonly used types and functions so they can be pulled in
 * with a single import.
 */

// Re-export error types
pub use crate::error::{Error, Result};

// Re-export core types
pub use crate::types::{Descriptor, DevState, Dtype, PipeData, PipeRecord, Reading, Value};

// Re-export config types
pub use crate::config::{Config, ConfigBuilder, SharedConfig};

// Re-export utility functions
pub use crate::utils::{box_future, now_seconds, with_timeout, BoxFuture};

pub use tracing::{debug, error, info, trace, warn};

// Re-export core initialization
pub use crate::init;
