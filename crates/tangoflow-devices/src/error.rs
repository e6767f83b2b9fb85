/*!
 * Error type for signal binding and device operations.
 */
use thiserror::Error;

use tangoflow_core::error::Error as CoreError;

use crate::signal::SignalKind;

/// Error type for device operations
#[derive(Error, Debug)]
pub enum DeviceError {
    /// No device server answers to this name
    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    /// No proxy provider is registered for the requested transport
    #[error("No transport registered for {0} proxies")]
    NoTransport(String),

    /// A field could not be bound to an endpoint of the device
    #[error("Cannot find {kind} {name} in {device}")]
    SignalNotFound {
        /// Device name
        device: String,
        /// Kind of endpoint looked up
        kind: SignalKind,
        /// Field or endpoint name
        name: String,
    },

    /// Several remote endpoints normalise to the same field name
    #[error("Field {field} of {device} matches several endpoints: {candidates:?}")]
    AmbiguousSignal {
        /// Device name
        device: String,
        /// Field name
        field: String,
        /// Remote names that collide
        candidates: Vec<String>,
    },

    /// Attribute missing on the device
    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    /// Pipe missing on the device
    #[error("Pipe not found: {0}")]
    PipeNotFound(String),

    /// Command missing on the device
    #[error("Command not found: {0}")]
    CommandNotFound(String),

    /// Written value violates the attribute limits
    #[error("Value {value} for {name} is outside [{min:?}, {max:?}]")]
    OutOfBounds {
        /// Attribute name
        name: String,
        /// Rejected value
        value: f64,
        /// Lower limit
        min: Option<f64>,
        /// Upper limit
        max: Option<f64>,
    },

    /// `configure` received an odd number of arguments
    #[error("Expected an even number of arguments, got {0}")]
    WrongNumberOfArguments(usize),

    /// Field is not part of the configuration group
    #[error("{0} is not designated as configurable")]
    NotConfigurable(String),

    /// Value type has no descriptor dtype
    #[error("Unsupported value type: {0}")]
    UnsupportedType(String),

    /// Signal used before it was bound
    #[error("Signal {0} is not connected")]
    NotConnected(String),

    /// Signal does not allow the requested operation
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Value does not fit the endpoint
    #[error("Invalid value type for {name}: expected {expected}, got {actual}")]
    InvalidValueType {
        /// Endpoint name
        name: String,
        /// Expected type
        expected: String,
        /// Received type
        actual: String,
    },

    /// Schema declaration is invalid
    #[error("Invalid schema {schema}: {reason}")]
    InvalidSchema {
        /// Schema name
        schema: String,
        /// What is wrong
        reason: String,
    },

    /// A connect scope is already active
    #[error("A connect scope is already active")]
    ScopeActive,

    /// Unknown subscription id
    #[error("Subscription {0} not found")]
    SubscriptionNotFound(u64),

    /// Operation not supported by this proxy
    #[error("Unsupported operation: {0}")]
    Unsupported(String),

    /// Operation exceeded its time limit
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Operation was cancelled
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Failure reported by a live transport
    #[error("Transport error: {0}")]
    Transport(#[from] anyhow::Error),

    /// Core error
    #[error("Core error: {0}")]
    Core(CoreError),
}

/// Result type for device operations
pub type Result<T> = std::result::Result<T, DeviceError>;

impl From<CoreError> for DeviceError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::Timeout(msg) => DeviceError::Timeout(msg),
            other => DeviceError::Core(other),
        }
    }
}

impl DeviceError {
    /// Create a signal-not-found error
    pub fn signal_not_found<D: AsRef<str>, N: AsRef<str>>(
        device: D,
        kind: SignalKind,
        name: N,
    ) -> Self {
        DeviceError::SignalNotFound {
            device: device.as_ref().to_string(),
            kind,
            name: name.as_ref().to_string(),
        }
    }

    /// Create an invalid-schema error
    pub fn invalid_schema<S: AsRef<str>, R: AsRef<str>>(schema: S, reason: R) -> Self {
        DeviceError::InvalidSchema {
            schema: schema.as_ref().to_string(),
            reason: reason.as_ref().to_string(),
        }
    }

    /// Create a permission-denied error
    pub fn permission_denied<S: AsRef<str>>(msg: S) -> Self {
        DeviceError::PermissionDenied(msg.as_ref().to_string())
    }

    /// Whether this error reports a missing device, endpoint, or field binding
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            DeviceError::DeviceNotFound(_)
                | DeviceError::SignalNotFound { .. }
                | DeviceError::AttributeNotFound(_)
                | DeviceError::PipeNotFound(_)
                | DeviceError::CommandNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages() {
        let err = DeviceError::signal_not_found("mock/device/name", SignalKind::Attribute, "foo");
        assert_eq!(err.to_string(), "Cannot find attribute foo in mock/device/name");
        assert!(err.is_not_found());

        let err = DeviceError::NotConfigurable("velocity".to_string());
        assert_eq!(err.to_string(), "velocity is not designated as configurable");
        assert!(!err.is_not_found());
    }

    #[test]
    fn test_core_timeout_maps_to_timeout() {
        let err: DeviceError = CoreError::timeout("slow").into();
        assert!(matches!(err, DeviceError::Timeout(_)));

        let err: DeviceError = CoreError::validation("bad").into();
        assert!(matches!(err, DeviceError::Core(_)));
    }
}
