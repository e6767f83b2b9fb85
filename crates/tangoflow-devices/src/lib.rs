/*!
 * Tangoflow Devices
 *
 * This crate binds typed signals to the attributes, pipes and commands of
 * device servers and groups them into readable, configurable and movable
 * devices.
 */

#![warn(missing_docs)]

pub mod comm;
pub mod connector;
pub mod context;
pub mod device;
pub mod devices;
pub mod error;
pub mod monitor;
pub mod proxies;
pub mod proxy;
pub mod signal;
pub mod status;

pub use comm::{Comm, CommSchema};
pub use connector::{
    ConnectSimilarlyNamed, ConnectWithoutReading, Connector, ConnectorRegistry, ExplicitConnector,
};
pub use context::{ConnectScope, Context};
pub use device::{Configurable, Device, Movable, Readable, SignalCollection};
pub use error::{DeviceError, Result};
pub use proxy::{DeviceProxy, ProxyKind, ProxyProvider, ProxyRegistry};
pub use signal::{Signal, SignalKind, SignalType};
pub use status::Status;

/// Commonly used items
pub mod prelude {
    pub use crate::comm::{Comm, CommSchema};
    pub use crate::connector::{
        ConnectSimilarlyNamed, ConnectWithoutReading, Connector, ExplicitConnector,
    };
    pub use crate::context::{ConnectScope, Context};
    pub use crate::device::{
        Configurable, Descriptors, Device, Movable, Readable, Readings, SignalCollection,
    };
    pub use crate::devices::{Motor, SingleAttributeDevice, SingleCommandDevice, SinglePipeDevice};
    pub use crate::error::DeviceError;
    pub use crate::proxies::sim::{SimProxy, SimProxyProvider, SIM_DEVICE_NAME};
    pub use crate::proxy::{DeviceProxy, ProxyKind, ProxyProvider};
    pub use crate::signal::{Signal, SignalType};
    pub use crate::status::Status;
    pub use tangoflow_core::config::Config;
    pub use tangoflow_core::types::{Descriptor, DevState, PipeData, Reading, Value};
}

/// Tangoflow devices crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Initialize the device system
pub fn init() -> std::result::Result<(), tangoflow_core::error::Error> {
    tracing::info!("Tangoflow Devices {} initialized", VERSION);
    Ok(())
}
