/*!
 * Proxy implementations for Tangoflow.
 *
 * Live transports are supplied by callers through a `ProxyProvider`; this
 * module ships the in-memory simulation.
 */

pub mod sim;

pub use sim::{SimProxy, SimProxyBuilder, SimProxyProvider, SIM_DEVICE_NAME};
