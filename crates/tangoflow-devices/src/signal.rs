/*!
 * Signals: typed handles on one remote endpoint.
 *
 * A [`Signal`] starts unbound and is bound exactly once to a device proxy and
 * endpoint name. Binding never resets. Reads always go to the device; only
 * the source locator is cached.
 */
use std::fmt;
use std::sync::{Arc, OnceLock};

use tokio::sync::OnceCell;
use tracing::{debug, Instrument};

use tangoflow_core::logging::signal_span;
use tangoflow_core::types::{shape_from_dims, Descriptor, Dtype, Reading, Value};
use tangoflow_core::utils::now_seconds;

use crate::error::{DeviceError, Result};
use crate::monitor::Monitor;
use crate::proxy::{
    AttrQuality, AttributeConfig, DeviceProxy, EventCallback, EventData, ProxyKind, ProxyRegistry,
};

/// Locator scheme of device-server endpoints
pub const SOURCE_SCHEME: &str = "tango";

/// Kind of remote endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SignalKind {
    /// Attribute: scalar, spectrum or image value
    Attribute,
    /// Command with optional argument and result
    Command,
    /// Pipe carrying a structured blob
    Pipe,
}

impl fmt::Display for SignalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalKind::Attribute => write!(f, "attribute"),
            SignalKind::Command => write!(f, "command"),
            SignalKind::Pipe => write!(f, "pipe"),
        }
    }
}

/// Access mode of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    /// Read only
    Read,
    /// Write only
    Write,
    /// Read and write
    ReadWrite,
}

impl Access {
    fn readable(self) -> bool {
        matches!(self, Access::Read | Access::ReadWrite)
    }

    fn writable(self) -> bool {
        matches!(self, Access::Write | Access::ReadWrite)
    }
}

/// Declared type of a schema field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalType {
    /// Endpoint kind
    pub kind: SignalKind,
    /// Access mode
    pub access: Access,
}

impl SignalType {
    /// Read-only attribute
    pub const ATTR_R: SignalType = SignalType::new(SignalKind::Attribute, Access::Read);
    /// Write-only attribute
    pub const ATTR_W: SignalType = SignalType::new(SignalKind::Attribute, Access::Write);
    /// Read-write attribute
    pub const ATTR_RW: SignalType = SignalType::new(SignalKind::Attribute, Access::ReadWrite);
    /// Command
    pub const COMMAND: SignalType = SignalType::new(SignalKind::Command, Access::ReadWrite);
    /// Read-only pipe
    pub const PIPE_R: SignalType = SignalType::new(SignalKind::Pipe, Access::Read);
    /// Write-only pipe
    pub const PIPE_W: SignalType = SignalType::new(SignalKind::Pipe, Access::Write);
    /// Read-write pipe
    pub const PIPE_RW: SignalType = SignalType::new(SignalKind::Pipe, Access::ReadWrite);

    /// Create a signal type
    pub const fn new(kind: SignalKind, access: Access) -> Self {
        Self { kind, access }
    }

    /// Whether readings and descriptors can be taken
    pub fn is_readable(&self) -> bool {
        self.kind != SignalKind::Command && self.access.readable()
    }

    /// Whether `put` is allowed
    pub fn is_writable(&self) -> bool {
        self.kind != SignalKind::Command && self.access.writable()
    }

    /// Whether change subscriptions can be opened
    pub fn is_monitorable(&self) -> bool {
        self.kind == SignalKind::Attribute && self.access.readable()
    }
}

#[derive(Debug)]
struct Binding {
    device: String,
    endpoint: String,
    proxy: Arc<dyn DeviceProxy>,
    source: OnceLock<String>,
}

/// A typed handle on one remote endpoint
#[derive(Debug)]
pub struct Signal {
    name: String,
    signal_type: SignalType,
    binding: OnceCell<Binding>,
}

impl Signal {
    /// Create an unbound signal for a schema field
    pub fn new<S: Into<String>>(name: S, signal_type: SignalType) -> Self {
        Self {
            name: name.into(),
            signal_type,
            binding: OnceCell::new(),
        }
    }

    /// Field name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared type
    pub fn signal_type(&self) -> SignalType {
        self.signal_type
    }

    /// Endpoint kind
    pub fn kind(&self) -> SignalKind {
        self.signal_type.kind
    }

    /// Whether the signal is bound
    pub fn is_connected(&self) -> bool {
        self.binding.initialized()
    }

    /// Bound device name
    pub fn device(&self) -> Result<&str> {
        Ok(&self.binding()?.device)
    }

    /// Bound endpoint name
    pub fn endpoint(&self) -> Result<&str> {
        Ok(&self.binding()?.endpoint)
    }

    /// Bound proxy
    pub fn proxy(&self) -> Result<Arc<dyn DeviceProxy>> {
        Ok(Arc::clone(&self.binding()?.proxy))
    }

    /// Bind through the shared proxy of `device`
    ///
    /// A no-op once connected. Proxy lookup errors are returned as they are.
    pub async fn connect(
        &self,
        proxies: &ProxyRegistry,
        kind: ProxyKind,
        device: &str,
        endpoint: &str,
    ) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        let proxy = proxies.get_proxy(kind, device).await?;
        self.connect_with(proxy, device, endpoint).await
    }

    /// Bind to `endpoint` on an already obtained proxy
    ///
    /// The endpoint is validated first: attributes and pipes are read once,
    /// commands are looked up in the command list. A no-op once connected.
    pub async fn connect_with(
        &self,
        proxy: Arc<dyn DeviceProxy>,
        device: &str,
        endpoint: &str,
    ) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }

        let kind = self.kind();
        self.binding
            .get_or_try_init(|| async {
                validate(proxy.as_ref(), kind, endpoint).await.map_err(|e| {
                    debug!(error = %e, "Endpoint validation failed");
                    DeviceError::signal_not_found(device, kind, endpoint)
                })?;
                debug!(field = %self.name, "Connected");
                Ok::<_, DeviceError>(Binding {
                    device: device.to_string(),
                    endpoint: endpoint.to_string(),
                    proxy,
                    source: OnceLock::new(),
                })
            })
            .instrument(signal_span(device, endpoint))
            .await?;
        Ok(())
    }

    /// Bind to `endpoint` without checking it on the device
    ///
    /// Returns whether this call bound the signal; an already bound signal is
    /// left as it is.
    pub fn bind(&self, proxy: Arc<dyn DeviceProxy>, device: &str, endpoint: &str) -> bool {
        let bound = self
            .binding
            .set(Binding {
                device: device.to_string(),
                endpoint: endpoint.to_string(),
                proxy,
                source: OnceLock::new(),
            })
            .is_ok();
        if bound {
            debug!(field = %self.name, device = %device, endpoint = %endpoint, "Bound without reading");
        }
        bound
    }

    fn binding(&self) -> Result<&Binding> {
        self.binding
            .get()
            .ok_or_else(|| DeviceError::NotConnected(self.name.clone()))
    }

    fn readable(&self) -> Result<&Binding> {
        let binding = self.binding()?;
        if !self.signal_type.is_readable() {
            return Err(DeviceError::permission_denied(format!("{} is not readable", self.name)));
        }
        Ok(binding)
    }

    fn attribute(&self) -> Result<&Binding> {
        let binding = self.binding()?;
        if self.kind() != SignalKind::Attribute {
            return Err(DeviceError::permission_denied(format!(
                "{} is a {}, not an attribute",
                self.name,
                self.kind()
            )));
        }
        Ok(binding)
    }

    /// Source locator, built on first use
    pub fn source(&self) -> Result<&str> {
        let binding = self.binding()?;
        let kind = self.kind();
        Ok(binding.source.get_or_init(|| {
            let host = binding.proxy.db_host();
            let port = binding.proxy.db_port();
            match kind {
                SignalKind::Attribute => format!(
                    "{}://{}:{}/{}/{}",
                    SOURCE_SCHEME, host, port, binding.device, binding.endpoint
                ),
                SignalKind::Pipe => format!(
                    "{}://{}:{}/{}:{}(Pipe)",
                    SOURCE_SCHEME, host, port, binding.device, binding.endpoint
                ),
                SignalKind::Command => format!(
                    "{}://{}:{}/{}:{}(Command)",
                    SOURCE_SCHEME, host, port, binding.device, binding.endpoint
                ),
            }
        }))
    }

    /// Read the current value with its timestamp
    pub async fn get_reading(&self) -> Result<Reading> {
        let binding = self.readable()?;
        match self.kind() {
            SignalKind::Pipe => {
                let data = binding.proxy.read_pipe(&binding.endpoint).await?;
                Ok(Reading::new(data, now_seconds()))
            }
            _ => {
                let attr = binding.proxy.read_attribute(&binding.endpoint).await?;
                Ok(Reading::new(attr.value, attr.time))
            }
        }
    }

    /// Describe shape, dtype and source
    pub async fn get_descriptor(&self) -> Result<Descriptor> {
        let binding = self.readable()?;
        if self.kind() == SignalKind::Pipe {
            return Ok(Descriptor::new(vec![2], Dtype::Array, self.source()?));
        }

        let attr = binding.proxy.read_attribute(&binding.endpoint).await?;
        let dtype = attr
            .value
            .dtype()
            .map_err(|_| DeviceError::UnsupportedType(attr.value.type_name().to_string()))?;
        Ok(Descriptor::new(
            shape_from_dims(attr.dim_x, attr.dim_y),
            dtype,
            self.source()?,
        ))
    }

    /// Read just the current value
    pub async fn get_value(&self) -> Result<Value> {
        Ok(self.get_reading().await?.value)
    }

    /// Quality of the current attribute reading
    pub async fn get_quality(&self) -> Result<AttrQuality> {
        let binding = self.attribute()?;
        Ok(binding.proxy.read_attribute(&binding.endpoint).await?.quality)
    }

    /// Limits configured on the attribute
    pub async fn attribute_config(&self) -> Result<AttributeConfig> {
        let binding = self.attribute()?;
        binding.proxy.get_attribute_config(&binding.endpoint).await
    }

    /// Write a value; pipes take a [`Value::Pipe`]
    pub async fn put(&self, value: Value) -> Result<()> {
        let binding = self.binding()?;
        if !self.signal_type.is_writable() {
            return Err(DeviceError::permission_denied(format!("{} is not writable", self.name)));
        }
        match self.kind() {
            SignalKind::Pipe => match value {
                Value::Pipe(data) => binding.proxy.write_pipe(&binding.endpoint, data).await,
                other => Err(DeviceError::InvalidValueType {
                    name: self.name.clone(),
                    expected: "pipe".to_string(),
                    actual: other.type_name().to_string(),
                }),
            },
            _ => binding.proxy.write_attribute(&binding.endpoint, value).await,
        }
    }

    /// Run the command with an optional argument
    pub async fn execute(&self, arg: Option<Value>) -> Result<Option<Value>> {
        let binding = self.binding()?;
        if self.kind() != SignalKind::Command {
            return Err(DeviceError::permission_denied(format!("{} is not a command", self.name)));
        }
        binding.proxy.command_inout(&binding.endpoint, arg).await
    }

    /// Subscribe to readings, starting with the current one
    pub async fn monitor_reading<F>(&self, callback: F) -> Result<Monitor>
    where
        F: Fn(Reading) + Send + Sync + 'static,
    {
        let callback: EventCallback = Arc::new(move |event: EventData| {
            callback(Reading::new(event.attr_value.value, event.attr_value.time))
        });
        self.open_monitor(callback).await
    }

    /// Subscribe to values, starting with the current one
    pub async fn monitor_value<F>(&self, callback: F) -> Result<Monitor>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let monitor = self.value_monitor(callback)?;
        monitor.subscribe().await?;
        Ok(monitor)
    }

    /// Value monitor that is not subscribed yet
    pub fn value_monitor<F>(&self, callback: F) -> Result<Monitor>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        let callback: EventCallback =
            Arc::new(move |event: EventData| callback(event.attr_value.value));
        self.new_monitor(callback)
    }

    async fn open_monitor(&self, callback: EventCallback) -> Result<Monitor> {
        let monitor = self.new_monitor(callback)?;
        monitor.subscribe().await?;
        Ok(monitor)
    }

    fn new_monitor(&self, callback: EventCallback) -> Result<Monitor> {
        let binding = self.binding()?;
        if !self.signal_type.is_monitorable() {
            return Err(DeviceError::permission_denied(format!(
                "{} cannot be monitored",
                self.name
            )));
        }
        Ok(Monitor::new(Arc::clone(&binding.proxy), binding.endpoint.clone(), callback))
    }
}

async fn validate(proxy: &dyn DeviceProxy, kind: SignalKind, endpoint: &str) -> Result<()> {
    match kind {
        SignalKind::Attribute => proxy.read_attribute(endpoint).await.map(|_| ()),
        SignalKind::Pipe => proxy.read_pipe(endpoint).await.map(|_| ()),
        SignalKind::Command => {
            let commands = proxy.get_command_list().await?;
            if commands.iter().any(|c| c == endpoint) {
                Ok(())
            } else {
                Err(DeviceError::CommandNotFound(endpoint.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    use tangoflow_core::types::{DevState, PipeData};
    use tokio_test::assert_ok;

    use crate::proxies::sim::{SimProxy, SIM_DEVICE_NAME};

    fn sim() -> Arc<dyn DeviceProxy> {
        Arc::new(
            SimProxy::builder(SIM_DEVICE_NAME)
                .with_poll_interval(Duration::from_millis(5))
                .with_motor_layout()
                .with_attribute("Spectrum", vec![1.0, 2.0, 3.0])
                .with_attribute(
                    "Image",
                    Value::Array(vec![Value::from(vec![1, 2]), Value::from(vec![3, 4])]),
                )
                .with_attribute("Counter", 7)
                .with_attribute("Flag", true)
                .with_attribute("Label", "sample")
                .with_attribute("Raw", Value::Binary(vec![0, 1]))
                .with_pipe("Blob", PipeData::new("blob").with_record("x", 1))
                .build(),
        )
    }

    async fn attr(name: &str, endpoint: &str) -> Signal {
        let signal = Signal::new(name, SignalType::ATTR_RW);
        signal.connect_with(sim(), SIM_DEVICE_NAME, endpoint).await.unwrap();
        signal
    }

    #[tokio::test]
    async fn test_unconnected_signal_refuses_io() {
        let signal = Signal::new("position", SignalType::ATTR_RW);
        assert!(!signal.is_connected());
        assert!(matches!(signal.source(), Err(DeviceError::NotConnected(_))));
        assert!(matches!(signal.get_reading().await, Err(DeviceError::NotConnected(_))));
        assert!(matches!(signal.put(Value::Float(1.0)).await, Err(DeviceError::NotConnected(_))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let proxy = sim();
        let signal = Signal::new("position", SignalType::ATTR_RW);
        assert_ok!(signal.connect_with(Arc::clone(&proxy), SIM_DEVICE_NAME, "Position").await);
        assert_ok!(signal.connect_with(Arc::clone(&proxy), SIM_DEVICE_NAME, "Velocity").await);
        assert_eq!(signal.endpoint().unwrap(), "Position");
        assert_eq!(signal.device().unwrap(), SIM_DEVICE_NAME);
    }

    #[tokio::test]
    async fn test_bind_skips_validation() {
        let proxy = sim();
        let signal = Signal::new("foo", SignalType::ATTR_R);
        assert!(signal.bind(Arc::clone(&proxy), SIM_DEVICE_NAME, "Foo"));
        assert!(signal.is_connected());
        assert!(!signal.bind(Arc::clone(&proxy), SIM_DEVICE_NAME, "Position"));
        assert_eq!(signal.endpoint().unwrap(), "Foo");
        assert!(matches!(signal.get_reading().await, Err(DeviceError::AttributeNotFound(_))));

        let monitor = attr("state", "State").await.value_monitor(|_| {}).unwrap();
        assert!(!monitor.is_subscribed().await);
    }

    #[tokio::test]
    async fn test_connect_validates_endpoint() {
        let signal = Signal::new("foo", SignalType::ATTR_R);
        let err = signal.connect_with(sim(), SIM_DEVICE_NAME, "Foo").await.unwrap_err();
        assert!(matches!(
            err,
            DeviceError::SignalNotFound { kind: SignalKind::Attribute, .. }
        ));
        assert!(!signal.is_connected());

        let command = Signal::new("halt", SignalType::COMMAND);
        assert!(command.connect_with(sim(), SIM_DEVICE_NAME, "Halt").await.is_err());
        assert_ok!(command.connect_with(sim(), SIM_DEVICE_NAME, "Stop").await);

        let pipe = Signal::new("blob", SignalType::PIPE_RW);
        assert!(pipe.connect_with(sim(), SIM_DEVICE_NAME, "Other").await.is_err());
        assert_ok!(pipe.connect_with(sim(), SIM_DEVICE_NAME, "Blob").await);
    }

    #[tokio::test]
    async fn test_source_format() {
        let signal = attr("position", "Position").await;
        assert_eq!(signal.source().unwrap(), "tango://localhost:10000/mock/device/name/Position");

        let pipe = Signal::new("blob", SignalType::PIPE_R);
        pipe.connect_with(sim(), SIM_DEVICE_NAME, "Blob").await.unwrap();
        assert_eq!(pipe.source().unwrap(), "tango://localhost:10000/mock/device/name:Blob(Pipe)");

        let command = Signal::new("stop", SignalType::COMMAND);
        command.connect_with(sim(), SIM_DEVICE_NAME, "Stop").await.unwrap();
        assert_eq!(
            command.source().unwrap(),
            "tango://localhost:10000/mock/device/name:Stop(Command)"
        );
    }

    #[tokio::test]
    async fn test_descriptors() {
        let cases = [
            ("Position", vec![], Dtype::Number),
            ("Counter", vec![], Dtype::Integer),
            ("Flag", vec![], Dtype::Boolean),
            ("Label", vec![], Dtype::String),
            ("State", vec![], Dtype::String),
            ("Spectrum", vec![3], Dtype::Array),
            ("Image", vec![2, 2], Dtype::Array),
        ];
        for (endpoint, shape, dtype) in cases {
            let descriptor = attr("field", endpoint).await.get_descriptor().await.unwrap();
            assert_eq!(descriptor.shape, shape, "{}", endpoint);
            assert_eq!(descriptor.dtype, dtype, "{}", endpoint);
        }

        let raw = attr("raw", "Raw").await;
        assert!(matches!(raw.get_descriptor().await, Err(DeviceError::UnsupportedType(_))));

        let pipe = Signal::new("blob", SignalType::PIPE_R);
        pipe.connect_with(sim(), SIM_DEVICE_NAME, "Blob").await.unwrap();
        let descriptor = pipe.get_descriptor().await.unwrap();
        assert_eq!(descriptor.shape, vec![2]);
        assert_eq!(descriptor.dtype, Dtype::Array);
    }

    #[tokio::test]
    async fn test_reads_are_never_cached() {
        let signal = attr("position", "Position").await;
        assert_eq!(signal.get_value().await.unwrap(), Value::Float(0.0));
        signal.proxy().unwrap().write_attribute("Position", Value::Float(3.0)).await.unwrap();
        assert_eq!(signal.get_value().await.unwrap(), Value::Float(3.0));
        assert_eq!(signal.get_quality().await.unwrap(), AttrQuality::Valid);
    }

    #[tokio::test]
    async fn test_put_and_permissions() {
        let velocity = attr("velocity", "Velocity").await;
        assert_ok!(velocity.put(Value::Float(10.0)).await);
        assert!(matches!(
            velocity.put(Value::Float(-1.0)).await,
            Err(DeviceError::OutOfBounds { .. })
        ));
        assert_eq!(velocity.get_value().await.unwrap(), Value::Float(10.0));
        assert_eq!(velocity.attribute_config().await.unwrap().max_value, Some(1000.0));

        let read_only = Signal::new("position", SignalType::ATTR_R);
        read_only.connect_with(sim(), SIM_DEVICE_NAME, "Position").await.unwrap();
        assert!(matches!(
            read_only.put(Value::Float(1.0)).await,
            Err(DeviceError::PermissionDenied(_))
        ));

        let write_only = Signal::new("position", SignalType::ATTR_W);
        write_only.connect_with(sim(), SIM_DEVICE_NAME, "Position").await.unwrap();
        assert!(matches!(write_only.get_reading().await, Err(DeviceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_pipe_put_requires_pipe_value() {
        let pipe = Signal::new("blob", SignalType::PIPE_RW);
        pipe.connect_with(sim(), SIM_DEVICE_NAME, "Blob").await.unwrap();

        let data = PipeData::new("blob").with_record("y", 2.0);
        assert_ok!(pipe.put(Value::Pipe(data.clone())).await);
        assert_eq!(pipe.get_value().await.unwrap(), Value::Pipe(data));
        assert!(matches!(
            pipe.put(Value::Integer(1)).await,
            Err(DeviceError::InvalidValueType { .. })
        ));
    }

    #[tokio::test]
    async fn test_execute() {
        let stop = Signal::new("stop", SignalType::COMMAND);
        stop.connect_with(sim(), SIM_DEVICE_NAME, "Stop").await.unwrap();
        assert_eq!(stop.execute(None).await.unwrap(), None);
        assert!(matches!(stop.get_reading().await, Err(DeviceError::PermissionDenied(_))));

        let position = attr("position", "Position").await;
        assert!(matches!(position.execute(None).await, Err(DeviceError::PermissionDenied(_))));
    }

    #[tokio::test]
    async fn test_monitor_value() {
        let state = attr("state", "State").await;
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let monitor = state
            .monitor_value(move |value| {
                if let Ok(mut seen) = sink.lock() {
                    seen.push(value);
                }
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        state.put(Value::State(DevState::Moving)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(30)).await;
        monitor.close().await.unwrap();

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![Value::State(DevState::On), Value::State(DevState::Moving)]
        );
    }
}
