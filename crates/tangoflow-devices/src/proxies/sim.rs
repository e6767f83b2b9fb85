/*!
 * Simulated device proxy.
 *
 * Keeps attribute and pipe values in memory and delivers change events from
 * a polling thread per subscription. The stock layout mimics a motor with
 * `Position`, `Velocity` and `State` attributes and a `Stop` command.
 */
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, trace};

use tangoflow_core::config::SimulationConfig;
use tangoflow_core::error::Error as CoreError;
use tangoflow_core::types::{DevState, PipeData, Value};
use tangoflow_core::utils::now_seconds;

use crate::error::{DeviceError, Result};
use crate::proxy::{
    AttrQuality, AttributeConfig, AttributeData, DeviceProxy, EventCallback, EventData, EventKind,
    ProxyKind, ProxyProvider, SubscriptionId,
};

/// The only device name the stock simulation answers to
pub const SIM_DEVICE_NAME: &str = "mock/device/name";

#[derive(Debug, Clone)]
struct SimAttribute {
    value: Value,
    min: Option<f64>,
    max: Option<f64>,
}

impl SimAttribute {
    fn read(&self, name: &str) -> AttributeData {
        let (dim_x, dim_y) = dims(&self.value);
        AttributeData {
            name: name.to_string(),
            value: self.value.clone(),
            time: now_seconds(),
            dim_x,
            dim_y,
            quality: AttrQuality::Valid,
        }
    }
}

fn dims(value: &Value) -> (usize, usize) {
    match value {
        Value::Array(rows) if matches!(rows.first(), Some(Value::Array(_))) => {
            let dim_x = rows.first().and_then(Value::as_array).map_or(0, <[Value]>::len);
            (dim_x, rows.len())
        }
        Value::Array(items) => (items.len(), 0),
        _ => (1, 0),
    }
}

#[derive(Debug, Default)]
struct SimState {
    attributes: IndexMap<String, SimAttribute>,
    pipes: IndexMap<String, PipeData>,
    active: HashSet<u64>,
}

/// Builder for a [`SimProxy`] with a custom layout
#[derive(Debug, Clone)]
pub struct SimProxyBuilder {
    name: String,
    host: String,
    port: u16,
    poll_interval: Duration,
    subscribe_delay: Duration,
    attributes: IndexMap<String, SimAttribute>,
    pipes: IndexMap<String, PipeData>,
    commands: Vec<String>,
}

impl SimProxyBuilder {
    fn new<S: Into<String>>(name: S) -> Self {
        let defaults = SimulationConfig::default();
        Self {
            name: name.into(),
            host: defaults.host.clone(),
            port: defaults.port,
            poll_interval: defaults.poll_interval(),
            subscribe_delay: Duration::ZERO,
            attributes: IndexMap::new(),
            pipes: IndexMap::new(),
            commands: Vec::new(),
        }
    }

    /// Take host, port and poll interval from configuration
    pub fn with_config(mut self, config: &SimulationConfig) -> Self {
        self.host = config.host.clone();
        self.port = config.port;
        self.poll_interval = config.poll_interval();
        self
    }

    /// Set the subscription poll interval
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Delay the acknowledgement of every subscription
    ///
    /// The subscription is registered and polled at once; only the returned
    /// id arrives late.
    pub fn with_subscribe_delay(mut self, delay: Duration) -> Self {
        self.subscribe_delay = delay;
        self
    }

    /// Add an unbounded attribute
    pub fn with_attribute<S: Into<String>, V: Into<Value>>(mut self, name: S, value: V) -> Self {
        self.attributes.insert(
            name.into(),
            SimAttribute {
                value: value.into(),
                min: None,
                max: None,
            },
        );
        self
    }

    /// Add a numeric attribute with write limits
    pub fn with_bounded_attribute<S: Into<String>, V: Into<Value>>(
        mut self,
        name: S,
        value: V,
        min: Option<f64>,
        max: Option<f64>,
    ) -> Self {
        self.attributes.insert(
            name.into(),
            SimAttribute {
                value: value.into(),
                min,
                max,
            },
        );
        self
    }

    /// Add a pipe
    pub fn with_pipe<S: Into<String>>(mut self, name: S, data: PipeData) -> Self {
        self.pipes.insert(name.into(), data);
        self
    }

    /// Add a command
    pub fn with_command<S: Into<String>>(mut self, name: S) -> Self {
        self.commands.push(name.into());
        self
    }

    /// Add the stock motor layout
    pub fn with_motor_layout(self) -> Self {
        self.with_attribute("Position", 0.0)
            .with_bounded_attribute("Velocity", 0.0, Some(0.0), Some(1000.0))
            .with_attribute("State", DevState::On)
            .with_command("Stop")
    }

    /// Build the proxy
    pub fn build(self) -> SimProxy {
        SimProxy {
            name: self.name,
            host: self.host,
            port: self.port,
            poll_interval: self.poll_interval,
            subscribe_delay: self.subscribe_delay,
            commands: self.commands,
            state: Arc::new(Mutex::new(SimState {
                attributes: self.attributes,
                pipes: self.pipes,
                active: HashSet::new(),
            })),
            next_subscription: AtomicU64::new(1),
        }
    }
}

/// In-memory device proxy
#[derive(Debug)]
pub struct SimProxy {
    name: String,
    host: String,
    port: u16,
    poll_interval: Duration,
    subscribe_delay: Duration,
    commands: Vec<String>,
    state: Arc<Mutex<SimState>>,
    next_subscription: AtomicU64,
}

impl SimProxy {
    /// Start building a simulated device with an empty layout
    pub fn builder<S: Into<String>>(name: S) -> SimProxyBuilder {
        SimProxyBuilder::new(name)
    }

    /// The stock simulated motor
    pub fn new(config: &SimulationConfig) -> Self {
        Self::builder(SIM_DEVICE_NAME)
            .with_config(config)
            .with_motor_layout()
            .build()
    }

    /// Number of subscriptions whose polling loop is still meant to run
    pub fn active_subscriptions(&self) -> usize {
        self.state.lock().map(|state| state.active.len()).unwrap_or(0)
    }

    fn lock(&self) -> Result<MutexGuard<'_, SimState>> {
        self.state
            .lock()
            .map_err(|_| CoreError::runtime("Simulated device state lock poisoned").into())
    }
}

fn poll_subscription(
    state: Arc<Mutex<SimState>>,
    id: u64,
    attr: String,
    interval: Duration,
    callback: EventCallback,
) {
    let mut last: Option<Value> = None;
    loop {
        {
            let Ok(guard) = state.lock() else { break };
            if !guard.active.contains(&id) {
                break;
            }
            if let Some(current) = guard.attributes.get(&attr) {
                if last.as_ref() != Some(&current.value) {
                    last = Some(current.value.clone());
                    callback(EventData {
                        attr_name: attr.clone(),
                        attr_value: current.read(&attr),
                        reception_date: now_seconds(),
                        event: EventKind::Change,
                    });
                }
            }
        }
        thread::sleep(interval);
    }
    trace!(subscription = id, attribute = %attr, "Polling loop finished");
}

#[async_trait]
impl DeviceProxy for SimProxy {
    fn name(&self) -> &str {
        &self.name
    }

    fn db_host(&self) -> &str {
        &self.host
    }

    fn db_port(&self) -> u16 {
        self.port
    }

    async fn read_attribute(&self, name: &str) -> Result<AttributeData> {
        let state = self.lock()?;
        state
            .attributes
            .get(name)
            .map(|attr| attr.read(name))
            .ok_or_else(|| DeviceError::AttributeNotFound(name.to_string()))
    }

    async fn write_attribute(&self, name: &str, value: Value) -> Result<()> {
        let mut state = self.lock()?;
        let attr = state
            .attributes
            .get_mut(name)
            .ok_or_else(|| DeviceError::AttributeNotFound(name.to_string()))?;

        if attr.min.is_some() || attr.max.is_some() {
            let number = value.as_float().ok_or_else(|| DeviceError::InvalidValueType {
                name: name.to_string(),
                expected: "number".to_string(),
                actual: value.type_name().to_string(),
            })?;
            AttributeConfig {
                name: name.to_string(),
                min_value: attr.min,
                max_value: attr.max,
            }
            .check(number)?;
        }

        attr.value = value;
        Ok(())
    }

    async fn get_attribute_config(&self, name: &str) -> Result<AttributeConfig> {
        let state = self.lock()?;
        let attr = state
            .attributes
            .get(name)
            .ok_or_else(|| DeviceError::AttributeNotFound(name.to_string()))?;
        Ok(AttributeConfig {
            name: name.to_string(),
            min_value: attr.min,
            max_value: attr.max,
        })
    }

    async fn read_pipe(&self, name: &str) -> Result<PipeData> {
        let state = self.lock()?;
        state
            .pipes
            .get(name)
            .cloned()
            .ok_or_else(|| DeviceError::PipeNotFound(name.to_string()))
    }

    async fn write_pipe(&self, name: &str, data: PipeData) -> Result<()> {
        let mut state = self.lock()?;
        let pipe = state
            .pipes
            .get_mut(name)
            .ok_or_else(|| DeviceError::PipeNotFound(name.to_string()))?;
        *pipe = data;
        Ok(())
    }

    async fn command_inout(&self, name: &str, arg: Option<Value>) -> Result<Option<Value>> {
        if !self.commands.iter().any(|c| c == name) {
            return Err(DeviceError::CommandNotFound(name.to_string()));
        }
        if name == "Stop" {
            let mut state = self.lock()?;
            if let Some(attr) = state.attributes.get_mut("State") {
                attr.value = Value::State(DevState::On);
            }
            return Ok(None);
        }
        Ok(arg)
    }

    async fn subscribe_event(
        &self,
        name: &str,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionId> {
        if kind != EventKind::Change {
            return Err(DeviceError::Unsupported(format!(
                "{:?} events on simulated device {}",
                kind, self.name
            )));
        }

        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.lock()?;
            if !state.attributes.contains_key(name) {
                return Err(DeviceError::AttributeNotFound(name.to_string()));
            }
            state.active.insert(id);
        }

        let state = Arc::clone(&self.state);
        let attr = name.to_string();
        let interval = self.poll_interval;
        let spawned = thread::Builder::new()
            .name(format!("sim-poll-{}", id))
            .spawn(move || poll_subscription(state, id, attr, interval, callback));

        if let Err(e) = spawned {
            self.lock()?.active.remove(&id);
            return Err(CoreError::from(e).into());
        }

        debug!(device = %self.name, attribute = %name, subscription = id, "Subscribed");
        if !self.subscribe_delay.is_zero() {
            tokio::time::sleep(self.subscribe_delay).await;
        }
        Ok(SubscriptionId(id))
    }

    async fn unsubscribe_event(&self, id: SubscriptionId) -> Result<()> {
        let mut state = self.lock()?;
        if !state.active.remove(&id.0) {
            return Err(DeviceError::SubscriptionNotFound(id.0));
        }
        debug!(device = %self.name, subscription = id.0, "Unsubscribed");
        Ok(())
    }

    async fn get_attribute_list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.attributes.keys().cloned().collect())
    }

    async fn get_pipe_list(&self) -> Result<Vec<String>> {
        Ok(self.lock()?.pipes.keys().cloned().collect())
    }

    async fn get_command_list(&self) -> Result<Vec<String>> {
        Ok(self.commands.clone())
    }
}

/// Provider of simulated proxies
///
/// Answers to [`SIM_DEVICE_NAME`] with the stock motor layout, plus any
/// device added with [`SimProxyProvider::with_device`].
#[derive(Debug, Clone)]
pub struct SimProxyProvider {
    devices: IndexMap<String, SimProxyBuilder>,
}

impl SimProxyProvider {
    /// Create a provider for the stock simulated motor
    pub fn new(config: SimulationConfig) -> Self {
        let mut devices = IndexMap::new();
        devices.insert(
            SIM_DEVICE_NAME.to_string(),
            SimProxy::builder(SIM_DEVICE_NAME)
                .with_config(&config)
                .with_motor_layout(),
        );
        Self { devices }
    }

    /// Serve an additional simulated device, replacing one of the same name
    pub fn with_device(mut self, builder: SimProxyBuilder) -> Self {
        self.devices.insert(builder.name.clone(), builder);
        self
    }
}

#[async_trait]
impl ProxyProvider for SimProxyProvider {
    fn kind(&self) -> ProxyKind {
        ProxyKind::Simulated
    }

    async fn create_proxy(&self, device: &str) -> Result<Arc<dyn DeviceProxy>> {
        let builder = self
            .devices
            .get(device)
            .ok_or_else(|| DeviceError::DeviceNotFound(device.to_string()))?;
        Ok(Arc::new(builder.clone().build()))
    }
}
