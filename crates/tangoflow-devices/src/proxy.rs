/*!
 * Device proxy abstraction.
 *
 * A [`DeviceProxy`] is one connection to one remote device. Transports plug
 * in through [`ProxyProvider`]s, and the [`ProxyRegistry`] hands out a single
 * shared proxy per device name and proxy kind.
 */
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use tangoflow_core::config::SimulationConfig;
use tangoflow_core::error::Error as CoreError;
use tangoflow_core::types::{PipeData, Value};

use crate::error::{DeviceError, Result};
use crate::proxies::sim::SimProxyProvider;

/// Which family of proxies a signal binds to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyKind {
    /// Network-backed proxies talking to real device servers
    Live,
    /// In-memory simulated proxies
    Simulated,
}

impl ProxyKind {
    /// Kind selected by the `simulated` connection flag
    pub fn from_simulated(simulated: bool) -> Self {
        if simulated {
            ProxyKind::Simulated
        } else {
            ProxyKind::Live
        }
    }
}

impl fmt::Display for ProxyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProxyKind::Live => write!(f, "live"),
            ProxyKind::Simulated => write!(f, "simulated"),
        }
    }
}

/// Quality flag attached to an attribute reading
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttrQuality {
    /// Value is valid
    Valid,
    /// Value is invalid
    Invalid,
    /// Value is in alarm
    Alarm,
    /// Value is changing
    Changing,
    /// Value is in warning
    Warning,
}

/// One attribute read from a device
#[derive(Debug, Clone, PartialEq)]
pub struct AttributeData {
    /// Attribute name
    pub name: String,
    /// Attribute value
    pub value: Value,
    /// Read time in seconds since the Unix epoch
    pub time: f64,
    /// First dimension
    pub dim_x: usize,
    /// Second dimension; zero unless the attribute is an image
    pub dim_y: usize,
    /// Quality flag
    pub quality: AttrQuality,
}

/// Static configuration of an attribute
#[derive(Debug, Clone, PartialEq, Default)]
pub struct AttributeConfig {
    /// Attribute name
    pub name: String,
    /// Lowest writable value
    pub min_value: Option<f64>,
    /// Highest writable value
    pub max_value: Option<f64>,
}

impl AttributeConfig {
    /// Check a candidate value against the limits
    pub fn check(&self, value: f64) -> Result<()> {
        let below = self.min_value.map_or(false, |min| value < min);
        let above = self.max_value.map_or(false, |max| value > max);
        if below || above {
            return Err(DeviceError::OutOfBounds {
                name: self.name.clone(),
                value,
                min: self.min_value,
                max: self.max_value,
            });
        }
        Ok(())
    }
}

/// Event kinds a proxy can subscribe to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Fired when the value changes
    Change,
    /// Fired periodically
    Periodic,
    /// Fired on archive criteria
    Archive,
}

/// Payload delivered to event callbacks
#[derive(Debug, Clone)]
pub struct EventData {
    /// Name of the attribute the event is about
    pub attr_name: String,
    /// The attribute reading carried by the event
    pub attr_value: AttributeData,
    /// Time the event was received
    pub reception_date: f64,
    /// Kind of the event
    pub event: EventKind,
}

/// Callback invoked for every delivered event, possibly from another thread
pub type EventCallback = Arc<dyn Fn(EventData) + Send + Sync>;

/// Identifier of one active subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A connection to one remote device
#[async_trait]
pub trait DeviceProxy: Send + Sync + Debug {
    /// Name of the device this proxy talks to
    fn name(&self) -> &str;

    /// Host of the device database
    fn db_host(&self) -> &str;

    /// Port of the device database
    fn db_port(&self) -> u16;

    /// Read an attribute
    async fn read_attribute(&self, name: &str) -> Result<AttributeData>;

    /// Write an attribute; fails with a bounds error outside its limits
    async fn write_attribute(&self, name: &str, value: Value) -> Result<()>;

    /// Get the configuration of an attribute
    async fn get_attribute_config(&self, name: &str) -> Result<AttributeConfig>;

    /// Read a pipe
    async fn read_pipe(&self, name: &str) -> Result<PipeData>;

    /// Write a pipe
    async fn write_pipe(&self, name: &str, data: PipeData) -> Result<()>;

    /// Execute a command with an optional argument
    async fn command_inout(&self, name: &str, arg: Option<Value>) -> Result<Option<Value>>;

    /// Subscribe to events of an attribute
    async fn subscribe_event(
        &self,
        name: &str,
        kind: EventKind,
        callback: EventCallback,
    ) -> Result<SubscriptionId>;

    /// Cancel a subscription; no callback fires once this returns
    async fn unsubscribe_event(&self, id: SubscriptionId) -> Result<()>;

    /// Names of all attributes
    async fn get_attribute_list(&self) -> Result<Vec<String>>;

    /// Names of all pipes
    async fn get_pipe_list(&self) -> Result<Vec<String>>;

    /// Names of all commands
    async fn get_command_list(&self) -> Result<Vec<String>>;
}

/// Creates proxies of one kind
#[async_trait]
pub trait ProxyProvider: Send + Sync + Debug {
    /// The kind of proxies this provider creates
    fn kind(&self) -> ProxyKind;

    /// Create a proxy for a device
    async fn create_proxy(&self, device: &str) -> Result<Arc<dyn DeviceProxy>>;
}

type ProxySlot = Arc<OnceCell<Arc<dyn DeviceProxy>>>;

/// Providers plus the cache of proxies they created
#[derive(Debug, Default)]
pub struct ProxyRegistry {
    providers: RwLock<HashMap<ProxyKind, Arc<dyn ProxyProvider>>>,
    proxies: Mutex<HashMap<(ProxyKind, String), ProxySlot>>,
}

impl ProxyRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the simulated provider registered
    pub fn with_simulation(config: SimulationConfig) -> Self {
        let registry = Self::new();
        registry.insert_provider(Arc::new(SimProxyProvider::new(config)));
        registry
    }

    /// Register a provider, replacing any provider of the same kind
    pub fn register_provider<P: ProxyProvider + 'static>(&self, provider: P) -> Result<()> {
        let mut providers = self
            .providers
            .write()
            .map_err(|_| CoreError::runtime("Failed to acquire write lock on proxy providers"))?;
        debug!(kind = %provider.kind(), "Registered proxy provider");
        providers.insert(provider.kind(), Arc::new(provider));
        Ok(())
    }

    fn insert_provider(&self, provider: Arc<dyn ProxyProvider>) {
        if let Ok(mut providers) = self.providers.write() {
            providers.insert(provider.kind(), provider);
        }
    }

    /// Get the provider for a kind
    pub fn provider(&self, kind: ProxyKind) -> Result<Arc<dyn ProxyProvider>> {
        let providers = self
            .providers
            .read()
            .map_err(|_| CoreError::runtime("Failed to acquire read lock on proxy providers"))?;
        providers
            .get(&kind)
            .cloned()
            .ok_or_else(|| DeviceError::NoTransport(kind.to_string()))
    }

    /// Get the shared proxy for a device, creating it on first use
    ///
    /// Concurrent first requests for the same key share one creation. A
    /// failed creation is not cached.
    pub async fn get_proxy(&self, kind: ProxyKind, device: &str) -> Result<Arc<dyn DeviceProxy>> {
        let slot = {
            let mut proxies = self
                .proxies
                .lock()
                .map_err(|_| CoreError::runtime("Failed to acquire lock on proxy cache"))?;
            proxies
                .entry((kind, device.to_string()))
                .or_default()
                .clone()
        };

        let proxy = slot
            .get_or_try_init(|| async {
                let provider = self.provider(kind)?;
                debug!(device = %device, kind = %kind, "Creating device proxy");
                provider.create_proxy(device).await
            })
            .await?;

        Ok(Arc::clone(proxy))
    }

    /// Number of proxies currently cached
    pub fn cached_count(&self) -> usize {
        self.proxies
            .lock()
            .map(|proxies| proxies.values().filter(|slot| slot.initialized()).count())
            .unwrap_or(0)
    }

    /// Drop every cached proxy
    pub fn clear(&self) -> Result<()> {
        let mut proxies = self
            .proxies
            .lock()
            .map_err(|_| CoreError::runtime("Failed to acquire lock on proxy cache"))?;
        proxies.clear();
        Ok(())
    }
}
