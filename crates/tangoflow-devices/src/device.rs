/*!
 * Devices composed of signals.
 *
 * A [`Device`] wraps a [`Comm`] and exposes two groups of its signals: the
 * read group, reported by `read`/`describe`, and the configuration group,
 * reported by `read_configuration`/`describe_configuration` and changed by
 * `configure`. Results are keyed by `<prefix><key>` in group order, where
 * the prefix defaults to the device name followed by `-`.
 */
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::IndexMap;
use tracing::debug;

use tangoflow_core::types::{Descriptor, Reading, Value};
use tangoflow_core::utils::sanitize_name;

use crate::comm::Comm;
use crate::error::{DeviceError, Result};
use crate::signal::Signal;
use crate::status::Status;

/// Readings keyed by unique name
pub type Readings = IndexMap<String, Reading>;

/// Descriptors keyed by unique name
pub type Descriptors = IndexMap<String, Descriptor>;

/// Separator between device name and field in unique names
pub const NAME_SEPARATOR: &str = "-";

/// Ordered group of readable signals
#[derive(Debug, Clone, Default)]
pub struct SignalCollection {
    signals: IndexMap<String, Arc<Signal>>,
}

impl SignalCollection {
    /// Create an empty collection
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a signal under `key`; only readable signals are accepted
    pub fn insert<S: Into<String>>(&mut self, key: S, signal: Arc<Signal>) -> Result<()> {
        if !signal.signal_type().is_readable() {
            return Err(DeviceError::permission_denied(format!(
                "{} is not readable and cannot join a signal group",
                signal.name()
            )));
        }
        self.signals.insert(key.into(), signal);
        Ok(())
    }

    /// Signal stored under `key`
    pub fn get(&self, key: &str) -> Option<&Arc<Signal>> {
        self.signals.get(key)
    }

    /// Whether `key` is in the collection
    pub fn contains(&self, key: &str) -> bool {
        self.signals.contains_key(key)
    }

    /// Keys in insertion order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.signals.keys().map(String::as_str)
    }

    /// Number of signals
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Whether the collection is empty
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Read every signal concurrently
    pub async fn read(&self, prefix: &str) -> Result<Readings> {
        let readings = try_join_all(self.signals.iter().map(|(key, signal)| async move {
            Ok::<_, DeviceError>((format!("{}{}", prefix, key), signal.get_reading().await?))
        }))
        .await?;
        Ok(readings.into_iter().collect())
    }

    /// Describe every signal concurrently
    pub async fn describe(&self, prefix: &str) -> Result<Descriptors> {
        let descriptors = try_join_all(self.signals.iter().map(|(key, signal)| async move {
            Ok::<_, DeviceError>((format!("{}{}", prefix, key), signal.get_descriptor().await?))
        }))
        .await?;
        Ok(descriptors.into_iter().collect())
    }
}

/// Something that can be read and described
#[async_trait]
pub trait Readable: Send + Sync {
    /// Display name
    fn name(&self) -> &str;

    /// Read the read group
    async fn read(&self) -> Result<Readings>;

    /// Describe the read group
    async fn describe(&self) -> Result<Descriptors>;
}

/// Something with a configuration group
#[async_trait]
pub trait Configurable: Readable {
    /// Read the configuration group
    async fn read_configuration(&self) -> Result<Readings>;

    /// Describe the configuration group
    async fn describe_configuration(&self) -> Result<Descriptors>;

    /// Write alternating field names and values; returns the configuration
    /// before and after
    async fn configure(&self, args: Vec<Value>) -> Result<(Readings, Readings)>;
}

/// Something that can be moved to a setpoint
pub trait Movable: Configurable {
    /// Start moving to `value`; `timeout` bounds the whole operation
    fn set(&self, value: Value, timeout: Option<Duration>) -> Status;
}

/// Signals of a comm arranged into read and configuration groups
#[derive(Debug, Clone)]
pub struct Device {
    name: String,
    prefix: String,
    comm: Arc<Comm>,
    read_signals: SignalCollection,
    conf_signals: SignalCollection,
}

impl Device {
    /// Wrap a comm
    ///
    /// Without a name, the device name with every character outside
    /// `[a-zA-Z0-9]` replaced by `-` is used.
    pub fn new(comm: Arc<Comm>, name: Option<&str>) -> Self {
        let name = name
            .map(str::to_string)
            .unwrap_or_else(|| sanitize_name(comm.device_name()));
        let prefix = format!("{}{}", name, NAME_SEPARATOR);
        Self {
            name,
            prefix,
            comm,
            read_signals: SignalCollection::new(),
            conf_signals: SignalCollection::new(),
        }
    }

    /// Replace the unique-name prefix
    pub fn with_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Add comm fields to the read group
    pub fn with_read_signals(mut self, fields: &[&str]) -> Result<Self> {
        for field in fields {
            self.read_signals.insert(*field, self.comm.field(field)?)?;
        }
        Ok(self)
    }

    /// Add one signal to the read group under `key`
    pub fn with_read_signal<S: Into<String>>(mut self, key: S, signal: Arc<Signal>) -> Result<Self> {
        self.read_signals.insert(key, signal)?;
        Ok(self)
    }

    /// Add comm fields to the configuration group
    pub fn with_conf_signals(mut self, fields: &[&str]) -> Result<Self> {
        for field in fields {
            self.conf_signals.insert(*field, self.comm.field(field)?)?;
        }
        Ok(self)
    }

    /// Add one signal to the configuration group under `key`
    pub fn with_conf_signal<S: Into<String>>(mut self, key: S, signal: Arc<Signal>) -> Result<Self> {
        self.conf_signals.insert(key, signal)?;
        Ok(self)
    }

    /// Unique-name prefix
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Underlying comm
    pub fn comm(&self) -> &Arc<Comm> {
        &self.comm
    }

    /// Read group
    pub fn read_signals(&self) -> &SignalCollection {
        &self.read_signals
    }

    /// Configuration group
    pub fn conf_signals(&self) -> &SignalCollection {
        &self.conf_signals
    }

    /// Key under which `key` appears in results
    pub fn unique_name(&self, key: &str) -> String {
        format!("{}{}", self.prefix, key)
    }
}

#[async_trait]
impl Readable for Device {
    fn name(&self) -> &str {
        &self.name
    }

    async fn read(&self) -> Result<Readings> {
        self.read_signals.read(&self.prefix).await
    }

    async fn describe(&self) -> Result<Descriptors> {
        self.read_signals.describe(&self.prefix).await
    }
}

#[async_trait]
impl Configurable for Device {
    async fn read_configuration(&self) -> Result<Readings> {
        self.conf_signals.read(&self.prefix).await
    }

    async fn describe_configuration(&self) -> Result<Descriptors> {
        self.conf_signals.describe(&self.prefix).await
    }

    /// Every pair is checked before the first write, so an unknown or
    /// non-configuration field rejects the whole call and nothing is
    /// written. This is stricter than applying pairs until one fails.
    /// Writes then run in order, and a value the device itself refuses
    /// leaves the earlier writes in place.
    async fn configure(&self, args: Vec<Value>) -> Result<(Readings, Readings)> {
        if args.len() % 2 != 0 {
            return Err(DeviceError::WrongNumberOfArguments(args.len()));
        }

        let old = self.read_configuration().await?;

        let mut writes = Vec::with_capacity(args.len() / 2);
        let mut args = args.into_iter();
        while let (Some(field), Some(value)) = (args.next(), args.next()) {
            let key = match field {
                Value::String(key) => key,
                other => {
                    return Err(DeviceError::InvalidValueType {
                        name: "configure".to_string(),
                        expected: "field name".to_string(),
                        actual: other.type_name().to_string(),
                    })
                }
            };
            let signal = match self.conf_signals.get(&key) {
                Some(signal) if old.contains_key(&self.unique_name(&key)) => Arc::clone(signal),
                _ => return Err(DeviceError::NotConfigurable(self.unique_name(&key))),
            };
            writes.push((key, signal, value));
        }

        for (key, signal, value) in writes {
            debug!(device = %self.name, field = %key, value = %value, "Configuring");
            signal.put(value).await?;
        }

        let new = self.read_configuration().await?;
        Ok((old, new))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use crate::comm::CommSchema;
    use crate::context::Context;
    use crate::proxies::sim::SIM_DEVICE_NAME;
    use crate::proxy::ProxyKind;
    use crate::signal::SignalType;

    async fn connected_device() -> Device {
        let ctx = Context::default();
        let schema = CommSchema::builder("DeviceTest")
            .field("position", SignalType::ATTR_RW)
            .field("velocity", SignalType::ATTR_RW)
            .field("state", SignalType::ATTR_RW)
            .field("stop", SignalType::COMMAND)
            .build()
            .unwrap();
        let comm = ctx
            .scoped(ProxyKind::Simulated, |ctx| Comm::new(ctx, schema, SIM_DEVICE_NAME))
            .await
            .unwrap();
        Device::new(comm, None)
            .with_read_signals(&["position", "state"])
            .unwrap()
            .with_conf_signals(&["velocity"])
            .unwrap()
    }

    #[tokio::test]
    async fn test_default_name_and_prefix() {
        let device = connected_device().await;
        assert_eq!(device.name(), "mock-device-name");
        assert_eq!(device.prefix(), "mock-device-name-");
        assert_eq!(device.unique_name("position"), "mock-device-name-position");
    }

    #[tokio::test]
    async fn test_read_and_describe_keep_group_order() {
        let device = connected_device().await;
        let reading = device.read().await.unwrap();
        let keys: Vec<&str> = reading.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["mock-device-name-position", "mock-device-name-state"]);
        assert_eq!(reading["mock-device-name-position"].value, Value::Float(0.0));

        let descriptors = device.describe().await.unwrap();
        assert_eq!(
            descriptors["mock-device-name-position"].source,
            "tango://localhost:10000/mock/device/name/Position"
        );

        let conf = device.describe_configuration().await.unwrap();
        assert_eq!(conf.len(), 1);
        assert!(conf.contains_key("mock-device-name-velocity"));
    }

    #[tokio::test]
    async fn test_custom_prefix() {
        let device = connected_device().await.with_prefix("m1:");
        let reading = device.read_configuration().await.unwrap();
        assert!(reading.contains_key("m1:velocity"));
    }

    #[tokio::test]
    async fn test_configure_returns_old_and_new() {
        let device = connected_device().await;
        let (old, new) = device
            .configure(vec![Value::from("velocity"), Value::Float(12.5)])
            .await
            .unwrap();
        assert_eq!(old["mock-device-name-velocity"].value, Value::Float(0.0));
        assert_eq!(new["mock-device-name-velocity"].value, Value::Float(12.5));
    }

    #[tokio::test]
    async fn test_configure_rejections() {
        let device = connected_device().await;

        let err = device.configure(vec![Value::from("velocity")]).await.unwrap_err();
        assert!(matches!(err, DeviceError::WrongNumberOfArguments(1)));

        let err = device
            .configure(vec![Value::from("position"), Value::Float(1.0)])
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotConfigurable(_)));
        assert_eq!(device.comm().field("position").unwrap().get_value().await.unwrap(), Value::Float(0.0));

        let err = device
            .configure(vec![
                Value::from("velocity"),
                Value::Float(3.0),
                Value::from("state"),
                Value::Float(1.0),
            ])
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::NotConfigurable(_)));
        let velocity = device.comm().field("velocity").unwrap();
        assert_eq!(velocity.get_value().await.unwrap(), Value::Float(0.0));

        assert_ok!(device.configure(Vec::new()).await);
    }

    #[tokio::test]
    async fn test_groups_only_accept_readable_signals() {
        let device = connected_device().await;
        let err = device.clone().with_read_signals(&["stop"]).unwrap_err();
        assert!(matches!(err, DeviceError::PermissionDenied(_)));
        assert!(device.with_conf_signals(&["missing"]).is_err());
    }
}
