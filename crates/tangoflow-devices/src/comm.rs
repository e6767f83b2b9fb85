/*!
 * Communication objects.
 *
 * A [`CommSchema`] declares named, typed fields. A [`Comm`] instantiates one
 * unbound [`Signal`] per field for a given device and is connected later,
 * either by the active connect scope or by calling [`Comm::connect`].
 */
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{debug, Instrument};

use tangoflow_core::logging::connect_span;

use crate::connector::Connector;
use crate::context::Context;
use crate::error::{DeviceError, Result};
use crate::proxy::{ProxyKind, ProxyRegistry};
use crate::signal::{Signal, SignalType};

/// Named set of typed fields
#[derive(Debug, Clone, PartialEq)]
pub struct CommSchema {
    name: String,
    fields: IndexMap<String, SignalType>,
}

impl CommSchema {
    /// Start declaring a schema
    pub fn builder<S: Into<String>>(name: S) -> CommSchemaBuilder {
        CommSchemaBuilder {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    /// Schema name, also the key of its connector
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared fields in declaration order
    pub fn fields(&self) -> &IndexMap<String, SignalType> {
        &self.fields
    }

    /// Type of one field
    pub fn field_type(&self, field: &str) -> Option<SignalType> {
        self.fields.get(field).copied()
    }
}

/// Builder for [`CommSchema`]
#[derive(Debug, Clone)]
pub struct CommSchemaBuilder {
    name: String,
    fields: Vec<(String, SignalType)>,
}

impl CommSchemaBuilder {
    /// Declare a field
    pub fn field<S: Into<String>>(mut self, name: S, signal_type: SignalType) -> Self {
        self.fields.push((name.into(), signal_type));
        self
    }

    /// Finish the schema; it must declare at least one field, each only once
    pub fn build(self) -> Result<Arc<CommSchema>> {
        if self.fields.is_empty() {
            return Err(DeviceError::invalid_schema(&self.name, "declares no fields"));
        }
        let mut fields = IndexMap::with_capacity(self.fields.len());
        for (field, signal_type) in self.fields {
            if fields.insert(field.clone(), signal_type).is_some() {
                return Err(DeviceError::invalid_schema(
                    &self.name,
                    format!("field {} declared twice", field),
                ));
            }
        }
        Ok(Arc::new(CommSchema {
            name: self.name,
            fields,
        }))
    }
}

/// Signals of one schema instantiated for one device
#[derive(Debug)]
pub struct Comm {
    device_name: String,
    schema: Arc<CommSchema>,
    signals: IndexMap<String, Arc<Signal>>,
    kind: ProxyKind,
    connector: Arc<dyn Connector>,
    proxies: Arc<ProxyRegistry>,
}

impl Comm {
    /// Instantiate a schema with the connector registered for it
    ///
    /// Inside a connect scope the comm is queued and connected when the
    /// scope finishes; otherwise call [`Comm::connect`].
    pub fn new(ctx: &Context, schema: Arc<CommSchema>, device: &str) -> Result<Arc<Comm>> {
        let connector = ctx.connectors().resolve(schema.name())?;
        Self::with_connector(ctx, schema, device, connector)
    }

    /// Instantiate a schema with a specific connector
    pub fn with_connector(
        ctx: &Context,
        schema: Arc<CommSchema>,
        device: &str,
        connector: Arc<dyn Connector>,
    ) -> Result<Arc<Comm>> {
        let signals = schema
            .fields()
            .iter()
            .map(|(field, signal_type)| (field.clone(), Arc::new(Signal::new(field.clone(), *signal_type))))
            .collect();

        let comm = Arc::new(Comm {
            device_name: device.to_string(),
            schema,
            signals,
            kind: ctx.mode()?,
            connector,
            proxies: Arc::clone(ctx.proxies()),
        });

        if ctx.schedule_connect(Arc::clone(&comm))? {
            debug!(device = %device, schema = %comm.schema.name(), "Scheduled connect");
        }
        Ok(comm)
    }

    /// Device name
    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    /// Schema this comm instantiates
    pub fn schema(&self) -> &CommSchema {
        &self.schema
    }

    /// Proxy kind captured at construction
    pub fn kind(&self) -> ProxyKind {
        self.kind
    }

    /// All signals keyed by field name
    pub fn signals(&self) -> &IndexMap<String, Arc<Signal>> {
        &self.signals
    }

    /// Signal of a field
    pub fn signal(&self, field: &str) -> Option<&Arc<Signal>> {
        self.signals.get(field)
    }

    /// Signal of a field, failing for undeclared names
    pub fn field(&self, field: &str) -> Result<Arc<Signal>> {
        self.signals.get(field).cloned().ok_or_else(|| {
            DeviceError::invalid_schema(self.schema.name(), format!("no field named {}", field))
        })
    }

    /// Whether every field is bound
    pub fn is_connected(&self) -> bool {
        self.signals.values().all(|signal| signal.is_connected())
    }

    /// Get the shared proxy and run the connector
    pub async fn connect(&self) -> Result<()> {
        async {
            let proxy = self.proxies.get_proxy(self.kind, &self.device_name).await?;
            self.connector.connect(self, proxy).await
        }
        .instrument(connect_span(&self.device_name))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_test::assert_ok;

    use crate::proxies::sim::SIM_DEVICE_NAME;

    fn motor_schema() -> Arc<CommSchema> {
        CommSchema::builder("MotorLike")
            .field("position", SignalType::ATTR_RW)
            .field("velocity", SignalType::ATTR_RW)
            .field("state", SignalType::ATTR_RW)
            .build()
            .unwrap()
    }

    #[test]
    fn test_schema_validation() {
        let err = CommSchema::builder("Empty").build().unwrap_err();
        assert!(matches!(err, DeviceError::InvalidSchema { .. }));

        let err = CommSchema::builder("Twice")
            .field("a", SignalType::ATTR_R)
            .field("a", SignalType::ATTR_RW)
            .build()
            .unwrap_err();
        assert!(matches!(err, DeviceError::InvalidSchema { .. }));
    }

    #[test]
    fn test_every_field_gets_a_signal() {
        let ctx = Context::default();
        let comm = Comm::new(&ctx, motor_schema(), SIM_DEVICE_NAME).unwrap();
        let fields: Vec<&str> = comm.signals().keys().map(String::as_str).collect();
        assert_eq!(fields, vec!["position", "velocity", "state"]);
        assert!(comm.signals().values().all(|s| !s.is_connected()));
        assert!(comm.field("missing").is_err());
        assert_eq!(comm.signal("state").unwrap().signal_type(), SignalType::ATTR_RW);
    }

    #[tokio::test]
    async fn test_direct_connect_outside_scope() {
        let ctx = Context::default();
        ctx.set_mode(ProxyKind::Simulated).unwrap();
        let comm = Comm::new(&ctx, motor_schema(), SIM_DEVICE_NAME).unwrap();
        assert_eq!(comm.kind(), ProxyKind::Simulated);
        assert!(!comm.is_connected());

        assert_ok!(comm.connect().await);
        assert!(comm.is_connected());
        assert_eq!(comm.signal("position").unwrap().endpoint().unwrap(), "Position");
        assert_ok!(comm.connect().await);
    }

    #[tokio::test]
    async fn test_unknown_device_fails_to_connect() {
        let ctx = Context::default();
        ctx.set_mode(ProxyKind::Simulated).unwrap();
        let comm = Comm::new(&ctx, motor_schema(), "sys/tg_test/1").unwrap();
        assert!(matches!(comm.connect().await, Err(DeviceError::DeviceNotFound(_))));
    }
}
