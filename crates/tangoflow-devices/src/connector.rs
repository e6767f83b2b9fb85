/*!
 * Resolution of schema fields to remote endpoints.
 *
 * A [`Connector`] binds every unconnected signal of a [`Comm`] to an endpoint
 * of the device proxy. Three strategies ship with the crate:
 *
 * - [`ConnectSimilarlyNamed`], the default, matches field names against the
 *   device's endpoint lists after normalising both sides.
 * - [`ExplicitConnector`] uses a caller-supplied mapping.
 * - [`ConnectWithoutReading`] checks exact names against the endpoint lists
 *   and binds without reading anything from the device.
 *
 * Connectors are picked per schema name through the [`ConnectorRegistry`].
 */
use std::collections::HashMap;
use std::fmt::{self, Debug};
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use futures::future::try_join_all;
use indexmap::IndexMap;
use tracing::{debug, trace};

use tangoflow_core::error::Error as CoreError;
use tangoflow_core::utils::normalize_name;

use crate::comm::{Comm, CommSchema};
use crate::error::{DeviceError, Result};
use crate::proxy::DeviceProxy;
use crate::signal::{Signal, SignalKind};

/// Strategy binding a comm's fields to endpoints of a proxy
#[async_trait]
pub trait Connector: Send + Sync + Debug {
    /// Connect every unconnected signal of `comm`
    async fn connect(&self, comm: &Comm, proxy: Arc<dyn DeviceProxy>) -> Result<()>;
}

async fn connect_all(
    comm: &Comm,
    proxy: &Arc<dyn DeviceProxy>,
    scheduled: Vec<(&Arc<Signal>, String)>,
) -> Result<()> {
    try_join_all(scheduled.iter().map(|(signal, endpoint)| {
        signal.connect_with(Arc::clone(proxy), comm.device_name(), endpoint)
    }))
    .await?;
    Ok(())
}

async fn endpoint_names(proxy: &dyn DeviceProxy, kind: SignalKind) -> Result<Vec<String>> {
    match kind {
        SignalKind::Attribute => proxy.get_attribute_list().await,
        SignalKind::Command => proxy.get_command_list().await,
        SignalKind::Pipe => proxy.get_pipe_list().await,
    }
}

/// Map normalised names to every remote name producing them
fn index_names(names: Vec<String>) -> HashMap<String, Vec<String>> {
    let mut index: HashMap<String, Vec<String>> = HashMap::new();
    for name in names {
        index.entry(normalize_name(&name)).or_default().push(name);
    }
    index
}

/// Default connector: match fields to endpoints by normalised name
///
/// Names are compared after dropping non-alphanumeric characters and
/// lower-casing, so a field `position` binds to `Position` and `my_attr` to
/// `MyAttr`. Only exact equality of normalised names counts. Endpoint lists
/// are fetched lazily, at most once per kind for one call, and not at all
/// when every field is already connected. Every field is matched before any
/// connect is issued, so a missing or ambiguous name fails the whole pass
/// without binding anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConnectSimilarlyNamed;

#[async_trait]
impl Connector for ConnectSimilarlyNamed {
    async fn connect(&self, comm: &Comm, proxy: Arc<dyn DeviceProxy>) -> Result<()> {
        let pending: Vec<&Arc<Signal>> = comm
            .signals()
            .values()
            .filter(|signal| !signal.is_connected())
            .collect();
        if pending.is_empty() {
            trace!(device = %comm.device_name(), "All fields already connected");
            return Ok(());
        }

        let mut lookups: HashMap<SignalKind, HashMap<String, Vec<String>>> = HashMap::new();
        let mut scheduled = Vec::with_capacity(pending.len());
        for signal in pending {
            let kind = signal.kind();
            if !lookups.contains_key(&kind) {
                let names = endpoint_names(proxy.as_ref(), kind).await?;
                lookups.insert(kind, index_names(names));
            }

            let candidates = lookups
                .get(&kind)
                .and_then(|lookup| lookup.get(&normalize_name(signal.name())));
            let endpoint = match candidates.map(Vec::as_slice) {
                None | Some([]) => {
                    return Err(DeviceError::signal_not_found(
                        comm.device_name(),
                        kind,
                        signal.name(),
                    ))
                }
                Some([endpoint]) => endpoint.clone(),
                Some(many) => {
                    return Err(DeviceError::AmbiguousSignal {
                        device: comm.device_name().to_string(),
                        field: signal.name().to_string(),
                        candidates: many.to_vec(),
                    })
                }
            };

            debug!(
                device = %comm.device_name(),
                field = %signal.name(),
                endpoint = %endpoint,
                "Resolved field"
            );
            scheduled.push((signal, endpoint));
        }

        connect_all(comm, &proxy, scheduled).await
    }
}

/// Connector that binds by exact name without reading the endpoints
///
/// Each field binds to the endpoint given by [`map`](Self::map), or to an
/// endpoint carrying the field's own name. Names are checked against the
/// endpoint lists, fetched at most once per kind, and a missing name fails
/// the pass before anything is bound. No attribute or pipe is read, so a
/// device whose values are slow or unavailable still connects.
#[derive(Debug, Clone, Default)]
pub struct ConnectWithoutReading {
    names: IndexMap<String, String>,
}

impl ConnectWithoutReading {
    /// Create a connector binding every field under its own name
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `field` to `endpoint` instead of its own name
    pub fn map<F: Into<String>, E: Into<String>>(mut self, field: F, endpoint: E) -> Self {
        self.names.insert(field.into(), endpoint.into());
        self
    }
}

#[async_trait]
impl Connector for ConnectWithoutReading {
    async fn connect(&self, comm: &Comm, proxy: Arc<dyn DeviceProxy>) -> Result<()> {
        let mut lists: HashMap<SignalKind, Vec<String>> = HashMap::new();
        let mut scheduled = Vec::new();
        for (field, signal) in comm.signals() {
            if signal.is_connected() {
                continue;
            }
            let kind = signal.kind();
            if !lists.contains_key(&kind) {
                lists.insert(kind, endpoint_names(proxy.as_ref(), kind).await?);
            }

            let endpoint = self.names.get(field).unwrap_or(field);
            let known = lists
                .get(&kind)
                .map_or(false, |names| names.iter().any(|name| name == endpoint));
            if !known {
                return Err(DeviceError::signal_not_found(comm.device_name(), kind, endpoint));
            }
            scheduled.push((signal, endpoint));
        }

        for (signal, endpoint) in scheduled {
            signal.bind(Arc::clone(&proxy), comm.device_name(), endpoint);
        }
        Ok(())
    }
}

/// Computes the endpoint of a field with the whole schema in view
pub type EndpointMapper = Arc<dyn Fn(&CommSchema, &str) -> Option<String> + Send + Sync>;

/// Connector with caller-supplied endpoint names
///
/// Fixed entries from [`map`](Self::map) win over the mapper. Fields neither
/// maps are bound under their own name, or handed to
/// [`ConnectSimilarlyNamed`] when `resolve_rest` is set.
#[derive(Clone, Default)]
pub struct ExplicitConnector {
    mapping: IndexMap<String, String>,
    mapper: Option<EndpointMapper>,
    resolve_rest: bool,
}

impl ExplicitConnector {
    /// Create a connector with an empty mapping
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind `field` to `endpoint`
    pub fn map<F: Into<String>, E: Into<String>>(mut self, field: F, endpoint: E) -> Self {
        self.mapping.insert(field.into(), endpoint.into());
        self
    }

    /// Compute endpoints for fields missing from the fixed mapping
    pub fn with_mapper<M>(mut self, mapper: M) -> Self
    where
        M: Fn(&CommSchema, &str) -> Option<String> + Send + Sync + 'static,
    {
        self.mapper = Some(Arc::new(mapper));
        self
    }

    /// Resolve unmapped fields by name matching instead of binding them verbatim
    pub fn resolve_rest(mut self, resolve_rest: bool) -> Self {
        self.resolve_rest = resolve_rest;
        self
    }

    fn endpoint_for(&self, schema: &CommSchema, field: &str) -> Option<String> {
        self.mapping
            .get(field)
            .cloned()
            .or_else(|| self.mapper.as_ref().and_then(|mapper| mapper(schema, field)))
    }
}

impl Debug for ExplicitConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExplicitConnector")
            .field("mapping", &self.mapping)
            .field("mapper", &self.mapper.is_some())
            .field("resolve_rest", &self.resolve_rest)
            .finish()
    }
}

#[async_trait]
impl Connector for ExplicitConnector {
    async fn connect(&self, comm: &Comm, proxy: Arc<dyn DeviceProxy>) -> Result<()> {
        let mut scheduled = Vec::new();
        for (field, signal) in comm.signals() {
            if signal.is_connected() {
                continue;
            }
            match self.endpoint_for(comm.schema(), field) {
                Some(endpoint) => scheduled.push((signal, endpoint)),
                None if self.resolve_rest => {}
                None => scheduled.push((signal, field.clone())),
            }
        }

        connect_all(comm, &proxy, scheduled).await?;

        if self.resolve_rest {
            ConnectSimilarlyNamed.connect(comm, proxy).await?;
        }
        Ok(())
    }
}

/// Connector strategy per schema name
#[derive(Debug, Default)]
pub struct ConnectorRegistry {
    connectors: RwLock<HashMap<String, Arc<dyn Connector>>>,
}

impl ConnectorRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the connector for a schema, replacing any previous one
    pub fn register<S: Into<String>>(&self, schema: S, connector: Arc<dyn Connector>) -> Result<()> {
        let mut connectors = self
            .connectors
            .write()
            .map_err(|_| CoreError::runtime("Failed to acquire write lock on connector registry"))?;
        connectors.insert(schema.into(), connector);
        Ok(())
    }

    /// Register the connector for a schema unless one is present
    ///
    /// Returns whether the connector was inserted.
    pub fn register_if_absent<S: Into<String>>(
        &self,
        schema: S,
        connector: Arc<dyn Connector>,
    ) -> Result<bool> {
        let mut connectors = self
            .connectors
            .write()
            .map_err(|_| CoreError::runtime("Failed to acquire write lock on connector registry"))?;
        let schema = schema.into();
        if connectors.contains_key(&schema) {
            return Ok(false);
        }
        connectors.insert(schema, connector);
        Ok(true)
    }

    /// Connector for a schema; [`ConnectSimilarlyNamed`] when none is registered
    pub fn resolve(&self, schema: &str) -> Result<Arc<dyn Connector>> {
        let connectors = self
            .connectors
            .read()
            .map_err(|_| CoreError::runtime("Failed to acquire read lock on connector registry"))?;
        match connectors.get(schema) {
            Some(connector) => Ok(Arc::clone(connector)),
            None => {
                debug!(schema = %schema, "No connector registered, using ConnectSimilarlyNamed");
                Ok(Arc::new(ConnectSimilarlyNamed))
            }
        }
    }
}
