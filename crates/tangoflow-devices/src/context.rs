/*!
 * Shared state for connecting devices.
 *
 * A [`Context`] owns the configuration, the proxy cache, the connector
 * registry and the deferred-connection scheduler. It is a cheap handle:
 * clones share the same state.
 *
 * Comms built while a [`ConnectScope`] is open are queued, and finishing the
 * scope connects all of them concurrently.
 *
 * ```no_run
 * # use std::sync::Arc;
 * # use tangoflow_devices::prelude::*;
 * # async fn demo(schema: Arc<CommSchema>) -> tangoflow_devices::Result<()> {
 * let ctx = Context::default();
 * let scope = ctx.begin_connect(ProxyKind::Simulated)?;
 * let comm = Comm::new(&ctx, schema, "mock/device/name")?;
 * scope.finish().await?;
 * assert!(comm.is_connected());
 * # Ok(())
 * # }
 * ```
 */
use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::try_join_all;
use tracing::{debug, info, warn};

use tangoflow_core::config::{Config, SharedConfig};
use tangoflow_core::error::Error as CoreError;
use tangoflow_core::utils::with_timeout;

use crate::comm::Comm;
use crate::connector::ConnectorRegistry;
use crate::error::{DeviceError, Result};
use crate::proxy::{ProxyKind, ProxyRegistry};

#[derive(Debug)]
struct SchedulerState {
    active: bool,
    mode: ProxyKind,
    saved_mode: ProxyKind,
    pending: Vec<Arc<Comm>>,
}

#[derive(Debug)]
struct ContextInner {
    config: SharedConfig,
    proxies: Arc<ProxyRegistry>,
    connectors: ConnectorRegistry,
    scheduler: Mutex<SchedulerState>,
}

/// Handle on the shared connection state
#[derive(Debug, Clone)]
pub struct Context {
    inner: Arc<ContextInner>,
}

impl Context {
    /// Create a context with the simulated proxy provider registered
    pub fn new(config: Config) -> Self {
        let proxies = ProxyRegistry::with_simulation(config.simulation.clone());
        let mode = ProxyKind::from_simulated(config.connection.simulated);
        Self {
            inner: Arc::new(ContextInner {
                config: SharedConfig::new(config),
                proxies: Arc::new(proxies),
                connectors: ConnectorRegistry::new(),
                scheduler: Mutex::new(SchedulerState {
                    active: false,
                    mode,
                    saved_mode: mode,
                    pending: Vec::new(),
                }),
            }),
        }
    }

    /// Configuration
    pub fn config(&self) -> &Config {
        self.inner.config.get()
    }

    /// Proxy providers and cache
    pub fn proxies(&self) -> &Arc<ProxyRegistry> {
        &self.inner.proxies
    }

    /// Connector strategies per schema
    pub fn connectors(&self) -> &ConnectorRegistry {
        &self.inner.connectors
    }

    fn scheduler(&self) -> Result<MutexGuard<'_, SchedulerState>> {
        self.inner
            .scheduler
            .lock()
            .map_err(|_| CoreError::runtime("Failed to acquire lock on connect scheduler").into())
    }

    /// Proxy kind new comms will request
    pub fn mode(&self) -> Result<ProxyKind> {
        Ok(self.scheduler()?.mode)
    }

    /// Change the proxy kind outside of a scope
    pub fn set_mode(&self, mode: ProxyKind) -> Result<()> {
        let mut scheduler = self.scheduler()?;
        if scheduler.active {
            return Err(DeviceError::ScopeActive);
        }
        scheduler.mode = mode;
        scheduler.saved_mode = mode;
        Ok(())
    }

    /// Whether a connect scope is open
    pub fn is_scope_active(&self) -> bool {
        self.scheduler().map(|s| s.active).unwrap_or(false)
    }

    /// Open a connect scope using `mode` for comms built inside it
    ///
    /// Scopes do not nest.
    pub fn begin_connect(&self, mode: ProxyKind) -> Result<ConnectScope> {
        let mut scheduler = self.scheduler()?;
        if scheduler.active {
            return Err(DeviceError::ScopeActive);
        }
        scheduler.active = true;
        scheduler.saved_mode = scheduler.mode;
        scheduler.mode = mode;
        scheduler.pending.clear();
        debug!(mode = %mode, "Connect scope opened");
        Ok(ConnectScope {
            context: self.clone(),
            finished: false,
        })
    }

    /// Run `build` inside a connect scope, then connect everything it built
    ///
    /// If `build` fails, the queued comms are discarded unconnected.
    pub async fn scoped<F, T>(&self, mode: ProxyKind, build: F) -> Result<T>
    where
        F: FnOnce(&Context) -> Result<T>,
    {
        let scope = self.begin_connect(mode)?;
        let built = build(self)?;
        scope.finish().await?;
        Ok(built)
    }

    /// Queue a comm on the open scope; returns whether it was queued
    pub(crate) fn schedule_connect(&self, comm: Arc<Comm>) -> Result<bool> {
        let mut scheduler = self.scheduler()?;
        if !scheduler.active {
            return Ok(false);
        }
        scheduler.pending.push(comm);
        Ok(true)
    }

    fn end_scope(&self) -> Result<Vec<Arc<Comm>>> {
        let mut scheduler = self.scheduler()?;
        scheduler.active = false;
        scheduler.mode = scheduler.saved_mode;
        Ok(std::mem::take(&mut scheduler.pending))
    }

    /// Drop every cached proxy
    pub fn shutdown(&self) -> Result<()> {
        self.inner.proxies.clear()?;
        info!("Context shut down");
        Ok(())
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

/// An open connect scope
///
/// Call [`finish`](Self::finish) to connect the queued comms. Dropping the
/// scope instead discards them.
#[must_use = "a connect scope does nothing unless finished"]
#[derive(Debug)]
pub struct ConnectScope {
    context: Context,
    finished: bool,
}

impl ConnectScope {
    /// Close the scope and connect every queued comm concurrently
    ///
    /// Returns the first failure. The previous mode is restored either way.
    pub async fn finish(mut self) -> Result<()> {
        self.finished = true;
        let pending = self.context.end_scope()?;
        let count = pending.len();

        let connect_all = async {
            try_join_all(pending.iter().map(|comm| comm.connect())).await?;
            Ok::<_, DeviceError>(())
        };
        match self.context.config().connection.connect_timeout() {
            Some(limit) => with_timeout(limit, connect_all).await?,
            None => connect_all.await?,
        }

        info!(count, "Connect scope finished");
        Ok(())
    }
}

impl Drop for ConnectScope {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        match self.context.end_scope() {
            Ok(pending) if !pending.is_empty() => {
                warn!(count = pending.len(), "Connect scope dropped before finishing, discarding queued comms")
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Failed to close dropped connect scope"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use async_trait::async_trait;
    use tokio_test::{assert_err, assert_ok};

    use crate::comm::CommSchema;
    use crate::proxies::sim::{SimProxy, SIM_DEVICE_NAME};
    use crate::proxy::{DeviceProxy, ProxyProvider};
    use crate::signal::SignalType;

    fn schema(fields: &[&str]) -> Arc<CommSchema> {
        fields
            .iter()
            .fold(CommSchema::builder("ScopeTest"), |b, f| b.field(*f, SignalType::ATTR_RW))
            .build()
            .unwrap()
    }

    #[test_log::test(tokio::test)]
    async fn test_scope_connects_all_pending() {
        let ctx = Context::default();
        assert_eq!(ctx.mode().unwrap(), ProxyKind::Live);

        let scope = ctx.begin_connect(ProxyKind::Simulated).unwrap();
        assert!(ctx.is_scope_active());
        let a = Comm::new(&ctx, schema(&["position"]), SIM_DEVICE_NAME).unwrap();
        let b = Comm::new(&ctx, schema(&["velocity", "state"]), SIM_DEVICE_NAME).unwrap();
        assert!(!a.is_connected());
        assert_eq!(a.kind(), ProxyKind::Simulated);

        assert_ok!(scope.finish().await);
        assert!(a.is_connected());
        assert!(b.is_connected());
        assert!(!ctx.is_scope_active());
        assert_eq!(ctx.mode().unwrap(), ProxyKind::Live);
        assert_eq!(ctx.proxies().cached_count(), 1);
    }

    #[tokio::test]
    async fn test_scope_propagates_first_failure() {
        let ctx = Context::default();
        let scope = ctx.begin_connect(ProxyKind::Simulated).unwrap();
        let _good = Comm::new(&ctx, schema(&["position"]), SIM_DEVICE_NAME).unwrap();
        let _bad = Comm::new(&ctx, schema(&["foo"]), SIM_DEVICE_NAME).unwrap();
        let err = scope.finish().await.unwrap_err();
        assert!(matches!(err, DeviceError::SignalNotFound { .. }));
        assert!(!ctx.is_scope_active());
    }

    #[tokio::test]
    async fn test_scopes_do_not_nest() {
        let ctx = Context::default();
        let scope = ctx.begin_connect(ProxyKind::Simulated).unwrap();
        assert!(matches!(ctx.begin_connect(ProxyKind::Live), Err(DeviceError::ScopeActive)));
        assert_err!(ctx.set_mode(ProxyKind::Live));
        assert_ok!(scope.finish().await);
        assert_ok!(ctx.begin_connect(ProxyKind::Live).unwrap().finish().await);
    }

    #[test_log::test(tokio::test)]
    async fn test_dropped_scope_discards_pending() {
        let ctx = Context::default();
        let comm = {
            let _scope = ctx.begin_connect(ProxyKind::Simulated).unwrap();
            Comm::new(&ctx, schema(&["position"]), SIM_DEVICE_NAME).unwrap()
        };
        assert!(!ctx.is_scope_active());

        let scope = ctx.begin_connect(ProxyKind::Simulated).unwrap();
        assert_ok!(scope.finish().await);
        assert!(!comm.is_connected());
    }

    #[tokio::test]
    async fn test_comms_outside_scope_are_not_scheduled() {
        let ctx = Context::default();
        ctx.set_mode(ProxyKind::Simulated).unwrap();
        let comm = Comm::new(&ctx, schema(&["position"]), SIM_DEVICE_NAME).unwrap();
        assert_ok!(ctx.begin_connect(ProxyKind::Simulated).unwrap().finish().await);
        assert!(!comm.is_connected());
    }

    #[tokio::test]
    async fn test_scoped_builder() {
        let ctx = Context::default();
        let comm = ctx
            .scoped(ProxyKind::Simulated, |ctx| {
                Comm::new(ctx, schema(&["position", "velocity"]), SIM_DEVICE_NAME)
            })
            .await
            .unwrap();
        assert!(comm.is_connected());

        let err = ctx
            .scoped(ProxyKind::Simulated, |ctx| {
                Comm::new(ctx, schema(&["position"]), SIM_DEVICE_NAME)?;
                Err::<(), _>(DeviceError::Cancelled("builder gave up".to_string()))
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DeviceError::Cancelled(_)));
        assert!(!ctx.is_scope_active());
    }

    #[derive(Debug)]
    struct SlowProvider;

    #[async_trait]
    impl ProxyProvider for SlowProvider {
        fn kind(&self) -> ProxyKind {
            ProxyKind::Live
        }

        async fn create_proxy(&self, device: &str) -> Result<Arc<dyn DeviceProxy>> {
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(Arc::new(
                SimProxy::builder(device).with_attribute("Position", 0.0).build(),
            ))
        }
    }

    #[tokio::test]
    async fn test_connect_timeout() {
        let mut config = Config::default();
        config.connection.connect_timeout_ms = 20;
        let ctx = Context::new(config);
        ctx.proxies().register_provider(SlowProvider).unwrap();

        let scope = ctx.begin_connect(ProxyKind::Live).unwrap();
        let comm = Comm::new(&ctx, schema(&["position"]), "slow/device/name").unwrap();
        let err = scope.finish().await.unwrap_err();
        assert!(matches!(err, DeviceError::Timeout(_)));
        assert!(!comm.is_connected());
    }

    #[tokio::test]
    async fn test_shutdown_clears_proxies() {
        let ctx = Context::default();
        let comm = ctx
            .scoped(ProxyKind::Simulated, |ctx| {
                Comm::new(ctx, schema(&["position"]), SIM_DEVICE_NAME)
            })
            .await
            .unwrap();
        assert!(comm.is_connected());
        assert_eq!(ctx.proxies().cached_count(), 1);
        ctx.shutdown().unwrap();
        assert_eq!(ctx.proxies().cached_count(), 0);
    }
}
