/*!
 * Change subscriptions on a signal.
 */
use std::fmt;
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use tangoflow_core::error::Error as CoreError;

use crate::error::{DeviceError, Result};
use crate::proxy::{DeviceProxy, EventCallback, EventKind, SubscriptionId};

/// Handle on at most one change subscription
///
/// `subscribe` is a no-op while subscribed and `close` is a no-op while
/// closed, so a monitor can be reopened after closing. A subscribe request
/// runs to completion even if the caller stops waiting for it, and `close`
/// waits for it, so an abandoned subscribe is still closed. Dropping a
/// monitor closes it in the background when a tokio runtime is available.
pub struct Monitor {
    proxy: Arc<dyn DeviceProxy>,
    endpoint: String,
    callback: EventCallback,
    subscription: Arc<Mutex<Option<SubscriptionId>>>,
}

impl Monitor {
    pub(crate) fn new(proxy: Arc<dyn DeviceProxy>, endpoint: String, callback: EventCallback) -> Self {
        Self {
            proxy,
            endpoint,
            callback,
            subscription: Arc::new(Mutex::new(None)),
        }
    }

    /// Open the subscription unless one is already held
    pub async fn subscribe(&self) -> Result<()> {
        let mut subscription = Arc::clone(&self.subscription).lock_owned().await;
        if subscription.is_some() {
            return Ok(());
        }

        let proxy = Arc::clone(&self.proxy);
        let endpoint = self.endpoint.clone();
        let callback = Arc::clone(&self.callback);
        let request = tokio::spawn(async move {
            let id = proxy
                .subscribe_event(&endpoint, EventKind::Change, callback)
                .await?;
            debug!(endpoint = %endpoint, subscription = %id, "Monitor opened");
            *subscription = Some(id);
            Ok::<_, DeviceError>(())
        });

        request
            .await
            .map_err(|e| CoreError::runtime(format!("Monitor subscribe task failed: {}", e)))?
    }

    /// Cancel the subscription if one is held
    pub async fn close(&self) -> Result<()> {
        let mut subscription = self.subscription.lock().await;
        if let Some(id) = subscription.take() {
            self.proxy.unsubscribe_event(id).await?;
            debug!(endpoint = %self.endpoint, subscription = %id, "Monitor closed");
        }
        Ok(())
    }

    /// Whether a subscription is currently held
    pub async fn is_subscribed(&self) -> bool {
        self.subscription.lock().await.is_some()
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        if let Ok(subscription) = self.subscription.try_lock() {
            if subscription.is_none() {
                return;
            }
        }
        let Ok(runtime) = Handle::try_current() else {
            warn!(endpoint = %self.endpoint, "Monitor dropped outside a runtime, subscription left open");
            return;
        };

        let proxy = Arc::clone(&self.proxy);
        let subscription = Arc::clone(&self.subscription);
        let endpoint = self.endpoint.clone();
        runtime.spawn(async move {
            let id = subscription.lock().await.take();
            if let Some(id) = id {
                match proxy.unsubscribe_event(id).await {
                    Ok(()) => debug!(endpoint = %endpoint, subscription = %id, "Dropped monitor closed"),
                    Err(e) => warn!(endpoint = %endpoint, error = %e, "Failed to close dropped monitor"),
                }
            }
        });
    }
}

impl fmt::Debug for Monitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Monitor")
            .field("device", &self.proxy.name())
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use crate::proxies::sim::{SimProxy, SIM_DEVICE_NAME};

    #[tokio::test]
    async fn test_double_subscribe_and_close_are_no_ops() {
        let sim = Arc::new(
            SimProxy::builder(SIM_DEVICE_NAME)
                .with_poll_interval(Duration::from_millis(5))
                .with_motor_layout()
                .build(),
        );
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let callback: EventCallback = Arc::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let monitor = Monitor::new(sim.clone(), "Position".to_string(), callback);
        monitor.subscribe().await.unwrap();
        monitor.subscribe().await.unwrap();
        assert_eq!(sim.active_subscriptions(), 1);
        assert!(monitor.is_subscribed().await);

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        monitor.close().await.unwrap();
        monitor.close().await.unwrap();
        assert_eq!(sim.active_subscriptions(), 0);
        assert!(!monitor.is_subscribed().await);

        monitor.subscribe().await.unwrap();
        assert_eq!(sim.active_subscriptions(), 1);
        monitor.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_abandoned_subscribe_is_closed() {
        let sim = Arc::new(
            SimProxy::builder(SIM_DEVICE_NAME)
                .with_subscribe_delay(Duration::from_millis(100))
                .with_motor_layout()
                .build(),
        );
        let callback: EventCallback = Arc::new(|_| {});
        let monitor = Monitor::new(sim.clone(), "State".to_string(), callback);

        let waited = tokio::time::timeout(Duration::from_millis(10), monitor.subscribe()).await;
        assert!(waited.is_err());
        assert_eq!(sim.active_subscriptions(), 1);

        monitor.close().await.unwrap();
        assert_eq!(sim.active_subscriptions(), 0);
        assert!(!monitor.is_subscribed().await);
    }

    #[tokio::test]
    async fn test_drop_closes_subscription() {
        let sim = Arc::new(
            SimProxy::builder(SIM_DEVICE_NAME)
                .with_poll_interval(Duration::from_millis(5))
                .with_motor_layout()
                .build(),
        );
        let callback: EventCallback = Arc::new(|_| {});
        let monitor = Monitor::new(sim.clone(), "Position".to_string(), callback);
        monitor.subscribe().await.unwrap();
        assert_eq!(sim.active_subscriptions(), 1);

        drop(monitor);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(sim.active_subscriptions(), 0);
    }
}
