/*!
 * Handles on background device operations.
 */
use std::future::{pending, Future};
use std::sync::Mutex;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::debug;

use tangoflow_core::error::Error as CoreError;

use crate::error::Result;

/// Cancellation signal handed to the work behind a [`Status`]
#[derive(Debug)]
pub struct Cancellation(oneshot::Receiver<()>);

impl Cancellation {
    /// Resolve once [`Status::cancel`] is called
    ///
    /// Never resolves if the status is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        if (&mut self.0).await.is_err() {
            pending::<()>().await;
        }
    }
}

/// A running operation that can be awaited or cancelled
#[derive(Debug)]
pub struct Status {
    cancel: Mutex<Option<oneshot::Sender<()>>>,
    handle: JoinHandle<Result<()>>,
}

impl Status {
    /// Spawn `work` on the runtime
    pub fn spawn<F, Fut>(work: F) -> Self
    where
        F: FnOnce(Cancellation) -> Fut,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(work(Cancellation(rx)));
        Self {
            cancel: Mutex::new(Some(tx)),
            handle,
        }
    }

    /// Whether the operation has finished
    pub fn is_done(&self) -> bool {
        self.handle.is_finished()
    }

    /// Ask the operation to stop; returns false if it was already asked or done
    pub fn cancel(&self) -> bool {
        let sender = match self.cancel.lock() {
            Ok(mut cancel) => cancel.take(),
            Err(_) => None,
        };
        match sender {
            Some(tx) => {
                let sent = tx.send(()).is_ok();
                debug!(sent, "Status cancelled");
                sent
            }
            None => false,
        }
    }

    /// Wait for the operation to finish
    pub async fn wait(self) -> Result<()> {
        self.handle
            .await
            .map_err(|e| CoreError::runtime(format!("Status task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::error::DeviceError;

    #[tokio::test]
    async fn test_wait_returns_outcome() {
        let status = Status::spawn(|_| async { Ok(()) });
        assert!(status.wait().await.is_ok());

        let status = Status::spawn(|_| async { Err(DeviceError::Timeout("late".to_string())) });
        assert!(matches!(status.wait().await, Err(DeviceError::Timeout(_))));
    }

    #[tokio::test]
    async fn test_cancel() {
        let status = Status::spawn(|mut cancellation| async move {
            cancellation.cancelled().await;
            Err(DeviceError::Cancelled("stopped".to_string()))
        });
        assert!(!status.is_done());
        assert!(status.cancel());
        assert!(!status.cancel());
        assert!(matches!(status.wait().await, Err(DeviceError::Cancelled(_))));
    }

    #[tokio::test]
    async fn test_dropped_status_does_not_cancel() {
        let (tx, rx) = oneshot::channel();
        let status = Status::spawn(|mut cancellation| async move {
            tokio::select! {
                _ = cancellation.cancelled() => {
                    let _ = tx.send("cancelled");
                }
                _ = tokio::time::sleep(Duration::from_millis(20)) => {
                    let _ = tx.send("finished");
                }
            }
            Ok(())
        });
        drop(status);
        assert_eq!(rx.await.unwrap(), "finished");
    }
}
