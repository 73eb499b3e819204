use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::broadcast;

/// Errors raised while reading a connectivity source
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConnectivityError {
    /// The platform could not report its connectivity
    #[error("Connectivity probe failed: {0}")]
    Probe(String),
}

/// The platform's online/offline signal
///
/// Implementations wrap whatever the host has: an OS network-change API, a
/// health-check endpoint, or a flag the UI flips.
#[async_trait]
pub trait ConnectivitySource: Send + Sync {
    /// Read the current connectivity
    async fn is_online(&self) -> Result<bool, ConnectivityError>;

    /// Subscribe to online (`true`) / offline (`false`) transitions
    ///
    /// Dropping the receiver unsubscribes.
    fn subscribe(&self) -> broadcast::Receiver<bool>;
}

/// A connectivity source driven by explicit calls
///
/// Useful for hosts that learn about connectivity from elsewhere, and for
/// tests.
///
/// ```
/// use tether_core::connection::{ConnectivitySource, ManualConnectivity};
///
/// # tokio_test::block_on(async {
/// let source = ManualConnectivity::new(false);
/// let mut changes = source.subscribe();
///
/// source.set_online(true);
/// assert!(source.is_online().await.unwrap());
/// assert!(changes.recv().await.unwrap());
/// # });
/// ```
#[derive(Debug)]
pub struct ManualConnectivity {
    online: AtomicBool,
    failure: parking_lot::Mutex<Option<String>>,
    sender: broadcast::Sender<bool>,
}

impl ManualConnectivity {
    pub fn new(online: bool) -> Self {
        let (sender, _) = broadcast::channel(16);
        Self {
            online: AtomicBool::new(online),
            failure: parking_lot::Mutex::new(None),
            sender,
        }
    }

    /// Change connectivity, notifying subscribers if the value changed
    pub fn set_online(&self, online: bool) {
        let previous = self.online.swap(online, Ordering::SeqCst);
        if previous != online {
            // No subscribers is fine
            let _ = self.sender.send(online);
        }
    }

    /// Make subsequent [`is_online`](ConnectivitySource::is_online) calls fail
    /// with `reason`, or succeed again with `None`
    pub fn set_failure(&self, reason: Option<impl Into<String>>) {
        *self.failure.lock() = reason.map(Into::into);
    }
}

#[async_trait]
impl ConnectivitySource for ManualConnectivity {
    async fn is_online(&self) -> Result<bool, ConnectivityError> {
        if let Some(reason) = self.failure.lock().clone() {
            return Err(ConnectivityError::Probe(reason));
        }
        Ok(self.online.load(Ordering::SeqCst))
    }

    fn subscribe(&self) -> broadcast::Receiver<bool> {
        self.sender.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_only_changes_are_broadcast() {
        let source = ManualConnectivity::new(true);
        let mut changes = source.subscribe();

        source.set_online(true);
        source.set_online(false);
        source.set_online(false);
        source.set_online(true);

        assert!(!changes.recv().await.unwrap());
        assert!(changes.recv().await.unwrap());
        assert!(changes.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failure_mode() {
        let source = ManualConnectivity::new(true);

        source.set_failure(Some("no adapter"));
        assert!(matches!(
            source.is_online().await,
            Err(ConnectivityError::Probe(reason)) if reason == "no adapter"
        ));

        source.set_failure(None::<String>);
        assert!(source.is_online().await.unwrap());
    }
}
