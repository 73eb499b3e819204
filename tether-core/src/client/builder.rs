//! Builder for [`OfflineAwareClient`]

use std::sync::Arc;

use crate::connection::ConnectionMonitor;
use crate::events::HookRegistry;
use crate::queue::OfflineQueue;
use crate::retry::RetryPolicy;
use crate::transport::ChatTransport;

use super::{ClientError, OfflineAwareClient};

/// Builder for creating an [`OfflineAwareClient`]
///
/// Use `OfflineAwareClient::builder(transport)`, configure it, and call
/// `.build()`. The agent name, monitor and queue are required.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tether_core::connection::{ConnectionMonitor, ManualConnectivity};
/// use tether_core::queue::{OfflineQueue, QueueConfig};
/// use tether_core::store::MemoryStore;
/// use tether_core::test_utils::MockTransport;
/// use tether_core::OfflineAwareClient;
///
/// let client = OfflineAwareClient::builder(MockTransport::new())
///     .agent_name("helper")
///     .monitor(ConnectionMonitor::new(Arc::new(ManualConnectivity::new(true))))
///     .queue(Arc::new(OfflineQueue::new(
///         Arc::new(MemoryStore::new()),
///         QueueConfig::default(),
///     )))
///     .build()
///     .unwrap();
///
/// assert_eq!(client.agent_name(), "helper");
/// ```
pub struct OfflineAwareClientBuilder<T: ChatTransport> {
    transport: T,
    agent_name: Option<String>,
    conversation_id: Option<String>,
    monitor: Option<ConnectionMonitor>,
    queue: Option<Arc<OfflineQueue>>,
    retry_policy: Option<RetryPolicy>,
}

impl<T: ChatTransport> OfflineAwareClientBuilder<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            agent_name: None,
            conversation_id: None,
            monitor: None,
            queue: None,
            retry_policy: None,
        }
    }

    /// Agent this client talks to; queued entries are tagged with it
    pub fn agent_name(mut self, name: impl Into<String>) -> Self {
        self.agent_name = Some(name.into());
        self
    }

    /// Conversation recorded on queued entries
    pub fn conversation_id(mut self, id: impl Into<String>) -> Self {
        self.conversation_id = Some(id.into());
        self
    }

    pub fn monitor(mut self, monitor: ConnectionMonitor) -> Self {
        self.monitor = Some(monitor);
        self
    }

    /// Queue to park requests in; may be shared between clients
    pub fn queue(mut self, queue: Arc<OfflineQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Retry one-shot requests with this policy before giving up
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = Some(policy);
        self
    }

    pub fn build(self) -> Result<OfflineAwareClient<T>, ClientError> {
        let agent_name = self
            .agent_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| ClientError::Config("No agent name configured".to_string()))?;
        let monitor = self.monitor.ok_or_else(|| {
            ClientError::Config("No connection monitor configured".to_string())
        })?;
        let queue = self
            .queue
            .ok_or_else(|| ClientError::Config("No offline queue configured".to_string()))?;

        Ok(OfflineAwareClient {
            transport: self.transport,
            agent_name,
            conversation_id: self.conversation_id,
            monitor,
            queue,
            retry_policy: self.retry_policy,
            hooks: HookRegistry::new(),
        })
    }
}
