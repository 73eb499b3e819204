//! Common test utilities shared across test files.
//!
//! Items here may not be used by all test files, hence the module-level allow.
#![allow(dead_code)]

use std::sync::Arc;

use tether_core::connection::{ConnectionMonitor, ConnectionMonitorConfig, ManualConnectivity};
use tether_core::queue::{OfflineQueue, QueueConfig};
use tether_core::store::{KeyValueStore, MemoryStore};
use tether_core::test_utils::MockTransport;
use tether_core::{CancellationToken, ClientError, Completion, Message, OfflineAwareClient};

/// A client wired to a manual connectivity switch and a scripted transport.
pub struct TestRig {
    pub connectivity: Arc<ManualConnectivity>,
    pub monitor: ConnectionMonitor,
    pub queue: Arc<OfflineQueue>,
    pub transport: MockTransport,
    pub client: OfflineAwareClient<MockTransport>,
}

impl TestRig {
    pub fn new(online: bool) -> Self {
        Self::with_store(online, Arc::new(MemoryStore::new()))
    }

    pub fn with_store(online: bool, store: Arc<dyn KeyValueStore>) -> Self {
        let connectivity = Arc::new(ManualConnectivity::new(online));
        let monitor = ConnectionMonitor::with_config(
            connectivity.clone(),
            ConnectionMonitorConfig {
                auto_reconnect: false,
                ..Default::default()
            },
        );
        let queue = Arc::new(OfflineQueue::new(store, QueueConfig::default()));
        let transport = MockTransport::new();
        let client = Self::client_for("helper", &transport, &monitor, &queue);

        Self {
            connectivity,
            monitor,
            queue,
            transport,
            client,
        }
    }

    /// Another client sharing this rig's transport, monitor and queue
    pub fn client_for(
        agent: &str,
        transport: &MockTransport,
        monitor: &ConnectionMonitor,
        queue: &Arc<OfflineQueue>,
    ) -> OfflineAwareClient<MockTransport> {
        OfflineAwareClient::builder(transport.clone())
            .agent_name(agent)
            .monitor(monitor.clone())
            .queue(queue.clone())
            .build()
            .expect("client should build")
    }

    /// Flip connectivity and let the monitor observe it
    pub async fn set_online(&self, online: bool) {
        self.connectivity.set_online(online);
        self.monitor.check_connection().await;
    }

    pub async fn send(&self, text: &str) -> Result<Completion, ClientError> {
        self.client
            .complete(vec![Message::user(text)], None, CancellationToken::new())
            .await
    }
}
