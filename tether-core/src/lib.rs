//! # Tether
//!
//! A resilience layer for AI-agent chat sessions on flaky networks.
//!
//! Tether wraps the transport a chat front-end uses to talk to its agent
//! service. While the service is reachable requests pass straight through;
//! while it is not, requests are parked in a durable offline queue and
//! replayed in order once connectivity returns.
//!
//! ## Quick Start
//!
//! ```rust
//! use std::sync::Arc;
//! use tether_core::connection::{ConnectionMonitor, ManualConnectivity};
//! use tether_core::queue::{OfflineQueue, QueueConfig};
//! use tether_core::store::MemoryStore;
//! use tether_core::test_utils::MockTransport;
//! use tether_core::{CancellationToken, Message, OfflineAwareClient};
//!
//! # tokio_test::block_on(async {
//! let connectivity = Arc::new(ManualConnectivity::new(false));
//! let queue = Arc::new(OfflineQueue::new(
//!     Arc::new(MemoryStore::new()),
//!     QueueConfig::default(),
//! ));
//!
//! let client = OfflineAwareClient::builder(MockTransport::new().with_text("Hello!"))
//!     .agent_name("helper")
//!     .monitor(ConnectionMonitor::new(connectivity.clone()))
//!     .queue(queue.clone())
//!     .build()?;
//!
//! // Offline: the request is queued, not lost
//! let err = client
//!     .complete(vec![Message::user("Hi")], None, CancellationToken::new())
//!     .await
//!     .unwrap_err();
//! assert!(err.is_queued());
//! assert_eq!(queue.len().await?, 1);
//! # Ok::<(), tether_core::Error>(())
//! # });
//! ```
//!
//! ## Components
//!
//! - **Classifier** ([`classifier`]): turns transport faults and HTTP
//!   statuses into an [`AgentError`] with a category, retryability and a
//!   retry-after hint
//! - **Retry policy** ([`retry`]): exponential backoff with jitter, honoring
//!   retry-after hints, with a separate cap for server errors
//! - **Connection monitor** ([`connection`]): connectivity state machine with
//!   a backoff reconnection loop
//! - **Offline queue** ([`queue`]): durable FIFO of undelivered requests
//!   stored through a [`KeyValueStore`](store::KeyValueStore)
//! - **Offline-aware client** ([`client`]): the decorator tying it together
//!
//! ## Feature Flags
//!
//! - `test-utils` - [`test_utils::MockTransport`] and
//!   [`test_utils::EventCollector`]

pub mod classifier;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod queue;
pub mod retry;
pub mod store;
pub mod transport;
pub mod types;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use classifier::{classify, classify_status, parse_retry_after, AgentError, ErrorCategory};
pub use client::{ClientError, DrainSummary, OfflineAwareClient, OfflineAwareClientBuilder, TextStream};
pub use config::{load_config_file, ConfigError, TetherConfig};
pub use connection::{
    ConnectionMonitor, ConnectionMonitorConfig, ConnectionState, ConnectivityError,
    ConnectivitySource, ManualConnectivity,
};
pub use error::{Error, Result};
pub use events::{HookId, TetherEvent, TetherHook};
pub use queue::{DequeueReason, FailureOutcome, OfflineQueue, QueueConfig, QueueError, QueuedMessage};
pub use retry::{RetryError, RetryInfo, RetryPolicy, RetryPolicyOptions};
pub use store::{FileStore, KeyValueStore, MemoryStore, StoreError};
pub use transport::{ChatTransport, EventStream, TransportError};
pub use types::{
    Completion, CompletionOptions, ContentBlock, Message, Role, StreamEvent, TokenUsage,
};

pub use tokio_util::sync::CancellationToken;
