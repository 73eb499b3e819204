//! Offline-aware chat client
//!
//! [`OfflineAwareClient`] decorates a [`ChatTransport`]. While the
//! [`ConnectionMonitor`] reports the service reachable, requests pass
//! straight through, after any backlog this client's agent left in the
//! [`OfflineQueue`] has been replayed. While offline, or when a request fails
//! with a network error, the request is queued and the caller gets
//! [`ClientError::Queued`] instead of a raw failure.

mod builder;

pub use builder::OfflineAwareClientBuilder;

use std::sync::Arc;

use futures::stream::BoxStream;
use futures::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::classifier::{classify, AgentError, ErrorCategory};
use crate::connection::ConnectionMonitor;
use crate::events::{HookId, HookRegistry, TetherEvent, TetherHook};
use crate::queue::{OfflineQueue, QueueError, QueuedMessage};
use crate::retry::{RetryError, RetryPolicy};
use crate::transport::ChatTransport;
use crate::types::{Completion, CompletionOptions, Message, StreamEvent};

/// Errors returned by [`OfflineAwareClient`]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The request was stored for delivery once connectivity returns
    ///
    /// This is not a failure; hosts usually show the message as pending.
    #[error("Request queued for later delivery ({message_id})")]
    Queued {
        /// Id of the queue entry holding the request
        message_id: String,
    },

    /// The request failed and was not queued
    #[error(transparent)]
    Agent(#[from] AgentError),

    /// The request could not be queued
    #[error("Offline queue error: {0}")]
    Queue(#[from] QueueError),

    /// The caller cancelled the request
    #[error("Request cancelled")]
    Cancelled,

    /// The client was built without a required piece
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl ClientError {
    /// Returns true if the request was queued rather than failed
    pub fn is_queued(&self) -> bool {
        matches!(self, Self::Queued { .. })
    }

    /// Id of the queue entry, for [`ClientError::Queued`]
    pub fn queued_message_id(&self) -> Option<&str> {
        match self {
            Self::Queued { message_id } => Some(message_id),
            _ => None,
        }
    }

    /// The classified failure, for [`ClientError::Agent`]
    pub fn agent_error(&self) -> Option<&AgentError> {
        match self {
            Self::Agent(error) => Some(error),
            _ => None,
        }
    }
}

/// Outcome of one [`OfflineAwareClient::process_queued_messages`] run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainSummary {
    /// Queued requests delivered
    pub delivered: usize,
    /// Delivery failures recorded; a failure ends the run
    pub failed: usize,
}

/// Stream of text deltas from [`OfflineAwareClient::complete_streaming`]
///
/// A mid-stream failure is yielded once as a classified error and ends the
/// stream. Streams are never resumed.
pub type TextStream = BoxStream<'static, Result<String, AgentError>>;

/// A [`ChatTransport`] wrapper that queues requests while offline
pub struct OfflineAwareClient<T: ChatTransport> {
    transport: T,
    agent_name: String,
    conversation_id: Option<String>,
    monitor: ConnectionMonitor,
    queue: Arc<OfflineQueue>,
    retry_policy: Option<RetryPolicy>,
    hooks: HookRegistry,
}

impl<T: ChatTransport> std::fmt::Debug for OfflineAwareClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineAwareClient")
            .field("agent_name", &self.agent_name)
            .field("conversation_id", &self.conversation_id)
            .field("monitor", &self.monitor)
            .field("retry_policy", &self.retry_policy)
            .finish_non_exhaustive()
    }
}

impl<T: ChatTransport> OfflineAwareClient<T> {
    pub fn builder(transport: T) -> OfflineAwareClientBuilder<T> {
        OfflineAwareClientBuilder::new(transport)
    }

    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn monitor(&self) -> &ConnectionMonitor {
        &self.monitor
    }

    pub fn queue(&self) -> &Arc<OfflineQueue> {
        &self.queue
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Observe deliveries of queued requests
    pub fn add_hook(&self, hook: impl TetherHook + 'static) -> HookId {
        self.hooks.add(hook)
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Send a request and wait for the whole completion
    ///
    /// Offline, the request is queued without touching the transport. Online,
    /// this agent's backlog is replayed first; a network failure of the
    /// request itself queues it. Either way the caller gets
    /// [`ClientError::Queued`].
    pub async fn complete(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<Completion, ClientError> {
        if !self.monitor.is_connected().await {
            return Err(self.defer(messages, "offline").await);
        }

        self.process_queued_messages(&cancel).await;

        match self.send(messages.clone(), options, &cancel).await {
            Ok(completion) => Ok(completion),
            Err(error) => Err(self.escalate(error, messages).await),
        }
    }

    /// Send a request and stream the response as text deltas
    ///
    /// Only the opening of the stream can be queued; once text is flowing,
    /// failures are yielded on the stream.
    pub async fn complete_streaming(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<TextStream, ClientError> {
        if !self.monitor.is_connected().await {
            return Err(self.defer(messages, "offline").await);
        }

        self.process_queued_messages(&cancel).await;

        let mut events = match self
            .transport
            .complete_streaming(messages.clone(), options, cancel.clone())
            .await
        {
            Ok(events) => events,
            Err(fault) => {
                let error = classify(&fault, Some(&cancel));
                return Err(self.escalate(error, messages).await);
            }
        };

        let stream = async_stream::stream! {
            while let Some(event) = events.next().await {
                match event {
                    Ok(StreamEvent::TextDelta(delta)) => yield Ok(delta),
                    Ok(StreamEvent::Stop { .. }) => break,
                    Err(fault) => {
                        yield Err(classify(&fault, Some(&cancel)));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    /// Replay this agent's queued requests, oldest first
    ///
    /// Stops at the first failure so later requests never overtake an
    /// undelivered earlier one. Entries queued by other agents are left in
    /// place. Never fails; queue storage problems are logged and end the run.
    ///
    /// Only one drain per agent runs at a time on a queue; an overlapping
    /// call waits for it and then finds the delivered entries gone.
    pub async fn process_queued_messages(&self, cancel: &CancellationToken) -> DrainSummary {
        let mut summary = DrainSummary::default();
        let _delivery = tokio::select! {
            guard = self.queue.lock_delivery(&self.agent_name) => guard,
            _ = cancel.cancelled() => return summary,
        };

        while !cancel.is_cancelled() {
            let next = match self.queue.next_for_agent(&self.agent_name).await {
                Ok(Some(next)) => next,
                Ok(None) => break,
                Err(e) => {
                    log::warn!("cannot read offline queue: {}", e);
                    break;
                }
            };

            match self.send(next.messages.clone(), None, cancel).await {
                Ok(completion) => {
                    summary.delivered += 1;
                    let stored = self.queue.mark_delivered(&next.id).await;
                    self.announce_delivery(&next, completion);
                    if let Err(e) = stored {
                        log::warn!("cannot record delivery of {}: {}", next.id, e);
                        break;
                    }
                }
                Err(error) if error.is_cancelled() => break,
                Err(error) => {
                    summary.failed += 1;
                    log::debug!("queued message {} not delivered: {}", next.id, error);
                    if let Err(e) = self
                        .queue
                        .mark_failed(&next.id, Some(error.to_string()))
                        .await
                    {
                        log::warn!("cannot record failure of {}: {}", next.id, e);
                    }
                    break;
                }
            }
        }

        if summary.delivered > 0 || summary.failed > 0 {
            log::debug!(
                "drained offline queue for {}: {} delivered, {} failed",
                self.agent_name,
                summary.delivered,
                summary.failed
            );
        }
        summary
    }

    /// One-shot request, through the retry policy when configured
    async fn send(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: &CancellationToken,
    ) -> Result<Completion, AgentError> {
        let Some(policy) = &self.retry_policy else {
            return self
                .transport
                .complete(messages, options, cancel.clone())
                .await
                .map_err(|fault| classify(&fault, Some(cancel)));
        };

        policy
            .execute(
                |token| self.transport.complete(messages.clone(), options.clone(), token),
                cancel,
            )
            .await
            .map_err(|e| match e {
                RetryError::Cancelled => {
                    AgentError::new(ErrorCategory::Cancelled, "Request cancelled by caller")
                }
                RetryError::Failed { error, .. } => error,
            })
    }

    /// Turn a failed send into the caller-facing error, queueing network failures
    async fn escalate(&self, error: AgentError, messages: Vec<Message>) -> ClientError {
        if error.is_network() {
            log::warn!("network failure, queueing request: {}", error);
            self.defer(messages, "network failure").await
        } else if error.is_cancelled() {
            ClientError::Cancelled
        } else {
            ClientError::Agent(error)
        }
    }

    async fn defer(&self, messages: Vec<Message>, reason: &str) -> ClientError {
        match self
            .queue
            .enqueue_request(&self.agent_name, self.conversation_id.as_deref(), messages)
            .await
        {
            Ok(queued) => {
                log::info!(
                    "queued request {} for agent {} ({})",
                    queued.id,
                    self.agent_name,
                    reason
                );
                ClientError::Queued {
                    message_id: queued.id,
                }
            }
            Err(e) => ClientError::Queue(e),
        }
    }

    fn announce_delivery(&self, message: &QueuedMessage, completion: Completion) {
        self.hooks.emit(TetherEvent::QueuedMessageDelivered {
            message_id: message.id.clone(),
            agent_name: message.agent_name.clone(),
            completion,
        });
    }
}
