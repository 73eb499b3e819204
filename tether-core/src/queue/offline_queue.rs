use super::message::{self, QueuedMessage, DEFAULT_MAX_ATTEMPTS};
use crate::events::{HookId, HookRegistry, TetherEvent, TetherHook};
use crate::store::{KeyValueStore, StoreError};
use crate::types::Message;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard, OwnedMutexGuard};

/// Default store key for the serialized queue
pub const DEFAULT_STORAGE_KEY: &str = "tether.offline_queue";

/// Errors raised by the offline queue
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The backing store failed
    #[error("Queue storage error: {0}")]
    Store(#[from] StoreError),

    /// The persisted queue could not be read or written as JSON
    #[error("Queue serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The message has no delivery attempts left and was not queued
    #[error("Message {0} has no delivery attempts left")]
    Expired(String),
}

/// Why a message left the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DequeueReason {
    /// Popped by [`OfflineQueue::try_dequeue`]
    Dequeued,
    /// Confirmed by [`OfflineQueue::mark_delivered`]
    Delivered,
    /// Attempt budget used up
    Expired,
    /// Dropped to make room for a newer message
    Evicted,
}

/// Result of [`OfflineQueue::mark_failed`]
#[derive(Debug, Clone, PartialEq)]
pub enum FailureOutcome {
    /// The message stays queued at its position with updated bookkeeping
    Retained(QueuedMessage),
    /// The message ran out of attempts and was removed
    Expired(QueuedMessage),
    /// No message with that id was queued
    NotFound,
}

/// Offline queue configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Maximum number of queued messages (default: 100)
    pub capacity: usize,
    /// Attempt budget given to messages built by
    /// [`OfflineQueue::enqueue_request`] (default: 5)
    pub max_attempts: u32,
    /// Key the queue is stored under
    pub storage_key: String,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            storage_key: DEFAULT_STORAGE_KEY.to_string(),
        }
    }
}

#[derive(Default)]
struct QueueState {
    loaded: bool,
    messages: VecDeque<QueuedMessage>,
}

/// Durable FIFO of requests waiting for connectivity
///
/// The queue is loaded from its [`KeyValueStore`] once, then kept in memory;
/// every mutation rewrites the whole snapshot. All operations go through one
/// async mutex, so concurrent callers never see a half-applied change.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tether_core::queue::{OfflineQueue, QueueConfig};
/// use tether_core::store::MemoryStore;
/// use tether_core::Message;
///
/// # tokio_test::block_on(async {
/// let queue = OfflineQueue::new(Arc::new(MemoryStore::new()), QueueConfig::default());
/// let queued = queue
///     .enqueue_request("helper", None, vec![Message::user("hello")])
///     .await
///     .unwrap();
///
/// assert_eq!(queue.peek().await.unwrap().map(|m| m.id), Some(queued.id));
/// # });
/// ```
pub struct OfflineQueue {
    store: Arc<dyn KeyValueStore>,
    config: QueueConfig,
    state: Mutex<QueueState>,
    delivery_locks: parking_lot::Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hooks: HookRegistry,
}

impl std::fmt::Debug for OfflineQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OfflineQueue")
            .field("config", &self.config)
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl OfflineQueue {
    pub fn new(store: Arc<dyn KeyValueStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            state: Mutex::new(QueueState::default()),
            delivery_locks: parking_lot::Mutex::new(HashMap::new()),
            hooks: HookRegistry::new(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Observe enqueue/dequeue events
    pub fn add_hook(&self, hook: impl TetherHook + 'static) -> HookId {
        self.hooks.add(hook)
    }

    pub fn remove_hook(&self, id: HookId) -> bool {
        self.hooks.remove(id)
    }

    /// Load the persisted queue. Later calls are no-ops.
    ///
    /// Every other operation loads lazily, so calling this is optional; it
    /// lets a host surface storage errors at startup.
    pub async fn initialize(&self) -> Result<(), QueueError> {
        self.lock_loaded().await.map(|_| ())
    }

    /// Append a message, evicting the oldest entries if the queue is full
    ///
    /// A message with no attempts left is refused with [`QueueError::Expired`].
    pub async fn enqueue(&self, message: QueuedMessage) -> Result<(), QueueError> {
        if message.is_expired() {
            log::warn!(
                "refusing to queue message {} for agent {}: {} of {} attempts used",
                message.id,
                message.agent_name,
                message.attempt_count,
                message.max_attempts
            );
            return Err(QueueError::Expired(message.id));
        }
        let mut events = Vec::new();
        let result = {
            let mut state = self.lock_loaded().await?;
            let capacity = self.config.capacity.max(1);
            while state.messages.len() >= capacity {
                let Some(evicted) = state.messages.pop_front() else {
                    break;
                };
                log::warn!(
                    "offline queue full ({}), evicting message {} for agent {}",
                    capacity,
                    evicted.id,
                    evicted.agent_name
                );
                events.push(TetherEvent::MessageDequeued {
                    message: evicted,
                    reason: DequeueReason::Evicted,
                });
            }

            log::debug!(
                "queued message {} for agent {}",
                message.id,
                message.agent_name
            );
            state.messages.push_back(message.clone());
            events.push(TetherEvent::MessageEnqueued { message });
            self.persist(&state).await
        };
        self.emit_all(events);
        result
    }

    /// Build and enqueue a request with the configured attempt budget
    pub async fn enqueue_request(
        &self,
        agent_name: &str,
        conversation_id: Option<&str>,
        messages: Vec<Message>,
    ) -> Result<QueuedMessage, QueueError> {
        let mut message =
            QueuedMessage::new(agent_name, messages).with_max_attempts(self.config.max_attempts);
        message.conversation_id = conversation_id.map(str::to_string);
        self.enqueue(message.clone()).await?;
        Ok(message)
    }

    /// Remove and return the oldest message
    pub async fn try_dequeue(&self) -> Result<Option<QueuedMessage>, QueueError> {
        let (message, result) = {
            let mut state = self.lock_loaded().await?;
            match state.messages.pop_front() {
                Some(message) => {
                    let result = self.persist(&state).await;
                    (Some(message), result)
                }
                None => (None, Ok(())),
            }
        };
        if let Some(message) = &message {
            self.hooks.emit(TetherEvent::MessageDequeued {
                message: message.clone(),
                reason: DequeueReason::Dequeued,
            });
        }
        result.map(|_| message)
    }

    /// The oldest message, without removing it
    pub async fn peek(&self) -> Result<Option<QueuedMessage>, QueueError> {
        let state = self.lock_loaded().await?;
        Ok(state.messages.front().cloned())
    }

    /// The oldest message addressed to `agent_name`
    pub async fn next_for_agent(
        &self,
        agent_name: &str,
    ) -> Result<Option<QueuedMessage>, QueueError> {
        let state = self.lock_loaded().await?;
        Ok(state
            .messages
            .iter()
            .find(|m| m.agent_name == agent_name)
            .cloned())
    }

    /// Exclusive right to deliver `agent_name`'s backlog
    ///
    /// Drains hold this for their whole run, so overlapping drains for one
    /// agent, from one client or several sharing this queue, never send the
    /// same entry twice. Other agents are not blocked.
    pub async fn lock_delivery(&self, agent_name: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .delivery_locks
            .lock()
            .entry(agent_name.to_string())
            .or_default()
            .clone();
        lock.lock_owned().await
    }

    /// Remove a delivered message. Returns false if it was not queued.
    pub async fn mark_delivered(&self, id: &str) -> Result<bool, QueueError> {
        let (removed, result) = {
            let mut state = self.lock_loaded().await?;
            match state.messages.iter().position(|m| m.id == id) {
                Some(index) => {
                    let removed = state.messages.remove(index);
                    let result = self.persist(&state).await;
                    (removed, result)
                }
                None => (None, Ok(())),
            }
        };
        let found = removed.is_some();
        if let Some(message) = removed {
            log::debug!("message {} delivered", message.id);
            self.hooks.emit(TetherEvent::MessageDequeued {
                message,
                reason: DequeueReason::Delivered,
            });
        }
        result.map(|_| found)
    }

    /// Record a failed delivery attempt
    ///
    /// The message keeps its queue position unless this failure used up its
    /// attempt budget, in which case it is removed.
    pub async fn mark_failed(
        &self,
        id: &str,
        error: Option<String>,
    ) -> Result<FailureOutcome, QueueError> {
        let (outcome, result) = {
            let mut state = self.lock_loaded().await?;
            let Some(index) = state.messages.iter().position(|m| m.id == id) else {
                return Ok(FailureOutcome::NotFound);
            };

            let message = &mut state.messages[index];
            message.record_failure(error);
            let outcome = if message.is_expired() {
                let expired = state.messages.remove(index);
                expired.map_or(FailureOutcome::NotFound, FailureOutcome::Expired)
            } else {
                FailureOutcome::Retained(message.clone())
            };
            (outcome, self.persist(&state).await)
        };

        if let FailureOutcome::Expired(message) = &outcome {
            log::warn!(
                "message {} for agent {} expired after {} attempt(s)",
                message.id,
                message.agent_name,
                message.attempt_count
            );
            self.hooks.emit(TetherEvent::MessageDequeued {
                message: message.clone(),
                reason: DequeueReason::Expired,
            });
        }
        result.map(|_| outcome)
    }

    /// Copies of all queued messages, oldest first
    pub async fn get_all(&self) -> Result<Vec<QueuedMessage>, QueueError> {
        let state = self.lock_loaded().await?;
        Ok(state.messages.iter().cloned().collect())
    }

    /// Drop every queued message
    pub async fn clear(&self) -> Result<(), QueueError> {
        let mut state = self.lock_loaded().await?;
        state.messages.clear();
        self.persist(&state).await
    }

    pub async fn len(&self) -> Result<usize, QueueError> {
        Ok(self.lock_loaded().await?.messages.len())
    }

    pub async fn is_empty(&self) -> Result<bool, QueueError> {
        Ok(self.lock_loaded().await?.messages.is_empty())
    }

    /// Take the lock, loading the persisted snapshot on first use
    async fn lock_loaded(&self) -> Result<MutexGuard<'_, QueueState>, QueueError> {
        let mut state = self.state.lock().await;
        if !state.loaded {
            state.messages = self.load().await?;
            state.loaded = true;
        }
        Ok(state)
    }

    async fn load(&self) -> Result<VecDeque<QueuedMessage>, QueueError> {
        let Some(json) = self.store.get(&self.config.storage_key).await? else {
            return Ok(VecDeque::new());
        };
        if json.trim().is_empty() {
            return Ok(VecDeque::new());
        }

        let mut messages: VecDeque<QueuedMessage> = message::from_json(&json)?
            .into_iter()
            .filter(|m| {
                if m.is_expired() {
                    log::warn!("dropping expired message {} found on load", m.id);
                }
                !m.is_expired()
            })
            .collect();

        let capacity = self.config.capacity.max(1);
        while messages.len() > capacity {
            if let Some(dropped) = messages.pop_front() {
                log::warn!("dropping message {} beyond queue capacity on load", dropped.id);
            }
        }

        log::debug!("loaded {} queued message(s)", messages.len());
        Ok(messages)
    }

    async fn persist(&self, state: &QueueState) -> Result<(), QueueError> {
        let json = message::to_json(&state.messages)?;
        if let Err(e) = self.store.set(&self.config.storage_key, &json).await {
            log::warn!("failed to persist offline queue: {}", e);
            return Err(e.into());
        }
        Ok(())
    }

    fn emit_all(&self, events: Vec<TetherEvent>) {
        for event in events {
            self.hooks.emit(event);
        }
    }
}
