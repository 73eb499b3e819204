use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::connection::ConnectionState;
use crate::queue::{DequeueReason, QueuedMessage};
use crate::types::Completion;

/// Events emitted by the resilience layer
///
/// These let a host application follow connectivity and queue activity,
/// e.g. to show a "reconnecting" banner or a pending-message badge.
#[derive(Debug, Clone)]
pub enum TetherEvent {
    // ===== Connectivity =====
    /// The connection monitor moved to a different state
    ConnectionStateChanged {
        /// State before the transition
        previous: ConnectionState,
        /// State after the transition
        current: ConnectionState,
        /// Free-text reason for the transition
        reason: String,
        /// When the transition happened
        timestamp: DateTime<Utc>,
    },

    // ===== Offline Queue =====
    /// A message was appended to the offline queue
    MessageEnqueued {
        /// Copy of the queued message
        message: QueuedMessage,
    },

    /// A message left the offline queue
    MessageDequeued {
        /// Copy of the message as it was when removed
        message: QueuedMessage,
        /// Why it left
        reason: DequeueReason,
    },

    /// A previously queued request was delivered during a drain
    QueuedMessageDelivered {
        /// Id of the delivered queue entry
        message_id: String,
        /// Agent the request belonged to
        agent_name: String,
        /// The transport's reply
        completion: Completion,
    },
}

impl TetherEvent {
    /// Stable snake_case name of the event variant
    pub fn name(&self) -> &'static str {
        match self {
            TetherEvent::ConnectionStateChanged { .. } => "connection_state_changed",
            TetherEvent::MessageEnqueued { .. } => "message_enqueued",
            TetherEvent::MessageDequeued { .. } => "message_dequeued",
            TetherEvent::QueuedMessageDelivered { .. } => "queued_message_delivered",
        }
    }
}

/// Hook for observing resilience events
///
/// # Example
/// ```
/// use tether_core::events::{TetherEvent, TetherHook};
///
/// struct Banner;
///
/// impl TetherHook for Banner {
///     fn on_event(&self, event: &TetherEvent) {
///         if let TetherEvent::ConnectionStateChanged { current, .. } = event {
///             println!("connection: {}", current);
///         }
///     }
/// }
/// ```
pub trait TetherHook: Send + Sync {
    /// Called when an event occurs
    fn on_event(&self, event: &TetherEvent);
}

/// Blanket implementation for closures
impl<F> TetherHook for F
where
    F: Fn(&TetherEvent) + Send + Sync,
{
    fn on_event(&self, event: &TetherEvent) {
        self(event)
    }
}

/// Unique identifier for a registered hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HookId(u64);

/// A set of registered hooks
///
/// Hooks are called synchronously, in registration order, on the task that
/// emits the event. Callers never hold their own locks while emitting.
#[derive(Default)]
pub struct HookRegistry {
    next_id: AtomicU64,
    hooks: parking_lot::RwLock<Vec<(HookId, Arc<dyn TetherHook>)>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook, returning an id that can later remove it
    pub fn add(&self, hook: impl TetherHook + 'static) -> HookId {
        self.add_arc(Arc::new(hook))
    }

    /// Register an already shared hook
    pub fn add_arc(&self, hook: Arc<dyn TetherHook>) -> HookId {
        let id = HookId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.hooks.write().push((id, hook));
        id
    }

    /// Remove a hook. Returns false if the id is unknown.
    pub fn remove(&self, id: HookId) -> bool {
        let mut hooks = self.hooks.write();
        let before = hooks.len();
        hooks.retain(|(hook_id, _)| *hook_id != id);
        hooks.len() < before
    }

    pub fn len(&self) -> usize {
        self.hooks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.read().is_empty()
    }

    /// Emit an event to all registered hooks
    pub fn emit(&self, event: TetherEvent) {
        // Snapshot so a hook may add or remove hooks without deadlocking
        let hooks: Vec<Arc<dyn TetherHook>> =
            self.hooks.read().iter().map(|(_, h)| h.clone()).collect();
        for hook in hooks {
            hook.on_event(&event);
        }
    }
}

impl std::fmt::Debug for HookRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookRegistry")
            .field("hooks", &self.len())
            .finish()
    }
}
