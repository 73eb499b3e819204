//! Test utilities for tether-core.
//!
//! This module provides a scripted transport and an event collector for
//! testing offline behavior without a real agent service.
//!
//! Enable with the `test-utils` feature:
//!
//! ```toml
//! [dev-dependencies]
//! tether-core = { version = "...", features = ["test-utils"] }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use futures::stream;
use tokio_util::sync::CancellationToken;

use crate::events::{TetherEvent, TetherHook};
use crate::transport::{ChatTransport, EventStream, TransportError};
use crate::types::{Completion, CompletionOptions, Message, StreamEvent};

#[derive(Clone)]
enum Scripted {
    Completion(Completion),
    Stream(Vec<Result<StreamEvent, TransportError>>),
    Fault(TransportError),
    Hang,
}

/// A mock chat transport for testing.
///
/// Returns pre-programmed outcomes in order, shared between `complete` and
/// `complete_streaming`, and records every request it receives.
///
/// # Example
///
/// ```rust
/// use tether_core::test_utils::MockTransport;
/// use tether_core::TransportError;
///
/// let transport = MockTransport::new()
///     .with_error(TransportError::Network("connection reset".into()))
///     .with_text("Hello!");
/// ```
#[derive(Clone, Default)]
pub struct MockTransport {
    script: Arc<Mutex<VecDeque<Scripted>>>,
    requests: Arc<Mutex<Vec<Vec<Message>>>>,
}

impl MockTransport {
    /// Create a new mock transport with no outcomes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a plain-text completion.
    pub fn with_text(self, text: impl Into<String>) -> Self {
        self.push(Scripted::Completion(Completion::text(text)))
    }

    /// Queue a failure.
    pub fn with_error(self, fault: TransportError) -> Self {
        self.push(Scripted::Fault(fault))
    }

    /// Queue a stream of events.
    pub fn with_stream(self, events: Vec<Result<StreamEvent, TransportError>>) -> Self {
        self.push(Scripted::Stream(events))
    }

    /// Queue a call that only finishes when its cancellation token fires.
    pub fn with_hang(self) -> Self {
        self.push(Scripted::Hang)
    }

    /// Queue a failure for later calls on a shared transport.
    pub fn push_error(&self, fault: TransportError) {
        self.script.lock().push_back(Scripted::Fault(fault));
    }

    /// Queue a text completion for later calls on a shared transport.
    pub fn push_text(&self, text: impl Into<String>) {
        self.script
            .lock()
            .push_back(Scripted::Completion(Completion::text(text)));
    }

    /// Get the number of requests received.
    pub fn call_count(&self) -> usize {
        self.requests.lock().len()
    }

    /// Every request received, oldest first.
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.requests.lock().clone()
    }

    /// The text of the last message of every request, oldest first.
    pub fn sent_texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .map(|messages| messages.last().map(Message::text).unwrap_or_default())
            .collect()
    }

    fn push(self, outcome: Scripted) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    fn next(&self, messages: Vec<Message>) -> Option<Scripted> {
        self.requests.lock().push(messages);
        self.script.lock().pop_front()
    }
}

fn exhausted() -> TransportError {
    TransportError::Other("MockTransport: No more responses configured".to_string())
}

#[async_trait::async_trait]
impl ChatTransport for MockTransport {
    async fn complete(
        &self,
        messages: Vec<Message>,
        _options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.next(messages) {
            Some(Scripted::Completion(completion)) => Ok(completion),
            Some(Scripted::Fault(fault)) => Err(fault),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
            Some(Scripted::Stream(_)) => Err(TransportError::Other(
                "MockTransport: stream scripted for a one-shot call".to_string(),
            )),
            None => Err(exhausted()),
        }
    }

    async fn complete_streaming(
        &self,
        messages: Vec<Message>,
        _options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError> {
        if cancel.is_cancelled() {
            return Err(TransportError::Cancelled);
        }
        match self.next(messages) {
            Some(Scripted::Stream(events)) => Ok(Box::pin(stream::iter(events))),
            Some(Scripted::Completion(completion)) => {
                let events = vec![
                    Ok(StreamEvent::TextDelta(completion.message.text())),
                    Ok(StreamEvent::Stop {
                        finish_reason: completion.finish_reason,
                        usage: completion.usage,
                    }),
                ];
                Ok(Box::pin(stream::iter(events)))
            }
            Some(Scripted::Fault(fault)) => Err(fault),
            Some(Scripted::Hang) => {
                cancel.cancelled().await;
                Err(TransportError::Cancelled)
            }
            None => Err(exhausted()),
        }
    }
}

/// Collects resilience events for verification in tests.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use tether_core::connection::{ConnectionMonitor, ManualConnectivity};
/// use tether_core::test_utils::EventCollector;
///
/// # tokio_test::block_on(async {
/// let monitor = ConnectionMonitor::new(Arc::new(ManualConnectivity::new(true)));
/// let collector = EventCollector::new();
/// monitor.add_hook(collector.clone());
///
/// monitor.initialize().await;
/// assert_eq!(collector.count_event("connection_state_changed"), 2);
/// # });
/// ```
#[derive(Clone, Default)]
pub struct EventCollector {
    events: Arc<Mutex<Vec<TetherEvent>>>,
}

impl EventCollector {
    /// Create a new event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get all collected events.
    pub fn events(&self) -> Vec<TetherEvent> {
        self.events.lock().clone()
    }

    /// Get all collected event type names.
    pub fn event_types(&self) -> Vec<String> {
        self.events
            .lock()
            .iter()
            .map(|e| e.name().to_string())
            .collect()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Check if a specific event type was collected.
    pub fn has_event(&self, event_type: &str) -> bool {
        self.events
            .lock()
            .iter()
            .any(|e| e.name() == event_type)
    }

    /// Count occurrences of a specific event type.
    pub fn count_event(&self, event_type: &str) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|e| e.name() == event_type)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl TetherHook for EventCollector {
    fn on_event(&self, event: &TetherEvent) {
        self.events.lock().push(event.clone());
    }
}
