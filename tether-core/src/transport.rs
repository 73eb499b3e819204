//! The underlying chat transport
//!
//! This module contains the [`ChatTransport`] trait that the offline-aware
//! client decorates, and the raw fault type transports report. Faults are
//! turned into typed [`crate::AgentError`]s by the classifier.

use crate::types::{Completion, CompletionOptions, Message, StreamEvent};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Raw faults raised by a transport
///
/// Transports report what went wrong in these coarse terms; they do not
/// decide retryability. That happens once, in [`crate::classifier`].
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    /// The operation was cancelled before it completed
    ///
    /// Whether this counts as a caller cancellation or a timeout depends on
    /// which cancellation token fired.
    #[error("Request cancelled")]
    Cancelled,

    /// An internal deadline elapsed
    #[error("Request timed out: {0}")]
    Timeout(String),

    /// Socket-level failure with no HTTP status (DNS, refused, reset)
    #[error("Network error: {0}")]
    Network(String),

    /// The server answered with a non-success status
    #[error("HTTP {status}{}", body_suffix(.body))]
    Http {
        /// HTTP status code
        status: u16,
        /// Response body, if any
        body: Option<String>,
        /// Raw `Retry-After` header value, if present
        retry_after: Option<String>,
    },

    /// The payload could not be parsed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl TransportError {
    /// Convenience constructor for a status-only HTTP failure
    pub fn status(status: u16) -> Self {
        Self::Http {
            status,
            body: None,
            retry_after: None,
        }
    }
}

fn body_suffix(body: &Option<String>) -> String {
    body.as_deref()
        .map(|b| format!(": {}", b))
        .unwrap_or_default()
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::TimedOut => Self::Timeout(err.to_string()),
            _ => Self::Network(err.to_string()),
        }
    }
}

/// Stream of completion events produced by [`ChatTransport::complete_streaming`]
pub type EventStream = BoxStream<'static, Result<StreamEvent, TransportError>>;

/// Trait for chat transports
///
/// Abstracts over the HTTP/SSE client that actually talks to the agent
/// service. Both operations are cancellable through the supplied token;
/// implementations should return [`TransportError::Cancelled`] once it fires.
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a request and wait for the whole completion
    async fn complete(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError>;

    /// Send a request and stream the response as text deltas
    ///
    /// The stream ends at a [`StreamEvent::Stop`] sentinel or when it closes.
    async fn complete_streaming(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError>;
}

// Implement ChatTransport for Arc<dyn ChatTransport> to support dynamic dispatch
#[async_trait::async_trait]
impl ChatTransport for Arc<dyn ChatTransport> {
    async fn complete(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<Completion, TransportError> {
        (**self).complete(messages, options, cancel).await
    }

    async fn complete_streaming(
        &self,
        messages: Vec<Message>,
        options: Option<CompletionOptions>,
        cancel: CancellationToken,
    ) -> Result<EventStream, TransportError> {
        (**self).complete_streaming(messages, options, cancel).await
    }
}
