//! Provider-agnostic chat payload types
//!
//! These are the request messages handed to a [`crate::ChatTransport`] and
//! stored in the offline queue while a request waits for delivery.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
            Role::Tool => write!(f, "tool"),
        }
    }
}

/// A message in the conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: Vec<ContentBlock>,
}

impl Message {
    /// Create a message with a single text block
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: vec![ContentBlock::Text(text.into())],
        }
    }

    /// Create a new system message
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Create a new user message with text content
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Create a new assistant message with text content
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }

    /// Create a message with arbitrary content blocks
    pub fn with_content(role: Role, content: Vec<ContentBlock>) -> Self {
        Self { role, content }
    }

    /// Get all text content concatenated
    ///
    /// Non-text blocks are skipped. This is the form a message takes when it
    /// is persisted in the offline queue.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|c| match c {
                ContentBlock::Text(t) => Some(t.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("")
    }

    /// Returns true if the message carries anything besides text
    pub fn has_rich_content(&self) -> bool {
        self.content
            .iter()
            .any(|c| !matches!(c, ContentBlock::Text(_)))
    }
}

/// Content block within a message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentBlock {
    /// Text content
    Text(String),
    /// Inline image data
    Image {
        /// MIME type, e.g. `image/png`
        media_type: String,
        /// Base64-encoded bytes
        data: String,
    },
    /// Tool use request from the assistant
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    /// Tool result sent back to the model
    ToolResult {
        tool_use_id: String,
        content: String,
    },
}

/// Per-request generation options passed through to the transport
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompletionOptions {
    /// Model identifier override
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Sampling temperature
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    /// Maximum tokens to generate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Token usage statistics reported by the transport
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenUsage {
    pub input_tokens: usize,
    pub output_tokens: usize,
}

impl TokenUsage {
    pub fn total(&self) -> usize {
        self.input_tokens + self.output_tokens
    }
}

/// A finished one-shot completion
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    /// The assistant's reply
    pub message: Message,
    /// Provider-specific finish reason, if reported
    pub finish_reason: Option<String>,
    /// Token usage, if reported
    pub usage: Option<TokenUsage>,
}

impl Completion {
    /// Build a plain-text assistant completion
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            message: Message::assistant(text),
            finish_reason: None,
            usage: None,
        }
    }
}

/// Events from a streaming completion
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Incremental text delta
    TextDelta(String),
    /// End-of-stream sentinel; anything after it is ignored
    Stop {
        /// Why the model stopped
        finish_reason: Option<String>,
        /// Token usage for this response (if available)
        usage: Option<TokenUsage>,
    },
}
