//! Queued request records and their persisted form.

use crate::types::{Message, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of delivery attempts before a message expires
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// An undelivered request waiting in the offline queue
///
/// Values handed out by [`super::OfflineQueue`] are copies; changing one
/// has no effect on the queue.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedMessage {
    /// Unique id (UUID v4)
    pub id: String,
    /// Agent the request is addressed to
    pub agent_name: String,
    /// Conversation the request belongs to, if any
    pub conversation_id: Option<String>,
    /// The request payload, in order
    pub messages: Vec<Message>,
    /// When the request was queued
    pub queued_at: DateTime<Utc>,
    /// When delivery was last attempted
    pub last_attempt_at: Option<DateTime<Utc>>,
    /// Failed delivery attempts so far
    pub attempt_count: u32,
    /// Error from the last failed attempt
    pub last_error: Option<String>,
    /// Attempts allowed before the message is dropped
    pub max_attempts: u32,
}

impl QueuedMessage {
    /// Create a fresh message for `agent_name`
    pub fn new(agent_name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            agent_name: agent_name.into(),
            conversation_id: None,
            messages,
            queued_at: Utc::now(),
            last_attempt_at: None,
            attempt_count: 0,
            last_error: None,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Attach a conversation id
    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    /// Override the attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// True once the attempt budget is used up
    pub fn is_expired(&self) -> bool {
        self.attempt_count >= self.max_attempts
    }

    pub(crate) fn record_failure(&mut self, error: Option<String>) {
        self.attempt_count = self.attempt_count.saturating_add(1);
        self.last_attempt_at = Some(Utc::now());
        self.last_error = error;
    }
}

/// On-disk form of a payload message: role plus flattened text
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedChatMessage {
    role: Role,
    content: String,
}

/// On-disk form of a [`QueuedMessage`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedMessage {
    id: String,
    agent_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    conversation_id: Option<String>,
    messages: Vec<PersistedChatMessage>,
    queued_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    attempt_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    last_error: Option<String>,
    #[serde(default = "default_max_attempts")]
    max_attempts: u32,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl From<&QueuedMessage> for PersistedMessage {
    fn from(message: &QueuedMessage) -> Self {
        Self {
            id: message.id.clone(),
            agent_name: message.agent_name.clone(),
            conversation_id: message.conversation_id.clone(),
            messages: message
                .messages
                .iter()
                .map(|m| PersistedChatMessage {
                    role: m.role,
                    content: m.text(),
                })
                .collect(),
            queued_at: message.queued_at,
            last_attempt_at: message.last_attempt_at,
            attempt_count: message.attempt_count,
            last_error: message.last_error.clone(),
            max_attempts: message.max_attempts,
        }
    }
}

impl From<PersistedMessage> for QueuedMessage {
    fn from(persisted: PersistedMessage) -> Self {
        Self {
            id: persisted.id,
            agent_name: persisted.agent_name,
            conversation_id: persisted.conversation_id,
            messages: persisted
                .messages
                .into_iter()
                .map(|m| Message::new(m.role, m.content))
                .collect(),
            queued_at: persisted.queued_at,
            last_attempt_at: persisted.last_attempt_at,
            attempt_count: persisted.attempt_count,
            last_error: persisted.last_error,
            max_attempts: persisted.max_attempts,
        }
    }
}

/// Serialize a queue snapshot to JSON
pub(crate) fn to_json<'a>(
    messages: impl IntoIterator<Item = &'a QueuedMessage>,
) -> Result<String, serde_json::Error> {
    let persisted: Vec<PersistedMessage> = messages.into_iter().map(Into::into).collect();
    serde_json::to_string(&persisted)
}

/// Deserialize a queue snapshot from JSON
pub(crate) fn from_json(json: &str) -> Result<Vec<QueuedMessage>, serde_json::Error> {
    let persisted: Vec<PersistedMessage> = serde_json::from_str(json)?;
    Ok(persisted.into_iter().map(Into::into).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ContentBlock;

    #[test]
    fn test_new_message_defaults() {
        let message = QueuedMessage::new("helper", vec![Message::user("hi")]);

        assert_eq!(message.agent_name, "helper");
        assert_eq!(message.attempt_count, 0);
        assert_eq!(message.max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(message.last_attempt_at.is_none());
        assert!(!message.is_expired());
        assert!(uuid::Uuid::parse_str(&message.id).is_ok());
    }

    #[test]
    fn test_record_failure_expires_at_budget() {
        let mut message = QueuedMessage::new("helper", vec![]).with_max_attempts(2);

        message.record_failure(Some("timeout".into()));
        assert_eq!(message.attempt_count, 1);
        assert!(message.last_attempt_at.is_some());
        assert_eq!(message.last_error.as_deref(), Some("timeout"));
        assert!(!message.is_expired());

        message.record_failure(None);
        assert!(message.is_expired());
        assert!(message.last_error.is_none());
    }

    #[test]
    fn test_persistence_flattens_rich_content() {
        let original = QueuedMessage::new(
            "helper",
            vec![Message::with_content(
                Role::User,
                vec![
                    ContentBlock::Text("describe ".into()),
                    ContentBlock::Image {
                        media_type: "image/png".into(),
                        data: "aGk=".into(),
                    },
                    ContentBlock::Text("this".into()),
                ],
            )],
        )
        .with_conversation("conv-1");

        let json = to_json([&original]).unwrap();
        let restored = from_json(&json).unwrap();

        assert_eq!(restored.len(), 1);
        assert_eq!(restored[0].id, original.id);
        assert_eq!(restored[0].conversation_id.as_deref(), Some("conv-1"));
        assert_eq!(restored[0].messages, vec![Message::user("describe this")]);
    }

    #[test]
    fn test_missing_optional_fields_use_defaults() {
        let json = r#"[{
            "id": "abc",
            "agent_name": "helper",
            "messages": [{"role": "user", "content": "hi"}],
            "queued_at": "2024-05-01T12:00:00Z"
        }]"#;

        let restored = from_json(json).unwrap();
        assert_eq!(restored[0].attempt_count, 0);
        assert_eq!(restored[0].max_attempts, DEFAULT_MAX_ATTEMPTS);
        assert!(restored[0].conversation_id.is_none());
    }
}
