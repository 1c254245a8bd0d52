//! Chat wire model: the one message type relayed between peers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Longest text the terminal front end submits (characters, not bytes).
pub const MAX_TEXT_CHARS: usize = 320;

/// One relayed chat line. Field names are the compatibility contract on the wire:
/// `{"id", "username", "text", "timestamp"}` with an RFC 3339 timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    id: String,
    username: String,
    text: String,
    timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// New message from the local user: fresh UUIDv4 id, sender's clock.
    pub fn new(username: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            username: username.into(),
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn from_parts(
        id: impl Into<String>,
        username: impl Into<String>,
        text: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            username: username.into(),
            text: text.into(),
            timestamp,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_assigns_unique_ids() {
        let a = ChatMessage::new("alice", "hi");
        let b = ChatMessage::new("alice", "hi");
        assert_ne!(a.id(), b.id());
        assert!(uuid::Uuid::parse_str(a.id()).is_ok());
        assert_eq!(a.username(), "alice");
        assert_eq!(a.text(), "hi");
    }

    #[test]
    fn json_uses_contract_field_names() {
        let msg = ChatMessage::new("bob", "yo");
        let value = serde_json::to_value(&msg).unwrap();
        let obj = value.as_object().unwrap();
        assert_eq!(obj.len(), 4);
        for key in ["id", "username", "text", "timestamp"] {
            assert!(obj.contains_key(key), "missing {key}");
        }
        assert_eq!(obj["text"], "yo");
    }
}
