//! Conversation history: append-only, survives turns and resets.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who said it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in the conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMessage {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

/// Ordered conversation log.
///
/// The only mutation is [`append_exchange`](Self::append_exchange), which
/// adds a user message and the assistant reply together, so the length is
/// always even.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<ConversationMessage>,
}

impl ConversationHistory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one completed exchange.
    pub fn append_exchange(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        let timestamp = Utc::now();
        self.messages.reserve(2);
        self.messages.push(ConversationMessage {
            role: Role::User,
            content: user.into(),
            timestamp,
        });
        self.messages.push(ConversationMessage {
            role: Role::Assistant,
            content: assistant.into(),
            timestamp,
        });
    }

    #[must_use]
    pub fn messages(&self) -> &[ConversationMessage] {
        &self.messages
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Pretty JSON dump, as written by `voxloop talk --history-out`.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exchange_appends_user_then_assistant() {
        let mut history = ConversationHistory::new();
        history.append_exchange("hello", "Hi there!");

        let messages = history.messages();
        assert_eq!(history.len(), 2);
        assert_eq!(messages[0].role, Role::User);
        assert_eq!(messages[0].content, "hello");
        assert_eq!(messages[1].role, Role::Assistant);
        assert_eq!(messages[1].content, "Hi there!");
    }

    #[test]
    fn json_uses_lowercase_roles() {
        let mut history = ConversationHistory::new();
        history.append_exchange("a", "b");

        let value: serde_json::Value = serde_json::from_str(&history.to_json().unwrap()).unwrap();
        assert_eq!(value[0]["role"], "user");
        assert_eq!(value[1]["role"], "assistant");
        assert!(value[0]["timestamp"].is_string());
    }
}
