#[cfg(test)]
#[path = "message_test.rs"]
mod tests;

use chrono::Utc;
use serde_derive::Deserialize;
use serde_derive::Serialize;
use uuid::Uuid;

use super::Role;

pub const SYSTEM_GREETING_ID: &str = "system-greeting";
pub const SYSTEM_GREETING_TEXT: &str = "Welcome to Le Chat++.";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    pub id: String,
    pub role: Role,
    pub content: String,
    /// Milliseconds since the unix epoch.
    pub created_at: i64,
}

impl ChatMessage {
    pub fn new(id: &str, role: Role, content: &str) -> ChatMessage {
        return ChatMessage {
            id: id.to_string(),
            role,
            content: content.to_string(),
            created_at: Utc::now().timestamp_millis(),
        };
    }

    pub fn user(content: &str) -> ChatMessage {
        return ChatMessage::new(&format!("user-{}", Uuid::new_v4()), Role::User, content);
    }

    /// Assistant messages always start empty and grow while streaming.
    pub fn assistant() -> ChatMessage {
        return ChatMessage::new(&format!("assistant-{}", Uuid::new_v4()), Role::Assistant, "");
    }

    pub fn system_greeting() -> ChatMessage {
        return ChatMessage::new(SYSTEM_GREETING_ID, Role::System, SYSTEM_GREETING_TEXT);
    }

    pub fn append(&mut self, text: &str) {
        self.content += text;
    }

    pub fn is_system_greeting(&self) -> bool {
        return self.id == SYSTEM_GREETING_ID && self.role == Role::System;
    }
}

/// A conversation that was never interacted with: empty, or only the greeting.
pub fn is_default_message_set(messages: &[ChatMessage]) -> bool {
    if messages.is_empty() {
        return true;
    }

    if messages.len() == 1 {
        return messages[0].is_system_greeting();
    }

    return false;
}
