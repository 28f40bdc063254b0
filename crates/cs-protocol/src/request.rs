//! Request bodies for the chat endpoints, and the messages kept per session.

use serde::{Deserialize, Serialize};

/// `parent_message_id` value that asks the server to append after the latest message.
pub const AUTO_PLACE_AFTER_LATEST_MESSAGE: i64 = -1;

/// Body of `POST /chat/create-chat-session`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatSessionCreationRequest {
    pub persona_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct CreateChatSessionResponse {
    pub chat_session_id: String,
}

/// Body of `POST /chat/send-chat-message`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageRequest {
    pub message: String,
    pub chat_session_id: Option<String>,
    /// `None` regenerates from the root; see [`AUTO_PLACE_AFTER_LATEST_MESSAGE`].
    pub parent_message_id: Option<i64>,
    pub include_citations: bool,
    pub stream: bool,
    pub origin: String,
}

impl SendMessageRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            chat_session_id: None,
            parent_message_id: Some(AUTO_PLACE_AFTER_LATEST_MESSAGE),
            include_citations: true,
            stream: true,
            origin: "api".to_string(),
        }
    }

    pub fn with_session(mut self, chat_session_id: impl Into<String>) -> Self {
        self.chat_session_id = Some(chat_session_id.into());
        self
    }

    pub fn with_parent(mut self, parent_message_id: Option<i64>) -> Self {
        self.parent_message_id = parent_message_id;
        self
    }

    pub fn with_citations(mut self, include_citations: bool) -> Self {
        self.include_citations = include_citations;
        self
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// A settled message of a chat session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<i64>,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            message_id: None,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            message_id: None,
        }
    }

    pub fn with_id(mut self, message_id: Option<i64>) -> Self {
        self.message_id = message_id;
        self
    }
}
