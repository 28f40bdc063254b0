//! Top-level records of a send-message stream.
//!
//! Most lines carry a [`Packet`]. A few carry bookkeeping that has no
//! placement: the ids the server reserved for the exchange, the id of a chat
//! session created on the fly, or a stream-level failure.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::packet::Packet;

/// Definitive ids for the user and assistant messages once persisted.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessageIds {
    pub user_message_id: Option<i64>,
    pub reserved_assistant_message_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionCreated {
    pub chat_session_id: String,
}

/// Whole-stream failure reported by the server outside any section.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamingError {
    pub error: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(default = "default_retryable")]
    pub is_retryable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
}

fn default_retryable() -> bool {
    true
}

/// One line of the stream, in the order it arrived.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum StreamRecord {
    Packet(Packet),
    MessageIds(MessageIds),
    SessionCreated(SessionCreated),
    StreamError(StreamingError),
}

impl StreamRecord {
    pub fn as_packet(&self) -> Option<&Packet> {
        match self {
            StreamRecord::Packet(packet) => Some(packet),
            _ => None,
        }
    }
}

impl From<Packet> for StreamRecord {
    fn from(packet: Packet) -> Self {
        StreamRecord::Packet(packet)
    }
}

impl From<MessageIds> for StreamRecord {
    fn from(ids: MessageIds) -> Self {
        StreamRecord::MessageIds(ids)
    }
}
