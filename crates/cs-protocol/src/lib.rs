//! cs-protocol: Wire types for the chat packet stream.
//!
//! This crate defines the packet envelope, the packet bodies, the top-level
//! stream records, and the request bodies shared by the transport client and
//! the reducer.

pub mod packet;
pub mod record;
pub mod request;

pub use packet::{
    Document, GeneratedImage, GroupKey, Packet, PacketCategory, PacketError, PacketObj,
    Placement, StopInfo, StopReason,
};
pub use record::{MessageIds, SessionCreated, StreamRecord, StreamingError};
pub use request::{
    ChatMessage, ChatSessionCreationRequest, CreateChatSessionResponse, Role,
    SendMessageRequest, AUTO_PLACE_AFTER_LATEST_MESSAGE,
};
