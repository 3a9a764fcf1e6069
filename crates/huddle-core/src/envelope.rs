//! Wire envelope exchanged with the backend.
//!
//! Every message is an adjacently tagged envelope, `{"type": ..., "data": ...}`.
//! Broadcast traffic uses the backend's message types (`SEND_MESSAGE`,
//! `SET_TYPING_PRESENCE`); room requests and their replies are correlated by a
//! caller-allocated [`RequestId`].
//!
//! Transports decide the byte encoding. [`Outbound::to_cbor`] and
//! [`Inbound::from_cbor`] are provided for transports that frame CBOR.

use std::fmt;

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::error::ProtocolError;

/// Opaque backend room identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(String);

impl RoomId {
    /// Wrap a backend room identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the identifier is empty or whitespace only.
    pub fn is_blank(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RoomId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for RoomId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Correlates a create/join request with the backend's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(u64);

impl RequestId {
    /// Wrap a raw request number.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw request number.
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Backend broadcast message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageType {
    /// Chat message.
    SendMessage,
    /// Typing presence update.
    SetTypingPresence,
}

impl MessageType {
    /// Wire name of the message type.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::SendMessage => "SEND_MESSAGE",
            Self::SetTypingPresence => "SET_TYPING_PRESENCE",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as delivered by the backend.
///
/// Immutable once received. Display order is arrival order; `(timestamp,
/// perm_id)` is the ordering key the backend promises not to regress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Backend-generated notice (user joined, etc.) rather than user text.
    #[serde(default)]
    pub is_system_message: bool,
    /// Sender's nickname.
    pub user_nickname: String,
    /// Sender's icon, usually a data URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_icon: Option<String>,
    /// Message text.
    pub body: String,
    /// Permanent backend id. Unique within a room.
    pub perm_id: String,
    /// Backend timestamp in milliseconds.
    pub timestamp: u64,
}

impl ChatMessage {
    /// Ordering key: timestamp first, permanent id as tie-breaker.
    pub fn ordering_key(&self) -> (u64, &str) {
        (self.timestamp, self.perm_id.as_str())
    }
}

/// Aggregated typing state pushed by the backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingUpdate {
    /// True if any participant is typing.
    pub anyone_typing: bool,
    /// Ids of the participants currently typing.
    #[serde(default)]
    pub users_typing: Vec<String>,
}

/// Why the backend refused a room request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum RequestFailure {
    /// No active session exists for the requested room.
    SessionNotFound,
    /// Any other refusal.
    Rejected {
        /// Backend-supplied reason.
        reason: String,
    },
}

/// Messages sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Outbound {
    /// Create a new room with the caller as its first participant.
    CreateRoom {
        /// Correlation id echoed in the reply.
        request: RequestId,
        /// Caller's nickname.
        nickname: String,
        /// Caller's icon.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_icon: Option<String>,
    },

    /// Join an existing room.
    JoinRoom {
        /// Correlation id echoed in the reply.
        request: RequestId,
        /// Caller's nickname.
        nickname: String,
        /// Room to join.
        room_id: RoomId,
        /// Caller's icon.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        user_icon: Option<String>,
    },

    /// Broadcast a chat message to the current room.
    SendMessage {
        /// Message text.
        body: String,
    },

    /// Broadcast the local typing flag to the current room.
    SetTypingPresence {
        /// Whether the local user is typing.
        typing: bool,
    },
}

impl Outbound {
    /// Broadcast message type, `None` for room requests.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::SendMessage { .. } => Some(MessageType::SendMessage),
            Self::SetTypingPresence { .. } => Some(MessageType::SetTypingPresence),
            Self::CreateRoom { .. } | Self::JoinRoom { .. } => None,
        }
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

/// Messages received from the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(
    tag = "type",
    content = "data",
    rename_all = "SCREAMING_SNAKE_CASE",
    rename_all_fields = "camelCase"
)]
pub enum Inbound {
    /// A chat message broadcast in the room.
    #[serde(rename = "SEND_MESSAGE")]
    ChatMessage(ChatMessage),

    /// Aggregated typing state of the room.
    #[serde(rename = "SET_TYPING_PRESENCE")]
    TypingPresence(TypingUpdate),

    /// Reply to [`Outbound::CreateRoom`].
    RoomCreated {
        /// Request being answered.
        request: RequestId,
        /// Fresh room id.
        room_id: RoomId,
    },

    /// Reply to [`Outbound::JoinRoom`] carrying the room's history.
    RoomJoined {
        /// Request being answered.
        request: RequestId,
        /// Existing messages, oldest first.
        messages: Vec<ChatMessage>,
    },

    /// A create or join request was refused.
    RequestFailed {
        /// Request being answered.
        request: RequestId,
        /// Refusal reason.
        failure: RequestFailure,
    },
}

impl Inbound {
    /// Broadcast message type, `None` for request replies.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::ChatMessage(_) => Some(MessageType::SendMessage),
            Self::TypingPresence(_) => Some(MessageType::SetTypingPresence),
            Self::RoomCreated { .. } | Self::RoomJoined { .. } | Self::RequestFailed { .. } => None,
        }
    }

    /// Encode as CBOR.
    pub fn to_cbor(&self) -> Result<Vec<u8>, ProtocolError> {
        encode(self)
    }

    /// Decode from CBOR.
    pub fn from_cbor(bytes: &[u8]) -> Result<Self, ProtocolError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let mut buf = Vec::new();
    ciborium::ser::into_writer(value, &mut buf)
        .map_err(|e| ProtocolError::Encode(e.to_string()))?;
    Ok(buf)
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    ciborium::de::from_reader(bytes).map_err(|e| ProtocolError::Decode(e.to_string()))
}
