//! Error types for the session client core.
//!
//! Preconditions are checked synchronously and abort an operation without side
//! effects. Session errors arrive later, when the backend answers (or fails to
//! answer) a create/join request. Transport failures never appear here: the
//! supervisor absorbs them as a transient non-ready state.

use std::time::Duration;

use thiserror::Error;

use crate::envelope::{RequestId, RoomId};

/// A user-correctable precondition was not met.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PreconditionError {
    /// The connection has not reached Ready.
    #[error("connection is not ready, please wait or reload")]
    NotReady,

    /// Nickname is empty.
    #[error("please enter a nickname")]
    MissingNickname,

    /// Room id is empty.
    #[error("please enter a room id")]
    MissingRoomId,

    /// Operation requires an established session identity.
    #[error("not in a room")]
    NoSession,

    /// Message body is empty.
    #[error("message is empty")]
    EmptyMessage,

    /// A session is already established; leave it first.
    #[error("already in room {room_id}")]
    AlreadyInRoom {
        /// Room currently joined.
        room_id: RoomId,
    },

    /// Another create/join request is awaiting the backend.
    #[error("request {request} is still in flight")]
    RequestInFlight {
        /// Request awaiting a reply.
        request: RequestId,
    },
}

/// A create/join request failed after it was sent.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The backend has no active session for this room.
    #[error("no active session for room {room_id}")]
    SessionNotFound {
        /// Room that was requested.
        room_id: RoomId,
    },

    /// The backend refused the request for another reason.
    #[error("request rejected: {reason}")]
    Rejected {
        /// Backend-supplied reason.
        reason: String,
    },

    /// The backend did not answer before the deadline.
    #[error("request timed out after {elapsed:?}")]
    Timeout {
        /// Time spent waiting.
        elapsed: Duration,
    },

    /// The connection dropped before the backend answered.
    #[error("connection lost before the request completed")]
    ConnectionLost,

    /// The request was abandoned locally (leave or shutdown).
    #[error("request cancelled")]
    Cancelled,
}

/// Envelope encoding failures.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Serialization failed.
    #[error("encode failed: {0}")]
    Encode(String),

    /// Deserialization failed.
    #[error("decode failed: {0}")]
    Decode(String),
}
