//! Client events and actions.

use huddle_core::{Inbound, Outbound, PersistedSession, RequestId, RoomId, RoomOutcome, TransportId};

use crate::error::ClientError;

/// Events the caller feeds into the client.
///
/// The caller is responsible for:
/// - Reporting transport lifecycle callbacks, stamped with the transport id
/// - Forwarding decoded inbound envelopes
/// - Driving time forward via ticks
/// - Forwarding user intents (create, join, send, typing)
///
/// Generic over `I` (Instant type) so tests can drive a manual clock.
#[derive(Debug, Clone)]
pub enum ClientEvent<I = std::time::Instant> {
    /// Start the connection if nothing is live.
    Connect,

    /// A transport reported that it is ready.
    TransportReady {
        /// Transport that became ready.
        transport: TransportId,
    },

    /// A transport reported that it closed.
    TransportClosed {
        /// Transport that closed.
        transport: TransportId,
    },

    /// A transport could not be constructed.
    TransportFailed {
        /// Transport that failed.
        transport: TransportId,
        /// Human-readable cause, logged only.
        reason: String,
    },

    /// The live transport handle vanished without a close callback.
    TransportDropped {
        /// Transport that vanished.
        transport: TransportId,
    },

    /// An envelope arrived from the backend.
    Received {
        /// Transport it arrived on.
        transport: TransportId,
        /// Decoded envelope.
        message: Inbound,
    },

    /// Time tick for deadlines, retries, health checks and the rejoin delay.
    Tick {
        /// Current time from the environment.
        now: I,
    },

    /// User wants to create a new room.
    CreateRoom {
        /// Correlation id for the completion.
        request: RequestId,
        /// Display nickname.
        nickname: String,
        /// Optional icon, usually a data URL.
        user_icon: Option<String>,
    },

    /// User wants to join an existing room.
    JoinRoom {
        /// Correlation id for the completion.
        request: RequestId,
        /// Display nickname.
        nickname: String,
        /// Room to join.
        room_id: RoomId,
        /// Optional icon, usually a data URL.
        user_icon: Option<String>,
    },

    /// Persisted state loaded at startup.
    Restore {
        /// Stored session, possibly empty.
        persisted: PersistedSession,
        /// Room id from a deep link. Wins over the persisted room.
        deep_link: Option<RoomId>,
    },

    /// User wants to leave the current room.
    LeaveRoom,

    /// User wants to send a chat message.
    SendMessage {
        /// Message text.
        body: String,
    },

    /// User typed (or cleared) input.
    SetTyping {
        /// Whether the user is typing.
        typing: bool,
    },

    /// Input field lost focus.
    InputBlurred,

    /// Stop everything. Terminal.
    Shutdown,
}

/// Actions the client produces for the caller to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientAction {
    /// Construct a transport whose callbacks carry this id.
    OpenTransport {
        /// Id to stamp on the transport's events.
        transport: TransportId,
    },

    /// Close and drop the transport with this id.
    CloseTransport {
        /// Transport to release.
        transport: TransportId,
    },

    /// Send an envelope over the live transport.
    Send {
        /// Transport to send on.
        transport: TransportId,
        /// Envelope to send.
        message: Outbound,
    },

    /// Write the persisted session.
    PersistSession(PersistedSession),

    /// Remove the persisted session.
    ClearSession,

    /// A create/join request finished.
    Completed {
        /// Request that finished.
        request: RequestId,
        /// Room on success.
        result: Result<RoomOutcome, ClientError>,
    },
}
