//! Huddle Core
//!
//! Pure state machines for the huddle session client. Nothing in this crate
//! performs I/O: every component consumes inputs (including the current time)
//! and returns actions for a driver to execute.
//!
//! # Components
//!
//! - [`connection::Supervisor`]: transport lifecycle, reconnect backoff, health
//!   check, circuit breaker
//! - [`session::SessionManager`]: create/join/rejoin/leave and request
//!   deadlines
//! - [`stream::MessageStream`]: append-only ordered chat log
//! - [`presence::TypingPresence`]: local typing emission and remote aggregation
//! - [`envelope`]: wire types exchanged with the backend

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod env;
pub mod envelope;
pub mod error;
pub mod presence;
pub mod session;
pub mod stream;

pub use connection::{ConnectionState, Supervisor, SupervisorAction, SupervisorConfig, TransportId};
pub use env::Environment;
pub use envelope::{ChatMessage, Inbound, MessageType, Outbound, RequestId, RoomId, TypingUpdate};
pub use error::{PreconditionError, ProtocolError, SessionError};
pub use presence::TypingPresence;
pub use session::{
    PersistedSession, RoomOutcome, SessionAction, SessionConfig, SessionIdentity, SessionManager,
};
pub use stream::{Append, MessageStream};
