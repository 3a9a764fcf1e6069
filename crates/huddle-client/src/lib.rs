//! Client
//!
//! Action-based session client for huddle rooms. Combines the connection
//! supervisor, room session manager, message stream and typing presence from
//! [`huddle_core`] into one state machine with a single entry point.
//!
//! # Architecture
//!
//! The client is Sans-IO. It receives events ([`ClientEvent`]), processes
//! them through pure state machine logic, and returns actions
//! ([`ClientAction`]) for the caller to execute. The caller owns the
//! transport and the persisted [`store::SessionStore`].
//!
//! # Components
//!
//! - [`Client`]: top-level state machine
//! - [`ClientEvent`]: events fed into the client
//! - [`ClientAction`]: actions produced by the client
//! - [`store`]: persisted session storage (in-memory and redb)

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod client;
mod error;
mod event;
pub mod store;

pub use client::{Client, ClientConfig};
pub use error::ClientError;
pub use event::{ClientAction, ClientEvent};
pub use huddle_core::{
    ChatMessage, ConnectionState, Environment, Inbound, Outbound, PersistedSession, RequestId,
    RoomId, RoomOutcome, SessionIdentity, TransportId,
};
