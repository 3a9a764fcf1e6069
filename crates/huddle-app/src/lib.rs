//! Huddle App
//!
//! Async runtime around the [`huddle_client::Client`] state machine.
//!
//! # Architecture
//!
//! ```text
//! ┌───────────────┐  commands   ┌─────────────────────────────┐  open/send  ┌───────────┐
//! │ SessionHandle │ ──────────> │           Runtime           │ ──────────> │ Transport │
//! │   (cloned)    │ <────────── │ Client + store + transport  │ <────────── │           │
//! └───────────────┘   watch     └─────────────────────────────┘  EventSink  └───────────┘
//! ```
//!
//! The [`Runtime`] is the only writer: it owns the client, the transport
//! handle and the session store, and runs a single `tokio::select!` loop over
//! commands, transport callbacks and a periodic tick. The view layer holds a
//! [`SessionHandle`], sends commands and reads state from `watch` channels.
//!
//! # Components
//!
//! - [`Runtime`] / [`spawn`]: the session actor
//! - [`SessionHandle`]: cloneable handle for the view layer
//! - [`Transport`] / [`Connector`]: abstract backend connection
//! - [`SystemEnv`]: production clock

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod handle;
mod runtime;
mod system_env;
mod transport;

pub use handle::SessionHandle;
pub use runtime::{
    DEFAULT_COMMAND_BUFFER, DEFAULT_TICK_INTERVAL, Runtime, RuntimeConfig, spawn,
};
pub use system_env::SystemEnv;
pub use transport::{Connector, EventSink, Transport, TransportError, TransportEvent};
