//! Deterministic simulation harness for the huddle session client.
//!
//! In-process implementations of the Environment, Connector and Transport
//! traits, plus a fake room backend, for reproducible tests of reconnects,
//! rejoins and message flow without a network.
//!
//! # Components
//!
//! - [`SimEnv`]: manual clock
//! - [`SimBackend`]: in-memory room backend with fault injection
//! - [`SimConnector`] / [`SimTransport`]: transport onto a [`SimBackend`]
//! - [`SimDriver`]: synchronous driver running a [`huddle_client::Client`]
//!   against the backend without an async runtime

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod sim_backend;
pub mod sim_driver;
pub mod sim_env;
pub mod sim_transport;

pub use sim_backend::{ConnectionId, SimBackend};
pub use sim_driver::{Completion, SimDriver};
pub use sim_env::SimEnv;
pub use sim_transport::{SimConnector, SimTransport};
