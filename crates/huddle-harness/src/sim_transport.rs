//! Transport onto a [`SimBackend`].
//!
//! Implements the runtime's [`Connector`] and [`Transport`] traits so the same
//! [`huddle_app::Runtime`] code runs against the in-memory backend.

use huddle_app::{Connector, EventSink, Transport, TransportError};
use huddle_core::Outbound;

use crate::sim_backend::{ConnectionId, SimBackend};

/// Builds [`SimTransport`]s on a shared backend.
#[derive(Debug, Clone)]
pub struct SimConnector {
    backend: SimBackend,
}

impl SimConnector {
    /// Connect to `backend`.
    pub fn new(backend: SimBackend) -> Self {
        Self { backend }
    }

    /// Backend this connector talks to.
    pub fn backend(&self) -> &SimBackend {
        &self.backend
    }
}

impl Connector for SimConnector {
    type Transport = SimTransport;

    fn open(&mut self, sink: EventSink) -> Result<SimTransport, TransportError> {
        let connection = self.backend.connect(sink)?;
        Ok(SimTransport { backend: self.backend.clone(), connection, closed: false })
    }
}

/// One connection to a [`SimBackend`].
#[derive(Debug)]
pub struct SimTransport {
    backend: SimBackend,
    connection: ConnectionId,
    closed: bool,
}

impl SimTransport {
    /// Backend-side id of this connection.
    pub fn connection(&self) -> ConnectionId {
        self.connection
    }
}

impl Transport for SimTransport {
    fn send(&mut self, message: Outbound) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Closed);
        }
        self.backend.receive(self.connection, message)
    }

    fn is_alive(&self) -> bool {
        !self.closed && self.backend.is_alive(self.connection)
    }

    fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.backend.release(self.connection);
        }
    }
}
