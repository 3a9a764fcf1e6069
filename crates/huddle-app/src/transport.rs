//! Transport abstraction.
//!
//! The backend is reached through a [`Connector`] that builds one
//! [`Transport`] per connection attempt. Lifecycle callbacks and inbound
//! envelopes flow back through an [`EventSink`], stamped with the transport id
//! the runtime assigned, so callbacks from a replaced transport are
//! recognisable as stale.

use huddle_core::{Inbound, Outbound, ProtocolError, TransportId};
use thiserror::Error;
use tokio::sync::mpsc;

/// Callback from a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is usable.
    Ready,
    /// The connection closed.
    Closed,
    /// An envelope arrived.
    Message(Inbound),
}

/// Transport failures.
///
/// Never surfaced to callers: the runtime logs them and the connection
/// supervisor treats them as a non-ready connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The backend could not be reached.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The connection is no longer usable.
    #[error("transport closed")]
    Closed,

    /// An envelope could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Where a transport reports its callbacks.
///
/// Cheap to clone. Every event carries the id of the transport it was created
/// for.
#[derive(Debug, Clone)]
pub struct EventSink {
    transport: TransportId,
    tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
}

impl EventSink {
    /// Create a sink stamping events with `transport`.
    pub fn new(
        transport: TransportId,
        tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
    ) -> Self {
        Self { transport, tx }
    }

    /// Transport id stamped on events.
    pub fn transport(&self) -> TransportId {
        self.transport
    }

    /// Report that the connection is ready. Returns false if nobody listens.
    pub fn ready(&self) -> bool {
        self.emit(TransportEvent::Ready)
    }

    /// Report that the connection closed. Returns false if nobody listens.
    pub fn closed(&self) -> bool {
        self.emit(TransportEvent::Closed)
    }

    /// Hand an inbound envelope to the runtime. Returns false if nobody
    /// listens.
    pub fn deliver(&self, message: Inbound) -> bool {
        self.emit(TransportEvent::Message(message))
    }

    fn emit(&self, event: TransportEvent) -> bool {
        self.tx.send((self.transport, event)).is_ok()
    }
}

/// A live connection to the backend.
pub trait Transport: Send + 'static {
    /// Send an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is no longer usable.
    fn send(&mut self, message: Outbound) -> Result<(), TransportError>;

    /// False once the underlying connection has gone away, with or without a
    /// close callback.
    fn is_alive(&self) -> bool;

    /// Close the connection. No callbacks are expected afterwards.
    fn close(&mut self);
}

/// Builds transports.
pub trait Connector: Send + 'static {
    /// Transport this connector builds.
    type Transport: Transport;

    /// Start a connection that reports through `sink`.
    ///
    /// Readiness is reported asynchronously through [`EventSink::ready`].
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot even be started.
    fn open(&mut self, sink: EventSink) -> Result<Self::Transport, TransportError>;
}
