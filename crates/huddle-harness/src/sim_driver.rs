//! Synchronous simulation driver.
//!
//! `SimDriver` executes [`Client`] actions the same way
//! [`huddle_app::Runtime`] does, but without an async runtime: the backend
//! answers synchronously, so after every step the driver pumps transport
//! callbacks until the system is quiet. Time moves only through
//! [`SimDriver::advance`].

use std::time::{Duration, Instant};

use huddle_app::{Connector, EventSink, Transport, TransportEvent};
use huddle_client::{
    Client, ClientAction, ClientConfig, ClientError, ClientEvent, Environment, PersistedSession,
    RequestId, RoomId, RoomOutcome, TransportId,
    store::{MemorySessionStore, SessionStore},
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    sim_backend::{ConnectionId, SimBackend},
    sim_env::SimEnv,
    sim_transport::{SimConnector, SimTransport},
};

/// Outcome of a create or join request.
pub type Completion = (RequestId, Result<RoomOutcome, ClientError>);

/// Drives one client against a [`SimBackend`] step by step.
pub struct SimDriver<S: SessionStore = MemorySessionStore> {
    env: SimEnv,
    client: Client<SimEnv>,
    connector: SimConnector,
    transport: Option<(TransportId, SimTransport)>,
    store: S,
    events_tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,
    completions: Vec<Completion>,
    last_request: u64,
}

impl SimDriver<MemorySessionStore> {
    /// Driver with an empty in-memory store and default configuration.
    pub fn new(backend: SimBackend) -> Self {
        Self::with_store(backend, MemorySessionStore::new(), ClientConfig::default())
    }
}

impl<S: SessionStore> SimDriver<S> {
    /// Driver over an existing store.
    pub fn with_store(backend: SimBackend, store: S, config: ClientConfig) -> Self {
        let env = SimEnv::new();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            client: Client::new(env.clone(), config),
            env,
            connector: SimConnector::new(backend),
            transport: None,
            store,
            events_tx,
            events_rx,
            completions: Vec::new(),
            last_request: 0,
        }
    }

    /// Load the store and arm the automatic rejoin, as at process start.
    pub fn restore(&mut self, deep_link: Option<RoomId>) -> Result<(), ClientError> {
        let persisted = match self.store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                warn!(error = %e, "failed to load persisted session");
                PersistedSession::default()
            },
        };
        self.handle(ClientEvent::Restore { persisted, deep_link })
    }

    /// Start the connection.
    pub fn connect(&mut self) {
        self.feed(ClientEvent::Connect);
    }

    /// Feed an event, execute its actions and pump until quiet.
    pub fn handle(&mut self, event: ClientEvent<Instant>) -> Result<(), ClientError> {
        let actions = self.client.handle(event)?;
        self.execute(actions);
        self.pump();
        Ok(())
    }

    /// Deliver queued transport callbacks until none remain.
    ///
    /// Returns the number of callbacks delivered.
    pub fn pump(&mut self) -> usize {
        let mut delivered = 0;
        while let Ok((transport, event)) = self.events_rx.try_recv() {
            delivered += 1;
            let event = match event {
                TransportEvent::Ready => ClientEvent::TransportReady { transport },
                TransportEvent::Closed => {
                    if self.transport.as_ref().is_some_and(|(id, _)| *id == transport) {
                        self.transport = None;
                    }
                    ClientEvent::TransportClosed { transport }
                },
                TransportEvent::Message(message) => ClientEvent::Received { transport, message },
            };
            match self.client.handle(event) {
                Ok(actions) => self.execute(actions),
                Err(e) => debug!(error = %e, "event rejected"),
            }
        }
        delivered
    }

    /// Move time forward and tick once.
    pub fn advance(&mut self, by: Duration) {
        self.env.advance(by);

        if let Some((transport, handle)) = &self.transport
            && !handle.is_alive()
        {
            let transport = *transport;
            self.transport = None;
            self.feed(ClientEvent::TransportDropped { transport });
        }

        let now = self.env.now();
        self.feed(ClientEvent::Tick { now });
    }

    /// Advance in `step` increments until `total` has passed.
    pub fn run_for(&mut self, total: Duration, step: Duration) {
        let step = step.max(Duration::from_millis(1));
        let mut elapsed = Duration::ZERO;
        while elapsed < total {
            self.advance(step);
            elapsed += step;
        }
    }

    /// Issue a create request. Returns its id for [`Self::completion`].
    pub fn create_room(
        &mut self,
        nickname: &str,
        user_icon: Option<String>,
    ) -> Result<RequestId, ClientError> {
        let request = self.next_request();
        self.handle(ClientEvent::CreateRoom { request, nickname: nickname.into(), user_icon })?;
        Ok(request)
    }

    /// Issue a join request. Returns its id for [`Self::completion`].
    pub fn join_room(
        &mut self,
        nickname: &str,
        room_id: impl Into<RoomId>,
        user_icon: Option<String>,
    ) -> Result<RequestId, ClientError> {
        let request = self.next_request();
        let event = ClientEvent::JoinRoom {
            request,
            nickname: nickname.into(),
            room_id: room_id.into(),
            user_icon,
        };
        self.handle(event)?;
        Ok(request)
    }

    /// Send a chat message.
    pub fn send_message(&mut self, body: &str) -> Result<(), ClientError> {
        self.handle(ClientEvent::SendMessage { body: body.into() })
    }

    /// Set the local typing flag.
    pub fn set_typing(&mut self, typing: bool) -> Result<(), ClientError> {
        self.handle(ClientEvent::SetTyping { typing })
    }

    /// Leave the current room.
    pub fn leave_room(&mut self) -> Result<(), ClientError> {
        self.handle(ClientEvent::LeaveRoom)
    }

    /// Shut the client down and release the transport.
    pub fn shutdown(&mut self) {
        self.feed(ClientEvent::Shutdown);
        if let Some((_, mut handle)) = self.transport.take() {
            handle.close();
        }
    }

    /// Result of a finished request, if it finished.
    pub fn completion(&self, request: RequestId) -> Option<&Result<RoomOutcome, ClientError>> {
        self.completions.iter().find(|(id, _)| *id == request).map(|(_, result)| result)
    }

    /// Every completion so far, in order.
    pub fn completions(&self) -> &[Completion] {
        &self.completions
    }

    /// The client under test.
    pub fn client(&self) -> &Client<SimEnv> {
        &self.client
    }

    /// The persisted session store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// The backend.
    pub fn backend(&self) -> &SimBackend {
        self.connector.backend()
    }

    /// The clock.
    pub fn env(&self) -> &SimEnv {
        &self.env
    }

    /// Backend-side id of the live transport.
    pub fn connection(&self) -> Option<ConnectionId> {
        self.transport.as_ref().map(|(_, handle)| handle.connection())
    }

    fn feed(&mut self, event: ClientEvent<Instant>) {
        match self.client.handle(event) {
            Ok(actions) => self.execute(actions),
            Err(e) => debug!(error = %e, "event rejected"),
        }
        self.pump();
    }

    fn execute(&mut self, initial_actions: Vec<ClientAction>) {
        let mut pending_actions = initial_actions;

        while !pending_actions.is_empty() {
            let actions = std::mem::take(&mut pending_actions);
            for action in actions {
                pending_actions.extend(self.execute_one(action));
            }
        }
    }

    fn execute_one(&mut self, action: ClientAction) -> Vec<ClientAction> {
        match action {
            ClientAction::OpenTransport { transport } => {
                let sink = EventSink::new(transport, self.events_tx.clone());
                match self.connector.open(sink) {
                    Ok(handle) => {
                        if let Some((_, mut old)) = self.transport.replace((transport, handle)) {
                            old.close();
                        }
                        Vec::new()
                    },
                    Err(e) => {
                        let reason = e.to_string();
                        let event = ClientEvent::TransportFailed { transport, reason };
                        self.client.handle(event).unwrap_or_default()
                    },
                }
            },
            ClientAction::CloseTransport { transport } => {
                if let Some((_, mut handle)) =
                    self.transport.take_if(|(current, _)| *current == transport)
                {
                    handle.close();
                }
                Vec::new()
            },
            ClientAction::Send { transport, message } => {
                let Some((current, handle)) = self.transport.as_mut() else {
                    return Vec::new();
                };
                if *current != transport {
                    return Vec::new();
                }
                match handle.send(message) {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        warn!(%transport, error = %e, "send failed");
                        self.transport = None;
                        let event = ClientEvent::TransportDropped { transport };
                        self.client.handle(event).unwrap_or_default()
                    },
                }
            },
            ClientAction::PersistSession(persisted) => {
                if let Err(e) = self.store.save(&persisted) {
                    warn!(error = %e, "failed to persist session");
                }
                Vec::new()
            },
            ClientAction::ClearSession => {
                if let Err(e) = self.store.clear() {
                    warn!(error = %e, "failed to clear persisted session");
                }
                Vec::new()
            },
            ClientAction::Completed { request, result } => {
                self.completions.push((request, result));
                Vec::new()
            },
        }
    }

    fn next_request(&mut self) -> RequestId {
        self.last_request += 1;
        RequestId::new(self.last_request)
    }
}
