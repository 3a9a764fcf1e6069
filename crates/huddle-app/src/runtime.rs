//! Session runtime.
//!
//! The runtime drives the session event loop, coordinating between:
//! - [`Client`]: the session state machine
//! - [`Connector`] / [`Transport`]: the backend connection
//! - [`SessionStore`]: persisted session
//! - [`SessionHandle`]: commands in, observable state out
//!
//! It is the single writer for all of them. Transport and store failures are
//! logged here and never reach callers.

use std::{collections::HashMap, time::Duration};

use huddle_client::{
    ChatMessage, Client, ClientAction, ClientConfig, ClientError, ClientEvent, Environment,
    PersistedSession, RequestId, RoomId, RoomOutcome, SessionIdentity, TransportId,
    store::SessionStore,
};
use tokio::{
    sync::{mpsc, oneshot, watch},
    task::JoinHandle,
    time::MissedTickBehavior,
};

use crate::{
    handle::SessionHandle,
    transport::{Connector, EventSink, Transport, TransportEvent},
};

/// Interval between client ticks.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Commands queued before `SessionHandle` callers wait.
pub const DEFAULT_COMMAND_BUFFER: usize = 32;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// State machine configuration.
    pub client: ClientConfig,
    /// Interval between client ticks.
    pub tick_interval: Duration,
    /// Command channel capacity.
    pub command_buffer: usize,
    /// Room id from a deep link; wins over the persisted room on rejoin.
    pub deep_link: Option<RoomId>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            command_buffer: DEFAULT_COMMAND_BUFFER,
            deep_link: None,
        }
    }
}

/// Request from a [`SessionHandle`].
pub(crate) enum Command {
    CreateRoom {
        nickname: String,
        user_icon: Option<String>,
        reply: oneshot::Sender<Result<RoomId, ClientError>>,
    },
    JoinRoom {
        nickname: String,
        room_id: RoomId,
        user_icon: Option<String>,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    LeaveRoom {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SendMessage {
        body: String,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    SetTyping {
        typing: bool,
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    InputBlurred {
        reply: oneshot::Sender<Result<(), ClientError>>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// Caller waiting for a create/join completion.
enum PendingReply {
    Create(oneshot::Sender<Result<RoomId, ClientError>>),
    Join(oneshot::Sender<Result<(), ClientError>>),
}

/// Sending halves of the observable state.
pub(crate) struct Observers {
    pub(crate) ready: watch::Sender<bool>,
    pub(crate) session: watch::Sender<Option<SessionIdentity>>,
    pub(crate) messages: watch::Sender<Vec<ChatMessage>>,
    pub(crate) anyone_typing: watch::Sender<bool>,
    pub(crate) restoring: watch::Sender<bool>,
    messages_revision: u64,
}

impl Observers {
    fn new<E: Environment>(client: &Client<E>) -> Self {
        Self {
            ready: watch::Sender::new(client.is_ready()),
            session: watch::Sender::new(client.identity().cloned()),
            messages: watch::Sender::new(client.messages().to_vec()),
            anyone_typing: watch::Sender::new(client.anyone_typing()),
            restoring: watch::Sender::new(client.is_restoring()),
            messages_revision: client.messages_revision(),
        }
    }

    /// Push changed state to subscribers.
    fn publish<E: Environment>(&mut self, client: &Client<E>) {
        publish_if_changed(&self.ready, client.is_ready());
        publish_if_changed(&self.session, client.identity().cloned());
        publish_if_changed(&self.anyone_typing, client.anyone_typing());
        publish_if_changed(&self.restoring, client.is_restoring());

        if client.messages_revision() != self.messages_revision {
            self.messages_revision = client.messages_revision();
            self.messages.send_replace(client.messages().to_vec());
        }
    }
}

fn publish_if_changed<T: PartialEq>(tx: &watch::Sender<T>, value: T) {
    tx.send_if_modified(|current| {
        if *current == value {
            false
        } else {
            *current = value;
            true
        }
    });
}

/// Session actor.
///
/// # Type Parameters
///
/// - `C`: builds transports to the backend
/// - `S`: persisted session store
/// - `E`: environment providing time
pub struct Runtime<C, S, E>
where
    C: Connector,
    S: SessionStore,
    E: Environment,
{
    env: E,
    client: Client<E>,
    connector: C,
    store: S,
    tick_interval: Duration,

    /// Canonical transport. Only the runtime creates or replaces it.
    transport: Option<(TransportId, C::Transport)>,

    commands: mpsc::Receiver<Command>,
    events_tx: mpsc::UnboundedSender<(TransportId, TransportEvent)>,
    events_rx: mpsc::UnboundedReceiver<(TransportId, TransportEvent)>,

    pending: HashMap<RequestId, PendingReply>,
    last_request: u64,
    observers: Observers,
}

impl<C, S, E> Runtime<C, S, E>
where
    C: Connector,
    S: SessionStore,
    E: Environment,
{
    /// Create a runtime and the handle that talks to it.
    ///
    /// Loads the persisted session immediately so the handle's restoring flag
    /// is accurate from the start.
    pub fn new(connector: C, store: S, env: E, config: RuntimeConfig) -> (Self, SessionHandle) {
        let mut client = Client::new(env.clone(), config.client);

        let persisted = match store.load() {
            Ok(persisted) => persisted,
            Err(e) => {
                tracing::warn!(error = %e, "failed to load persisted session");
                PersistedSession::default()
            },
        };
        let restore = ClientEvent::Restore { persisted, deep_link: config.deep_link };
        if let Err(e) = client.handle(restore) {
            tracing::warn!(error = %e, "restore rejected");
        }

        let (commands_tx, commands) = mpsc::channel(config.command_buffer.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let observers = Observers::new(&client);
        let handle = SessionHandle::new(commands_tx, &observers);

        let runtime = Self {
            env,
            client,
            connector,
            store,
            tick_interval: config.tick_interval,
            transport: None,
            commands,
            events_tx,
            events_rx,
            pending: HashMap::new(),
            last_request: 0,
            observers,
        };

        (runtime, handle)
    }

    /// Run the event loop until shutdown or until every handle is dropped.
    pub async fn run(mut self) {
        self.feed(ClientEvent::Connect);
        self.observers.publish(&self.client);

        let mut ticker = tokio::time::interval(self.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = self.commands.recv() => {
                    let Some(command) = command else {
                        tracing::debug!("all session handles dropped");
                        break;
                    };
                    if self.handle_command(command) {
                        break;
                    }
                }

                Some((transport, event)) = self.events_rx.recv() => {
                    self.handle_transport_event(transport, event);
                }

                _ = ticker.tick() => self.handle_tick(),
            }

            self.observers.publish(&self.client);
        }

        self.teardown();
    }

    /// Handle a command. Returns `true` if the loop should stop.
    fn handle_command(&mut self, command: Command) -> bool {
        match command {
            Command::CreateRoom { nickname, user_icon, reply } => {
                let request = self.next_request();
                match self.client.handle(ClientEvent::CreateRoom { request, nickname, user_icon }) {
                    Ok(actions) => {
                        self.pending.insert(request, PendingReply::Create(reply));
                        self.execute(actions);
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    },
                }
            },
            Command::JoinRoom { nickname, room_id, user_icon, reply } => {
                let request = self.next_request();
                let event = ClientEvent::JoinRoom { request, nickname, room_id, user_icon };
                match self.client.handle(event) {
                    Ok(actions) => {
                        self.pending.insert(request, PendingReply::Join(reply));
                        self.execute(actions);
                    },
                    Err(e) => {
                        let _ = reply.send(Err(e));
                    },
                }
            },
            Command::LeaveRoom { reply } => {
                let _ = reply.send(self.dispatch(ClientEvent::LeaveRoom));
            },
            Command::SendMessage { body, reply } => {
                let _ = reply.send(self.dispatch(ClientEvent::SendMessage { body }));
            },
            Command::SetTyping { typing, reply } => {
                let _ = reply.send(self.dispatch(ClientEvent::SetTyping { typing }));
            },
            Command::InputBlurred { reply } => {
                let _ = reply.send(self.dispatch(ClientEvent::InputBlurred));
            },
            Command::Shutdown { reply } => {
                self.teardown();
                let _ = reply.send(());
                return true;
            },
        }

        false
    }

    fn handle_transport_event(&mut self, transport: TransportId, event: TransportEvent) {
        let event = match event {
            TransportEvent::Ready => ClientEvent::TransportReady { transport },
            TransportEvent::Closed => {
                // The transport closed itself; nothing left to release
                if self.transport.as_ref().is_some_and(|(id, _)| *id == transport) {
                    self.transport = None;
                }
                ClientEvent::TransportClosed { transport }
            },
            TransportEvent::Message(message) => ClientEvent::Received { transport, message },
        };

        self.feed(event);
    }

    fn handle_tick(&mut self) {
        if let Some((transport, handle)) = &self.transport
            && !handle.is_alive()
        {
            let transport = *transport;
            tracing::warn!(%transport, "transport vanished without closing");
            self.transport = None;
            self.feed(ClientEvent::TransportDropped { transport });
        }

        let now = self.env.now();
        self.feed(ClientEvent::Tick { now });
    }

    /// Feed a user intent and report its synchronous outcome.
    fn dispatch(&mut self, event: ClientEvent<E::Instant>) -> Result<(), ClientError> {
        let actions = self.client.handle(event)?;
        self.execute(actions);
        Ok(())
    }

    /// Feed an internal event. Errors are logged only.
    fn feed(&mut self, event: ClientEvent<E::Instant>) {
        match self.client.handle(event) {
            Ok(actions) => self.execute(actions),
            Err(e) => tracing::debug!(error = %e, "event rejected"),
        }
    }

    /// Execute client actions, including any follow-up actions they cause.
    fn execute(&mut self, initial_actions: Vec<ClientAction>) {
        let mut pending_actions = initial_actions;

        while !pending_actions.is_empty() {
            let actions = std::mem::take(&mut pending_actions);

            for action in actions {
                let follow_up = self.execute_one(action);
                pending_actions.extend(follow_up);
            }
        }
    }

    fn execute_one(&mut self, action: ClientAction) -> Vec<ClientAction> {
        match action {
            ClientAction::OpenTransport { transport } => {
                let sink = EventSink::new(transport, self.events_tx.clone());
                match self.connector.open(sink) {
                    Ok(handle) => {
                        let replaced = self.transport.replace((transport, handle));
                        if let Some((old, mut old_handle)) = replaced {
                            tracing::debug!(transport = %old, "replacing transport");
                            old_handle.close();
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
                    tracing::debug!(%transport, "no transport, envelope dropped");
                    return Vec::new();
                };
                if *current != transport {
                    tracing::debug!(%transport, "stale transport, envelope dropped");
                    return Vec::new();
                }

                match handle.send(message) {
                    Ok(()) => Vec::new(),
                    Err(e) => {
                        tracing::warn!(%transport, error = %e, "send failed");
                        self.transport = None;
                        let event = ClientEvent::TransportDropped { transport };
                        self.client.handle(event).unwrap_or_default()
                    },
                }
            },
            ClientAction::PersistSession(persisted) => {
                if let Err(e) = self.store.save(&persisted) {
                    tracing::warn!(error = %e, "failed to persist session");
                }
                Vec::new()
            },
            ClientAction::ClearSession => {
                if let Err(e) = self.store.clear() {
                    tracing::warn!(error = %e, "failed to clear persisted session");
                }
                Vec::new()
            },
            ClientAction::Completed { request, result } => {
                match self.pending.remove(&request) {
                    Some(PendingReply::Create(reply)) => {
                        let _ = reply.send(result.map(|outcome| outcome.room_id().clone()));
                    },
                    Some(PendingReply::Join(reply)) => {
                        let _ = reply.send(result.map(|_: RoomOutcome| ()));
                    },
                    None => tracing::debug!(%request, "completion without a waiting caller"),
                }
                Vec::new()
            },
        }
    }

    /// Stop the client and release the transport. Idempotent.
    fn teardown(&mut self) {
        if !self.client.is_shut_down() {
            self.feed(ClientEvent::Shutdown);
        }

        if let Some((_, mut handle)) = self.transport.take() {
            handle.close();
        }

        // Dropped senders resolve their callers with ShutDown
        self.pending.clear();
        self.observers.publish(&self.client);
        tracing::info!("session runtime stopped");
    }

    fn next_request(&mut self) -> RequestId {
        self.last_request += 1;
        RequestId::new(self.last_request)
    }
}

/// Spawn a runtime on the current tokio runtime.
///
/// Returns the handle for the view layer and the task running the loop.
pub fn spawn<C, S, E>(
    connector: C,
    store: S,
    env: E,
    config: RuntimeConfig,
) -> (SessionHandle, JoinHandle<()>)
where
    C: Connector,
    S: SessionStore,
    E: Environment,
{
    let (runtime, handle) = Runtime::new(connector, store, env, config);
    let task = tokio::spawn(runtime.run());
    (handle, task)
}
