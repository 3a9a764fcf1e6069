//! Client state machine.
//!
//! The `Client` is the top-level state machine for one session. It routes
//! transport lifecycle events to the connection supervisor, room requests and
//! replies to the session manager, and inbound broadcasts to the message
//! stream or typing presence.

use huddle_core::{
    Append, ChatMessage, ConnectionState, Environment, Inbound, MessageStream, Outbound,
    PreconditionError, RequestId, RoomId, SessionAction, SessionConfig, SessionIdentity,
    SessionManager, Supervisor, SupervisorAction, SupervisorConfig, TransportId, TypingPresence,
};
use tracing::{debug, info, warn};

use crate::{
    error::ClientError,
    event::{ClientAction, ClientEvent},
};

/// Client configuration.
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Connection supervision.
    pub supervisor: SupervisorConfig,
    /// Room requests and rejoin.
    pub session: SessionConfig,
}

/// Session client for a shared chat room.
pub struct Client<E: Environment> {
    /// Environment for timing.
    env: E,

    /// Transport lifecycle.
    supervisor: Supervisor<E::Instant>,

    /// Identity, create/join/rejoin/leave.
    sessions: SessionManager<E::Instant>,

    /// Chat log of the current room.
    stream: MessageStream,

    /// Local and remote typing state.
    presence: TypingPresence,

    shut_down: bool,
}

impl<E: Environment> Client<E> {
    /// Create a disconnected client with no session.
    pub fn new(env: E, config: ClientConfig) -> Self {
        Self {
            env,
            supervisor: Supervisor::new(config.supervisor),
            sessions: SessionManager::new(config.session),
            stream: MessageStream::new(),
            presence: TypingPresence::new(),
            shut_down: false,
        }
    }

    /// Connection state.
    pub fn connection_state(&self) -> ConnectionState {
        self.supervisor.state()
    }

    /// True once the live transport reported ready.
    pub fn is_ready(&self) -> bool {
        self.supervisor.is_ready()
    }

    /// Canonical transport, if any.
    pub fn current_transport(&self) -> Option<TransportId> {
        self.supervisor.current_transport()
    }

    /// Current identity, if in a room.
    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.sessions.identity()
    }

    /// True while an automatic rejoin is pending.
    pub fn is_restoring(&self) -> bool {
        self.sessions.is_restoring()
    }

    /// Messages of the current room in display order.
    pub fn messages(&self) -> &[ChatMessage] {
        self.stream.messages()
    }

    /// Changes whenever the message list changes.
    pub fn messages_revision(&self) -> u64 {
        self.stream.revision()
    }

    /// True if the backend reports anyone typing.
    pub fn anyone_typing(&self) -> bool {
        self.presence.anyone_typing()
    }

    /// Changes whenever remote typing state changes.
    pub fn presence_revision(&self) -> u64 {
        self.presence.revision()
    }

    /// Last typing flag emitted for the local user.
    pub fn local_typing(&self) -> bool {
        self.presence.local_typing()
    }

    /// True after [`ClientEvent::Shutdown`].
    pub fn is_shut_down(&self) -> bool {
        self.shut_down
    }

    /// Process an event and return resulting actions.
    ///
    /// # Errors
    ///
    /// Precondition failures for user intents, and [`ClientError::ShutDown`]
    /// for any event after shutdown. An erroring event changes nothing.
    pub fn handle(
        &mut self,
        event: ClientEvent<E::Instant>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        if self.shut_down {
            return match event {
                ClientEvent::Shutdown => Ok(Vec::new()),
                _ => Err(ClientError::ShutDown),
            };
        }

        match event {
            ClientEvent::Connect => {
                let actions = self.supervisor.connect(self.env.now());
                Ok(self.apply_supervisor(actions))
            },
            ClientEvent::TransportReady { transport } => {
                let actions = self.supervisor.handle_ready(transport);
                Ok(self.apply_supervisor(actions))
            },
            ClientEvent::TransportClosed { transport } => {
                let actions = self.supervisor.handle_closed(transport, self.env.now());
                Ok(self.apply_supervisor(actions))
            },
            ClientEvent::TransportFailed { transport, reason } => {
                warn!(%transport, %reason, "transport failed to open");
                let actions = self.supervisor.handle_open_failed(transport, self.env.now());
                Ok(self.apply_supervisor(actions))
            },
            ClientEvent::TransportDropped { transport } => {
                let actions = self.supervisor.handle_dropped(transport, self.env.now());
                Ok(self.apply_supervisor(actions))
            },
            ClientEvent::Received { transport, message } => {
                Ok(self.handle_inbound(transport, message))
            },
            ClientEvent::Tick { now } => Ok(self.handle_tick(now)),
            ClientEvent::CreateRoom { request, nickname, user_icon } => {
                self.handle_create_room(request, &nickname, user_icon)
            },
            ClientEvent::JoinRoom { request, nickname, room_id, user_icon } => {
                self.handle_join_room(request, &nickname, room_id, user_icon)
            },
            ClientEvent::Restore { persisted, deep_link } => {
                if self.sessions.arm_rejoin(persisted, deep_link) {
                    info!("restoring persisted session");
                    if self.supervisor.is_ready() {
                        self.sessions.on_ready(self.env.now());
                    }
                }
                Ok(Vec::new())
            },
            ClientEvent::LeaveRoom => Ok(self.handle_leave_room()),
            ClientEvent::SendMessage { body } => self.handle_send_message(body),
            ClientEvent::SetTyping { typing } => self.handle_set_typing(typing),
            ClientEvent::InputBlurred => Ok(self.handle_input_blurred()),
            ClientEvent::Shutdown => Ok(self.handle_shutdown()),
        }
    }

    fn handle_tick(&mut self, now: E::Instant) -> Vec<ClientAction> {
        let supervisor_actions = self.supervisor.tick(now);
        let mut actions = self.apply_supervisor(supervisor_actions);

        let session_actions = self.sessions.tick(now, self.supervisor.is_ready());
        actions.extend(self.apply_session(session_actions));
        actions
    }

    fn handle_create_room(
        &mut self,
        request: RequestId,
        nickname: &str,
        user_icon: Option<String>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let ready = self.supervisor.is_ready();
        let actions =
            self.sessions.create_room(request, nickname, user_icon, ready, self.env.now())?;

        debug!(%request, nickname, "creating room");
        Ok(self.apply_session(actions))
    }

    fn handle_join_room(
        &mut self,
        request: RequestId,
        nickname: &str,
        room_id: RoomId,
        user_icon: Option<String>,
    ) -> Result<Vec<ClientAction>, ClientError> {
        let ready = self.supervisor.is_ready();
        let actions =
            self.sessions.join_room(request, nickname, room_id, user_icon, ready, self.env.now())?;

        debug!(%request, nickname, "joining room");
        Ok(self.apply_session(actions))
    }

    fn handle_leave_room(&mut self) -> Vec<ClientAction> {
        let mut actions = Vec::new();

        // Others must not keep seeing us as typing after we are gone
        if self.presence.local_typing() && self.sessions.identity().is_some() {
            let release = self.presence.release();
            actions.extend(self.send(release));
        }

        if let Some(identity) = self.sessions.identity() {
            info!(room_id = %identity.room_id, "leaving room");
        }

        let session_actions = self.sessions.leave();
        actions.extend(self.apply_session(session_actions));
        actions
    }

    fn handle_send_message(&mut self, body: String) -> Result<Vec<ClientAction>, ClientError> {
        self.sessions.require_identity()?;
        let transport = self.ready_transport()?;
        if body.trim().is_empty() {
            return Err(PreconditionError::EmptyMessage.into());
        }

        let release = self.presence.release();
        Ok(vec![
            ClientAction::Send { transport, message: Outbound::SendMessage { body } },
            ClientAction::Send { transport, message: release },
        ])
    }

    fn handle_set_typing(&mut self, typing: bool) -> Result<Vec<ClientAction>, ClientError> {
        self.sessions.require_identity()?;
        let transport = self.ready_transport()?;

        let message = self.presence.set_local_typing(typing);
        Ok(vec![ClientAction::Send { transport, message }])
    }

    fn handle_input_blurred(&mut self) -> Vec<ClientAction> {
        let release = self.presence.release();

        if self.sessions.identity().is_none() {
            return Vec::new();
        }
        self.send(release).into_iter().collect()
    }

    fn handle_shutdown(&mut self) -> Vec<ClientAction> {
        self.shut_down = true;

        let session_actions = self.sessions.shutdown();
        let mut actions = self.apply_session(session_actions);

        let supervisor_actions = self.supervisor.shutdown();
        actions.extend(self.apply_supervisor(supervisor_actions));

        info!("session client shut down");
        actions
    }

    fn handle_inbound(&mut self, transport: TransportId, message: Inbound) -> Vec<ClientAction> {
        if self.supervisor.current_transport() != Some(transport) {
            debug!(%transport, "dropping message from stale transport");
            return Vec::new();
        }

        match message {
            Inbound::ChatMessage(message) => {
                if self.sessions.identity().is_none() {
                    debug!(perm_id = %message.perm_id, "chat message outside a room");
                    return Vec::new();
                }

                let perm_id = message.perm_id.clone();
                match self.stream.append(message) {
                    Append::Appended => {},
                    Append::OutOfOrder => warn!(%perm_id, "message arrived out of order"),
                    Append::Duplicate => debug!(%perm_id, "duplicate message dropped"),
                }
                Vec::new()
            },
            Inbound::TypingPresence(update) => {
                if self.sessions.identity().is_some() {
                    self.presence.apply_remote(update);
                }
                Vec::new()
            },
            Inbound::RoomCreated { request, room_id } => {
                let actions = self.sessions.handle_created(request, room_id);
                self.apply_session(actions)
            },
            Inbound::RoomJoined { request, messages } => {
                let actions = self.sessions.handle_joined(request, messages);
                self.apply_session(actions)
            },
            Inbound::RequestFailed { request, failure } => {
                debug!(%request, ?failure, "room request refused");
                let actions = self.sessions.handle_failed(request, failure);
                self.apply_session(actions)
            },
        }
    }

    /// Live transport or [`PreconditionError::NotReady`].
    fn ready_transport(&self) -> Result<TransportId, ClientError> {
        match self.supervisor.current_transport() {
            Some(transport) if self.supervisor.is_ready() => Ok(transport),
            _ => Err(PreconditionError::NotReady.into()),
        }
    }

    /// Wrap an envelope for the live transport. `None` if not ready.
    fn send(&self, message: Outbound) -> Option<ClientAction> {
        match self.ready_transport() {
            Ok(transport) => Some(ClientAction::Send { transport, message }),
            Err(_) => {
                debug!(?message, "not ready, envelope dropped");
                None
            },
        }
    }

    fn apply_supervisor(&mut self, actions: Vec<SupervisorAction>) -> Vec<ClientAction> {
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            match action {
                SupervisorAction::Open { transport } => {
                    debug!(%transport, "opening transport");
                    out.push(ClientAction::OpenTransport { transport });
                },
                SupervisorAction::Close { transport } => {
                    out.push(ClientAction::CloseTransport { transport });
                },
                SupervisorAction::Ready => {
                    info!("connection ready");
                    self.sessions.on_ready(self.env.now());
                },
                SupervisorAction::Lost => {
                    warn!(failures = self.supervisor.failures(), "connection lost");
                    self.presence.clear_remote();
                    let session_actions = self.sessions.on_lost();
                    out.extend(self.apply_session(session_actions));
                },
            }
        }

        out
    }

    fn apply_session(&mut self, actions: Vec<SessionAction>) -> Vec<ClientAction> {
        let mut out = Vec::with_capacity(actions.len());

        for action in actions {
            match action {
                SessionAction::Send(message) => out.extend(self.send(message)),
                SessionAction::ReplaceHistory(history) => self.stream.replace_all(history),
                SessionAction::ResetRoomState => {
                    self.stream.clear();
                    self.presence.reset();
                },
                SessionAction::Persist(persisted) => {
                    out.push(ClientAction::PersistSession(persisted));
                },
                SessionAction::ClearPersisted => out.push(ClientAction::ClearSession),
                SessionAction::Entered(identity) => {
                    info!(
                        room_id = %identity.room_id,
                        nickname = %identity.nickname,
                        is_creator = identity.is_creator,
                        "entered room"
                    );
                },
                SessionAction::Completed { request, result } => {
                    out.push(ClientAction::Completed {
                        request,
                        result: result.map_err(ClientError::from),
                    });
                },
            }
        }

        out
    }
}
