//! Handle given to the view layer.

use huddle_client::{ChatMessage, ClientError, RoomId, SessionIdentity};
use tokio::sync::{mpsc, oneshot, watch};

use crate::runtime::{Command, Observers};

/// Cloneable handle to a running session runtime.
///
/// Operations are queued to the runtime and resolve when it has processed
/// them; create and join resolve when the backend answers. Observable state is
/// read from `watch` channels and never blocks.
///
/// Every operation fails with [`ClientError::ShutDown`] once the runtime has
/// stopped.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    ready: watch::Receiver<bool>,
    session: watch::Receiver<Option<SessionIdentity>>,
    messages: watch::Receiver<Vec<ChatMessage>>,
    anyone_typing: watch::Receiver<bool>,
    restoring: watch::Receiver<bool>,
}

impl SessionHandle {
    pub(crate) fn new(commands: mpsc::Sender<Command>, observers: &Observers) -> Self {
        Self {
            commands,
            ready: observers.ready.subscribe(),
            session: observers.session.subscribe(),
            messages: observers.messages.subscribe(),
            anyone_typing: observers.anyone_typing.subscribe(),
            restoring: observers.restoring.subscribe(),
        }
    }

    /// Create a room and become its first participant.
    ///
    /// Resolves with the new room id once the backend answers.
    pub async fn create_room(
        &self,
        nickname: impl Into<String>,
        user_icon: Option<String>,
    ) -> Result<RoomId, ClientError> {
        let nickname = nickname.into();
        self.request(|reply| Command::CreateRoom { nickname, user_icon, reply }).await
    }

    /// Join an existing room.
    ///
    /// Resolves once the backend admitted us and the message list holds the
    /// room's history.
    pub async fn join_room(
        &self,
        nickname: impl Into<String>,
        room_id: impl Into<RoomId>,
        user_icon: Option<String>,
    ) -> Result<(), ClientError> {
        let nickname = nickname.into();
        let room_id = room_id.into();
        self.request(|reply| Command::JoinRoom { nickname, room_id, user_icon, reply }).await
    }

    /// Leave the current room. The connection stays up.
    pub async fn leave_room(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::LeaveRoom { reply }).await
    }

    /// Send a chat message to the current room.
    pub async fn send_message(&self, body: impl Into<String>) -> Result<(), ClientError> {
        let body = body.into();
        self.request(|reply| Command::SendMessage { body, reply }).await
    }

    /// Report that the local user is (or stopped) typing.
    pub async fn set_typing(&self, typing: bool) -> Result<(), ClientError> {
        self.request(|reply| Command::SetTyping { typing, reply }).await
    }

    /// Report that the input lost focus.
    pub async fn input_blurred(&self) -> Result<(), ClientError> {
        self.request(|reply| Command::InputBlurred { reply }).await
    }

    /// Stop the runtime and release the connection.
    ///
    /// Idempotent; returns once the runtime has stopped.
    pub async fn shutdown(&self) {
        let (reply, rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    /// True while the connection is ready.
    pub fn is_ready(&self) -> bool {
        *self.ready.borrow()
    }

    /// Current session identity, if in a room.
    pub fn session(&self) -> Option<SessionIdentity> {
        self.session.borrow().clone()
    }

    /// Messages of the current room in display order.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.borrow().clone()
    }

    /// True if the backend reports anyone typing.
    pub fn anyone_typing(&self) -> bool {
        *self.anyone_typing.borrow()
    }

    /// True while an automatic rejoin is pending.
    pub fn is_restoring(&self) -> bool {
        *self.restoring.borrow()
    }

    /// Subscribe to readiness changes.
    pub fn subscribe_ready(&self) -> watch::Receiver<bool> {
        self.ready.clone()
    }

    /// Subscribe to session identity changes.
    pub fn subscribe_session(&self) -> watch::Receiver<Option<SessionIdentity>> {
        self.session.clone()
    }

    /// Subscribe to message list changes.
    pub fn subscribe_messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages.clone()
    }

    /// Subscribe to remote typing changes.
    pub fn subscribe_typing(&self) -> watch::Receiver<bool> {
        self.anyone_typing.clone()
    }

    /// Wait until the connection is ready.
    pub async fn wait_ready(&self) -> Result<(), ClientError> {
        let mut ready = self.ready.clone();
        ready.wait_for(|ready| *ready).await.map_err(|_| ClientError::ShutDown)?;
        Ok(())
    }

    /// Wait until no automatic rejoin is pending.
    pub async fn wait_restored(&self) -> Result<(), ClientError> {
        let mut restoring = self.restoring.clone();
        restoring.wait_for(|restoring| !*restoring).await.map_err(|_| ClientError::ShutDown)?;
        Ok(())
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<Result<T, ClientError>>) -> Command,
    ) -> Result<T, ClientError> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(build(reply)).await.map_err(|_| ClientError::ShutDown)?;
        rx.await.map_err(|_| ClientError::ShutDown)?
    }
}
