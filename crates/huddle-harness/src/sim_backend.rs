//! In-memory room backend.
//!
//! `SimBackend` plays the part of the chat service: it hands out room ids,
//! keeps per-room history, broadcasts chat and typing traffic to members and
//! answers create/join requests. Every envelope crosses the boundary as CBOR
//! so encoding bugs surface in tests.
//!
//! Fault injection hooks close or kill connections, refuse new ones, hold back
//! readiness and swallow requests.

use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use huddle_app::{EventSink, TransportError};
use huddle_core::{
    ChatMessage, Inbound, Outbound, RequestId, RoomId, TypingUpdate, envelope::RequestFailure,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, trace, warn};

const ROOM_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const ROOM_ID_LEN: usize = 6;

/// Backend-side connection identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Raw connection number.
    pub const fn value(self) -> u64 {
        self.0
    }

    fn user_id(self) -> String {
        format!("user-{}", self.0)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

struct Connection {
    sink: EventSink,
    alive: bool,
    room: Option<RoomId>,
    nickname: String,
    user_icon: Option<String>,
}

#[derive(Default)]
struct Room {
    history: Vec<ChatMessage>,
    members: BTreeSet<ConnectionId>,
    typing: BTreeSet<ConnectionId>,
}

struct Inner {
    rng: ChaCha8Rng,
    rooms: BTreeMap<RoomId, Room>,
    connections: BTreeMap<ConnectionId, Connection>,
    next_connection: u64,
    next_perm_id: u64,
    clock_ms: u64,
    reachable: bool,
    auto_ready: bool,
    silent: bool,
    received: Vec<(ConnectionId, Outbound)>,
}

/// Shared in-memory backend. Clones talk to the same backend.
#[derive(Clone)]
pub struct SimBackend {
    inner: Arc<Mutex<Inner>>,
}

impl SimBackend {
    /// Create a reachable backend whose room ids derive from `seed`.
    pub fn new(seed: u64) -> Self {
        let inner = Inner {
            rng: ChaCha8Rng::seed_from_u64(seed),
            rooms: BTreeMap::new(),
            connections: BTreeMap::new(),
            next_connection: 1,
            next_perm_id: 1,
            clock_ms: 1_000,
            reachable: true,
            auto_ready: true,
            silent: false,
            received: Vec::new(),
        };
        Self { inner: Arc::new(Mutex::new(inner)) }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept a connection reporting through `sink`.
    ///
    /// Reports ready immediately unless auto-ready is off.
    pub fn connect(&self, sink: EventSink) -> Result<ConnectionId, TransportError> {
        let mut inner = self.lock();
        if !inner.reachable {
            return Err(TransportError::Refused("backend unreachable".into()));
        }

        let id = ConnectionId(inner.next_connection);
        inner.next_connection += 1;

        if inner.auto_ready {
            sink.ready();
        }
        inner.connections.insert(
            id,
            Connection { sink, alive: true, room: None, nickname: String::new(), user_icon: None },
        );
        debug!(connection = %id, "accepted");
        Ok(id)
    }

    /// Process an envelope sent by `connection`.
    pub fn receive(
        &self,
        connection: ConnectionId,
        message: Outbound,
    ) -> Result<(), TransportError> {
        let message = Outbound::from_cbor(&message.to_cbor()?)?;

        let mut inner = self.lock();
        if !inner.connections.get(&connection).is_some_and(|c| c.alive) {
            return Err(TransportError::Closed);
        }
        trace!(connection = %connection, ?message, "received");
        inner.received.push((connection, message.clone()));

        if inner.silent {
            return Ok(());
        }

        match message {
            Outbound::CreateRoom { request, nickname, user_icon } => {
                inner.create_room(connection, request, nickname, user_icon);
            },
            Outbound::JoinRoom { request, nickname, room_id, user_icon } => {
                inner.join_room(connection, request, nickname, room_id, user_icon);
            },
            Outbound::SendMessage { body } => inner.chat(connection, body),
            Outbound::SetTypingPresence { typing } => inner.set_typing(connection, typing),
        }
        Ok(())
    }

    /// Close a connection from the backend side and report it.
    pub fn close(&self, connection: ConnectionId) {
        let mut inner = self.lock();
        if inner.disconnect(connection)
            && let Some(conn) = inner.connections.get(&connection)
        {
            conn.sink.closed();
        }
    }

    /// Kill a connection without any callback.
    pub fn kill(&self, connection: ConnectionId) {
        self.lock().disconnect(connection);
    }

    /// Release a connection the client closed. No callback.
    pub fn release(&self, connection: ConnectionId) {
        self.lock().disconnect(connection);
    }

    /// Report a connection ready. Used with auto-ready off.
    pub fn make_ready(&self, connection: ConnectionId) {
        let inner = self.lock();
        if let Some(conn) = inner.connections.get(&connection).filter(|c| c.alive) {
            conn.sink.ready();
        }
    }

    /// Refuse (or accept again) new connections.
    pub fn set_reachable(&self, reachable: bool) {
        self.lock().reachable = reachable;
    }

    /// Report new connections ready on accept.
    pub fn set_auto_ready(&self, auto_ready: bool) {
        self.lock().auto_ready = auto_ready;
    }

    /// Record requests but never answer them.
    pub fn set_silent(&self, silent: bool) {
        self.lock().silent = silent;
    }

    /// Create a room with existing history.
    pub fn seed_room(&self, room_id: impl Into<RoomId>, history: Vec<ChatMessage>) -> RoomId {
        let room_id = room_id.into();
        let mut inner = self.lock();
        inner.rooms.insert(room_id.clone(), Room { history, ..Room::default() });
        room_id
    }

    /// Remove a room, as if its session expired.
    pub fn expire_room(&self, room_id: &RoomId) {
        let mut inner = self.lock();
        if let Some(room) = inner.rooms.remove(room_id) {
            for member in room.members {
                if let Some(conn) = inner.connections.get_mut(&member) {
                    conn.room = None;
                }
            }
        }
    }

    /// Push an arbitrary envelope to a live connection.
    pub fn push(&self, connection: ConnectionId, message: Inbound) {
        self.lock().deliver(connection, message);
    }

    /// Broadcast a message to a room as-is, duplicates and regressions
    /// included. Chat messages are added to the history.
    pub fn broadcast(&self, room_id: &RoomId, message: Inbound) {
        let mut inner = self.lock();
        if let Inbound::ChatMessage(chat) = &message
            && let Some(room) = inner.rooms.get_mut(room_id)
        {
            room.history.push(chat.clone());
        }
        inner.broadcast(room_id, &message);
    }

    /// True if the room exists.
    pub fn room_exists(&self, room_id: &RoomId) -> bool {
        self.lock().rooms.contains_key(room_id)
    }

    /// History of a room, oldest first.
    pub fn history(&self, room_id: &RoomId) -> Vec<ChatMessage> {
        self.lock().rooms.get(room_id).map(|r| r.history.clone()).unwrap_or_default()
    }

    /// Live members of a room.
    pub fn members(&self, room_id: &RoomId) -> Vec<ConnectionId> {
        let inner = self.lock();
        inner.rooms.get(room_id).map(|r| r.members.iter().copied().collect()).unwrap_or_default()
    }

    /// Every envelope received so far, in order.
    pub fn received(&self) -> Vec<(ConnectionId, Outbound)> {
        self.lock().received.clone()
    }

    /// Number of connections ever accepted.
    pub fn connections_opened(&self) -> usize {
        self.lock().connections.len()
    }

    /// Connections that are still alive.
    pub fn live_connections(&self) -> Vec<ConnectionId> {
        self.lock().connections.iter().filter(|(_, c)| c.alive).map(|(id, _)| *id).collect()
    }

    /// Most recently accepted connection.
    pub fn last_connection(&self) -> Option<ConnectionId> {
        self.lock().connections.keys().next_back().copied()
    }

    /// True if the connection has not been closed, killed or released.
    pub fn is_alive(&self, connection: ConnectionId) -> bool {
        self.lock().connections.get(&connection).is_some_and(|c| c.alive)
    }
}

impl fmt::Debug for SimBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.lock();
        f.debug_struct("SimBackend")
            .field("rooms", &inner.rooms.len())
            .field("connections", &inner.connections.len())
            .field("reachable", &inner.reachable)
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn generate_room_id(&mut self) -> RoomId {
        loop {
            let id: String = (0..ROOM_ID_LEN)
                .map(|_| {
                    let i = self.rng.gen_range(0..ROOM_ID_ALPHABET.len());
                    char::from(ROOM_ID_ALPHABET[i])
                })
                .collect();
            let id = RoomId::new(id);
            if !self.rooms.contains_key(&id) {
                return id;
            }
        }
    }

    fn create_room(
        &mut self,
        connection: ConnectionId,
        request: RequestId,
        nickname: String,
        user_icon: Option<String>,
    ) {
        let room_id = self.generate_room_id();
        self.rooms.insert(room_id.clone(), Room::default());
        self.enter(connection, &room_id, nickname.clone(), user_icon);

        debug!(connection = %connection, room = %room_id, "room created");
        self.deliver(connection, Inbound::RoomCreated { request, room_id: room_id.clone() });
        self.announce(&room_id, format!("{nickname} created the room"));
    }

    fn join_room(
        &mut self,
        connection: ConnectionId,
        request: RequestId,
        nickname: String,
        room_id: RoomId,
        user_icon: Option<String>,
    ) {
        let Some(history) = self.rooms.get(&room_id).map(|r| r.history.clone()) else {
            debug!(connection = %connection, room = %room_id, "join refused, no such room");
            let failure = RequestFailure::SessionNotFound;
            self.deliver(connection, Inbound::RequestFailed { request, failure });
            return;
        };

        self.enter(connection, &room_id, nickname.clone(), user_icon);
        self.deliver(connection, Inbound::RoomJoined { request, messages: history });
        self.announce(&room_id, format!("{nickname} joined"));
    }

    fn enter(
        &mut self,
        connection: ConnectionId,
        room_id: &RoomId,
        nickname: String,
        user_icon: Option<String>,
    ) {
        self.leave_room(connection);
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.room = Some(room_id.clone());
            conn.nickname = nickname;
            conn.user_icon = user_icon;
        }
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.members.insert(connection);
        }
    }

    fn chat(&mut self, connection: ConnectionId, body: String) {
        let Some(conn) = self.connections.get(&connection) else { return };
        let Some(room_id) = conn.room.clone() else {
            warn!(connection = %connection, "message outside a room dropped");
            return;
        };
        let message = ChatMessage {
            is_system_message: false,
            user_nickname: conn.nickname.clone(),
            user_icon: conn.user_icon.clone(),
            body,
            perm_id: String::new(),
            timestamp: 0,
        };
        self.post(&room_id, message);
    }

    fn announce(&mut self, room_id: &RoomId, body: String) {
        let message = ChatMessage {
            is_system_message: true,
            user_nickname: String::new(),
            user_icon: None,
            body,
            perm_id: String::new(),
            timestamp: 0,
        };
        self.post(room_id, message);
    }

    /// Stamp a message, store it and broadcast it to the room.
    fn post(&mut self, room_id: &RoomId, mut message: ChatMessage) {
        message.perm_id = format!("m{}", self.next_perm_id);
        message.timestamp = self.clock_ms;
        self.next_perm_id += 1;
        self.clock_ms += 1;

        let Some(room) = self.rooms.get_mut(room_id) else { return };
        room.history.push(message.clone());
        self.broadcast(room_id, &Inbound::ChatMessage(message));
    }

    fn set_typing(&mut self, connection: ConnectionId, typing: bool) {
        let Some(room_id) = self.connections.get(&connection).and_then(|c| c.room.clone()) else {
            return;
        };
        let Some(room) = self.rooms.get_mut(&room_id) else { return };

        if typing {
            room.typing.insert(connection);
        } else {
            room.typing.remove(&connection);
        }
        self.broadcast_typing(&room_id);
    }

    fn broadcast_typing(&mut self, room_id: &RoomId) {
        let Some(room) = self.rooms.get(room_id) else { return };
        let update = TypingUpdate {
            anyone_typing: !room.typing.is_empty(),
            users_typing: room.typing.iter().map(|c| c.user_id()).collect(),
        };
        self.broadcast(room_id, &Inbound::TypingPresence(update));
    }

    fn broadcast(&self, room_id: &RoomId, message: &Inbound) {
        let Some(room) = self.rooms.get(room_id) else { return };
        for member in &room.members {
            self.deliver(*member, message.clone());
        }
    }

    fn deliver(&self, connection: ConnectionId, message: Inbound) {
        let Some(conn) = self.connections.get(&connection).filter(|c| c.alive) else { return };

        let decoded = message.to_cbor().and_then(|bytes| Inbound::from_cbor(&bytes));
        match decoded {
            Ok(message) => {
                conn.sink.deliver(message);
            },
            Err(e) => warn!(connection = %connection, error = %e, "envelope dropped"),
        }
    }

    fn leave_room(&mut self, connection: ConnectionId) {
        let Some(room_id) = self.connections.get_mut(&connection).and_then(|c| c.room.take()) else {
            return;
        };
        let was_typing = match self.rooms.get_mut(&room_id) {
            Some(room) => {
                room.members.remove(&connection);
                room.typing.remove(&connection)
            },
            None => false,
        };
        if was_typing {
            self.broadcast_typing(&room_id);
        }
    }

    /// Mark a connection dead. Returns false if it already was.
    fn disconnect(&mut self, connection: ConnectionId) -> bool {
        if !self.connections.get(&connection).is_some_and(|c| c.alive) {
            return false;
        }
        self.leave_room(connection);
        if let Some(conn) = self.connections.get_mut(&connection) {
            conn.alive = false;
        }
        debug!(connection = %connection, "disconnected");
        true
    }
}
