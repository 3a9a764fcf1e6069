//! Room session manager.
//!
//! Tracks the session identity and drives create, join, rejoin and leave.
//! Like the supervisor it is sans-IO: callers pass `now` and whether the
//! connection is ready, and execute the returned [`SessionAction`]s.
//!
//! ```text
//!              create/join reply                 leave
//! ┌───────────┐ ──────────────> ┌────────┐ ──────────────> ┌───────────┐
//! │ NoSession │                 │ InRoom │                 │ NoSession │
//! └───────────┘                 └────────┘                 └───────────┘
//! ```
//!
//! At most one create/join request is outstanding at a time. Each carries a
//! deadline; expiry or connection loss fails it. Replies are matched by
//! [`RequestId`] and anything unmatched is dropped.
//!
//! # Rejoin
//!
//! A persisted `{roomId, nickname}` pair (or a deep-linked room id) arms a
//! rejoin. Once the connection is ready the manager waits
//! [`SessionConfig::rejoin_delay`] and then joins on the caller's behalf.
//! Losing the connection while in a room arms the same path so the fresh
//! transport is re-subscribed to the room.

use std::{
    ops::{Add, Sub},
    time::Duration,
};

use crate::{
    envelope::{ChatMessage, Outbound, RequestFailure, RequestId, RoomId},
    error::{PreconditionError, SessionError},
};

/// Time allowed for the backend to answer a create/join request.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Delay between connection readiness and the automatic rejoin.
pub const DEFAULT_REJOIN_DELAY: Duration = Duration::from_millis(1200);

/// First request id used for automatic rejoins.
///
/// Caller-allocated ids must stay below this value.
pub const REJOIN_REQUEST_BASE: u64 = 1 << 63;

/// Session manager configuration.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed for the backend to answer a create/join request.
    pub request_timeout: Duration,
    /// Delay between connection readiness and the automatic rejoin.
    pub rejoin_delay: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self { request_timeout: DEFAULT_REQUEST_TIMEOUT, rejoin_delay: DEFAULT_REJOIN_DELAY }
    }
}

/// Who the local user is and which room they are in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionIdentity {
    /// Display nickname.
    pub nickname: String,
    /// Joined room.
    pub room_id: RoomId,
    /// Icon supplied at create/join time.
    pub user_icon: Option<String>,
    /// True if this client created the room.
    pub is_creator: bool,
}

/// Session state that survives a process restart.
///
/// The icon is deliberately absent: a restored session rejoins without one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PersistedSession {
    /// Last joined room.
    pub room_id: Option<RoomId>,
    /// Last used nickname.
    pub nickname: Option<String>,
}

impl PersistedSession {
    /// Persisted form of an identity.
    pub fn from_identity(identity: &SessionIdentity) -> Self {
        Self { room_id: Some(identity.room_id.clone()), nickname: Some(identity.nickname.clone()) }
    }

    /// True if neither key is present.
    pub fn is_empty(&self) -> bool {
        self.room_id.is_none() && self.nickname.is_none()
    }
}

/// Successful create/join result.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoomOutcome {
    /// A new room was created.
    Created(RoomId),
    /// An existing room was joined.
    Joined(RoomId),
}

impl RoomOutcome {
    /// Room the session is now in.
    pub fn room_id(&self) -> &RoomId {
        match self {
            Self::Created(room_id) | Self::Joined(room_id) => room_id,
        }
    }
}

/// Actions returned by the session manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Send an envelope over the live transport.
    Send(Outbound),

    /// Replace the message stream with server history.
    ReplaceHistory(Vec<ChatMessage>),

    /// Clear the message stream and typing presence.
    ResetRoomState,

    /// Write the persisted session.
    Persist(PersistedSession),

    /// Remove the persisted session.
    ClearPersisted,

    /// The local user entered a room.
    Entered(SessionIdentity),

    /// A caller-issued request finished.
    Completed {
        /// Request that finished.
        request: RequestId,
        /// Room on success.
        result: Result<RoomOutcome, SessionError>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PendingKind {
    Create,
    Join,
    Rejoin,
}

#[derive(Debug, Clone)]
struct Pending<I> {
    request: RequestId,
    kind: PendingKind,
    nickname: String,
    user_icon: Option<String>,
    /// Target room. `None` for create.
    room_id: Option<RoomId>,
    issued_at: I,
    deadline: I,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RejoinPhase<I> {
    Idle,
    /// Waiting for the connection to become ready.
    Armed,
    /// Ready; the join goes out at `at`.
    Scheduled { at: I },
    InFlight,
}

#[derive(Debug, Clone)]
struct RejoinTarget {
    room_id: RoomId,
    nickname: String,
    user_icon: Option<String>,
}

/// Room session state machine.
#[derive(Debug, Clone)]
pub struct SessionManager<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    config: SessionConfig,
    identity: Option<SessionIdentity>,
    pending: Option<Pending<I>>,
    rejoin: RejoinPhase<I>,
    rejoin_target: Option<RejoinTarget>,
    next_rejoin_request: u64,
}

impl<I> SessionManager<I>
where
    I: Copy + Ord + Sub<Output = Duration> + Add<Duration, Output = I>,
{
    /// Create a manager with no session.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            identity: None,
            pending: None,
            rejoin: RejoinPhase::Idle,
            rejoin_target: None,
            next_rejoin_request: REJOIN_REQUEST_BASE,
        }
    }

    /// Current identity, if in a room.
    pub fn identity(&self) -> Option<&SessionIdentity> {
        self.identity.as_ref()
    }

    /// Current identity or [`PreconditionError::NoSession`].
    pub fn require_identity(&self) -> Result<&SessionIdentity, PreconditionError> {
        self.identity.as_ref().ok_or(PreconditionError::NoSession)
    }

    /// True while an automatic rejoin is armed, scheduled or in flight.
    pub fn is_restoring(&self) -> bool {
        self.rejoin != RejoinPhase::Idle
    }

    /// Outstanding create/join request, including an automatic rejoin.
    pub fn pending_request(&self) -> Option<RequestId> {
        self.pending.as_ref().map(|p| p.request)
    }

    /// Create a new room.
    ///
    /// # Errors
    ///
    /// Checked in order: `NotReady`, `MissingNickname`, `RequestInFlight`,
    /// `AlreadyInRoom`. Nothing changes on error.
    pub fn create_room(
        &mut self,
        request: RequestId,
        nickname: &str,
        user_icon: Option<String>,
        ready: bool,
        now: I,
    ) -> Result<Vec<SessionAction>, PreconditionError> {
        if !ready {
            return Err(PreconditionError::NotReady);
        }
        if nickname.trim().is_empty() {
            return Err(PreconditionError::MissingNickname);
        }
        self.check_idle()?;

        self.cancel_rejoin();
        self.pending = Some(Pending {
            request,
            kind: PendingKind::Create,
            nickname: nickname.to_owned(),
            user_icon: user_icon.clone(),
            room_id: None,
            issued_at: now,
            deadline: now + self.config.request_timeout,
        });

        Ok(vec![SessionAction::Send(Outbound::CreateRoom {
            request,
            nickname: nickname.to_owned(),
            user_icon,
        })])
    }

    /// Join an existing room.
    ///
    /// # Errors
    ///
    /// Checked in order: `MissingNickname`, `NotReady`, `MissingRoomId`,
    /// `RequestInFlight`, `AlreadyInRoom`. Nothing changes on error.
    pub fn join_room(
        &mut self,
        request: RequestId,
        nickname: &str,
        room_id: RoomId,
        user_icon: Option<String>,
        ready: bool,
        now: I,
    ) -> Result<Vec<SessionAction>, PreconditionError> {
        if nickname.trim().is_empty() {
            return Err(PreconditionError::MissingNickname);
        }
        if !ready {
            return Err(PreconditionError::NotReady);
        }
        if room_id.is_blank() {
            return Err(PreconditionError::MissingRoomId);
        }
        self.check_idle()?;

        self.cancel_rejoin();
        Ok(self.issue_join(request, PendingKind::Join, nickname.to_owned(), room_id, user_icon, now))
    }

    /// Arm the automatic rejoin from persisted state.
    ///
    /// `deep_link` takes precedence over the persisted room. A persisted
    /// nickname is required. Returns true if a rejoin was armed.
    pub fn arm_rejoin(&mut self, persisted: PersistedSession, deep_link: Option<RoomId>) -> bool {
        if self.identity.is_some() || self.pending.is_some() {
            return false;
        }

        let room_id = deep_link
            .filter(|room| !room.is_blank())
            .or(persisted.room_id.filter(|room| !room.is_blank()));
        let nickname = persisted.nickname.filter(|name| !name.trim().is_empty());

        match (room_id, nickname) {
            (Some(room_id), Some(nickname)) => {
                self.rejoin_target = Some(RejoinTarget { room_id, nickname, user_icon: None });
                self.rejoin = RejoinPhase::Armed;
                true
            },
            _ => false,
        }
    }

    /// The connection became ready.
    pub fn on_ready(&mut self, now: I) {
        if self.rejoin == RejoinPhase::Armed {
            self.rejoin = RejoinPhase::Scheduled { at: now + self.config.rejoin_delay };
        }
    }

    /// The connection was lost.
    ///
    /// Fails a caller-issued request with `ConnectionLost`. A scheduled or
    /// in-flight rejoin goes back to waiting for readiness, and a session that
    /// was in a room arms a rejoin of that room.
    pub fn on_lost(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if let Some(pending) = self.pending.take() {
            if pending.kind != PendingKind::Rejoin {
                actions.push(SessionAction::Completed {
                    request: pending.request,
                    result: Err(SessionError::ConnectionLost),
                });
            }
        }

        if let Some(identity) = &self.identity {
            self.rejoin_target = Some(RejoinTarget {
                room_id: identity.room_id.clone(),
                nickname: identity.nickname.clone(),
                user_icon: identity.user_icon.clone(),
            });
        }

        if self.rejoin_target.is_some() {
            self.rejoin = RejoinPhase::Armed;
        }

        actions
    }

    /// Request deadlines and the scheduled rejoin.
    pub fn tick(&mut self, now: I, ready: bool) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if let Some(pending) = self.pending.take_if(|p| now >= p.deadline) {
            let elapsed = now - pending.issued_at;
            match pending.kind {
                // Still in a room: keep resubscribing until the backend answers
                PendingKind::Rejoin if self.identity.is_some() => {
                    self.rejoin = RejoinPhase::Scheduled { at: now + self.config.rejoin_delay };
                },
                // Give up quietly; the persisted session stays for next start
                PendingKind::Rejoin => self.cancel_rejoin(),
                PendingKind::Create | PendingKind::Join => {
                    actions.push(SessionAction::Completed {
                        request: pending.request,
                        result: Err(SessionError::Timeout { elapsed }),
                    });
                },
            }
        }

        if let RejoinPhase::Scheduled { at } = self.rejoin {
            if now >= at {
                if !ready {
                    self.rejoin = RejoinPhase::Armed;
                } else if let Some(target) = self.rejoin_target.clone() {
                    self.next_rejoin_request += 1;
                    let request = RequestId::new(self.next_rejoin_request);
                    self.rejoin = RejoinPhase::InFlight;
                    actions.extend(self.issue_join(
                        request,
                        PendingKind::Rejoin,
                        target.nickname,
                        target.room_id,
                        target.user_icon,
                        now,
                    ));
                } else {
                    self.rejoin = RejoinPhase::Idle;
                }
            }
        }

        actions
    }

    /// Backend created a room.
    pub fn handle_created(&mut self, request: RequestId, room_id: RoomId) -> Vec<SessionAction> {
        let Some(pending) = self.take_pending(request, |kind| kind == PendingKind::Create) else {
            return Vec::new();
        };

        let identity = SessionIdentity {
            nickname: pending.nickname,
            room_id: room_id.clone(),
            user_icon: pending.user_icon,
            is_creator: true,
        };

        let mut actions = self.enter(identity, Vec::new());
        actions.push(SessionAction::Completed {
            request,
            result: Ok(RoomOutcome::Created(room_id)),
        });
        actions
    }

    /// Backend admitted us to a room and sent its history.
    pub fn handle_joined(
        &mut self,
        request: RequestId,
        messages: Vec<ChatMessage>,
    ) -> Vec<SessionAction> {
        let Some(pending) = self.take_pending(request, |kind| kind != PendingKind::Create) else {
            return Vec::new();
        };
        let Some(room_id) = pending.room_id else {
            return Vec::new();
        };

        // Re-subscribing after a connection loss keeps the original role
        let is_creator = self
            .identity
            .as_ref()
            .is_some_and(|current| current.room_id == room_id && current.is_creator);

        let identity = SessionIdentity {
            nickname: pending.nickname,
            room_id: room_id.clone(),
            user_icon: pending.user_icon,
            is_creator,
        };

        let mut actions = self.enter(identity, messages);
        match pending.kind {
            PendingKind::Rejoin => self.cancel_rejoin(),
            PendingKind::Join | PendingKind::Create => actions.push(SessionAction::Completed {
                request,
                result: Ok(RoomOutcome::Joined(room_id)),
            }),
        }
        actions
    }

    /// Backend refused a create/join request.
    ///
    /// A refused rejoin discards the persisted session. A refused caller
    /// request leaves the current identity untouched.
    pub fn handle_failed(
        &mut self,
        request: RequestId,
        failure: RequestFailure,
    ) -> Vec<SessionAction> {
        let Some(pending) = self.take_pending(request, |_| true) else {
            return Vec::new();
        };

        let error = match (failure, pending.room_id) {
            (RequestFailure::SessionNotFound, Some(room_id)) => {
                SessionError::SessionNotFound { room_id }
            },
            (RequestFailure::SessionNotFound, None) => {
                SessionError::Rejected { reason: "session not found".into() }
            },
            (RequestFailure::Rejected { reason }, _) => SessionError::Rejected { reason },
        };

        if pending.kind == PendingKind::Rejoin {
            self.cancel_rejoin();
            let mut actions = vec![SessionAction::ClearPersisted];
            if self.identity.take().is_some() {
                actions.push(SessionAction::ResetRoomState);
            }
            return actions;
        }

        vec![SessionAction::Completed { request, result: Err(error) }]
    }

    /// Leave the current room.
    ///
    /// Cancels any outstanding request and discards the persisted session.
    /// The transport is left alone.
    pub fn leave(&mut self) -> Vec<SessionAction> {
        let mut actions = self.cancel_pending();
        self.cancel_rejoin();
        self.identity = None;

        actions.push(SessionAction::ClearPersisted);
        actions.push(SessionAction::ResetRoomState);
        actions
    }

    /// Abandon everything in flight without touching persisted state.
    pub fn shutdown(&mut self) -> Vec<SessionAction> {
        self.cancel_rejoin();
        self.cancel_pending()
    }

    fn check_idle(&self) -> Result<(), PreconditionError> {
        if let Some(pending) = &self.pending {
            return Err(PreconditionError::RequestInFlight { request: pending.request });
        }
        if let Some(identity) = &self.identity {
            return Err(PreconditionError::AlreadyInRoom { room_id: identity.room_id.clone() });
        }
        Ok(())
    }

    fn issue_join(
        &mut self,
        request: RequestId,
        kind: PendingKind,
        nickname: String,
        room_id: RoomId,
        user_icon: Option<String>,
        now: I,
    ) -> Vec<SessionAction> {
        let outbound = Outbound::JoinRoom {
            request,
            nickname: nickname.clone(),
            room_id: room_id.clone(),
            user_icon: user_icon.clone(),
        };

        self.pending = Some(Pending {
            request,
            kind,
            nickname,
            user_icon,
            room_id: Some(room_id),
            issued_at: now,
            deadline: now + self.config.request_timeout,
        });

        vec![SessionAction::Send(outbound)]
    }

    fn take_pending(
        &mut self,
        request: RequestId,
        accepts: impl FnOnce(PendingKind) -> bool,
    ) -> Option<Pending<I>> {
        self.pending.take_if(|p| p.request == request && accepts(p.kind))
    }

    fn enter(&mut self, identity: SessionIdentity, history: Vec<ChatMessage>) -> Vec<SessionAction> {
        self.identity = Some(identity.clone());

        vec![
            SessionAction::ResetRoomState,
            SessionAction::ReplaceHistory(history),
            SessionAction::Persist(PersistedSession::from_identity(&identity)),
            SessionAction::Entered(identity),
        ]
    }

    fn cancel_pending(&mut self) -> Vec<SessionAction> {
        match self.pending.take() {
            Some(pending) if pending.kind != PendingKind::Rejoin => {
                vec![SessionAction::Completed {
                    request: pending.request,
                    result: Err(SessionError::Cancelled),
                }]
            },
            _ => Vec::new(),
        }
    }

    fn cancel_rejoin(&mut self) {
        self.rejoin = RejoinPhase::Idle;
        self.rejoin_target = None;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::time::Instant;

    use super::*;

    fn manager() -> SessionManager<Instant> {
        SessionManager::new(SessionConfig::default())
    }

    fn persisted(room: &str, nickname: &str) -> PersistedSession {
        PersistedSession { room_id: Some(RoomId::new(room)), nickname: Some(nickname.into()) }
    }

    fn sent_join(actions: &[SessionAction]) -> Option<(RequestId, RoomId, Option<String>)> {
        actions.iter().find_map(|a| match a {
            SessionAction::Send(Outbound::JoinRoom { request, room_id, user_icon, .. }) => {
                Some((*request, room_id.clone(), user_icon.clone()))
            },
            _ => None,
        })
    }

    fn history() -> Vec<ChatMessage> {
        vec![ChatMessage {
            is_system_message: true,
            user_nickname: "Alice".into(),
            user_icon: None,
            body: "Alice created the room".into(),
            perm_id: "p1".into(),
            timestamp: 1,
        }]
    }

    #[test]
    fn create_precondition_order() {
        let t0 = Instant::now();
        let mut sessions = manager();

        // Not ready wins over a missing nickname
        let result = sessions.create_room(RequestId::new(1), "", None, false, t0);
        assert_eq!(result, Err(PreconditionError::NotReady));

        let result = sessions.create_room(RequestId::new(1), "  ", None, true, t0);
        assert_eq!(result, Err(PreconditionError::MissingNickname));
        assert_eq!(sessions.pending_request(), None);
    }

    #[test]
    fn join_precondition_order() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);

        // Missing nickname wins over not ready
        assert_eq!(
            sessions.join_room(r, "", RoomId::new(""), None, false, t0),
            Err(PreconditionError::MissingNickname)
        );
        assert_eq!(
            sessions.join_room(r, "Bob", RoomId::new(""), None, false, t0),
            Err(PreconditionError::NotReady)
        );
        assert_eq!(
            sessions.join_room(r, "Bob", RoomId::new(" "), None, true, t0),
            Err(PreconditionError::MissingRoomId)
        );
        assert_eq!(sessions.pending_request(), None);
    }

    #[test]
    fn create_success_sets_creator_identity() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);

        let actions = sessions.create_room(r, "Alice", Some("icon".into()), true, t0).unwrap();
        assert!(matches!(actions[0], SessionAction::Send(Outbound::CreateRoom { .. })));

        let actions = sessions.handle_created(r, RoomId::new("R1"));
        let identity = sessions.identity().unwrap();
        assert_eq!(identity.room_id, RoomId::new("R1"));
        assert!(identity.is_creator);
        assert_eq!(identity.user_icon.as_deref(), Some("icon"));

        assert!(actions.contains(&SessionAction::Persist(persisted("R1", "Alice"))));
        assert_eq!(actions.last(), Some(&SessionAction::Completed {
            request: r,
            result: Ok(RoomOutcome::Created(RoomId::new("R1"))),
        }));
    }

    #[test]
    fn join_success_replaces_history() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);

        sessions.join_room(r, "Bob", RoomId::new("R1"), None, true, t0).unwrap();
        let actions = sessions.handle_joined(r, history());

        assert!(actions.contains(&SessionAction::ReplaceHistory(history())));
        assert!(!sessions.identity().unwrap().is_creator);
    }

    #[test]
    fn join_not_found_leaves_identity_untouched() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);

        sessions.join_room(r, "Bob", RoomId::new("nope"), None, true, t0).unwrap();
        let actions = sessions.handle_failed(r, RequestFailure::SessionNotFound);

        assert_eq!(actions, vec![SessionAction::Completed {
            request: r,
            result: Err(SessionError::SessionNotFound { room_id: RoomId::new("nope") }),
        }]);
        assert!(sessions.identity().is_none());
        assert_eq!(sessions.pending_request(), None);
    }

    #[test]
    fn second_request_while_one_in_flight_is_refused() {
        let t0 = Instant::now();
        let mut sessions = manager();

        sessions.create_room(RequestId::new(1), "Alice", None, true, t0).unwrap();
        let result = sessions.join_room(RequestId::new(2), "Alice", "R1".into(), None, true, t0);
        assert_eq!(result, Err(PreconditionError::RequestInFlight { request: RequestId::new(1) }));
    }

    #[test]
    fn create_while_in_room_is_refused() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.create_room(RequestId::new(1), "Alice", None, true, t0).unwrap();
        sessions.handle_created(RequestId::new(1), "R1".into());

        let result = sessions.create_room(RequestId::new(2), "Alice", None, true, t0);
        assert_eq!(result, Err(PreconditionError::AlreadyInRoom { room_id: "R1".into() }));
    }

    #[test]
    fn stale_reply_is_ignored() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.create_room(RequestId::new(1), "Alice", None, true, t0).unwrap();

        assert!(sessions.handle_created(RequestId::new(99), "R1".into()).is_empty());
        assert!(sessions.handle_joined(RequestId::new(1), Vec::new()).is_empty());
        assert_eq!(sessions.pending_request(), Some(RequestId::new(1)));
    }

    #[test]
    fn request_times_out() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);
        sessions.create_room(r, "Alice", None, true, t0).unwrap();

        assert!(sessions.tick(t0 + Duration::from_secs(9), true).is_empty());

        let actions = sessions.tick(t0 + DEFAULT_REQUEST_TIMEOUT, true);
        assert_eq!(actions, vec![SessionAction::Completed {
            request: r,
            result: Err(SessionError::Timeout { elapsed: DEFAULT_REQUEST_TIMEOUT }),
        }]);
    }

    #[test]
    fn connection_loss_fails_request() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);
        sessions.join_room(r, "Bob", "R1".into(), None, true, t0).unwrap();

        let actions = sessions.on_lost();
        assert_eq!(actions, vec![SessionAction::Completed {
            request: r,
            result: Err(SessionError::ConnectionLost),
        }]);
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn rejoin_waits_for_delay_then_joins_without_icon() {
        let t0 = Instant::now();
        let mut sessions = manager();

        assert!(sessions.arm_rejoin(persisted("R1", "Bob"), None));
        assert!(sessions.is_restoring());
        assert!(sessions.tick(t0, true).is_empty());

        sessions.on_ready(t0);
        assert!(sessions.tick(t0 + Duration::from_millis(1199), true).is_empty());

        let actions = sessions.tick(t0 + DEFAULT_REJOIN_DELAY, true);
        let (request, room_id, icon) = sent_join(&actions).unwrap();
        assert_eq!(room_id, RoomId::new("R1"));
        assert_eq!(icon, None);
        assert!(request.value() > REJOIN_REQUEST_BASE);

        let actions = sessions.handle_joined(request, history());
        assert!(actions.contains(&SessionAction::ReplaceHistory(history())));
        assert!(!actions.iter().any(|a| matches!(a, SessionAction::Completed { .. })));
        assert_eq!(sessions.identity(), Some(&SessionIdentity {
            nickname: "Bob".into(),
            room_id: "R1".into(),
            user_icon: None,
            is_creator: false,
        }));
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn deep_link_takes_precedence() {
        let t0 = Instant::now();
        let mut sessions = manager();

        sessions.arm_rejoin(persisted("R1", "Bob"), Some("R2".into()));
        sessions.on_ready(t0);
        let actions = sessions.tick(t0 + DEFAULT_REJOIN_DELAY, true);

        assert_eq!(sent_join(&actions).unwrap().1, RoomId::new("R2"));
    }

    #[test]
    fn rejoin_needs_nickname() {
        let mut sessions = manager();
        let persisted = PersistedSession { room_id: Some("R1".into()), nickname: None };

        assert!(!sessions.arm_rejoin(persisted, None));
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn rejoin_of_missing_room_discards_persisted_session() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.arm_rejoin(persisted("gone", "Bob"), None);
        sessions.on_ready(t0);
        let (request, ..) = sent_join(&sessions.tick(t0 + DEFAULT_REJOIN_DELAY, true)).unwrap();

        let actions = sessions.handle_failed(request, RequestFailure::SessionNotFound);
        assert_eq!(actions, vec![SessionAction::ClearPersisted]);
        assert!(sessions.identity().is_none());
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn rejoin_timeout_keeps_persisted_session() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.arm_rejoin(persisted("R1", "Bob"), None);
        sessions.on_ready(t0);
        let t1 = t0 + DEFAULT_REJOIN_DELAY;
        sent_join(&sessions.tick(t1, true)).unwrap();

        let actions = sessions.tick(t1 + DEFAULT_REQUEST_TIMEOUT, true);
        assert!(actions.is_empty());
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn loss_during_rejoin_rearms_for_next_ready() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.arm_rejoin(persisted("R1", "Bob"), None);
        sessions.on_ready(t0);
        let t1 = t0 + DEFAULT_REJOIN_DELAY;
        sent_join(&sessions.tick(t1, true)).unwrap();

        assert!(sessions.on_lost().is_empty());
        assert!(sessions.is_restoring());
        assert_eq!(sessions.pending_request(), None);

        sessions.on_ready(t1);
        let actions = sessions.tick(t1 + DEFAULT_REJOIN_DELAY, true);
        assert!(sent_join(&actions).is_some());
    }

    #[test]
    fn loss_while_in_room_resubscribes_keeping_role() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.create_room(RequestId::new(1), "Alice", Some("icon".into()), true, t0).unwrap();
        sessions.handle_created(RequestId::new(1), "R1".into());

        sessions.on_lost();
        assert!(sessions.identity().is_some());

        sessions.on_ready(t0);
        let actions = sessions.tick(t0 + DEFAULT_REJOIN_DELAY, true);
        let (request, room_id, icon) = sent_join(&actions).unwrap();
        assert_eq!(room_id, RoomId::new("R1"));
        assert_eq!(icon.as_deref(), Some("icon"));

        sessions.handle_joined(request, history());
        assert!(sessions.identity().unwrap().is_creator);
    }

    #[test]
    fn resubscribe_timeout_retries_after_delay() {
        let t0 = Instant::now();
        let mut sessions = manager();
        sessions.create_room(RequestId::new(1), "Alice", None, true, t0).unwrap();
        sessions.handle_created(RequestId::new(1), "R1".into());

        sessions.on_lost();
        sessions.on_ready(t0);
        let t1 = t0 + DEFAULT_REJOIN_DELAY;
        let (first, ..) = sent_join(&sessions.tick(t1, true)).unwrap();

        let t2 = t1 + DEFAULT_REQUEST_TIMEOUT;
        assert!(sessions.tick(t2, true).is_empty());
        assert!(sessions.is_restoring());
        assert_eq!(sessions.pending_request(), None);

        let actions = sessions.tick(t2 + DEFAULT_REJOIN_DELAY, true);
        let (second, room_id, _) = sent_join(&actions).unwrap();
        assert_ne!(second, first);
        assert_eq!(room_id, RoomId::new("R1"));

        sessions.handle_joined(second, history());
        assert!(sessions.identity().unwrap().is_creator);
        assert!(!sessions.is_restoring());
    }

    #[test]
    fn leave_cancels_and_clears() {
        let t0 = Instant::now();
        let mut sessions = manager();
        let r = RequestId::new(1);
        sessions.join_room(r, "Bob", "R1".into(), None, true, t0).unwrap();

        let actions = sessions.leave();
        assert_eq!(actions, vec![
            SessionAction::Completed { request: r, result: Err(SessionError::Cancelled) },
            SessionAction::ClearPersisted,
            SessionAction::ResetRoomState,
        ]);
        assert!(sessions.identity().is_none());
        assert_eq!(sessions.require_identity(), Err(PreconditionError::NoSession));
    }
}
