//! End-to-end client scenarios against the simulated backend.
//!
//! # Oracle Pattern
//!
//! Each scenario ends with oracle checks on:
//! - Session identity and the persisted store
//! - The message list as the user would see it
//! - Connection state and the backend's view of connections

#![allow(clippy::unwrap_used)]

use std::time::Duration;

use huddle_client::{
    ChatMessage, ClientConfig, ClientError, ClientEvent, ConnectionState, PersistedSession,
    RoomId, RoomOutcome,
    store::{MemorySessionStore, SessionStore},
};
use huddle_core::{PreconditionError, SessionError};
use huddle_harness::{SimBackend, SimDriver};

const REJOIN_DELAY: Duration = Duration::from_millis(1200);
const STEP: Duration = Duration::from_millis(100);

fn history(room: &str, count: usize) -> Vec<ChatMessage> {
    (0..count)
        .map(|i| ChatMessage {
            is_system_message: false,
            user_nickname: "Earlier".into(),
            user_icon: None,
            body: format!("{room} message {i}"),
            perm_id: format!("h{i}"),
            timestamp: i as u64,
        })
        .collect()
}

fn connected(backend: &SimBackend) -> SimDriver {
    let mut driver = SimDriver::new(backend.clone());
    driver.connect();
    assert!(driver.client().is_ready());
    driver
}

fn restoring(backend: &SimBackend, persisted: &PersistedSession) -> SimDriver {
    let store = MemorySessionStore::with_session(persisted);
    let mut driver = SimDriver::with_store(backend.clone(), store, ClientConfig::default());
    driver.restore(None).unwrap();
    driver
}

fn persisted(room: &str, nickname: &str) -> PersistedSession {
    PersistedSession { room_id: Some(RoomId::new(room)), nickname: Some(nickname.into()) }
}

/// Create a room and return its id.
fn create(driver: &mut SimDriver, nickname: &str) -> RoomId {
    let request = driver.create_room(nickname, None).unwrap();
    match driver.completion(request) {
        Some(Ok(RoomOutcome::Created(room_id))) => room_id.clone(),
        other => unreachable!("create did not complete: {other:?}"),
    }
}

fn bodies(driver: &SimDriver) -> Vec<String> {
    driver.client().messages().iter().map(|m| m.body.clone()).collect()
}

#[test]
fn create_then_chat() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);

    let room = create(&mut alice, "Alice");
    alice.send_message("hello").unwrap();

    let identity = alice.client().identity().unwrap();
    assert_eq!(identity.room_id, room);
    assert!(identity.is_creator);
    assert_eq!(bodies(&alice), vec!["Alice created the room".to_owned(), "hello".to_owned()]);
    assert_eq!(alice.store().load().unwrap(), persisted(room.as_str(), "Alice"));
}

#[test]
fn join_receives_history_then_live_messages() {
    let backend = SimBackend::new(1);
    let room = backend.seed_room("ROOM01", history("ROOM01", 3));
    let mut bob = connected(&backend);

    let request = bob.join_room("Bob", room.clone(), Some("data:bob".into())).unwrap();

    assert_eq!(bob.completion(request), Some(&Ok(RoomOutcome::Joined(room.clone()))));
    let identity = bob.client().identity().unwrap();
    assert!(!identity.is_creator);
    assert_eq!(identity.user_icon.as_deref(), Some("data:bob"));
    assert_eq!(bodies(&bob).len(), 4);
    assert_eq!(bodies(&bob)[3], "Bob joined");
}

#[test]
fn participants_see_each_other() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let mut bob = connected(&backend);

    let room = create(&mut alice, "Alice");
    bob.join_room("Bob", room, None).unwrap();
    alice.pump();

    bob.send_message("hi alice").unwrap();
    alice.pump();

    assert_eq!(bodies(&alice), bodies(&bob));
    assert_eq!(bodies(&alice).last().map(String::as_str), Some("hi alice"));
    assert_eq!(bodies(&bob).first().map(String::as_str), Some("Alice created the room"));
}

#[test]
fn join_unknown_room_reports_session_not_found() {
    let backend = SimBackend::new(1);
    let mut bob = connected(&backend);

    let request = bob.join_room("Bob", "GHOST1", None).unwrap();

    assert_eq!(
        bob.completion(request),
        Some(&Err(ClientError::Session(SessionError::SessionNotFound {
            room_id: RoomId::new("GHOST1"),
        })))
    );
    assert!(bob.client().identity().is_none());
    assert!(bob.store().load().unwrap().is_empty());
}

#[test]
fn second_request_while_in_flight_is_refused() {
    let backend = SimBackend::new(1);
    backend.set_silent(true);
    let mut alice = connected(&backend);

    let first = alice.create_room("Alice", None).unwrap();
    let second = alice.join_room("Alice", "ROOM01", None);

    assert_eq!(
        second,
        Err(ClientError::Precondition(PreconditionError::RequestInFlight { request: first }))
    );
}

#[test]
fn unanswered_request_times_out() {
    let backend = SimBackend::new(1);
    backend.set_silent(true);
    let mut alice = connected(&backend);

    let request = alice.create_room("Alice", None).unwrap();
    alice.run_for(Duration::from_secs(9), STEP);
    assert!(alice.completion(request).is_none());

    alice.run_for(Duration::from_secs(2), STEP);

    assert!(matches!(
        alice.completion(request),
        Some(Err(ClientError::Session(SessionError::Timeout { .. })))
    ));
    assert!(alice.client().identity().is_none());
}

#[test]
fn restore_rejoins_after_delay() {
    let backend = SimBackend::new(1);
    let room = backend.seed_room("ROOM01", history("ROOM01", 2));
    let mut driver = restoring(&backend, &persisted("ROOM01", "Alice"));

    assert!(driver.client().is_restoring());
    driver.connect();
    driver.advance(REJOIN_DELAY - STEP);
    assert!(driver.client().identity().is_none());

    driver.advance(STEP);

    let identity = driver.client().identity().unwrap();
    assert_eq!(identity.room_id, room);
    assert_eq!(identity.nickname, "Alice");
    assert_eq!(identity.user_icon, None);
    assert!(!driver.client().is_restoring());
    assert_eq!(bodies(&driver).len(), 3);
    // Automatic rejoins have no caller waiting
    assert!(driver.completions().is_empty());
}

#[test]
fn deep_link_wins_over_persisted_room() {
    let backend = SimBackend::new(1);
    backend.seed_room("OLD001", Vec::new());
    let linked = backend.seed_room("LINK01", Vec::new());

    let store = MemorySessionStore::with_session(&persisted("OLD001", "Alice"));
    let mut driver = SimDriver::with_store(backend.clone(), store, ClientConfig::default());
    driver.restore(Some(linked.clone())).unwrap();
    driver.connect();
    driver.run_for(REJOIN_DELAY, STEP);

    assert_eq!(driver.client().identity().map(|i| &i.room_id), Some(&linked));
    assert_eq!(driver.store().load().unwrap().room_id, Some(linked));
}

#[test]
fn restore_into_missing_room_clears_store() {
    let backend = SimBackend::new(1);
    let mut driver = restoring(&backend, &persisted("GONE01", "Alice"));

    driver.connect();
    driver.run_for(REJOIN_DELAY, STEP);

    assert!(driver.client().identity().is_none());
    assert!(!driver.client().is_restoring());
    assert!(driver.store().load().unwrap().is_empty());
    assert!(driver.completions().is_empty());
}

#[test]
fn restore_without_nickname_does_nothing() {
    let backend = SimBackend::new(1);
    backend.seed_room("ROOM01", Vec::new());
    let partial = PersistedSession { room_id: Some(RoomId::new("ROOM01")), nickname: None };
    let mut driver = restoring(&backend, &partial);

    assert!(!driver.client().is_restoring());
    driver.connect();
    driver.run_for(REJOIN_DELAY * 2, STEP);

    assert!(driver.client().identity().is_none());
    assert!(backend.members(&RoomId::new("ROOM01")).is_empty());
}

#[test]
fn user_join_cancels_pending_restore() {
    let backend = SimBackend::new(1);
    backend.seed_room("ROOM01", Vec::new());
    let other = backend.seed_room("ROOM02", Vec::new());
    let mut driver = restoring(&backend, &persisted("ROOM01", "Alice"));
    driver.connect();

    driver.join_room("Alice", other.clone(), None).unwrap();
    driver.run_for(REJOIN_DELAY * 2, STEP);

    assert_eq!(driver.client().identity().map(|i| &i.room_id), Some(&other));
    assert!(backend.members(&RoomId::new("ROOM01")).is_empty());
}

#[test]
fn closed_connection_reconnects_and_resubscribes() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let room = create(&mut alice, "Alice");
    let first = alice.connection().unwrap();

    backend.close(first);
    alice.pump();

    assert!(!alice.client().is_ready());
    assert_eq!(
        alice.send_message("anyone?"),
        Err(ClientError::Precondition(PreconditionError::NotReady))
    );
    // Identity survives the outage
    assert_eq!(alice.client().identity().map(|i| &i.room_id), Some(&room));

    alice.run_for(STEP + REJOIN_DELAY, STEP);

    assert!(alice.client().is_ready());
    assert_ne!(alice.connection(), Some(first));
    assert_eq!(backend.members(&room), vec![alice.connection().unwrap()]);
    assert!(alice.client().identity().unwrap().is_creator);

    alice.send_message("back").unwrap();
    assert_eq!(bodies(&alice).last().map(String::as_str), Some("back"));
}

#[test]
fn unanswered_resubscribe_keeps_retrying() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let room = create(&mut alice, "Alice");

    backend.set_silent(true);
    backend.close(alice.connection().unwrap());
    alice.pump();
    // Past the first resubscribe's deadline
    alice.run_for(Duration::from_secs(13), STEP);
    assert!(alice.client().is_restoring());
    assert!(backend.members(&room).is_empty());

    backend.set_silent(false);
    alice.run_for(Duration::from_secs(25), STEP);

    assert!(!alice.client().is_restoring());
    assert_eq!(backend.members(&room), vec![alice.connection().unwrap()]);
    assert!(alice.client().identity().unwrap().is_creator);

    alice.send_message("made it").unwrap();
    let delivered = backend.history(&room);
    assert_eq!(delivered.last().map(|m| m.body.as_str()), Some("made it"));
}

#[test]
fn vanished_connection_recovers_at_health_check() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    alice.advance(STEP);
    let room = create(&mut alice, "Alice");

    backend.kill(alice.connection().unwrap());
    alice.advance(STEP);
    assert_eq!(alice.client().connection_state(), ConnectionState::Disconnected);

    alice.run_for(Duration::from_secs(5) + REJOIN_DELAY, STEP);

    assert!(alice.client().is_ready());
    assert_eq!(backend.connections_opened(), 2);
    assert_eq!(backend.members(&room).len(), 1);
}

#[test]
fn unreachable_backend_backs_off_until_reachable() {
    let backend = SimBackend::new(1);
    backend.set_reachable(false);
    let mut driver = SimDriver::new(backend.clone());

    driver.connect();
    assert_eq!(driver.client().connection_state(), ConnectionState::Disconnected);
    driver.run_for(Duration::from_secs(3), STEP);
    assert!(!driver.client().is_ready());

    backend.set_reachable(true);
    driver.run_for(Duration::from_secs(5), STEP);

    assert!(driver.client().is_ready());
}

#[test]
fn typing_presence_reaches_others_and_clears_after_send() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let mut bob = connected(&backend);
    let room = create(&mut alice, "Alice");
    bob.join_room("Bob", room, None).unwrap();

    alice.set_typing(true).unwrap();
    bob.pump();
    assert!(bob.client().anyone_typing());

    alice.send_message("done typing").unwrap();
    bob.pump();

    assert!(!alice.client().local_typing());
    assert!(!bob.client().anyone_typing());
    assert_eq!(bodies(&bob).last().map(String::as_str), Some("done typing"));
}

#[test]
fn connection_loss_clears_remote_typing() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let mut bob = connected(&backend);
    let room = create(&mut alice, "Alice");
    bob.join_room("Bob", room, None).unwrap();

    alice.set_typing(true).unwrap();
    bob.pump();
    assert!(bob.client().anyone_typing());

    backend.close(bob.connection().unwrap());
    bob.pump();

    assert!(!bob.client().anyone_typing());
}

#[test]
fn leave_keeps_connection_and_clears_session() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    create(&mut alice, "Alice");
    alice.set_typing(true).unwrap();

    alice.leave_room().unwrap();

    assert!(alice.client().is_ready());
    assert!(alice.client().identity().is_none());
    assert!(alice.client().messages().is_empty());
    assert!(alice.store().load().unwrap().is_empty());
    assert_eq!(backend.connections_opened(), 1);
    // The release went out before leaving
    assert!(!alice.client().local_typing());

    let again = create(&mut alice, "Alice");
    assert_eq!(alice.client().identity().map(|i| &i.room_id), Some(&again));
}

#[test]
fn duplicate_broadcast_is_shown_once() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let room = create(&mut alice, "Alice");
    alice.send_message("once").unwrap();
    let sent = alice.client().messages().last().cloned().unwrap();

    backend.broadcast(&room, huddle_client::Inbound::ChatMessage(sent));
    alice.pump();

    assert_eq!(bodies(&alice).iter().filter(|b| *b == "once").count(), 1);
}

#[test]
fn shutdown_is_terminal() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    create(&mut alice, "Alice");
    let connection = alice.connection().unwrap();

    alice.shutdown();

    assert_eq!(alice.client().connection_state(), ConnectionState::Closed);
    assert!(!backend.is_alive(connection));
    assert_eq!(alice.send_message("late"), Err(ClientError::ShutDown));
    assert_eq!(alice.handle(ClientEvent::Connect), Err(ClientError::ShutDown));
    // Persisted session survives for the next start
    assert!(!alice.store().load().unwrap().is_empty());

    alice.run_for(Duration::from_secs(10), STEP);
    assert_eq!(backend.connections_opened(), 1);
}

#[test]
fn slow_transport_hits_connect_deadline_then_recovers() {
    let backend = SimBackend::new(1);
    backend.set_auto_ready(false);
    let mut driver = SimDriver::new(backend.clone());

    driver.connect();
    assert_eq!(driver.client().connection_state(), ConnectionState::Connecting);

    driver.run_for(Duration::from_secs(10), STEP);
    assert_eq!(driver.client().connection_state(), ConnectionState::Disconnected);
    assert!(backend.live_connections().is_empty());

    backend.set_auto_ready(true);
    driver.run_for(Duration::from_secs(1), STEP);

    assert!(driver.client().is_ready());
    assert_eq!(backend.connections_opened(), 2);
}

#[test]
fn late_ready_is_accepted_before_deadline() {
    let backend = SimBackend::new(1);
    backend.set_auto_ready(false);
    let mut driver = SimDriver::new(backend.clone());
    driver.connect();
    driver.run_for(Duration::from_secs(3), STEP);

    backend.make_ready(driver.connection().unwrap());
    driver.pump();

    assert!(driver.client().is_ready());
    assert_eq!(backend.connections_opened(), 1);
}

#[test]
fn expired_room_ends_session_on_resubscribe() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    let room = create(&mut alice, "Alice");

    backend.expire_room(&room);
    backend.close(alice.connection().unwrap());
    alice.pump();
    alice.run_for(STEP + REJOIN_DELAY, STEP);

    assert!(alice.client().is_ready());
    assert!(alice.client().identity().is_none());
    assert!(alice.client().messages().is_empty());
    assert!(alice.store().load().unwrap().is_empty());
}

#[test]
fn out_of_order_message_is_kept_in_arrival_order() {
    let backend = SimBackend::new(1);
    let mut alice = connected(&backend);
    create(&mut alice, "Alice");
    alice.send_message("newer").unwrap();

    let older = ChatMessage {
        is_system_message: false,
        user_nickname: "Bob".into(),
        user_icon: None,
        body: "older".into(),
        perm_id: "late-1".into(),
        timestamp: 0,
    };
    backend.push(alice.connection().unwrap(), huddle_client::Inbound::ChatMessage(older));
    alice.pump();

    assert_eq!(bodies(&alice)[1..], ["newer".to_owned(), "older".to_owned()]);
}
