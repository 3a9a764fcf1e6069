//! Property-based tests for the core state machines.
//!
//! Each property drives a component with arbitrary input and checks an
//! invariant that must hold regardless of sequence.

use std::time::{Duration, Instant};

use huddle_core::{
    Append, ChatMessage, ConnectionState, MessageStream, PreconditionError, RequestId, RoomId,
    SessionConfig, SessionManager, Supervisor, SupervisorAction, SupervisorConfig, TransportId,
};
use proptest::prelude::*;

fn message(perm_id: String, timestamp: u64) -> ChatMessage {
    ChatMessage {
        is_system_message: false,
        user_nickname: "Alice".into(),
        user_icon: None,
        body: format!("message {perm_id}"),
        perm_id,
        timestamp,
    }
}

/// Lifecycle inputs for the supervisor.
#[derive(Debug, Clone)]
enum Input {
    Advance(u64),
    Ready,
    Closed,
    OpenFailed,
    Dropped,
    StaleClosed,
}

fn input_strategy() -> impl Strategy<Value = Input> {
    prop_oneof![
        4 => (1u64..3_000).prop_map(Input::Advance),
        2 => Just(Input::Ready),
        1 => Just(Input::Closed),
        1 => Just(Input::OpenFailed),
        1 => Just(Input::Dropped),
        1 => Just(Input::StaleClosed),
    ]
}

/// Mirror the supervisor's actions the way a driver would.
fn apply(actions: Vec<SupervisorAction>, live: &mut Option<TransportId>) {
    for action in actions {
        match action {
            SupervisorAction::Open { transport } => *live = Some(transport),
            SupervisorAction::Close { transport } => {
                if *live == Some(transport) {
                    *live = None;
                }
            },
            SupervisorAction::Ready | SupervisorAction::Lost => {},
        }
    }
}

proptest! {
    #[test]
    fn prop_stream_preserves_arrival_order(timestamps in prop::collection::vec(0u64..1_000, 0..64)) {
        let mut stream = MessageStream::new();

        for (i, ts) in timestamps.iter().enumerate() {
            let outcome = stream.append(message(format!("p{i}"), *ts));
            prop_assert_ne!(outcome, Append::Duplicate);
        }

        // Distinct perm ids: nothing dropped, nothing reordered
        let ids: Vec<_> = stream.messages().iter().map(|m| m.perm_id.clone()).collect();
        let expected: Vec<_> = (0..timestamps.len()).map(|i| format!("p{i}")).collect();
        prop_assert_eq!(ids, expected);
    }

    #[test]
    fn prop_stream_never_holds_duplicate_perm_ids(ids in prop::collection::vec(0u8..16, 0..64)) {
        let mut stream = MessageStream::new();
        for (ts, id) in ids.iter().enumerate() {
            stream.append(message(format!("p{id}"), ts as u64));
        }

        let mut seen = std::collections::HashSet::new();
        for m in stream.messages() {
            prop_assert!(seen.insert(m.perm_id.clone()));
        }
    }

    #[test]
    fn prop_join_without_nickname_mutates_nothing(
        nickname in "[ \t]{0,4}",
        room in "[A-Z0-9]{0,6}",
        ready in any::<bool>(),
    ) {
        let t0 = Instant::now();
        let mut sessions = SessionManager::new(SessionConfig::default());

        let result = sessions.join_room(RequestId::new(1), &nickname, RoomId::new(room), None, ready, t0);

        prop_assert_eq!(result, Err(PreconditionError::MissingNickname));
        prop_assert!(sessions.identity().is_none());
        prop_assert_eq!(sessions.pending_request(), None);
        prop_assert!(!sessions.is_restoring());
    }

    #[test]
    fn prop_supervisor_keeps_single_transport(inputs in prop::collection::vec(input_strategy(), 0..80)) {
        let mut now = Instant::now();
        let mut sup = Supervisor::new(SupervisorConfig::default());
        let mut live: Option<TransportId> = None;

        apply(sup.connect(now), &mut live);

        for input in inputs {
            let actions = match input {
                Input::Advance(ms) => {
                    now += Duration::from_millis(ms);
                    sup.tick(now)
                },
                Input::Ready => live.map(|t| sup.handle_ready(t)).unwrap_or_default(),
                Input::Closed => live.take().map(|t| sup.handle_closed(t, now)).unwrap_or_default(),
                Input::OpenFailed => live.take().map(|t| sup.handle_open_failed(t, now)).unwrap_or_default(),
                Input::Dropped => live.take().map(|t| sup.handle_dropped(t, now)).unwrap_or_default(),
                Input::StaleClosed => sup.handle_closed(TransportId::new(u64::MAX), now),
            };
            apply(actions, &mut live);

            // Driver view and supervisor view never disagree
            prop_assert_eq!(sup.current_transport(), live);
            if sup.state() == ConnectionState::Ready {
                prop_assert!(live.is_some());
            }
            if live.is_none() {
                prop_assert_ne!(sup.state(), ConnectionState::Connecting);
            }
        }
    }
}
