// ABOUTME: Behavioural properties of the chat session state machine
// ABOUTME: Ordering, idempotent finalization, epoch isolation, pipeline purity, busy policy, scenarios

use secretary_client::{
    ChatEvent, ChatSession, ConnectionStatus, Epoch, Ingest, PendingRequest, PendingUpdate,
    PipelineState, Role, SessionConfig, SessionError, StageStatus, TurnOutcome,
};
use serde_json::json;

fn connected_session() -> (ChatSession, Epoch) {
    let mut session = ChatSession::new(SessionConfig::default());
    let epoch = session.begin_connect().expect("fresh session should connect");
    assert!(session.connection_opened(epoch));
    (session, epoch)
}

fn wire(value: serde_json::Value) -> ChatEvent {
    ChatEvent::parse(&value.to_string()).unwrap()
}

fn token(text: &str) -> ChatEvent {
    ChatEvent::Token { text: text.into() }
}

#[test]
fn test_token_order_is_preserved() {
    let fragments = ["The ", "quick ", "", "brown ", "fox ", "jumps", "."];
    let (mut session, epoch) = connected_session();
    session.begin_turn("tell me a story").unwrap();

    for fragment in fragments {
        session.ingest(epoch, token(fragment));
    }
    session.ingest(epoch, ChatEvent::Done(TurnOutcome::empty()));

    let last = session.messages().last().unwrap();
    assert_eq!(last.content, fragments.concat());
}

#[test]
fn test_done_without_turn_appends_nothing() {
    let (mut session, epoch) = connected_session();
    session.begin_turn("hello").unwrap();
    session.ingest(epoch, token("hi"));
    session.ingest(epoch, ChatEvent::Done(TurnOutcome::empty()));
    assert_eq!(session.messages().len(), 2);

    // A duplicated terminal event must not create another assistant message
    let outcome = session.ingest(epoch, ChatEvent::Done(TurnOutcome::empty()));
    assert_eq!(outcome, Ingest::Ignored);
    assert_eq!(session.messages().len(), 2);
}

#[test]
fn test_events_from_superseded_connection_are_ignored() {
    let (mut session, a) = connected_session();
    session.begin_turn("first").unwrap();
    session.ingest(a, token("from A "));

    // Start connection B
    session.disconnect();
    let b = session.begin_connect().unwrap();
    assert_ne!(a, b);
    session.connection_opened(b);
    let before = session.snapshot();

    assert_eq!(session.ingest(a, token("late")), Ingest::Stale);
    assert_eq!(
        session.ingest(
            a,
            ChatEvent::PendingRequest {
                pending: Some(PendingRequest {
                    domain: "ops".into(),
                    request_type: "travel".into(),
                    filled: Default::default(),
                    missing: vec!["origin".into()],
                    subtype: None,
                }),
            }
        ),
        Ingest::Stale
    );
    assert_eq!(session.ingest(a, ChatEvent::Done(TurnOutcome::empty())), Ingest::Stale);

    let after = session.snapshot();
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.streaming_text, before.streaming_text);
    assert_eq!(after.pending_request, before.pending_request);
    assert_eq!(after.events.len(), before.events.len());
    assert_eq!(after.status, ConnectionStatus::Connected);
}

#[test]
fn test_pipeline_fold_matches_incremental_application() {
    let log = vec![
        wire(json!({"type": "agent_started", "data": {"agent": "RouterAgent"}})),
        wire(json!({"type": "agent_finished", "data": {"agent": "RouterAgent"}})),
        wire(json!({"type": "agent_started", "data": {"agent": "DomainAgent", "domain": "ops"}})),
        wire(json!({"type": "tool_call", "data": {"service": "travel", "path": "/bookings"}})),
        wire(json!({"type": "tool_result", "data": {"service": "travel", "result": {"status": "ok"}}})),
        wire(json!({"type": "agent_finished", "data": {"agent": "DomainAgent", "domain": "ops"}})),
    ];

    let folded = PipelineState::fold(&log);
    assert_eq!(
        folded,
        PipelineState {
            router: StageStatus::Done,
            domain: StageStatus::Done,
            tools: StageStatus::Done,
        }
    );

    let incremental = log
        .iter()
        .fold(PipelineState::default(), |state, event| state.apply(event));
    assert_eq!(incremental, folded);

    // The session's projection agrees with folding its own log
    let (mut session, epoch) = connected_session();
    session.begin_turn("go").unwrap();
    for event in log {
        session.ingest(epoch, event);
        assert_eq!(session.pipeline(), PipelineState::fold(session.events()));
    }
}

#[test]
fn test_send_while_streaming_is_rejected() {
    let (mut session, epoch) = connected_session();
    session.begin_turn("first message").unwrap();
    session.ingest(epoch, token("working"));

    let err = session.begin_turn("second message").unwrap_err();
    assert!(matches!(err, SessionError::Busy));
    assert!(err.is_rejection());

    let users: Vec<_> = session
        .messages()
        .iter()
        .filter(|m| m.role == Role::User)
        .collect();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].content, "first message");
    assert_eq!(session.streaming_text(), "working");
}

#[test]
fn test_book_a_flight_scenario() {
    let (mut session, epoch) = connected_session();
    session.begin_turn("book a flight").unwrap();

    session.ingest(epoch, token("I can help "));
    session.ingest(epoch, token("with that."));
    session.ingest(
        epoch,
        wire(json!({
            "type": "pending_request",
            "data": {
                "domain": "ops",
                "type": "travel",
                "filled": {},
                "missing": ["origin", "destination"]
            }
        })),
    );
    session.ingest(epoch, wire(json!({"type": "done"})));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[0].role, Role::User);
    assert_eq!(snapshot.messages[0].content, "book a flight");
    assert_eq!(snapshot.messages[1].role, Role::Assistant);
    assert_eq!(snapshot.messages[1].content, "I can help with that.");
    assert_eq!(
        snapshot.pending_request.as_ref().unwrap().missing,
        vec!["origin", "destination"]
    );
    assert_eq!(snapshot.streaming_text, "");
    assert!(!snapshot.is_streaming);
}

#[test]
fn test_clarification_completes_over_two_turns() {
    let (mut session, epoch) = connected_session();

    session.begin_turn("I need sick leave").unwrap();
    session.ingest(
        epoch,
        wire(json!({
            "type": "final_response",
            "message": "Please provide start_date, end_date.",
            "actions": [],
            "pending_request": {
                "domain": "hr",
                "type": "leave",
                "filled": {"leave_type": "sick"},
                "missing": ["start_date", "end_date"]
            }
        })),
    );
    assert_eq!(
        session.pending_request().and_then(|p| p.next_missing()),
        Some("start_date")
    );
    assert_eq!(
        session.messages()[1].content,
        "Please provide start_date, end_date."
    );

    session.begin_turn("tomorrow, one day").unwrap();
    session.ingest(
        epoch,
        wire(json!({
            "type": "final_response",
            "message": "Leave request captured.",
            "actions": [{"type": "leave_request", "status": "submitted", "payload": {"leave_type": "sick"}}],
            "pending_request": null
        })),
    );

    assert!(session.pending_request().is_none());
    let last = session.messages().last().unwrap();
    assert_eq!(last.actions.len(), 1);
    assert_eq!(last.actions[0].action_type, "leave_request");
    assert_eq!(session.messages().len(), 4);
}

#[test]
fn test_error_event_unblocks_next_send() {
    let (mut session, epoch) = connected_session();
    session.begin_turn("hello").unwrap();
    session.ingest(epoch, token("Hel"));
    session.ingest(epoch, wire(json!({"type": "error", "data": {"message": "LLM unavailable"}})));

    let snapshot = session.snapshot();
    assert_eq!(snapshot.messages.len(), 2);
    assert_eq!(snapshot.messages[1].content, "Hel");
    assert_eq!(snapshot.messages[1].error.as_deref(), Some("LLM unavailable"));
    assert_eq!(snapshot.connection_error.as_deref(), Some("LLM unavailable"));
    assert!(!snapshot.is_streaming);

    assert!(session.begin_turn("retry").is_ok());
}

#[test]
fn test_done_payload_message_fills_empty_stream() {
    let (mut session, epoch) = connected_session();
    session.begin_turn("what's the leave policy?").unwrap();
    session.ingest(
        epoch,
        ChatEvent::Done(TurnOutcome {
            message: Some("Employees get 10 days.".into()),
            actions: None,
            pending: PendingUpdate::Unchanged,
        }),
    );
    assert_eq!(
        session.messages().last().unwrap().content,
        "Employees get 10 days."
    );
}

#[test]
fn test_blank_send_is_harmless() {
    let (mut session, _) = connected_session();
    for text in ["", "   ", "\n\t"] {
        assert!(matches!(
            session.begin_turn(text),
            Err(SessionError::EmptyMessage)
        ));
    }
    assert!(session.messages().is_empty());
    assert!(!session.is_streaming());
}

#[test]
fn test_disconnect_during_connect_leaves_clean_state() {
    let mut session = ChatSession::default();
    let epoch = session.begin_connect().unwrap();
    session.disconnect();
    session.disconnect();

    assert!(!session.connection_opened(epoch));
    assert!(!session.connection_failed(epoch, "late failure".into()));
    assert_eq!(session.status(), ConnectionStatus::Disconnected);
    assert!(session.connection_error().is_none());
}
