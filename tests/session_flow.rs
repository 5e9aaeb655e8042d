mod support;

use neocoder_sync::models::chat::{ MessageKind, MessageRecord, Origin, Role };
use neocoder_sync::models::websocket::{ InboundFrame, OutboundFrame };
use neocoder_sync::order::scroll_target;
use neocoder_sync::session::{ SessionController, SessionEvent, WaitingState };
use neocoder_sync::store::memory::MemoryStore;
use neocoder_sync::subscriber::RemoteEvent;
use neocoder_sync::transport::{ ConnectionState, TransportEvent };
use std::sync::Arc;
use support::{ test_config, RecordingTransport };

fn controller(transport: &Arc<RecordingTransport>) -> SessionController {
    SessionController::new(test_config(), transport.clone(), Arc::new(MemoryStore::new()))
}

fn stream(output: &str) -> SessionEvent {
    SessionEvent::Transport(
        TransportEvent::Frame(InboundFrame::Stream { output: output.to_string(), mime: None })
    )
}

fn final_frame() -> SessionEvent {
    SessionEvent::Transport(TransportEvent::Frame(InboundFrame::Final))
}

fn record(id: &str, pinned: bool, timestamp: i64) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        text: format!("persisted {}", id),
        role: Role::System,
        kind: MessageKind::Message,
        pinned,
        timestamp,
    }
}

#[tokio::test]
async fn streamed_chunks_fold_into_one_code_message() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(stream("print("));
    assert_eq!(session.waiting(), WaitingState::RunningCode);
    session.dispatch(stream("1)"));
    session.dispatch(final_frame());

    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "print(1)");
    assert_eq!(view.messages[0].kind, MessageKind::Code);
    assert_eq!(view.messages[0].role, Role::System);
    assert_eq!(view.waiting, WaitingState::Idle);
}

#[tokio::test]
async fn submit_creates_user_message_and_sends_run_code() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("  plot a sine wave \n".to_string()));

    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].role, Role::User);
    assert_eq!(view.messages[0].text, "plot a sine wave");
    assert_eq!(view.waiting, WaitingState::GeneratingCode);
    assert_eq!(
        transport.frames(),
        vec![OutboundFrame::RunCode {
            code: "plot a sine wave".to_string(),
            model: "gpt-4".to_string(),
            credential: "sk-test".to_string(),
        }]
    );

    // the response after a user message is a new message, not an append
    session.dispatch(stream("import numpy"));
    let view = session.view();
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[1].kind, MessageKind::Code);
}

#[tokio::test]
async fn blank_input_has_no_effect() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit(String::new()));
    session.dispatch(SessionEvent::Submit("   ".to_string()));

    assert!(session.view().messages.is_empty());
    assert!(transport.frames().is_empty());
    assert_eq!(session.waiting(), WaitingState::Idle);
}

#[tokio::test]
async fn reset_adds_one_notice_and_one_frame() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("reset".to_string()));

    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].role, Role::System);
    assert_eq!(view.messages[0].text, "Restarting kernel...");
    assert_eq!(transport.frames(), vec![OutboundFrame::Reset]);
}

#[tokio::test]
async fn clear_empties_the_timeline_without_sending() {
    let transport = RecordingTransport::open();
    let mut session = SessionController::new(
        {
            let mut config = test_config();
            config.greeting = vec!["Hello! Ask me to do something.".to_string()];
            config
        },
        transport.clone(),
        Arc::new(MemoryStore::new())
    );
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![record("old", false, 1)])));
    session.dispatch(stream("x = 1"));
    assert_eq!(session.view().messages.len(), 3);

    session.dispatch(SessionEvent::Submit("clear".to_string()));
    assert!(session.view().messages.is_empty());
    assert!(transport.frames().is_empty());

    // a later snapshot does not bring back what was cleared
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![record("old", false, 1)])));
    assert!(session.view().messages.is_empty());
}

#[tokio::test]
async fn retry_adds_notice_and_resends_without_touching_the_original() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("foo".to_string()));
    let original = session.view().messages[0].clone();

    session.dispatch(SessionEvent::Retry("foo".to_string()));

    let view = session.view();
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[0], original);
    assert_eq!(view.messages[1].role, Role::System);
    assert!(view.messages[1].text.contains("foo"));
    assert_eq!(view.waiting, WaitingState::GeneratingCode);

    let frames = transport.frames();
    assert_eq!(frames.len(), 2);
    assert!(matches!(&frames[1], OutboundFrame::RunCode { code, .. } if code == "foo"));
}

#[tokio::test]
async fn remote_snapshot_overrides_optimistic_pin() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![record("m", false, 1)])));

    session.dispatch(SessionEvent::TogglePin("m".to_string()));
    assert!(session.view().messages[0].pinned);
    assert!(session.view().pinned_ids().contains("m"));

    // another client unpinned it concurrently; the snapshot wins
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![record("m", false, 1)])));
    assert!(!session.view().messages[0].pinned);
}

#[tokio::test]
async fn persisted_copy_supersedes_local_message_by_id() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("hello".to_string()));
    let local = session.view().messages[0].clone();
    assert_eq!(local.origin, Origin::Local);

    let mut persisted = local.to_record();
    persisted.pinned = true;
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![persisted])));

    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].id, local.id);
    assert_eq!(view.messages[0].origin, Origin::Persisted);
    assert!(view.messages[0].pinned);
}

#[tokio::test]
async fn pinned_messages_render_first_with_scroll_offset() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);
    session.dispatch(
        SessionEvent::Remote(
            RemoteEvent::Messages(
                vec![record("a", false, 1), record("p", true, 2), record("b", false, 3), record("c", false, 4)]
            )
        )
    );

    let view = session.view();
    let order: Vec<&str> = view
        .display_order()
        .iter()
        .map(|m| m.id.as_str())
        .collect();
    assert_eq!(order, vec!["p", "a", "b", "c"]);
    assert_eq!(scroll_target(500.0, 1200.0, 40.0), 740.0);
}

#[tokio::test]
async fn closed_transport_stops_waiting_and_tolerates_trailing_chunks() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);
    session.dispatch(SessionEvent::Submit("run it".to_string()));
    session.dispatch(stream("a"));

    transport.set_state(ConnectionState::Closed);
    session.dispatch(
        SessionEvent::Transport(TransportEvent::StateChanged(ConnectionState::Closed))
    );
    assert_eq!(session.waiting(), WaitingState::Idle);
    assert_eq!(session.connection(), ConnectionState::Closed);

    session.dispatch(stream("b"));
    let view = session.view();
    assert_eq!(view.messages.len(), 2);
    assert_eq!(view.messages[1].text, "ab");
    assert_eq!(view.waiting, WaitingState::Idle);
}

#[tokio::test]
async fn sends_while_disconnected_are_dropped_silently() {
    let transport = RecordingTransport::with_state(ConnectionState::Errored);
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("anyone there?".to_string()));

    assert_eq!(session.view().messages.len(), 1);
    assert!(transport.frames().is_empty());
}

#[tokio::test]
async fn upload_notifications_add_informational_messages() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::UploadStarted("data.csv".to_string()));
    assert_eq!(session.waiting(), WaitingState::UploadingFile);
    assert!(session.view().messages.is_empty());

    session.dispatch(SessionEvent::UploadCompleted("data.csv".to_string()));
    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "File data.csv uploaded successfully.");
    assert_eq!(view.waiting, WaitingState::Idle);
    assert!(transport.frames().is_empty());
}

#[tokio::test]
async fn seal_on_final_keeps_back_to_back_responses_apart() {
    let transport = RecordingTransport::open();
    let mut config = test_config();
    config.seal_on_final = true;
    let mut session = SessionController::new(config, transport.clone(), Arc::new(MemoryStore::new()));

    session.dispatch(stream("first"));
    session.dispatch(final_frame());
    session.dispatch(stream("second"));

    let texts: Vec<String> = session
        .view()
        .messages.iter()
        .map(|m| m.text.clone())
        .collect();
    assert_eq!(texts, vec!["first", "second"]);
}

#[tokio::test]
async fn chunks_after_the_stored_echo_stay_visible() {
    let transport = RecordingTransport::open();
    let mut config = test_config();
    config.persist_local = true;
    let mut session = SessionController::new(config, transport.clone(), Arc::new(MemoryStore::new()));

    session.dispatch(stream("print("));
    session.dispatch(final_frame());
    let echoed = session.view().messages[0].to_record();
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![echoed.clone()])));
    assert_eq!(session.view().messages[0].origin, Origin::Persisted);

    session.dispatch(stream("1)"));
    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "print(1)");

    // a stale re-delivery of the old text does not hide the appended chunk
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![echoed.clone()])));
    assert_eq!(session.view().messages[0].text, "print(1)");

    session.dispatch(final_frame());
    let mut updated = echoed;
    updated.text = "print(1)".to_string();
    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![updated])));
    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].text, "print(1)");
    assert_eq!(view.messages[0].origin, Origin::Persisted);
}

#[tokio::test]
async fn messages_created_right_after_clear_are_not_hidden() {
    let transport = RecordingTransport::open();
    let mut session = controller(&transport);

    session.dispatch(SessionEvent::Submit("before".to_string()));
    session.dispatch(SessionEvent::Submit("clear".to_string()));
    session.dispatch(SessionEvent::Submit("after".to_string()));

    let after = session.view().messages[0].clone();
    assert_eq!(after.text, "after");

    session.dispatch(SessionEvent::Remote(RemoteEvent::Messages(vec![after.to_record()])));
    let view = session.view();
    assert_eq!(view.messages.len(), 1);
    assert_eq!(view.messages[0].origin, Origin::Persisted);

    session.dispatch(SessionEvent::TogglePin(after.id.clone()));
    assert!(session.view().messages[0].pinned);
}
