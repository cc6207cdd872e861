mod support;

use std::io::Cursor;
use std::sync::Arc;

use agent_api::{ContentPart, InputMessage};
use agent_api_mock::{chunks, EchoAgent, ScriptedResponse, ScriptedTransport};
use agent_headless::config::{InputFormat, PermissionMode};
use agent_headless::session::Session;
use agent_headless::tools::LocalTools;
use agent_wire::{
    BlockedReason, ControlRequestBody, ControlResponseBody, OutboundEvent, ResultSubtype,
};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use support::{config, next_event, ChannelSink, LiveSession};

fn result_subtypes(events: &[OutboundEvent]) -> Vec<ResultSubtype> {
    events
        .iter()
        .filter_map(|event| match event {
            OutboundEvent::Result(result) => Some(result.subtype),
            _ => None,
        })
        .collect()
}

fn user_texts(transport: &ScriptedTransport) -> Vec<String> {
    transport
        .requests()
        .iter()
        .flat_map(|request| request.messages.clone())
        .flat_map(|message| match message {
            InputMessage::Message { content, .. } => content
                .into_iter()
                .map(|ContentPart::Text { text }| text)
                .collect::<Vec<_>>(),
            InputMessage::Approval { .. } => Vec::new(),
        })
        .collect()
}

#[tokio::test]
async fn prompt_runs_one_turn_against_echo_agent() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let mut config = config(InputFormat::Text, PermissionMode::Default);
    config.prompt = Some("hello".to_string());
    let (sink, _events) = ChannelSink::new();
    let session = Session::new(
        &config,
        "session-1",
        Arc::new(EchoAgent::new()),
        Arc::new(LocalTools::new(workspace.path()).expect("workspace")),
        sink.clone(),
    );

    let exit = session.run(None::<Cursor<Vec<u8>>>).await;

    assert_eq!(exit.code(), 0);
    assert_eq!(exit.completed_turns, 1);
    let events = sink.events();
    assert_matches!(events.first(), Some(OutboundEvent::System(system)) if system.tools.contains(&"Bash".to_string()));
    assert_matches!(
        events.last(),
        Some(OutboundEvent::Result(result)) if result.result.as_deref() == Some("Echo: hello")
    );
}

#[tokio::test]
async fn stdin_lines_become_user_messages_in_order() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]));
    let (sink, _events) = ChannelSink::new();
    let session = Session::new(
        &config(InputFormat::Text, PermissionMode::Default),
        "session-1",
        transport.clone(),
        Arc::new(LocalTools::new(workspace.path()).expect("workspace")),
        sink.clone(),
    );

    let exit = session
        .run(Some(Cursor::new(b"one\n\n  \ntwo\n".to_vec())))
        .await;

    assert_eq!(exit.code(), 0);
    assert_eq!(user_texts(&transport), vec!["one", "two"]);
    let enqueued = sink
        .events()
        .iter()
        .filter(|event| matches!(event, OutboundEvent::QueueItemEnqueued(_)))
        .count();
    assert_eq!(enqueued, 2);
}

#[tokio::test]
async fn terminal_failure_sets_exit_code() {
    let workspace = tempfile::tempdir().expect("tempdir");
    let transport = Arc::new(ScriptedTransport::new([ScriptedResponse::Chunks(vec![
        chunks::stop("max_steps"),
    ])]));
    let mut config = config(InputFormat::Text, PermissionMode::Default);
    config.prompt = Some("loop".to_string());
    let (sink, _events) = ChannelSink::new();
    let session = Session::new(
        &config,
        "session-1",
        transport,
        Arc::new(LocalTools::new(workspace.path()).expect("workspace")),
        sink.clone(),
    );

    let exit = session.run(None::<Cursor<Vec<u8>>>).await;

    assert_eq!(exit.code(), 1);
    assert_eq!(result_subtypes(&sink.events()), vec![ResultSubtype::Error]);
}

#[tokio::test]
async fn stream_json_answers_initialize_and_reports_malformed_lines() {
    let transport = Arc::new(ScriptedTransport::new([ScriptedResponse::Chunks(vec![
        chunks::assistant("run-1", "hi"),
        chunks::stop("end_turn"),
    ])]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport,
    );

    live.send_line(r#"{"type":"control_request","request_id":"init-1","request":{"subtype":"initialize"}}"#)
        .await;
    let response = next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlResponse(_))
    })
    .await;
    assert_matches!(
        response,
        OutboundEvent::ControlResponse(response)
            if response.request_id == "init-1"
                && matches!(&response.response, ControlResponseBody::Success { response } if response["agent_id"] == "agent-test")
    );

    live.send_line("{not json").await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Error(_))).await;

    live.send_line(r#"{"type":"control_request","request_id":"x-1","request":{"subtype":"rewind_files"}}"#)
        .await;
    let unsupported = next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlResponse(_))
    })
    .await;
    assert_matches!(
        unsupported,
        OutboundEvent::ControlResponse(response)
            if matches!(response.response, ControlResponseBody::Error { .. })
    );

    live.send_line(r#"{"type":"user","message":{"role":"user","content":"hi"},"client_message_id":"c-1"}"#)
        .await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Result(_))).await;

    let (exit, events, _) = live.finish().await;
    assert_eq!(exit.code(), 0);
    assert_matches!(
        events.iter().find(|event| matches!(event, OutboundEvent::QueueItemEnqueued(_))),
        Some(OutboundEvent::QueueItemEnqueued(item)) if item.client_message_id.as_deref() == Some("c-1")
    );
}

#[tokio::test]
async fn ask_verdicts_round_trip_through_the_host() {
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::Chunks(vec![
            chunks::approval_request(
                "run-1",
                "call-1",
                Some("Write"),
                r#"{"file_path":"note.txt","content":"from agent"}"#,
            ),
            chunks::stop("requires_approval"),
        ]),
        ScriptedResponse::Chunks(vec![chunks::assistant("run-1", "written"), chunks::stop("end_turn")]),
    ]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport.clone(),
    );

    live.send_line(r#"{"type":"user","message":{"content":"write a note"}}"#)
        .await;
    let request = next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlRequest(_))
    })
    .await;
    let OutboundEvent::ControlRequest(request) = request else {
        unreachable!("filtered above");
    };
    assert_matches!(
        &request.request,
        ControlRequestBody::CanUseTool { tool_name, tool_call_id, input, .. }
            if tool_name == "Write" && tool_call_id == "call-1" && input["file_path"] == "note.txt"
    );

    let reply = json!({
        "type": "control_response",
        "request_id": request.request_id,
        "response": {"subtype": "success", "response": {"behavior": "allow"}}
    });
    live.send_line(&reply.to_string()).await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Result(_))).await;

    let (exit, _, workspace) = live.finish().await;
    assert_eq!(exit.code(), 0);
    assert_eq!(
        std::fs::read_to_string(workspace.path().join("note.txt")).expect("note written"),
        "from agent"
    );
    let replies = &transport.requests()[1];
    assert!(replies.is_approval_only());
}

#[tokio::test]
async fn interrupt_control_request_cancels_the_active_turn() {
    let transport = Arc::new(ScriptedTransport::new([ScriptedResponse::Stall(vec![
        chunks::assistant("run-1", "thinking..."),
    ])]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport,
    );

    live.send_line(r#"{"type":"user","message":{"content":"long task"}}"#)
        .await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Message(_))).await;

    live.send_line(r#"{"type":"control_request","request_id":"int-1","request":{"subtype":"interrupt"}}"#)
        .await;
    let response = next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlResponse(_))
    })
    .await;
    assert_matches!(
        response,
        OutboundEvent::ControlResponse(response)
            if matches!(&response.response, ControlResponseBody::Success { response } if response["interrupted"] == true)
    );
    let result = next_event(&mut live.events, |event| matches!(event, OutboundEvent::Result(_))).await;
    assert_matches!(result, OutboundEvent::Result(result) if result.subtype == ResultSubtype::Interrupted);

    let (exit, _, _) = live.finish().await;
    assert_eq!(exit.code(), 0);
}

#[tokio::test]
async fn closing_input_denies_a_pending_host_prompt() {
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::Chunks(vec![
            chunks::approval_request("run-1", "call-1", Some("Bash"), r#"{"command":"make"}"#),
            chunks::stop("requires_approval"),
        ]),
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport.clone(),
    );

    live.send_line(r#"{"type":"user","message":{"content":"build"}}"#)
        .await;
    next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlRequest(_))
    })
    .await;

    let (exit, _, _) = live.finish().await;
    assert_eq!(exit.code(), 0);

    let requests = transport.requests();
    assert_eq!(requests.len(), 2);
    assert_matches!(
        &requests[1].messages[..],
        [InputMessage::Approval { approvals }] if approvals.len() == 1 && approvals[0].is_denial()
    );
}

#[tokio::test]
async fn messages_sent_during_a_turn_report_blocked_once() {
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::Stall(vec![chunks::assistant("run-1", "busy")]),
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport.clone(),
    );

    live.send_line(r#"{"type":"user","message":{"content":"first"}}"#)
        .await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Message(_))).await;
    live.send_line(r#"{"type":"user","message":{"content":"a"}}"#).await;
    live.send_line(r#"{"type":"user","message":{"content":"b"}}"#).await;
    next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::QueueItemEnqueued(item) if item.queue_len == 2)
    })
    .await;

    live.send_line(r#"{"type":"control_request","request_id":"int-1","request":{"subtype":"interrupt"}}"#)
        .await;
    let (exit, events, _) = live.finish().await;
    assert_eq!(exit.code(), 0);

    let blocked: Vec<_> = events
        .iter()
        .filter(|event| matches!(event, OutboundEvent::QueueBlocked(_)))
        .collect();
    assert_eq!(blocked.len(), 1);
    assert_matches!(
        events.iter().filter(|event| matches!(event, OutboundEvent::QueueBatchDequeued(_))).last(),
        Some(OutboundEvent::QueueBatchDequeued(batch)) if batch.merged_count == 2
    );
    assert_eq!(user_texts(&transport), vec!["first", "a", "b"]);
}

#[tokio::test]
async fn interrupting_a_host_prompt_does_not_leave_it_pending() {
    let transport = Arc::new(ScriptedTransport::new([
        ScriptedResponse::Chunks(vec![
            chunks::approval_request("run-1", "call-1", Some("Bash"), r#"{"command":"make"}"#),
            chunks::stop("requires_approval"),
        ]),
        ScriptedResponse::Stall(vec![chunks::assistant("run-2", "busy")]),
    ]));
    let mut live = LiveSession::start(
        config(InputFormat::StreamJson, PermissionMode::Default),
        transport,
    );

    live.send_line(r#"{"type":"user","message":{"content":"build"}}"#)
        .await;
    next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::ControlRequest(_))
    })
    .await;
    live.send_line(r#"{"type":"control_request","request_id":"int-1","request":{"subtype":"interrupt"}}"#)
        .await;
    let first = next_event(&mut live.events, |event| matches!(event, OutboundEvent::Result(_))).await;
    assert_matches!(first, OutboundEvent::Result(result) if result.subtype == ResultSubtype::Interrupted);

    live.send_line(r#"{"type":"user","message":{"content":"second"}}"#)
        .await;
    next_event(&mut live.events, |event| matches!(event, OutboundEvent::Message(_))).await;
    live.send_line(r#"{"type":"user","message":{"content":"third"}}"#)
        .await;
    let blocked = next_event(&mut live.events, |event| {
        matches!(event, OutboundEvent::QueueBlocked(_))
    })
    .await;
    assert_matches!(
        blocked,
        OutboundEvent::QueueBlocked(blocked) if blocked.reason == BlockedReason::TurnActive
    );

    live.send_line(r#"{"type":"control_request","request_id":"int-2","request":{"subtype":"interrupt"}}"#)
        .await;
    let (exit, _, _) = live.finish().await;
    assert_eq!(exit.code(), 0);
}
