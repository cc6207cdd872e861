mod support;

use agent_api::{RunMetadata, StopReason, TurnRequest};
use agent_api_mock::chunks;
use agent_api_mock::ScriptedResponse;
use agent_wire::{OutboundEvent, RecoveryEvent, ResultSubtype, RetryEvent};
use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::{json, Value};
use support::Harness;
use turn_engine::{TurnOutcome, DEFAULT_KEEP_GOING_MESSAGE};

fn retries(harness: &Harness) -> Vec<RetryEvent> {
    harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            OutboundEvent::Retry(retry) => Some(retry),
            _ => None,
        })
        .collect()
}

fn recoveries(harness: &Harness) -> Vec<RecoveryEvent> {
    harness
        .events()
        .into_iter()
        .filter_map(|event| match event {
            OutboundEvent::Recovery(recovery) => Some(recovery),
            _ => None,
        })
        .collect()
}

fn llm_api_error() -> ScriptedResponse {
    ScriptedResponse::Chunks(vec![
        chunks::error_message("run-1", "LLM provider returned 529"),
        chunks::stop("llm_api_error"),
    ])
}

fn pending_bash() -> ScriptedResponse {
    ScriptedResponse::Chunks(vec![
        chunks::approval_request("run-1", "call-1", Some("Bash"), "{\"command\":\"ls\"}"),
        chunks::stop("requires_approval"),
    ])
}

fn failed_run(run_id: &str, message: &str) -> RunMetadata {
    RunMetadata {
        id: run_id.to_string(),
        status: Some("failed".to_string()),
        stop_reason: Some(StopReason::Error),
        metadata: Some(json!({"error": {"message": message}})),
    }
}

#[tokio::test(start_paused = true)]
async fn llm_api_errors_back_off_exponentially_then_fail() {
    let harness = Harness::new(vec![
        llm_api_error(),
        llm_api_error(),
        llm_api_error(),
        llm_api_error(),
    ]);

    let report = harness.run_text("hello").await;

    assert_matches!(
        &report.outcome,
        TurnOutcome::Failed { stop_reason: Some(StopReason::LlmApiError), message, .. }
            if message.contains("giving up after 3 retries")
    );
    assert_eq!(harness.transport.request_count(), 4);
    assert_eq!(report.summary.num_turns, 4);

    let retries = retries(&harness);
    assert_eq!(
        retries.iter().map(|retry| retry.delay_ms).collect::<Vec<_>>(),
        vec![1000, 2000, 4000]
    );
    assert_eq!(
        retries.iter().map(|retry| retry.attempt).collect::<Vec<_>>(),
        vec![1, 2, 3]
    );
    assert!(retries.iter().all(|retry| retry.reason == "llm_api_error" && retry.max_attempts == 3));

    let types = harness.turn_event_types();
    assert_eq!(&types[types.len() - 2..], &["error", "result"]);
    assert_matches!(
        harness.events().last(),
        Some(OutboundEvent::Result(result)) if result.subtype == ResultSubtype::Error
    );
}

#[tokio::test(start_paused = true)]
async fn llm_api_error_recovers_when_a_retry_succeeds() {
    let harness = Harness::new(vec![
        llm_api_error(),
        ScriptedResponse::Chunks(vec![
            chunks::assistant("run-2", "Back online"),
            chunks::stop("end_turn"),
        ]),
    ]);

    let report = harness.run_text("hello").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    assert_eq!(report.summary.result.as_deref(), Some("Back online"));
    assert_eq!(retries(&harness).len(), 1);
    assert_eq!(
        harness.transport.requests()[0],
        harness.transport.requests()[1],
        "retries resend the same request"
    );
}

#[tokio::test]
async fn approval_desync_is_recovered_with_keep_going_message() {
    let harness = Harness::new(vec![
        pending_bash(),
        ScriptedResponse::Chunks(vec![
            chunks::error_message(
                "run-1",
                "Invalid approval: No tool call is currently awaiting approval",
            ),
            chunks::stop("error"),
        ]),
        ScriptedResponse::Chunks(vec![
            chunks::assistant("run-2", "Continuing"),
            chunks::stop("end_turn"),
        ]),
    ]);

    let report = harness.run_text("list").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    let requests = harness.transport.requests();
    assert_eq!(requests.len(), 3);
    assert!(requests[1].is_approval_only());
    assert_eq!(requests[2], TurnRequest::user_text(DEFAULT_KEEP_GOING_MESSAGE));

    let recoveries = recoveries(&harness);
    assert_eq!(recoveries.len(), 1);
    assert_eq!(recoveries[0].recovery_type, "approval_desync");
    assert!(retries(&harness).is_empty());
    assert!(harness.transport.run_lookups().is_empty());

    // The desync error chunk itself never reaches the output.
    let forwarded_errors = harness
        .events()
        .into_iter()
        .filter(|event| {
            matches!(
                event,
                OutboundEvent::Message(message)
                    if message.chunk.get("message_type").and_then(Value::as_str) == Some("error_message")
            )
        })
        .count();
    assert_eq!(forwarded_errors, 0);
}

#[tokio::test]
async fn approval_desync_rejected_at_send_is_recovered() {
    let harness = Harness::new(vec![
        pending_bash(),
        ScriptedResponse::SendStatus {
            status: 409,
            message: "No tool call is currently awaiting approval".to_string(),
        },
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]);

    let report = harness.run_text("list").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    assert_eq!(recoveries(&harness).len(), 1);
    assert_eq!(
        harness.transport.requests()[2],
        TurnRequest::user_text(DEFAULT_KEEP_GOING_MESSAGE)
    );
}

#[tokio::test]
async fn desync_text_on_a_user_request_is_not_recovered() {
    let harness = Harness::new(vec![ScriptedResponse::Chunks(vec![
        chunks::error_message("run-1", "No tool call is currently awaiting approval"),
        chunks::stop("error"),
    ])]);

    let report = harness.run_text("hi").await;

    assert!(report.outcome.is_failure());
    assert!(recoveries(&harness).is_empty());
}

#[tokio::test(start_paused = true)]
async fn recovery_and_retries_share_one_budget() {
    let harness = Harness::new(vec![
        pending_bash(),
        ScriptedResponse::Chunks(vec![
            chunks::error_message("run-1", "No tool call is currently awaiting approval"),
            chunks::stop("error"),
        ]),
        llm_api_error(),
        llm_api_error(),
        llm_api_error(),
    ]);

    let report = harness.run_text("list").await;

    assert!(report.outcome.is_failure());
    assert_eq!(harness.transport.request_count(), 5);
    assert_eq!(recoveries(&harness).len(), 1);
    let retries = retries(&harness);
    assert_eq!(
        retries.iter().map(|retry| (retry.attempt, retry.delay_ms)).collect::<Vec<_>>(),
        vec![(2, 2000), (3, 4000)]
    );
}

#[tokio::test(start_paused = true)]
async fn generic_error_is_retried_when_run_metadata_names_a_provider_failure() {
    let harness = Harness::with_runs(
        vec![
            ScriptedResponse::Chunks(vec![
                chunks::assistant("run-9", ""),
                chunks::stop("error"),
            ]),
            ScriptedResponse::Chunks(vec![
                chunks::assistant("run-10", "Recovered"),
                chunks::stop("end_turn"),
            ]),
        ],
        vec![failed_run("run-9", "Anthropic API is overloaded")],
    );

    let report = harness.run_text("hello").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    assert_eq!(harness.transport.run_lookups(), vec!["run-9".to_string()]);
    let retries = retries(&harness);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].reason, "provider_error");
    assert_eq!(retries[0].run_id.as_deref(), Some("run-9"));
    assert_eq!(
        report.summary.run_ids,
        vec!["run-9".to_string(), "run-10".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn generic_error_with_provider_text_in_stream_skips_the_lookup() {
    let harness = Harness::new(vec![
        ScriptedResponse::Chunks(vec![
            chunks::error_message("run-1", "upstream connect error"),
            chunks::stop("error"),
        ]),
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]);

    let report = harness.run_text("hello").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    assert!(harness.transport.run_lookups().is_empty());
    assert_eq!(retries(&harness).len(), 1);
}

#[tokio::test]
async fn generic_error_without_provider_signal_fails() {
    let harness = Harness::with_runs(
        vec![ScriptedResponse::Chunks(vec![
            chunks::assistant("run-9", "partial"),
            chunks::stop("error"),
        ])],
        vec![failed_run("run-9", "tool rule violated")],
    );

    let report = harness.run_text("hello").await;

    assert_matches!(
        &report.outcome,
        TurnOutcome::Failed { stop_reason: Some(StopReason::Error), run_id: Some(run_id), .. } if run_id == "run-9"
    );
    assert!(retries(&harness).is_empty());
    assert_eq!(harness.transport.run_lookups(), vec!["run-9".to_string()]);
    assert_matches!(
        harness.events().iter().find(|event| matches!(event, OutboundEvent::Error(_))),
        Some(OutboundEvent::Error(error)) if error.stop_reason == "error"
    );
}

#[tokio::test(start_paused = true)]
async fn transient_send_failures_are_retried() {
    let harness = Harness::new(vec![
        ScriptedResponse::SendStatus {
            status: 503,
            message: "service unavailable".to_string(),
        },
        ScriptedResponse::Chunks(vec![chunks::stop("end_turn")]),
    ]);

    let report = harness.run_text("hello").await;

    assert_eq!(report.outcome, TurnOutcome::Success);
    let retries = retries(&harness);
    assert_eq!(retries.len(), 1);
    assert_eq!(retries[0].reason, "transport_error");
}

#[tokio::test]
async fn permanent_send_failures_fail_the_turn() {
    let harness = Harness::new(vec![ScriptedResponse::SendStatus {
        status: 401,
        message: "invalid api key".to_string(),
    }]);

    let report = harness.run_text("hello").await;

    assert_matches!(&report.outcome, TurnOutcome::Failed { message, .. } if message.contains("invalid api key"));
    assert!(retries(&harness).is_empty());
}
