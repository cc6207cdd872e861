//! Builders for raw stream chunks in the shape the agent service emits.

use serde_json::{json, Value};

pub fn assistant(run_id: &str, text: &str) -> Value {
    json!({
        "message_type": "assistant_message",
        "run_id": run_id,
        "content": text,
    })
}

pub fn reasoning(run_id: &str, text: &str) -> Value {
    json!({
        "message_type": "reasoning_message",
        "run_id": run_id,
        "reasoning": text,
    })
}

/// One approval-request fragment. `name` is usually only present on the
/// first fragment of a call.
pub fn approval_request(
    run_id: &str,
    tool_call_id: &str,
    name: Option<&str>,
    arguments: &str,
) -> Value {
    let mut tool_call = json!({
        "tool_call_id": tool_call_id,
        "arguments": arguments,
    });
    if let Some(name) = name {
        tool_call["name"] = Value::String(name.to_string());
    }

    json!({
        "message_type": "approval_request_message",
        "run_id": run_id,
        "tool_call": tool_call,
    })
}

/// A server-executed tool call that needs no local approval.
pub fn tool_call(run_id: &str, tool_call_id: &str, name: &str, arguments: &str) -> Value {
    json!({
        "message_type": "tool_call_message",
        "run_id": run_id,
        "tool_call": {
            "tool_call_id": tool_call_id,
            "name": name,
            "arguments": arguments,
        },
    })
}

pub fn tool_return(run_id: &str, tool_call_id: &str, status: &str) -> Value {
    json!({
        "message_type": "tool_return_message",
        "run_id": run_id,
        "tool_call_id": tool_call_id,
        "status": status,
    })
}

pub fn stop(reason: &str) -> Value {
    json!({
        "message_type": "stop_reason",
        "stop_reason": reason,
    })
}

pub fn usage(prompt_tokens: u64, completion_tokens: u64) -> Value {
    json!({
        "message_type": "usage_statistics",
        "prompt_tokens": prompt_tokens,
        "completion_tokens": completion_tokens,
        "total_tokens": prompt_tokens + completion_tokens,
        "step_count": 1,
    })
}

pub fn ping() -> Value {
    json!({ "message_type": "ping" })
}

pub fn error_message(run_id: &str, message: &str) -> Value {
    json!({
        "message_type": "error_message",
        "run_id": run_id,
        "message": message,
        "error_type": "internal_error",
    })
}

/// Ad hoc error shape without a `message_type`.
pub fn bare_error(message: &str) -> Value {
    json!({ "error": { "message": message } })
}

/// Attaches a sequence id to a chunk.
pub fn with_seq(mut chunk: Value, seq_id: u64) -> Value {
    chunk["seq_id"] = Value::from(seq_id);
    chunk
}
