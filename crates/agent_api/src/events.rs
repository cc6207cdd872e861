use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Terminal classification the server attaches to a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    EndTurn,
    RequiresApproval,
    LlmApiError,
    Error,
    Cancelled,
    MaxSteps,
    MaxTokensExceeded,
    #[serde(alias = "context_window_overflow_in_system_prompt")]
    ContextWindowOverflow,
    ToolRule,
    NoToolCall,
    InvalidToolCall,
    InvalidLlmResponse,
    #[serde(other)]
    Unknown,
}

impl StopReason {
    pub fn parse(value: &str) -> Self {
        match value {
            "end_turn" => Self::EndTurn,
            "requires_approval" => Self::RequiresApproval,
            "llm_api_error" => Self::LlmApiError,
            "error" => Self::Error,
            "cancelled" => Self::Cancelled,
            "max_steps" => Self::MaxSteps,
            "max_tokens_exceeded" => Self::MaxTokensExceeded,
            "context_window_overflow" | "context_window_overflow_in_system_prompt" => {
                Self::ContextWindowOverflow
            }
            "tool_rule" => Self::ToolRule,
            "no_tool_call" => Self::NoToolCall,
            "invalid_tool_call" => Self::InvalidToolCall,
            "invalid_llm_response" => Self::InvalidLlmResponse,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EndTurn => "end_turn",
            Self::RequiresApproval => "requires_approval",
            Self::LlmApiError => "llm_api_error",
            Self::Error => "error",
            Self::Cancelled => "cancelled",
            Self::MaxSteps => "max_steps",
            Self::MaxTokensExceeded => "max_tokens_exceeded",
            Self::ContextWindowOverflow => "context_window_overflow",
            Self::ToolRule => "tool_rule",
            Self::NoToolCall => "no_tool_call",
            Self::InvalidToolCall => "invalid_tool_call",
            Self::InvalidLlmResponse => "invalid_llm_response",
            Self::Unknown => "unknown",
        }
    }

    /// Stop reasons that are retried unconditionally.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::LlmApiError)
    }

    /// Stop reasons that end the logical turn as a failure without any
    /// retry or recovery attempt.
    pub fn is_terminal_failure(&self) -> bool {
        !matches!(
            self,
            Self::EndTurn | Self::RequiresApproval | Self::LlmApiError | Self::Error
        )
    }
}

/// One fragment of a tool call. Large argument payloads arrive split across
/// several chunks sharing the same `tool_call_id`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallDelta {
    #[serde(default)]
    pub tool_call_id: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageStatistics {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub step_count: u64,
}

/// Typed view of a streamed chunk, keyed on `message_type`.
#[derive(Debug, Clone, PartialEq)]
pub enum ChunkKind {
    Ping,
    AssistantMessage {
        content: String,
    },
    ReasoningMessage,
    /// Tool call the server already executed (or will execute) itself.
    ToolCallMessage {
        tool_calls: Vec<ToolCallDelta>,
    },
    /// Tool call that needs local authorization before it may run.
    ApprovalRequest {
        tool_calls: Vec<ToolCallDelta>,
    },
    ToolReturn {
        tool_call_ids: Vec<String>,
        status: Option<String>,
    },
    StopReason {
        stop_reason: StopReason,
    },
    UsageStatistics {
        usage: UsageStatistics,
    },
    /// Typed `error_message` chunk.
    Error {
        message: String,
        error_type: Option<String>,
        detail: Option<String>,
    },
    /// Ad hoc chunk carrying a bare `error` object or string.
    BareError {
        message: String,
        detail: Option<String>,
    },
    Other {
        message_type: Option<String>,
    },
}

/// One chunk of a turn's response stream: raw JSON plus its typed view.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamChunk {
    raw: Value,
    kind: ChunkKind,
}

impl StreamChunk {
    /// Classifies a raw chunk. Never fails: unknown shapes map to
    /// [`ChunkKind::Other`].
    pub fn from_value(raw: Value) -> Self {
        let kind = classify(&raw);
        Self { raw, kind }
    }

    pub fn raw(&self) -> &Value {
        &self.raw
    }

    pub fn into_raw(self) -> Value {
        self.raw
    }

    pub fn kind(&self) -> &ChunkKind {
        &self.kind
    }

    pub fn message_type(&self) -> Option<&str> {
        self.raw.get("message_type").and_then(Value::as_str)
    }

    pub fn run_id(&self) -> Option<&str> {
        self.raw
            .get("run_id")
            .and_then(Value::as_str)
            .filter(|value| !value.is_empty())
    }

    pub fn seq_id(&self) -> Option<u64> {
        self.raw.get("seq_id").and_then(Value::as_u64)
    }

    pub fn is_ping(&self) -> bool {
        matches!(self.kind, ChunkKind::Ping)
    }
}

fn classify(raw: &Value) -> ChunkKind {
    let message_type = raw.get("message_type").and_then(Value::as_str);

    match message_type {
        Some("ping") => ChunkKind::Ping,
        Some("assistant_message") => ChunkKind::AssistantMessage {
            content: content_text(raw.get("content")),
        },
        Some("reasoning_message") | Some("hidden_reasoning_message") => ChunkKind::ReasoningMessage,
        Some("tool_call_message") => ChunkKind::ToolCallMessage {
            tool_calls: tool_call_deltas(raw),
        },
        Some("approval_request_message") => ChunkKind::ApprovalRequest {
            tool_calls: tool_call_deltas(raw),
        },
        Some("tool_return_message") => ChunkKind::ToolReturn {
            tool_call_ids: tool_return_ids(raw),
            status: string_field(raw, "status"),
        },
        Some("stop_reason") => ChunkKind::StopReason {
            stop_reason: raw
                .get("stop_reason")
                .and_then(Value::as_str)
                .map(StopReason::parse)
                .unwrap_or(StopReason::Unknown),
        },
        Some("usage_statistics") => ChunkKind::UsageStatistics {
            usage: serde_json::from_value(raw.clone()).unwrap_or_default(),
        },
        Some("error_message") => ChunkKind::Error {
            message: string_field(raw, "message").unwrap_or_else(|| "Unknown error".to_string()),
            error_type: string_field(raw, "error_type"),
            detail: string_field(raw, "detail"),
        },
        _ => match raw.get("error") {
            Some(error) if !error.is_null() => bare_error(error),
            _ => ChunkKind::Other {
                message_type: message_type.map(ToString::to_string),
            },
        },
    }
}

fn bare_error(error: &Value) -> ChunkKind {
    match error {
        Value::String(message) => ChunkKind::BareError {
            message: message.clone(),
            detail: None,
        },
        other => ChunkKind::BareError {
            message: string_field(other, "message")
                .or_else(|| string_field(other, "error"))
                .unwrap_or_else(|| other.to_string()),
            detail: string_field(other, "detail"),
        },
    }
}

fn string_field(value: &Value, key: &str) -> Option<String> {
    value
        .get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

fn content_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| part.get("text").and_then(Value::as_str))
            .collect(),
        _ => String::new(),
    }
}

fn tool_call_deltas(raw: &Value) -> Vec<ToolCallDelta> {
    if let Some(calls) = raw.get("tool_calls").and_then(Value::as_array) {
        let deltas: Vec<ToolCallDelta> = calls.iter().map(tool_call_delta).collect();
        if !deltas.is_empty() {
            return deltas;
        }
    }

    match raw.get("tool_call") {
        Some(call) if call.is_object() => vec![tool_call_delta(call)],
        _ => Vec::new(),
    }
}

fn tool_call_delta(call: &Value) -> ToolCallDelta {
    let arguments = match call.get("arguments") {
        Some(Value::String(text)) => Some(text.clone()),
        Some(Value::Null) | None => None,
        Some(other) => Some(other.to_string()),
    };

    ToolCallDelta {
        tool_call_id: string_field(call, "tool_call_id")
            .or_else(|| string_field(call, "id"))
            .filter(|id| !id.is_empty()),
        name: string_field(call, "name").filter(|name| !name.is_empty()),
        arguments,
    }
}

fn tool_return_ids(raw: &Value) -> Vec<String> {
    let mut ids: Vec<String> = raw
        .get("tool_returns")
        .and_then(Value::as_array)
        .map(|returns| {
            returns
                .iter()
                .filter_map(|entry| string_field(entry, "tool_call_id"))
                .collect()
        })
        .unwrap_or_default();

    if let Some(id) = string_field(raw, "tool_call_id") {
        if !ids.contains(&id) {
            ids.push(id);
        }
    }

    ids
}
