//! Line-delimited JSON wire protocol for embedding the turn runtime.
//!
//! This crate only defines data. Every emitted line is an [`Envelope`]
//! (`session_id` + `uuid` + one [`OutboundEvent`]); every consumed line is an
//! [`InboundMessage`]. Producers (queue, interpreter, orchestrator) populate
//! these types; the host binary owns serialization and I/O.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

mod control;
mod queue;

pub use control::{
    ControlRequest, ControlRequestBody, ControlResponse, ControlResponseBody, PermissionBehavior,
    PermissionReply,
};
pub use queue::{
    BlockedReason, ClearReason, DropReason, QueueBatchDequeued, QueueBlocked, QueueCleared,
    QueueItemDropped, QueueItemEnqueued, QueueItemKind, QueueSource,
};

/// One emitted line: session/uuid stamp plus the event body.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub session_id: String,
    pub uuid: String,
    #[serde(flatten)]
    pub event: OutboundEvent,
}

impl Envelope {
    #[must_use]
    pub fn new(
        session_id: impl Into<String>,
        uuid: impl Into<String>,
        event: OutboundEvent,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            uuid: uuid.into(),
            event,
        }
    }
}

/// Every event type the runtime can emit, tagged by `type`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundEvent {
    System(SystemEvent),
    Message(MessageEvent),
    AutoApproval(AutoApprovalEvent),
    Error(ErrorEvent),
    Retry(RetryEvent),
    Recovery(RecoveryEvent),
    Result(ResultEvent),
    QueueItemEnqueued(QueueItemEnqueued),
    QueueBatchDequeued(QueueBatchDequeued),
    QueueBlocked(QueueBlocked),
    QueueCleared(QueueCleared),
    QueueItemDropped(QueueItemDropped),
    ControlRequest(ControlRequest),
    ControlResponse(ControlResponse),
}

impl OutboundEvent {
    /// Returns the wire `type` tag for this event.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::System(_) => "system",
            Self::Message(_) => "message",
            Self::AutoApproval(_) => "auto_approval",
            Self::Error(_) => "error",
            Self::Retry(_) => "retry",
            Self::Recovery(_) => "recovery",
            Self::Result(_) => "result",
            Self::QueueItemEnqueued(_) => "queue_item_enqueued",
            Self::QueueBatchDequeued(_) => "queue_batch_dequeued",
            Self::QueueBlocked(_) => "queue_blocked",
            Self::QueueCleared(_) => "queue_cleared",
            Self::QueueItemDropped(_) => "queue_item_dropped",
            Self::ControlRequest(_) => "control_request",
            Self::ControlResponse(_) => "control_response",
        }
    }

    /// Returns true for queue lifecycle events.
    #[must_use]
    pub fn is_queue_lifecycle(&self) -> bool {
        matches!(
            self,
            Self::QueueItemEnqueued(_)
                | Self::QueueBatchDequeued(_)
                | Self::QueueBlocked(_)
                | Self::QueueCleared(_)
                | Self::QueueItemDropped(_)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemSubtype {
    Init,
}

/// Session start announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemEvent {
    pub subtype: SystemSubtype,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
}

/// Keys owned by the envelope and the event tag.
const ENVELOPE_KEYS: [&str; 3] = ["type", "session_id", "uuid"];

/// Raw provider chunk forwarded next to the envelope fields. Chunk keys that
/// would collide with the envelope are moved under `shadowed_fields`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageEvent {
    #[serde(flatten)]
    pub chunk: Map<String, Value>,
}

impl MessageEvent {
    /// Wraps a raw chunk. Non-object chunks are kept under a `value` key.
    #[must_use]
    pub fn from_chunk(chunk: Value) -> Self {
        let mut chunk = match chunk {
            Value::Object(map) => map,
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other);
                map
            }
        };

        let shadowed: Map<String, Value> = ENVELOPE_KEYS
            .iter()
            .filter_map(|key| chunk.remove(*key).map(|value| ((*key).to_string(), value)))
            .collect();
        if !shadowed.is_empty() {
            chunk.insert("shadowed_fields".to_string(), Value::Object(shadowed));
        }
        Self { chunk }
    }
}

/// Tool call as reported in approval-related events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallSummary {
    pub tool_call_id: String,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoApprovalEvent {
    pub tool_call: ToolCallSummary,
    pub reason: String,
    pub matched_rule: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorEvent {
    pub message: String,
    pub stop_reason: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_error: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryEvent {
    pub reason: String,
    pub attempt: u32,
    pub max_attempts: u32,
    pub delay_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoveryEvent {
    pub recovery_type: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultSubtype {
    Success,
    Interrupted,
    Error,
}

/// Token accounting accumulated over one logical turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSummary {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub step_count: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    pub subtype: ResultSubtype,
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    pub num_turns: u32,
    pub result: Option<String>,
    pub run_ids: Vec<String>,
    pub usage: UsageSummary,
}

/// Any line a host may write to the runtime's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    User(UserInput),
    ControlRequest(ControlRequest),
    ControlResponse(ControlResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInput {
    pub message: UserMessageBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_message_id: Option<String>,
}

impl UserInput {
    /// Flattens the message content into plain text.
    #[must_use]
    pub fn text(&self) -> String {
        self.message.content.text()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserMessageBody {
    #[serde(default = "default_user_role")]
    pub role: String,
    pub content: UserContent,
}

fn default_user_role() -> String {
    "user".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UserContent {
    Text(String),
    Parts(Vec<UserContentPart>),
}

impl UserContent {
    #[must_use]
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| part.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}
