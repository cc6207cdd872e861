use serde::{Deserialize, Serialize};

/// Request body for one streamed turn request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRequest {
    pub messages: Vec<InputMessage>,
    /// Default: true.
    #[serde(default = "default_true")]
    pub stream_tokens: bool,
    /// Default: true. Keeps long server-side steps from idling out proxies.
    #[serde(default = "default_true")]
    pub include_pings: bool,
}

fn default_true() -> bool {
    true
}

impl TurnRequest {
    pub fn new(messages: Vec<InputMessage>) -> Self {
        Self {
            messages,
            stream_tokens: true,
            include_pings: true,
        }
    }

    /// Single user message with one text part.
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::new(vec![InputMessage::user_text(text)])
    }

    /// Approval-resolution request carrying one reply per tool call.
    pub fn approvals(replies: Vec<ApprovalReply>) -> Self {
        Self::new(vec![InputMessage::Approval { approvals: replies }])
    }

    /// True when every message is an approval reply (no fresh user content).
    pub fn is_approval_only(&self) -> bool {
        !self.messages.is_empty()
            && self
                .messages
                .iter()
                .all(|message| matches!(message, InputMessage::Approval { .. }))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageRole {
    User,
    System,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InputMessage {
    Message {
        role: MessageRole,
        content: Vec<ContentPart>,
    },
    Approval {
        approvals: Vec<ApprovalReply>,
    },
}

impl InputMessage {
    pub fn user_text(text: impl Into<String>) -> Self {
        Self::Message {
            role: MessageRole::User,
            content: vec![ContentPart::Text { text: text.into() }],
        }
    }

    pub fn user_parts(parts: Vec<ContentPart>) -> Self {
        Self::Message {
            role: MessageRole::User,
            content: parts,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    Text { text: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolReturnStatus {
    Success,
    Error,
}

/// Client answer for one pending approval.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ApprovalReply {
    /// Decision without a local result (used for denials).
    Approval {
        tool_call_id: String,
        approve: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    /// Locally executed tool result.
    Tool {
        tool_call_id: String,
        tool_return: String,
        status: ToolReturnStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stderr: Option<Vec<String>>,
    },
}

impl ApprovalReply {
    pub fn deny(tool_call_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Approval {
            tool_call_id: tool_call_id.into(),
            approve: false,
            reason: Some(reason.into()),
        }
    }

    pub fn tool_call_id(&self) -> &str {
        match self {
            Self::Approval { tool_call_id, .. } | Self::Tool { tool_call_id, .. } => tool_call_id,
        }
    }

    pub fn is_denial(&self) -> bool {
        matches!(self, Self::Approval { approve: false, .. })
    }
}
