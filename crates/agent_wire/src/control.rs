use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Request in either direction that expects a matching [`ControlResponse`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlRequest {
    pub request_id: String,
    pub request: ControlRequestBody,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlRequestBody {
    Initialize,
    Interrupt,
    /// Runtime asks the embedding host whether a tool call may run.
    CanUseTool {
        tool_name: String,
        tool_call_id: String,
        input: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ControlResponse {
    pub request_id: String,
    pub response: ControlResponseBody,
}

impl ControlResponse {
    #[must_use]
    pub fn success(request_id: impl Into<String>, response: Value) -> Self {
        Self {
            request_id: request_id.into(),
            response: ControlResponseBody::Success { response },
        }
    }

    #[must_use]
    pub fn error(request_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            request_id: request_id.into(),
            response: ControlResponseBody::Error {
                error: error.into(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum ControlResponseBody {
    Success {
        #[serde(default, skip_serializing_if = "Value::is_null")]
        response: Value,
    },
    Error {
        error: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PermissionBehavior {
    Allow,
    Deny,
}

/// Host answer to a `can_use_tool` request, carried in a success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PermissionReply {
    pub behavior: PermissionBehavior,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
