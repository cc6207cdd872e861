use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

use crate::cancel::Cancelled;

#[derive(Debug, Error)]
pub enum AgentApiError {
    #[error("agent id is required")]
    MissingAgentId,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    #[error("HTTP {status} {message}")]
    Status { status: StatusCode, message: String },

    #[error("malformed stream chunk: {0}")]
    MalformedChunk(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("request was cancelled")]
    Cancelled,

    #[error("{0}")]
    Unknown(String),
}

impl From<Cancelled> for AgentApiError {
    fn from(_: Cancelled) -> Self {
        Self::Cancelled
    }
}

impl AgentApiError {
    /// Returns true for failures worth another attempt: connection-level
    /// errors and retryable HTTP statuses.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Request(error) => error.is_connect() || error.is_timeout() || error.is_body(),
            Self::Status { status, message } => {
                crate::retry::is_retryable_http_error(status.as_u16(), message)
            }
            _ => false,
        }
    }

    /// Returns the HTTP status when the failure came from a response.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status { status, .. } => Some(*status),
            Self::Request(error) => error.status(),
            _ => None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    detail: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<ErrorBodyFields>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBodyFields {
    Text(String),
    Object {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        detail: Option<String>,
    },
}

/// Extracts a human-readable message from an error response body.
///
/// Understands `{"detail": ...}`, `{"error": "..."}`, `{"error": {"message"}}`
/// and `{"message": ...}` shapes, then falls back to the raw body or the
/// status reason phrase.
pub fn parse_error_message(status: StatusCode, body: &str) -> String {
    if let Ok(parsed) = serde_json::from_str::<ErrorBody>(body) {
        let from_error = parsed.error.and_then(|error| match error {
            ErrorBodyFields::Text(text) => non_empty(text),
            ErrorBodyFields::Object { message, detail } => {
                message.and_then(non_empty).or_else(|| detail.and_then(non_empty))
            }
        });
        let from_detail = parsed.detail.and_then(|detail| match detail {
            serde_json::Value::String(text) => non_empty(text),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });

        if let Some(message) = from_detail
            .or(from_error)
            .or_else(|| parsed.message.and_then(non_empty))
        {
            return message;
        }
    }

    if body.trim().is_empty() {
        status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string()
    } else {
        body.to_string()
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.trim().is_empty() {
        None
    } else {
        Some(value)
    }
}
