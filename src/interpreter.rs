use std::collections::HashMap;

use agent_api::retry::is_approval_desync;
use agent_api::{ChunkKind, StopReason, StreamChunk, ToolCallDelta, UsageStatistics};
use serde_json::{json, Value};

/// A tool call waiting for a local allow/deny decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingApproval {
    pub tool_call_id: String,
    pub tool_name: String,
    /// Raw argument text, concatenated from every fragment seen so far.
    pub tool_args: String,
}

/// Error surfaced by a chunk of the active request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorInfo {
    pub message: String,
    pub error_type: Option<String>,
    pub detail: Option<String>,
    pub run_id: Option<String>,
    /// The server had no pending approval to apply our reply to.
    pub is_approval_desync: bool,
}

impl ErrorInfo {
    /// Message and detail joined, for pattern matching.
    pub fn full_text(&self) -> String {
        match &self.detail {
            Some(detail) if !detail.is_empty() => format!("{} {}", self.message, detail),
            _ => self.message.clone(),
        }
    }

    pub fn to_json(&self) -> Value {
        json!({
            "message": self.message,
            "error_type": self.error_type,
            "detail": self.detail,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkOutcome {
    pub should_output: bool,
    pub error: Option<ErrorInfo>,
}

impl ChunkOutcome {
    fn forward() -> Self {
        Self {
            should_output: true,
            error: None,
        }
    }

    fn suppress() -> Self {
        Self::default()
    }
}

/// Per-request chunk classifier. Create one for every request sent; state
/// never carries over between requests.
#[derive(Debug, Default)]
pub struct ChunkInterpreter {
    run_ids: Vec<String>,
    last_run_id: Option<String>,
    last_seq_id: Option<u64>,
    stop_reason: Option<StopReason>,
    approvals: HashMap<String, PendingApproval>,
    approval_order: Vec<String>,
    last_approval_id: Option<String>,
    errors: Vec<ErrorInfo>,
    usage: UsageStatistics,
    assistant_text: String,
}

impl ChunkInterpreter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process(&mut self, chunk: &StreamChunk) -> ChunkOutcome {
        if let Some(run_id) = chunk.run_id() {
            if !self.run_ids.iter().any(|known| known == run_id) {
                self.run_ids.push(run_id.to_string());
            }
            self.last_run_id = Some(run_id.to_string());
        }
        if let Some(seq_id) = chunk.seq_id() {
            self.last_seq_id = Some(seq_id);
        }

        match chunk.kind() {
            ChunkKind::Ping => ChunkOutcome::suppress(),
            ChunkKind::Error {
                message,
                error_type,
                detail,
            } => self.record_error(message, error_type.clone(), detail.clone(), chunk.run_id()),
            ChunkKind::BareError { message, detail } => {
                self.record_error(message, None, detail.clone(), chunk.run_id())
            }
            ChunkKind::ApprovalRequest { tool_calls } => {
                for delta in tool_calls {
                    self.accumulate(delta);
                }
                ChunkOutcome::forward()
            }
            ChunkKind::ToolReturn { tool_call_ids, .. } => {
                for id in tool_call_ids {
                    if self.approvals.remove(id).is_some() {
                        self.approval_order.retain(|known| known != id);
                        tracing::debug!(tool_call_id = %id, "server executed pending approval");
                    }
                }
                ChunkOutcome::forward()
            }
            ChunkKind::StopReason { stop_reason } => {
                self.stop_reason = Some(*stop_reason);
                ChunkOutcome::forward()
            }
            ChunkKind::UsageStatistics { usage } => {
                self.usage.prompt_tokens += usage.prompt_tokens;
                self.usage.completion_tokens += usage.completion_tokens;
                self.usage.total_tokens += usage.total_tokens;
                self.usage.step_count += usage.step_count;
                ChunkOutcome::forward()
            }
            ChunkKind::AssistantMessage { content } => {
                self.assistant_text.push_str(content);
                ChunkOutcome::forward()
            }
            ChunkKind::ReasoningMessage
            | ChunkKind::ToolCallMessage { .. }
            | ChunkKind::Other { .. } => ChunkOutcome::forward(),
        }
    }

    fn record_error(
        &mut self,
        message: &str,
        error_type: Option<String>,
        detail: Option<String>,
        run_id: Option<&str>,
    ) -> ChunkOutcome {
        let desync = is_approval_desync(message)
            || detail.as_deref().is_some_and(is_approval_desync);
        let info = ErrorInfo {
            message: message.to_string(),
            error_type,
            detail,
            run_id: run_id.map(ToString::to_string).or_else(|| self.last_run_id.clone()),
            is_approval_desync: desync,
        };

        if desync {
            tracing::debug!(message = %info.message, "suppressing approval desync error chunk");
        } else {
            tracing::warn!(message = %info.message, "error chunk in stream");
        }

        self.errors.push(info.clone());
        ChunkOutcome {
            should_output: !desync,
            error: Some(info),
        }
    }

    fn accumulate(&mut self, delta: &ToolCallDelta) {
        let Some(id) = delta
            .tool_call_id
            .clone()
            .or_else(|| self.last_approval_id.clone())
        else {
            tracing::warn!("approval fragment without a tool call id");
            return;
        };

        if !self.approvals.contains_key(&id) {
            self.approval_order.push(id.clone());
        }
        let entry = self
            .approvals
            .entry(id.clone())
            .or_insert_with(|| PendingApproval {
                tool_call_id: id.clone(),
                tool_name: String::new(),
                tool_args: String::new(),
            });

        if entry.tool_name.is_empty() {
            if let Some(name) = &delta.name {
                entry.tool_name = name.clone();
            }
        }
        if let Some(arguments) = &delta.arguments {
            entry.tool_args.push_str(arguments);
        }

        self.last_approval_id = Some(id);
    }

    /// Pending approvals in first-seen order.
    pub fn pending_approvals(&self) -> Vec<PendingApproval> {
        self.approval_order
            .iter()
            .filter_map(|id| self.approvals.get(id).cloned())
            .collect()
    }

    pub fn stop_reason(&self) -> Option<StopReason> {
        self.stop_reason
    }

    pub fn run_ids(&self) -> &[String] {
        &self.run_ids
    }

    pub fn last_run_id(&self) -> Option<&str> {
        self.last_run_id.as_deref()
    }

    pub fn last_seq_id(&self) -> Option<u64> {
        self.last_seq_id
    }

    pub fn errors(&self) -> &[ErrorInfo] {
        &self.errors
    }

    pub fn last_error(&self) -> Option<&ErrorInfo> {
        self.errors.last()
    }

    pub fn saw_approval_desync(&self) -> bool {
        self.errors.iter().any(|error| error.is_approval_desync)
    }

    pub fn usage(&self) -> UsageStatistics {
        self.usage
    }

    pub fn assistant_text(&self) -> &str {
        &self.assistant_text
    }
}
