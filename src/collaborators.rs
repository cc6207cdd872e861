//! Seams between the engine and the host that embeds it.

use std::sync::Mutex;

use agent_api::{CancelSignal, ToolReturnStatus};
use agent_wire::OutboundEvent;
use async_trait::async_trait;
use serde_json::Value;

use crate::interpreter::PendingApproval;
use crate::lock_unpoisoned;

/// Receives every event the queue and orchestrator produce, in order.
///
/// `emit` may be called while the queue holds its internal lock, so an
/// implementation must not call back into the queue.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OutboundEvent);
}

impl<F> EventSink for F
where
    F: Fn(OutboundEvent) + Send + Sync,
{
    fn emit(&self, event: OutboundEvent) {
        self(event);
    }
}

/// Discards every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl EventSink for NullSink {
    fn emit(&self, _event: OutboundEvent) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<OutboundEvent>>,
}

impl RecordingSink {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        lock_unpoisoned(&self.events).clone()
    }

    pub fn take(&self) -> Vec<OutboundEvent> {
        std::mem::take(&mut *lock_unpoisoned(&self.events))
    }

    /// Wire `type` tags of the recorded events, in order.
    pub fn type_names(&self) -> Vec<&'static str> {
        lock_unpoisoned(&self.events)
            .iter()
            .map(OutboundEvent::type_name)
            .collect()
    }
}

impl EventSink for RecordingSink {
    fn emit(&self, event: OutboundEvent) {
        lock_unpoisoned(&self.events).push(event);
    }
}

/// Result of matching one tool call against the permission rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionVerdict {
    Allow { matched_rule: Option<String> },
    Deny { reason: String },
    Ask { reason: Option<String> },
}

/// Answer from an interactive approver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PromptDecision {
    Allow,
    Deny { reason: String },
}

#[async_trait]
pub trait PermissionGate: Send + Sync {
    fn check(&self, tool_name: &str, args: &Value) -> PermissionVerdict;

    /// Asks an interactive approver about a call the rules left undecided.
    /// `None` means nobody can be asked.
    async fn prompt(&self, _approval: &PendingApproval, _args: &Value) -> Option<PromptDecision> {
        None
    }
}

/// A call cleared for local execution, with parsed arguments.
#[derive(Debug, Clone, PartialEq)]
pub struct ApprovedCall {
    pub tool_call_id: String,
    pub tool_name: String,
    pub args: Value,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub status: ToolReturnStatus,
    pub output: String,
    pub stdout: Option<Vec<String>>,
    pub stderr: Option<Vec<String>>,
}

impl ToolExecution {
    pub fn success(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolReturnStatus::Success,
            output: output.into(),
            stdout: None,
            stderr: None,
        }
    }

    pub fn error(tool_call_id: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            status: ToolReturnStatus::Error,
            output: output.into(),
            stdout: None,
            stderr: None,
        }
    }
}

/// Runs approved tool calls locally. Returns one execution per call; a
/// call missing from the result is reported to the agent as an error.
#[async_trait]
pub trait ExecutionBatch: Send + Sync {
    async fn execute(&self, calls: Vec<ApprovedCall>, cancel: &CancelSignal) -> Vec<ToolExecution>;
}

/// Declared tool input schemas, used to reject calls with missing fields.
pub trait ToolCatalog: Send + Sync {
    fn input_schema(&self, tool_name: &str) -> Option<Value>;

    fn tool_names(&self) -> Vec<String>;
}

/// Final decision for one pending approval.
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Approve {
        approval: PendingApproval,
        args: Value,
        matched_rule: Option<String>,
        reason: String,
    },
    Deny {
        approval: PendingApproval,
        reason: String,
    },
}

impl Decision {
    pub fn approval(&self) -> &PendingApproval {
        match self {
            Self::Approve { approval, .. } | Self::Deny { approval, .. } => approval,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve { .. })
    }
}
