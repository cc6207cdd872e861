//! Inbound line parsing and host round-trips for `can_use_tool` requests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use agent_wire::{
    ControlRequest, ControlRequestBody, ControlResponse, ControlResponseBody, InboundMessage,
    OutboundEvent, PermissionBehavior, PermissionReply,
};
use serde_json::Value;
use tokio::sync::oneshot;
use turn_engine::{EventSink, PendingApproval, PromptDecision};
use uuid::Uuid;

use crate::lock_unpoisoned;

/// Parses one stdin line in `stream-json` input format.
pub fn parse_inbound_line(line: &str) -> Result<InboundMessage, serde_json::Error> {
    serde_json::from_str(line.trim())
}

#[derive(Default)]
struct RouterState {
    pending: HashMap<String, oneshot::Sender<ControlResponseBody>>,
    closed: bool,
}

/// Removes a request from the pending map when its waiter goes away,
/// whether it was answered or its future was dropped by an interrupt.
struct PendingGuard<'a> {
    state: &'a Mutex<RouterState>,
    request_id: String,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        lock_unpoisoned(self.state).pending.remove(&self.request_id);
    }
}

/// Sends control requests to the host and matches its responses back to
/// the waiting caller by `request_id`.
pub struct ControlRouter {
    sink: Arc<dyn EventSink>,
    state: Mutex<RouterState>,
}

impl ControlRouter {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            state: Mutex::new(RouterState::default()),
        }
    }

    /// Asks the host whether a tool call may run. `None` when the host can
    /// no longer answer (input closed).
    pub async fn request_permission(
        &self,
        approval: &PendingApproval,
        input: &Value,
    ) -> Option<PromptDecision> {
        let request_id = format!("can_use_tool-{}", Uuid::new_v4());
        let (sender, receiver) = oneshot::channel();
        {
            let mut state = lock_unpoisoned(&self.state);
            if state.closed {
                return None;
            }
            state.pending.insert(request_id.clone(), sender);
        }
        let _guard = PendingGuard {
            state: &self.state,
            request_id: request_id.clone(),
        };

        tracing::info!(%request_id, tool = %approval.tool_name, "asking host for permission");
        self.sink
            .emit(OutboundEvent::ControlRequest(ControlRequest {
                request_id,
                request: ControlRequestBody::CanUseTool {
                    tool_name: approval.tool_name.clone(),
                    tool_call_id: approval.tool_call_id.clone(),
                    input: input.clone(),
                    reason: None,
                },
            }));

        let body = receiver.await.ok()?;
        Some(permission_decision(body))
    }

    /// Delivers a host response. Returns false when nothing was waiting
    /// for it.
    pub fn resolve(&self, response: ControlResponse) -> bool {
        let sender = lock_unpoisoned(&self.state)
            .pending
            .remove(&response.request_id);
        match sender {
            Some(sender) => sender.send(response.response).is_ok(),
            None => {
                tracing::debug!(request_id = %response.request_id, "unmatched control response");
                false
            }
        }
    }

    /// Fails every outstanding request and refuses new ones.
    pub fn close(&self) {
        let mut state = lock_unpoisoned(&self.state);
        state.closed = true;
        state.pending.clear();
    }

    pub fn has_pending(&self) -> bool {
        !lock_unpoisoned(&self.state).pending.is_empty()
    }
}

fn permission_decision(body: ControlResponseBody) -> PromptDecision {
    match body {
        ControlResponseBody::Success { response } => {
            match serde_json::from_value::<PermissionReply>(response) {
                Ok(PermissionReply {
                    behavior: PermissionBehavior::Allow,
                    ..
                }) => PromptDecision::Allow,
                Ok(PermissionReply {
                    behavior: PermissionBehavior::Deny,
                    message,
                }) => PromptDecision::Deny {
                    reason: message.unwrap_or_else(|| "Denied by host".to_string()),
                },
                Err(error) => {
                    tracing::warn!(%error, "unreadable permission reply");
                    PromptDecision::Deny {
                        reason: format!("Host sent an unreadable permission reply: {error}"),
                    }
                }
            }
        }
        ControlResponseBody::Error { error } => PromptDecision::Deny {
            reason: format!("Host rejected the permission request: {error}"),
        },
    }
}
