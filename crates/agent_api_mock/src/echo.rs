use std::sync::atomic::{AtomicU64, Ordering};

use agent_api::{
    is_cancelled, AgentApiError, AgentTransport, ApprovalReply, CancelSignal, ChunkStream,
    ContentPart, InputMessage, StreamChunk, ToolReturnStatus, TurnRequest,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};

use crate::chunks;

/// User text starting with this prefix makes the echo agent request a
/// `Bash` call for the rest of the line.
pub const ECHO_BASH_PREFIX: &str = "!";

/// Minimal stand-in agent: echoes user text and asks for approval when a
/// message starts with [`ECHO_BASH_PREFIX`].
#[derive(Debug, Default)]
pub struct EchoAgent {
    runs: AtomicU64,
}

impl EchoAgent {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn next_run_id(&self) -> String {
        let run = self.runs.fetch_add(1, Ordering::Relaxed) + 1;
        format!("mock-run-{run}")
    }

    fn respond(&self, request: &TurnRequest) -> Vec<Value> {
        let run_id = self.next_run_id();
        let mut out = Vec::new();

        if request.is_approval_only() {
            for reply in approval_replies(request) {
                out.push(chunks::assistant(&run_id, &describe_reply(reply)));
            }
            out.push(chunks::stop("end_turn"));
        } else {
            let text = user_text(request);
            match text.trim().strip_prefix(ECHO_BASH_PREFIX) {
                Some(command) if !command.trim().is_empty() => {
                    let arguments = json!({ "command": command.trim() }).to_string();
                    let call_id = format!("{run_id}-call-1");
                    out.push(chunks::approval_request(&run_id, &call_id, Some("Bash"), &arguments));
                    out.push(chunks::stop("requires_approval"));
                }
                _ => {
                    out.push(chunks::assistant(&run_id, &format!("Echo: {text}")));
                    out.push(chunks::stop("end_turn"));
                }
            }
        }

        let prompt_tokens = u64::try_from(user_text(request).len()).unwrap_or(u64::MAX);
        out.push(chunks::usage(prompt_tokens, 8));
        out.into_iter()
            .enumerate()
            .map(|(index, chunk)| chunks::with_seq(chunk, index as u64 + 1))
            .collect()
    }
}

fn user_text(request: &TurnRequest) -> String {
    request
        .messages
        .iter()
        .filter_map(|message| match message {
            InputMessage::Message { content, .. } => Some(content),
            InputMessage::Approval { .. } => None,
        })
        .flatten()
        .map(|part| match part {
            ContentPart::Text { text } => text.as_str(),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn approval_replies(request: &TurnRequest) -> impl Iterator<Item = &ApprovalReply> {
    request.messages.iter().flat_map(|message| match message {
        InputMessage::Approval { approvals } => &approvals[..],
        InputMessage::Message { .. } => &[][..],
    })
}

fn describe_reply(reply: &ApprovalReply) -> String {
    match reply {
        ApprovalReply::Approval { tool_call_id, reason, .. } => format!(
            "Tool call {tool_call_id} was denied: {}",
            reason.as_deref().unwrap_or("no reason given")
        ),
        ApprovalReply::Tool {
            tool_call_id,
            tool_return,
            status: ToolReturnStatus::Success,
            ..
        } => format!("Tool call {tool_call_id} returned: {tool_return}"),
        ApprovalReply::Tool {
            tool_call_id,
            tool_return,
            status: ToolReturnStatus::Error,
            ..
        } => format!("Tool call {tool_call_id} failed: {tool_return}"),
    }
}

#[async_trait]
impl AgentTransport for EchoAgent {
    async fn send(
        &self,
        request: TurnRequest,
        cancel: &CancelSignal,
    ) -> Result<ChunkStream, AgentApiError> {
        if is_cancelled(cancel) {
            return Err(AgentApiError::Cancelled);
        }

        let chunks = self.respond(&request);
        Ok(stream::iter(
            chunks
                .into_iter()
                .map(|chunk| Ok(StreamChunk::from_value(chunk))),
        )
        .boxed())
    }
}
