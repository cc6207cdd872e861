use agent_api::{await_or_cancel, ApprovalReply, CancelSignal, Cancelled};
use agent_wire::{AutoApprovalEvent, OutboundEvent, ToolCallSummary};
use serde_json::{Map, Value};

use super::TurnOrchestrator;
use crate::collaborators::{ApprovedCall, Decision, PermissionVerdict, PromptDecision};
use crate::interpreter::PendingApproval;

impl TurnOrchestrator {
    /// Decides every pending approval, executes the approved ones, and
    /// returns one reply per approval in the order they were received.
    pub(super) async fn resolve_approvals(
        &self,
        approvals: Vec<PendingApproval>,
        cancel: &CancelSignal,
    ) -> Result<Vec<ApprovalReply>, Cancelled> {
        let mut decisions = Vec::with_capacity(approvals.len());
        for approval in approvals {
            decisions.push(self.decide(approval, cancel).await?);
        }

        let approved: Vec<ApprovedCall> = decisions
            .iter()
            .filter_map(|decision| match decision {
                Decision::Approve { approval, args, .. } => Some(ApprovedCall {
                    tool_call_id: approval.tool_call_id.clone(),
                    tool_name: approval.tool_name.clone(),
                    args: args.clone(),
                }),
                Decision::Deny { .. } => None,
            })
            .collect();

        let mut executions = if approved.is_empty() {
            Vec::new()
        } else {
            tracing::info!(count = approved.len(), "executing approved tool calls");
            await_or_cancel(self.executor.execute(approved, cancel), cancel).await?
        };

        let replies = decisions
            .into_iter()
            .map(|decision| match decision {
                Decision::Deny { approval, reason } => {
                    ApprovalReply::deny(approval.tool_call_id, reason)
                }
                Decision::Approve { approval, .. } => {
                    let position = executions
                        .iter()
                        .position(|execution| execution.tool_call_id == approval.tool_call_id);
                    match position.map(|index| executions.swap_remove(index)) {
                        Some(execution) => ApprovalReply::Tool {
                            tool_call_id: execution.tool_call_id,
                            tool_return: execution.output,
                            status: execution.status,
                            stdout: execution.stdout,
                            stderr: execution.stderr,
                        },
                        None => ApprovalReply::Tool {
                            tool_call_id: approval.tool_call_id,
                            tool_return: "Tool execution produced no result".to_string(),
                            status: agent_api::ToolReturnStatus::Error,
                            stdout: None,
                            stderr: None,
                        },
                    }
                }
            })
            .collect();

        Ok(replies)
    }

    pub(super) async fn decide(
        &self,
        approval: PendingApproval,
        cancel: &CancelSignal,
    ) -> Result<Decision, Cancelled> {
        let args = match parse_tool_args(&approval.tool_args) {
            Ok(args) => args,
            Err(reason) => {
                tracing::info!(tool = %approval.tool_name, %reason, "denying unparseable tool call");
                return Ok(Decision::Deny { approval, reason });
            }
        };

        if let Some(schema) = self.catalog.input_schema(&approval.tool_name) {
            let missing = missing_required_fields(&schema, &args);
            if !missing.is_empty() {
                let reason = format!("Missing required parameter(s): {}", missing.join(", "));
                tracing::info!(tool = %approval.tool_name, %reason, "denying incomplete tool call");
                return Ok(Decision::Deny { approval, reason });
            }
        }

        let decision = match self.permissions.check(&approval.tool_name, &args) {
            PermissionVerdict::Allow { matched_rule } => {
                let reason = match &matched_rule {
                    Some(rule) => format!("Allowed by rule {rule}"),
                    None => "Allowed by permission mode".to_string(),
                };
                self.sink.emit(OutboundEvent::AutoApproval(AutoApprovalEvent {
                    tool_call: ToolCallSummary {
                        tool_call_id: approval.tool_call_id.clone(),
                        name: approval.tool_name.clone(),
                        arguments: approval.tool_args.clone(),
                    },
                    reason: reason.clone(),
                    matched_rule: matched_rule.clone(),
                }));
                Decision::Approve {
                    approval,
                    args,
                    matched_rule,
                    reason,
                }
            }
            PermissionVerdict::Deny { reason } => Decision::Deny { approval, reason },
            PermissionVerdict::Ask { reason } => {
                let answer =
                    await_or_cancel(self.permissions.prompt(&approval, &args), cancel).await?;
                match answer {
                    Some(PromptDecision::Allow) => Decision::Approve {
                        approval,
                        args,
                        matched_rule: None,
                        reason: "Approved by user".to_string(),
                    },
                    Some(PromptDecision::Deny { reason }) => Decision::Deny { approval, reason },
                    None => {
                        let reason = format!(
                            "Tool {} requires approval{}, but no interactive approver is available. \
                             Ask the user to allow it or try a different approach.",
                            approval.tool_name,
                            reason.map(|why| format!(" ({why})")).unwrap_or_default()
                        );
                        Decision::Deny { approval, reason }
                    }
                }
            }
        };

        tracing::info!(
            tool = %decision.approval().tool_name,
            tool_call_id = %decision.approval().tool_call_id,
            approved = decision.is_approved(),
            "resolved approval"
        );
        Ok(decision)
    }
}

/// Parses accumulated argument text. Empty text means no arguments.
pub(crate) fn parse_tool_args(raw: &str) -> Result<Value, String> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Map::new()));
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(value @ Value::Object(_)) => Ok(value),
        Ok(_) => Err("Tool arguments must be a JSON object".to_string()),
        Err(error) => Err(format!("Failed to parse tool arguments: {error}")),
    }
}

/// Names listed in the schema's `required` array that are absent or null.
pub(crate) fn missing_required_fields(schema: &Value, args: &Value) -> Vec<String> {
    let Some(required) = schema.get("required").and_then(Value::as_array) else {
        return Vec::new();
    };

    required
        .iter()
        .filter_map(Value::as_str)
        .filter(|field| args.get(*field).map_or(true, Value::is_null))
        .map(ToString::to_string)
        .collect()
}
