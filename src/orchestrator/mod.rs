//! The turn control loop.
//!
//! One call to [`TurnOrchestrator::run_turn`] is one logical turn: it sends
//! the dequeued batch, then keeps sending follow-up requests (approval
//! replies, retries, recovery messages) until the agent ends the turn, the
//! shared retry budget runs out, a non-retriable stop reason arrives, or
//! the caller cancels.

mod approvals;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use agent_api::retry::{is_approval_desync, is_provider_error, retry_delay, DEFAULT_MAX_RETRIES};
use agent_api::{
    await_or_cancel, is_cancelled, AgentApiError, AgentTransport, CancelSignal, StopReason,
    TurnRequest,
};
use agent_wire::{
    ErrorEvent, MessageEvent, OutboundEvent, RecoveryEvent, ResultEvent, ResultSubtype,
    RetryEvent, UsageSummary,
};
use futures_util::StreamExt;

use crate::collaborators::{EventSink, ExecutionBatch, PermissionGate, ToolCatalog};
use crate::error::EngineError;
use crate::interpreter::{ChunkInterpreter, ErrorInfo};
use crate::lock_unpoisoned;
use crate::queue::DequeuedBatch;

/// Sent in place of a stale approval reply when the server reports that no
/// approval is pending.
pub const DEFAULT_KEEP_GOING_MESSAGE: &str =
    "The previous approval response could not be applied. Please continue.";

const RECOVERY_APPROVAL_DESYNC: &str = "approval_desync";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Total retries plus recoveries allowed in one logical turn.
    pub max_retries: u32,
    pub keep_going_message: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            keep_going_message: DEFAULT_KEEP_GOING_MESSAGE.to_string(),
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    #[must_use]
    pub fn with_keep_going_message(mut self, message: impl Into<String>) -> Self {
        self.keep_going_message = message.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnPhase {
    Idle,
    Streaming,
    ResolvingApprovals,
    Retrying,
    Recovering,
    Terminated,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    Success,
    Interrupted,
    Failed {
        message: String,
        stop_reason: Option<StopReason>,
        run_id: Option<String>,
    },
}

impl TurnOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    pub fn result_subtype(&self) -> ResultSubtype {
        match self {
            Self::Success => ResultSubtype::Success,
            Self::Interrupted => ResultSubtype::Interrupted,
            Self::Failed { .. } => ResultSubtype::Error,
        }
    }
}

/// Totals for one logical turn, across every request it sent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TurnSummary {
    pub duration_ms: u64,
    pub duration_api_ms: u64,
    /// Requests sent, including approval follow-ups, retries and recoveries.
    pub num_turns: u32,
    /// Assistant text of the last request.
    pub result: Option<String>,
    pub run_ids: Vec<String>,
    pub usage: UsageSummary,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub summary: TurnSummary,
}

#[derive(Default)]
struct TurnContext {
    attempts: u32,
    requests: u32,
    api_time: Duration,
    run_ids: Vec<String>,
    usage: UsageSummary,
    last_text: String,
    last_run_id: Option<String>,
}

impl TurnContext {
    fn absorb(&mut self, interpreter: &ChunkInterpreter) {
        for run_id in interpreter.run_ids() {
            if !self.run_ids.contains(run_id) {
                self.run_ids.push(run_id.clone());
            }
        }
        if let Some(run_id) = interpreter.last_run_id() {
            self.last_run_id = Some(run_id.to_string());
        }

        let usage = interpreter.usage();
        self.usage.prompt_tokens += usage.prompt_tokens;
        self.usage.completion_tokens += usage.completion_tokens;
        self.usage.total_tokens += usage.total_tokens;
        self.usage.step_count += usage.step_count;
        self.last_text = interpreter.assistant_text().to_string();
    }
}

enum StreamStep {
    Cancelled,
    SendFailed(AgentApiError),
    Finished {
        interpreter: ChunkInterpreter,
        stream_error: Option<AgentApiError>,
    },
}

enum Backoff {
    Proceed,
    Exhausted,
    Cancelled,
}

struct Failure {
    message: String,
    stop_reason: Option<StopReason>,
    api_error: Option<serde_json::Value>,
}

/// Resets the single-turn flag and phase when a turn ends, however it ends.
struct ActiveTurn<'a> {
    active: &'a AtomicBool,
    phase: &'a Mutex<TurnPhase>,
}

impl Drop for ActiveTurn<'_> {
    fn drop(&mut self) {
        *lock_unpoisoned(self.phase) = TurnPhase::Idle;
        self.active.store(false, Ordering::Release);
    }
}

pub struct TurnOrchestrator {
    transport: Arc<dyn AgentTransport>,
    permissions: Arc<dyn PermissionGate>,
    executor: Arc<dyn ExecutionBatch>,
    catalog: Arc<dyn ToolCatalog>,
    sink: Arc<dyn EventSink>,
    config: OrchestratorConfig,
    active: AtomicBool,
    phase: Mutex<TurnPhase>,
}

impl TurnOrchestrator {
    pub fn new(
        transport: Arc<dyn AgentTransport>,
        permissions: Arc<dyn PermissionGate>,
        executor: Arc<dyn ExecutionBatch>,
        catalog: Arc<dyn ToolCatalog>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            transport,
            permissions,
            executor,
            catalog,
            sink,
            config: OrchestratorConfig::default(),
            active: AtomicBool::new(false),
            phase: Mutex::new(TurnPhase::Idle),
        }
    }

    #[must_use]
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    pub fn phase(&self) -> TurnPhase {
        *lock_unpoisoned(&self.phase)
    }

    pub fn is_turn_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    fn set_phase(&self, phase: TurnPhase) {
        let mut current = lock_unpoisoned(&self.phase);
        if *current != phase {
            tracing::debug!(from = ?*current, to = ?phase, "turn phase");
            *current = phase;
        }
    }

    fn begin_turn(&self) -> Result<ActiveTurn<'_>, EngineError> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(EngineError::TurnInProgress);
        }
        Ok(ActiveTurn {
            active: &self.active,
            phase: &self.phase,
        })
    }

    /// Runs one logical turn for `batch` and emits its `result` event.
    pub async fn run_turn(
        &self,
        batch: DequeuedBatch,
        cancel: &CancelSignal,
    ) -> Result<TurnReport, EngineError> {
        if batch.items.is_empty() {
            return Err(EngineError::EmptyBatch);
        }
        let request = batch.to_request();
        if request.messages.is_empty() {
            return Err(EngineError::EmptyBatch);
        }

        let _active = self.begin_turn()?;
        tracing::info!(batch = %batch.batch_id, items = batch.merged_count, "turn started");
        let started = Instant::now();
        let mut ctx = TurnContext::default();

        let outcome = match self.drive(request, cancel, &mut ctx).await {
            Ok(()) => TurnOutcome::Success,
            Err(None) => TurnOutcome::Interrupted,
            Err(Some(failure)) => {
                let run_id = ctx.last_run_id.clone();
                self.sink.emit(OutboundEvent::Error(ErrorEvent {
                    message: failure.message.clone(),
                    stop_reason: failure
                        .stop_reason
                        .map_or("error", |reason| reason.as_str())
                        .to_string(),
                    run_id: run_id.clone(),
                    api_error: failure.api_error,
                }));
                TurnOutcome::Failed {
                    message: failure.message,
                    stop_reason: failure.stop_reason,
                    run_id,
                }
            }
        };
        self.set_phase(TurnPhase::Terminated);

        let summary = TurnSummary {
            duration_ms: millis(started.elapsed()),
            duration_api_ms: millis(ctx.api_time),
            num_turns: ctx.requests,
            result: Some(ctx.last_text).filter(|text| !text.is_empty()),
            run_ids: ctx.run_ids,
            usage: ctx.usage,
        };
        self.sink.emit(OutboundEvent::Result(ResultEvent {
            subtype: outcome.result_subtype(),
            duration_ms: summary.duration_ms,
            duration_api_ms: summary.duration_api_ms,
            num_turns: summary.num_turns,
            result: summary.result.clone(),
            run_ids: summary.run_ids.clone(),
            usage: summary.usage,
        }));
        tracing::info!(outcome = ?outcome, requests = summary.num_turns, "turn finished");

        Ok(TurnReport { outcome, summary })
    }

    /// `Err(None)` means the caller cancelled.
    async fn drive(
        &self,
        mut request: TurnRequest,
        cancel: &CancelSignal,
        ctx: &mut TurnContext,
    ) -> Result<(), Option<Failure>> {
        loop {
            if is_cancelled(cancel) {
                return Err(None);
            }

            self.set_phase(TurnPhase::Streaming);
            let approval_only = request.is_approval_only();
            let (interpreter, stream_error) =
                match self.stream_request(request.clone(), cancel, ctx).await {
                    StreamStep::Cancelled => return Err(None),
                    StreamStep::SendFailed(error) => {
                        let text = error.to_string();
                        if approval_only && is_approval_desync(&text) {
                            request = self.recover(ctx, &text)?;
                        } else if error.is_transient() {
                            self.retry(ctx, "transport_error", None, &text, cancel).await?;
                        } else {
                            return Err(Some(Failure {
                                message: text,
                                stop_reason: None,
                                api_error: None,
                            }));
                        }
                        continue;
                    }
                    StreamStep::Finished {
                        interpreter,
                        stream_error,
                    } => (interpreter, stream_error),
                };

            match interpreter.stop_reason() {
                Some(StopReason::EndTurn) => return Ok(()),
                Some(StopReason::RequiresApproval) => {
                    let approvals = interpreter.pending_approvals();
                    if approvals.is_empty() {
                        return Err(Some(Failure {
                            message: "Agent requested approval but sent no pending tool calls"
                                .to_string(),
                            stop_reason: Some(StopReason::RequiresApproval),
                            api_error: None,
                        }));
                    }

                    self.set_phase(TurnPhase::ResolvingApprovals);
                    let replies = self
                        .resolve_approvals(approvals, cancel)
                        .await
                        .map_err(|_| None::<Failure>)?;
                    request = TurnRequest::approvals(replies);
                }
                Some(StopReason::LlmApiError) => {
                    let detail = interpreter
                        .last_error()
                        .map(ErrorInfo::full_text)
                        .unwrap_or_else(|| "LLM API error".to_string());
                    let reason = StopReason::LlmApiError;
                    self.retry(ctx, reason.as_str(), Some(reason), &detail, cancel)
                        .await?;
                }
                Some(StopReason::Cancelled) if is_cancelled(cancel) => return Err(None),
                Some(reason) if reason.is_terminal_failure() => {
                    return Err(Some(Failure {
                        message: interpreter
                            .last_error()
                            .map(ErrorInfo::full_text)
                            .unwrap_or_else(|| format!("Turn stopped: {}", reason.as_str())),
                        stop_reason: Some(reason),
                        api_error: interpreter.last_error().map(ErrorInfo::to_json),
                    }));
                }
                _ => {
                    let stream_text = stream_error.as_ref().map(ToString::to_string);
                    let desync = interpreter.saw_approval_desync()
                        || stream_text.as_deref().is_some_and(is_approval_desync);

                    if approval_only && desync {
                        let message = interpreter
                            .errors()
                            .iter()
                            .find(|error| error.is_approval_desync)
                            .map(|error| error.message.clone())
                            .or(stream_text)
                            .unwrap_or_default();
                        request = self.recover(ctx, &message)?;
                        continue;
                    }

                    match self
                        .classify_generic_error(&interpreter, stream_error.as_ref())
                        .await
                    {
                        Some(reason) => {
                            self.retry(ctx, "provider_error", Some(StopReason::Error), &reason, cancel)
                                .await?;
                        }
                        None => {
                            let message = interpreter
                                .last_error()
                                .map(ErrorInfo::full_text)
                                .or(stream_text)
                                .unwrap_or_else(|| match interpreter.stop_reason() {
                                    Some(reason) => format!("Turn stopped: {}", reason.as_str()),
                                    None => "Stream ended without a stop reason".to_string(),
                                });
                            return Err(Some(Failure {
                                message,
                                stop_reason: interpreter.stop_reason().or(Some(StopReason::Error)),
                                api_error: interpreter.last_error().map(ErrorInfo::to_json),
                            }));
                        }
                    }
                }
            }
        }
    }

    async fn stream_request(
        &self,
        request: TurnRequest,
        cancel: &CancelSignal,
        ctx: &mut TurnContext,
    ) -> StreamStep {
        ctx.requests += 1;
        let api_started = Instant::now();

        let sent = await_or_cancel(self.transport.send(request, cancel), cancel).await;
        let mut stream = match sent {
            Err(_) => {
                ctx.api_time += api_started.elapsed();
                return StreamStep::Cancelled;
            }
            Ok(Err(AgentApiError::Cancelled)) => {
                ctx.api_time += api_started.elapsed();
                return StreamStep::Cancelled;
            }
            Ok(Err(error)) => {
                ctx.api_time += api_started.elapsed();
                tracing::warn!(%error, "turn request failed before streaming");
                return StreamStep::SendFailed(error);
            }
            Ok(Ok(stream)) => stream,
        };

        let mut interpreter = ChunkInterpreter::new();
        let mut stream_error = None;
        let cancelled = loop {
            match await_or_cancel(stream.next(), cancel).await {
                Err(_) => break true,
                Ok(None) => break false,
                Ok(Some(Err(error))) => {
                    tracing::warn!(%error, "stream ended with an error");
                    stream_error = Some(error);
                    break false;
                }
                Ok(Some(Ok(chunk))) => {
                    let outcome = interpreter.process(&chunk);
                    tracing::debug!(
                        message_type = chunk.message_type().unwrap_or("unknown"),
                        forwarded = outcome.should_output,
                        "chunk"
                    );
                    if outcome.should_output {
                        self.sink
                            .emit(OutboundEvent::Message(MessageEvent::from_chunk(chunk.into_raw())));
                    }
                }
            }
        };

        ctx.api_time += api_started.elapsed();
        ctx.absorb(&interpreter);

        if cancelled {
            let discarded = interpreter.pending_approvals().len();
            if discarded > 0 {
                tracing::info!(discarded, "cancelled with pending approvals; discarding");
            }
            return StreamStep::Cancelled;
        }

        StreamStep::Finished {
            interpreter,
            stream_error,
        }
    }

    /// Decides whether a generic failure looks like a provider or network
    /// problem. Returns the matching error text when it does.
    async fn classify_generic_error(
        &self,
        interpreter: &ChunkInterpreter,
        stream_error: Option<&AgentApiError>,
    ) -> Option<String> {
        if let Some(error) = stream_error {
            let text = error.to_string();
            if error.is_transient() || is_provider_error(&text) {
                return Some(text);
            }
        }

        if let Some(text) = interpreter
            .errors()
            .iter()
            .map(ErrorInfo::full_text)
            .find(|text| is_provider_error(text))
        {
            return Some(text);
        }

        let run_id = interpreter.last_run_id()?;
        match self.transport.run_metadata(run_id).await {
            Ok(Some(run)) => run.error_text().filter(|text| is_provider_error(text)),
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(%error, run_id, "run metadata lookup failed");
                None
            }
        }
    }

    async fn retry(
        &self,
        ctx: &mut TurnContext,
        reason: &str,
        stop_reason: Option<StopReason>,
        detail: &str,
        cancel: &CancelSignal,
    ) -> Result<(), Option<Failure>> {
        match self.back_off(ctx, reason, cancel).await {
            Backoff::Proceed => Ok(()),
            Backoff::Cancelled => Err(None),
            Backoff::Exhausted => Err(Some(Failure {
                message: format!(
                    "{detail} (giving up after {} retries)",
                    self.config.max_retries
                ),
                stop_reason,
                api_error: None,
            })),
        }
    }

    async fn back_off(&self, ctx: &mut TurnContext, reason: &str, cancel: &CancelSignal) -> Backoff {
        if ctx.attempts >= self.config.max_retries {
            return Backoff::Exhausted;
        }
        ctx.attempts += 1;
        let delay = retry_delay(ctx.attempts);

        self.set_phase(TurnPhase::Retrying);
        tracing::warn!(
            reason,
            attempt = ctx.attempts,
            max_attempts = self.config.max_retries,
            delay_ms = millis(delay),
            "retrying turn request"
        );
        self.sink.emit(OutboundEvent::Retry(RetryEvent {
            reason: reason.to_string(),
            attempt: ctx.attempts,
            max_attempts: self.config.max_retries,
            delay_ms: millis(delay),
            run_id: ctx.last_run_id.clone(),
        }));

        match await_or_cancel(tokio::time::sleep(delay), cancel).await {
            Ok(()) => Backoff::Proceed,
            Err(_) => Backoff::Cancelled,
        }
    }

    /// Replaces a stale approval reply with the keep-going message. Shares
    /// the retry budget and does not wait.
    fn recover(&self, ctx: &mut TurnContext, error_text: &str) -> Result<TurnRequest, Option<Failure>> {
        if ctx.attempts >= self.config.max_retries {
            return Err(Some(Failure {
                message: format!(
                    "Approval state out of sync and retry budget exhausted: {error_text}"
                ),
                stop_reason: Some(StopReason::Error),
                api_error: None,
            }));
        }
        ctx.attempts += 1;

        self.set_phase(TurnPhase::Recovering);
        tracing::warn!(attempt = ctx.attempts, "recovering from approval desync");
        self.sink.emit(OutboundEvent::Recovery(RecoveryEvent {
            recovery_type: RECOVERY_APPROVAL_DESYNC.to_string(),
            message: "Server had no pending approval; resending a keep-going message".to_string(),
            run_id: ctx.last_run_id.clone(),
        }));

        Ok(TurnRequest::user_text(self.config.keep_going_message.clone()))
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
