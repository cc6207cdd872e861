//! Session driver: feeds stdin into the queue and runs one turn at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use agent_api::{new_cancel_signal, AgentTransport, CancelSignal};
use agent_wire::{
    BlockedReason, ClearReason, ControlRequest, ControlRequestBody, ControlResponse, ErrorEvent,
    InboundMessage, OutboundEvent, SystemEvent, SystemSubtype,
};
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Notify;
use turn_engine::{
    EventSink, InputQueue, NewQueueItem, OrchestratorConfig, ToolCatalog, TurnOrchestrator,
};

use crate::config::{HeadlessConfig, InputFormat, PermissionMode};
use crate::control::{parse_inbound_line, ControlRouter};
use crate::lock_unpoisoned;
use crate::permissions::RulePermissions;
use crate::tools::LocalTools;

/// Process exit status for a finished session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionExit {
    pub failed_turns: u32,
    pub completed_turns: u32,
}

impl SessionExit {
    /// 0 when no turn ended in a terminal error, 1 otherwise.
    pub fn code(&self) -> u8 {
        u8::from(self.failed_turns > 0)
    }
}

struct Shared {
    session_id: String,
    agent_id: Option<String>,
    tools: Vec<String>,
    permission_mode: PermissionMode,
    input_format: InputFormat,
    queue: InputQueue,
    router: Arc<ControlRouter>,
    sink: Arc<dyn EventSink>,
    wake: Notify,
    input_closed: AtomicBool,
    shutdown: AtomicBool,
    turn_active: AtomicBool,
    interrupting: AtomicBool,
    turn_cancel: Mutex<CancelSignal>,
}

impl Shared {
    fn interrupt(&self) -> bool {
        if !self.turn_active.load(Ordering::Acquire) {
            return false;
        }
        self.interrupting.store(true, Ordering::Release);
        lock_unpoisoned(&self.turn_cancel).store(true, Ordering::Release);
        tracing::info!("interrupting active turn");
        true
    }

    fn enqueue(&self, item: NewQueueItem) {
        if self.queue.enqueue(item).is_none() {
            return;
        }
        if self.turn_active.load(Ordering::Acquire) {
            let reason = if self.interrupting.load(Ordering::Acquire) {
                BlockedReason::InterruptInProgress
            } else if self.router.has_pending() {
                BlockedReason::PendingApprovals
            } else {
                BlockedReason::TurnActive
            };
            let _ = self.queue.try_dequeue(Some(reason));
        }
        self.wake.notify_one();
    }

    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }

        if self.input_format == InputFormat::Text {
            self.enqueue(NewQueueItem::user_message(line));
            return;
        }

        match parse_inbound_line(line) {
            Ok(InboundMessage::User(input)) => {
                let text = input.text();
                if text.trim().is_empty() {
                    tracing::warn!("ignoring user message without text content");
                    return;
                }
                let mut item = NewQueueItem::user_message(text);
                if let Some(id) = input.client_message_id {
                    item = item.with_client_message_id(id);
                }
                self.enqueue(item);
            }
            Ok(InboundMessage::ControlRequest(request)) => {
                let response = self.answer(request);
                self.sink.emit(OutboundEvent::ControlResponse(response));
            }
            Ok(InboundMessage::ControlResponse(response)) => {
                self.router.resolve(response);
            }
            Err(error) => {
                tracing::warn!(%error, "malformed input line");
                self.sink.emit(OutboundEvent::Error(ErrorEvent {
                    message: format!("Malformed input line: {error}"),
                    stop_reason: "error".to_string(),
                    run_id: None,
                    api_error: None,
                }));
            }
        }
    }

    fn answer(&self, request: ControlRequest) -> ControlResponse {
        match request.request {
            ControlRequestBody::Initialize => ControlResponse::success(
                request.request_id,
                json!({
                    "session_id": self.session_id,
                    "agent_id": self.agent_id,
                    "tools": self.tools,
                    "permission_mode": self.permission_mode.as_str(),
                }),
            ),
            ControlRequestBody::Interrupt => {
                let interrupted = self.interrupt();
                ControlResponse::success(request.request_id, json!({ "interrupted": interrupted }))
            }
            ControlRequestBody::CanUseTool { .. } => ControlResponse::error(
                request.request_id,
                "can_use_tool requests are only sent by the runtime",
            ),
            ControlRequestBody::Unsupported => {
                ControlResponse::error(request.request_id, "Unsupported control request subtype")
            }
        }
    }

    fn close_input(&self) {
        self.input_closed.store(true, Ordering::Release);
        self.router.close();
        self.wake.notify_one();
    }
}

/// Cloneable handle for signal handlers.
#[derive(Clone)]
pub struct SessionHandle {
    shared: Arc<Shared>,
}

impl SessionHandle {
    /// Cancels the active turn, if any.
    pub fn interrupt(&self) -> bool {
        self.shared.interrupt()
    }

    /// Cancels the active turn and stops the session once it returns.
    pub fn shutdown(&self) {
        self.shared.shutdown.store(true, Ordering::Release);
        self.shared.interrupt();
        self.shared.wake.notify_one();
    }
}

pub struct Session {
    shared: Arc<Shared>,
    orchestrator: TurnOrchestrator,
    prompt: Option<String>,
}

impl Session {
    pub fn new(
        config: &HeadlessConfig,
        session_id: impl Into<String>,
        transport: Arc<dyn AgentTransport>,
        tools: Arc<LocalTools>,
        sink: Arc<dyn EventSink>,
    ) -> Self {
        let router = Arc::new(ControlRouter::new(sink.clone()));
        let mut permissions = RulePermissions::new(config.permissions.clone());
        if config.input_format == InputFormat::StreamJson {
            permissions = permissions.with_approver(router.clone());
        }

        let orchestrator = TurnOrchestrator::new(
            transport,
            Arc::new(permissions),
            tools.clone(),
            tools.clone(),
            sink.clone(),
        )
        .with_config(OrchestratorConfig::default().with_max_retries(config.max_retries));

        let shared = Arc::new(Shared {
            session_id: session_id.into(),
            agent_id: config.agent_id.clone(),
            tools: tools.tool_names(),
            permission_mode: config.permissions.mode,
            input_format: config.input_format,
            queue: InputQueue::with_capacity(sink.clone(), config.queue_capacity),
            router,
            sink,
            wake: Notify::new(),
            input_closed: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            turn_active: AtomicBool::new(false),
            interrupting: AtomicBool::new(false),
            turn_cancel: Mutex::new(new_cancel_signal()),
        });

        Self {
            shared,
            orchestrator,
            prompt: config.prompt.clone(),
        }
    }

    pub fn handle(&self) -> SessionHandle {
        SessionHandle {
            shared: self.shared.clone(),
        }
    }

    /// Runs until input is exhausted and the queue drains, or until
    /// shutdown. `input` is read line by line on a separate task.
    pub async fn run<R>(self, input: Option<R>) -> SessionExit
    where
        R: AsyncBufRead + Unpin + Send + 'static,
    {
        let shared = self.shared;
        shared.sink.emit(OutboundEvent::System(SystemEvent {
            subtype: SystemSubtype::Init,
            agent_id: shared.agent_id.clone(),
            tools: shared.tools.clone(),
            permission_mode: Some(shared.permission_mode.as_str().to_string()),
        }));

        if let Some(prompt) = self.prompt {
            shared.enqueue(NewQueueItem::user_message(prompt));
        }

        let reader = match input {
            Some(input) => Some(tokio::spawn(read_input(shared.clone(), input))),
            None => {
                shared.close_input();
                None
            }
        };

        let mut exit = SessionExit {
            failed_turns: 0,
            completed_turns: 0,
        };

        loop {
            if shared.shutdown.load(Ordering::Acquire) {
                break;
            }

            if let Some(batch) = shared.queue.try_dequeue(None) {
                let cancel = new_cancel_signal();
                *lock_unpoisoned(&shared.turn_cancel) = cancel.clone();
                shared.turn_active.store(true, Ordering::Release);

                let result = self.orchestrator.run_turn(batch, &cancel).await;

                shared.turn_active.store(false, Ordering::Release);
                shared.interrupting.store(false, Ordering::Release);
                shared.queue.reset_blocked_state();

                match result {
                    Ok(report) if report.outcome.is_failure() => exit.failed_turns += 1,
                    Ok(_) => exit.completed_turns += 1,
                    Err(error) => {
                        tracing::error!(%error, "turn could not start");
                        exit.failed_turns += 1;
                    }
                }
                continue;
            }

            if shared.input_closed.load(Ordering::Acquire) {
                break;
            }
            shared.wake.notified().await;
        }

        if !shared.queue.is_empty() {
            shared.queue.clear(ClearReason::Shutdown);
        }
        shared.router.close();
        if let Some(reader) = reader {
            reader.abort();
        }

        tracing::info!(
            completed = exit.completed_turns,
            failed = exit.failed_turns,
            "session finished"
        );
        exit
    }
}

async fn read_input<R>(shared: Arc<Shared>, input: R)
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => shared.handle_line(&line),
            Ok(None) => break,
            Err(error) => {
                tracing::warn!(%error, "failed to read input");
                break;
            }
        }
    }
    shared.close_input();
}
