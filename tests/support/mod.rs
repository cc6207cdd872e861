#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use agent_api::{new_cancel_signal, CancelSignal, RunMetadata};
use agent_api_mock::{ScriptedResponse, ScriptedTransport};
use agent_wire::OutboundEvent;
use async_trait::async_trait;
use serde_json::{json, Value};
use turn_engine::{
    ApprovedCall, ExecutionBatch, InputQueue, NewQueueItem, OrchestratorConfig, PendingApproval,
    PermissionGate, PermissionVerdict, PromptDecision, RecordingSink, ToolCatalog, ToolExecution,
    TurnOrchestrator, TurnReport,
};

pub fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Fixed verdict per tool name, with an optional interactive answer.
pub struct ScriptedPermissions {
    verdicts: HashMap<String, PermissionVerdict>,
    fallback: PermissionVerdict,
    prompt_answer: Option<PromptDecision>,
    pub prompts: Mutex<Vec<String>>,
}

impl ScriptedPermissions {
    pub fn allow_all() -> Self {
        Self::with_fallback(PermissionVerdict::Allow { matched_rule: None })
    }

    pub fn ask_all() -> Self {
        Self::with_fallback(PermissionVerdict::Ask { reason: None })
    }

    pub fn with_fallback(fallback: PermissionVerdict) -> Self {
        Self {
            verdicts: HashMap::new(),
            fallback,
            prompt_answer: None,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_verdict(mut self, tool: &str, verdict: PermissionVerdict) -> Self {
        self.verdicts.insert(tool.to_string(), verdict);
        self
    }

    pub fn with_prompt_answer(mut self, answer: PromptDecision) -> Self {
        self.prompt_answer = Some(answer);
        self
    }
}

#[async_trait]
impl PermissionGate for ScriptedPermissions {
    fn check(&self, tool_name: &str, _args: &Value) -> PermissionVerdict {
        self.verdicts
            .get(tool_name)
            .cloned()
            .unwrap_or_else(|| self.fallback.clone())
    }

    async fn prompt(&self, approval: &PendingApproval, _args: &Value) -> Option<PromptDecision> {
        lock_unpoisoned(&self.prompts).push(approval.tool_call_id.clone());
        self.prompt_answer.clone()
    }
}

/// Records approved calls and answers each with `ran <tool>`.
#[derive(Default)]
pub struct RecordingExecutor {
    calls: Mutex<Vec<ApprovedCall>>,
}

impl RecordingExecutor {
    pub fn calls(&self) -> Vec<ApprovedCall> {
        lock_unpoisoned(&self.calls).clone()
    }
}

#[async_trait]
impl ExecutionBatch for RecordingExecutor {
    async fn execute(&self, calls: Vec<ApprovedCall>, _cancel: &CancelSignal) -> Vec<ToolExecution> {
        let results = calls
            .iter()
            .map(|call| ToolExecution::success(&call.tool_call_id, format!("ran {}", call.tool_name)))
            .collect();
        lock_unpoisoned(&self.calls).extend(calls);
        results
    }
}

pub struct StaticCatalog(HashMap<String, Value>);

impl Default for StaticCatalog {
    fn default() -> Self {
        let mut schemas = HashMap::new();
        schemas.insert(
            "Bash".to_string(),
            json!({"type": "object", "required": ["command"]}),
        );
        schemas.insert(
            "Read".to_string(),
            json!({"type": "object", "required": ["file_path"]}),
        );
        Self(schemas)
    }
}

impl ToolCatalog for StaticCatalog {
    fn input_schema(&self, tool_name: &str) -> Option<Value> {
        self.0.get(tool_name).cloned()
    }

    fn tool_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.0.keys().cloned().collect();
        names.sort();
        names
    }
}

pub struct Harness {
    pub transport: Arc<ScriptedTransport>,
    pub sink: Arc<RecordingSink>,
    pub executor: Arc<RecordingExecutor>,
    pub permissions: Arc<ScriptedPermissions>,
    pub queue: InputQueue,
    pub orchestrator: TurnOrchestrator,
    pub cancel: CancelSignal,
}

impl Harness {
    pub fn new(script: Vec<ScriptedResponse>) -> Self {
        Self::with_permissions(script, ScriptedPermissions::allow_all())
    }

    pub fn with_permissions(script: Vec<ScriptedResponse>, permissions: ScriptedPermissions) -> Self {
        Self::build(ScriptedTransport::new(script), permissions)
    }

    pub fn with_runs(script: Vec<ScriptedResponse>, runs: Vec<RunMetadata>) -> Self {
        let transport = runs
            .into_iter()
            .fold(ScriptedTransport::new(script), ScriptedTransport::with_run);
        Self::build(transport, ScriptedPermissions::allow_all())
    }

    fn build(transport: ScriptedTransport, permissions: ScriptedPermissions) -> Self {
        let transport = Arc::new(transport);
        let sink = Arc::new(RecordingSink::new());
        let executor = Arc::new(RecordingExecutor::default());
        let permissions = Arc::new(permissions);
        let orchestrator = TurnOrchestrator::new(
            transport.clone(),
            permissions.clone(),
            executor.clone(),
            Arc::new(StaticCatalog::default()),
            sink.clone(),
        )
        .with_config(OrchestratorConfig::default().with_max_retries(3));

        Self {
            transport,
            queue: InputQueue::new(sink.clone()),
            sink,
            executor,
            permissions,
            orchestrator,
            cancel: new_cancel_signal(),
        }
    }

    /// Enqueues `text`, dequeues it and runs the resulting turn.
    pub async fn run_text(&self, text: &str) -> TurnReport {
        self.queue.enqueue(NewQueueItem::user_message(text));
        let batch = self.queue.try_dequeue(None).expect("batch");
        let report = self
            .orchestrator
            .run_turn(batch, &self.cancel)
            .await
            .expect("turn should start");
        self.queue.reset_blocked_state();
        report
    }

    pub fn events(&self) -> Vec<OutboundEvent> {
        self.sink.events()
    }

    /// Event type names without queue lifecycle noise.
    pub fn turn_event_types(&self) -> Vec<&'static str> {
        self.sink
            .events()
            .iter()
            .filter(|event| !event.is_queue_lifecycle())
            .map(OutboundEvent::type_name)
            .collect()
    }
}
