//! Client-side turn-execution engine for a remote coding agent.
//!
//! Three pieces cooperate to run one turn at a time against the agent
//! service while input keeps arriving:
//!
//! - [`InputQueue`] buffers input items in arrival order and hands out
//!   atomically coalesced batches, reporting every transition as a queue
//!   lifecycle event.
//! - [`ChunkInterpreter`] classifies each streamed chunk of the active
//!   request, accumulating approval, error and stop-reason state.
//! - [`TurnOrchestrator`] drives the loop: send, interpret, then finish,
//!   resolve approvals, retry, or recover from an approval desync.
//!
//! Collaborators the engine does not own (permission rules, tool execution,
//! tool schemas, event output) plug in through the traits in
//! [`collaborators`]. Events use the `agent_wire` data types; the remote
//! service is reached through `agent_api::AgentTransport`.
//!
//! Invariant: at most one turn is in flight per orchestrator.

pub mod collaborators;
pub mod error;
pub mod interpreter;
pub mod orchestrator;
pub mod queue;

use std::sync::{Mutex, MutexGuard};

pub use collaborators::{
    ApprovedCall, Decision, EventSink, ExecutionBatch, NullSink, PermissionGate,
    PermissionVerdict, PromptDecision, RecordingSink, ToolCatalog, ToolExecution,
};
pub use error::EngineError;
pub use interpreter::{ChunkInterpreter, ChunkOutcome, ErrorInfo, PendingApproval};
pub use orchestrator::{
    OrchestratorConfig, TurnOrchestrator, TurnOutcome, TurnPhase, TurnReport, TurnSummary,
    DEFAULT_KEEP_GOING_MESSAGE,
};
pub use queue::{
    BatchId, DequeuedBatch, InputQueue, NewQueueItem, QueueItem, QueueItemId, QueuePayload,
    DEFAULT_QUEUE_CAPACITY,
};

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
