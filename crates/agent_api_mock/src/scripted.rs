use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use agent_api::{
    is_cancelled, AgentApiError, AgentTransport, CancelSignal, ChunkStream, RunMetadata,
    StatusCode, StreamChunk, TurnRequest,
};
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::Value;

use crate::lock_unpoisoned;

/// What the transport does for one `send` call.
#[derive(Debug, Clone)]
pub enum ScriptedResponse {
    /// Streams the chunks, then closes normally.
    Chunks(Vec<Value>),
    /// Streams the chunks, then ends with a transport error item.
    ChunksThenError { chunks: Vec<Value>, message: String },
    /// Fails before producing any chunk.
    SendStatus { status: u16, message: String },
    /// Streams the chunks, then never yields again.
    Stall(Vec<Value>),
}

/// Transport that replays a fixed script, one response per request.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<ScriptedResponse>>,
    requests: Mutex<Vec<TurnRequest>>,
    runs: Mutex<HashMap<String, RunMetadata>>,
    run_lookups: Mutex<Vec<String>>,
}

impl ScriptedTransport {
    #[must_use]
    pub fn new(script: impl IntoIterator<Item = ScriptedResponse>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Registers metadata returned by `run_metadata` for `run.id`.
    #[must_use]
    pub fn with_run(self, run: RunMetadata) -> Self {
        lock_unpoisoned(&self.runs).insert(run.id.clone(), run);
        self
    }

    pub fn push(&self, response: ScriptedResponse) {
        lock_unpoisoned(&self.script).push_back(response);
    }

    /// Every request received so far, in send order.
    pub fn requests(&self) -> Vec<TurnRequest> {
        lock_unpoisoned(&self.requests).clone()
    }

    pub fn request_count(&self) -> usize {
        lock_unpoisoned(&self.requests).len()
    }

    /// Run ids passed to `run_metadata`, in call order.
    pub fn run_lookups(&self) -> Vec<String> {
        lock_unpoisoned(&self.run_lookups).clone()
    }

    pub fn remaining(&self) -> usize {
        lock_unpoisoned(&self.script).len()
    }
}

fn chunk_items(chunks: Vec<Value>) -> impl futures_util::Stream<Item = Result<StreamChunk, AgentApiError>> {
    stream::iter(
        chunks
            .into_iter()
            .map(|chunk| Ok(StreamChunk::from_value(chunk))),
    )
}

#[async_trait]
impl AgentTransport for ScriptedTransport {
    async fn send(
        &self,
        request: TurnRequest,
        cancel: &CancelSignal,
    ) -> Result<ChunkStream, AgentApiError> {
        if is_cancelled(cancel) {
            return Err(AgentApiError::Cancelled);
        }

        lock_unpoisoned(&self.requests).push(request);
        let next = lock_unpoisoned(&self.script).pop_front();

        match next {
            None => Err(AgentApiError::Unknown(
                "scripted transport has no response left".to_string(),
            )),
            Some(ScriptedResponse::Chunks(chunks)) => Ok(chunk_items(chunks).boxed()),
            Some(ScriptedResponse::ChunksThenError { chunks, message }) => Ok(chunk_items(chunks)
                .chain(stream::once(async move { Err(AgentApiError::Unknown(message)) }))
                .boxed()),
            Some(ScriptedResponse::SendStatus { status, message }) => Err(AgentApiError::Status {
                status: StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
                message,
            }),
            Some(ScriptedResponse::Stall(chunks)) => {
                Ok(chunk_items(chunks).chain(stream::pending()).boxed())
            }
        }
    }

    async fn run_metadata(&self, run_id: &str) -> Result<Option<RunMetadata>, AgentApiError> {
        lock_unpoisoned(&self.run_lookups).push(run_id.to_string());
        Ok(lock_unpoisoned(&self.runs).get(run_id).cloned())
    }
}
