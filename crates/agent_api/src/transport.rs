use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::cancel::CancelSignal;
use crate::error::AgentApiError;
use crate::events::StreamChunk;
use crate::payload::TurnRequest;
use crate::runs::RunMetadata;

/// Ordered chunks of one turn request. The stream ends when the server
/// closes the response; an `Err` item ends it early.
pub type ChunkStream = BoxStream<'static, Result<StreamChunk, AgentApiError>>;

/// Seam between the turn orchestrator and the remote agent.
#[async_trait]
pub trait AgentTransport: Send + Sync + 'static {
    /// Starts one streamed request. Errors returned here happened before
    /// any chunk was produced.
    async fn send(
        &self,
        request: TurnRequest,
        cancel: &CancelSignal,
    ) -> Result<ChunkStream, AgentApiError>;

    /// Looks up server-side metadata for a finished run.
    async fn run_metadata(&self, _run_id: &str) -> Result<Option<RunMetadata>, AgentApiError> {
        Ok(None)
    }
}
