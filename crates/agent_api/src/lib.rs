//! Remote agent service contract and HTTP/SSE transport.
//!
//! This crate owns everything the turn runtime knows about the remote agent:
//! the streamed chunk model ([`StreamChunk`]), terminal [`StopReason`]s, the
//! outgoing [`TurnRequest`] payload, post-hoc [`RunMetadata`], and the
//! [`AgentTransport`] seam the orchestrator drives. It contains no turn-loop
//! policy beyond the shared retry/backoff constants and error-text
//! classifiers in [`retry`].
//!
//! [`AgentApiClient`] is the `reqwest` implementation of the transport. Tests
//! and local runs use the scripted transport from `agent_api_mock` instead.

pub mod cancel;
pub mod client;
pub mod config;
pub mod error;
pub mod events;
pub mod headers;
pub mod payload;
pub mod retry;
pub mod runs;
pub mod sse;
pub mod transport;

pub use cancel::{await_or_cancel, is_cancelled, new_cancel_signal, CancelSignal, Cancelled};
pub use client::AgentApiClient;
pub use config::AgentApiConfig;
pub use error::AgentApiError;
pub use events::{ChunkKind, StopReason, StreamChunk, ToolCallDelta, UsageStatistics};
pub use payload::{ApprovalReply, ContentPart, InputMessage, ToolReturnStatus, TurnRequest};
pub use runs::RunMetadata;
pub use sse::SseStreamParser;
pub use transport::{AgentTransport, ChunkStream};

pub use reqwest::StatusCode;
