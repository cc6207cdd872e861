use std::collections::VecDeque;

use async_trait::async_trait;
use futures_util::stream::{self, Stream, StreamExt};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, StatusCode};

use crate::cancel::{await_or_cancel, CancelSignal};
use crate::config::AgentApiConfig;
use crate::error::{parse_error_message, AgentApiError};
use crate::events::StreamChunk;
use crate::headers::build_headers;
use crate::payload::TurnRequest;
use crate::runs::RunMetadata;
use crate::sse::SseStreamParser;
use crate::transport::{AgentTransport, ChunkStream};

/// `reqwest` transport for the hosted agent service.
#[derive(Debug)]
pub struct AgentApiClient {
    http: Client,
    config: AgentApiConfig,
}

impl AgentApiClient {
    pub fn new(config: AgentApiConfig) -> Result<Self, AgentApiError> {
        if config.agent_id.trim().is_empty() {
            return Err(AgentApiError::MissingAgentId);
        }

        let mut builder = Client::builder();
        if let Some(timeout) = config.timeout {
            builder = builder.connect_timeout(timeout);
        }
        let http = builder.build().map_err(AgentApiError::from)?;
        Ok(Self { http, config })
    }

    pub fn config(&self) -> &AgentApiConfig {
        &self.config
    }

    pub fn build_headers(&self) -> Result<HeaderMap, AgentApiError> {
        let mut out = HeaderMap::new();
        for (key, value) in build_headers(&self.config) {
            out.insert(
                HeaderName::from_bytes(key.as_bytes())
                    .map_err(|_| AgentApiError::InvalidHeader(format!("invalid header key: {key}")))?,
                HeaderValue::from_str(&value).map_err(|_| {
                    AgentApiError::InvalidHeader(format!("invalid header value for {key}"))
                })?,
            );
        }
        Ok(out)
    }

    pub fn build_request(
        &self,
        request: &TurnRequest,
    ) -> Result<reqwest::RequestBuilder, AgentApiError> {
        let headers = self.build_headers()?;
        Ok(self
            .http
            .post(self.config.messages_stream_url())
            .headers(headers)
            .json(request))
    }
}

#[async_trait]
impl AgentTransport for AgentApiClient {
    async fn send(
        &self,
        request: TurnRequest,
        cancel: &CancelSignal,
    ) -> Result<ChunkStream, AgentApiError> {
        let builder = self.build_request(&request)?;
        tracing::debug!(
            url = %self.config.messages_stream_url(),
            messages = request.messages.len(),
            "sending turn request"
        );

        let response = await_or_cancel(builder.send(), cancel).await??;
        let status = response.status();
        if !status.is_success() {
            let body = await_or_cancel(response.text(), cancel)
                .await?
                .unwrap_or_default();
            return Err(AgentApiError::Status {
                status,
                message: parse_error_message(status, &body),
            });
        }

        Ok(chunk_stream(Box::pin(response.bytes_stream())))
    }

    async fn run_metadata(&self, run_id: &str) -> Result<Option<RunMetadata>, AgentApiError> {
        let headers = self.build_headers()?;
        let response = self
            .http
            .get(self.config.run_url(run_id))
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AgentApiError::Status {
                status,
                message: parse_error_message(status, &body),
            });
        }

        Ok(Some(response.json::<RunMetadata>().await?))
    }
}

struct ChunkStreamState<S> {
    bytes: S,
    parser: SseStreamParser,
    pending: VecDeque<StreamChunk>,
    finished: bool,
}

/// Adapts a raw byte stream into parsed chunks, preserving frame order.
pub fn chunk_stream<S, B, E>(bytes: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: Into<AgentApiError> + Send + 'static,
{
    let state = ChunkStreamState {
        bytes,
        parser: SseStreamParser::default(),
        pending: VecDeque::new(),
        finished: false,
    };

    stream::unfold(state, |mut state| async move {
        loop {
            if let Some(chunk) = state.pending.pop_front() {
                return Some((Ok(chunk), state));
            }
            if state.finished {
                return None;
            }

            match state.bytes.next().await {
                Some(Ok(bytes)) => {
                    let parsed = state.parser.feed(bytes.as_ref());
                    state.pending.extend(parsed);
                }
                Some(Err(error)) => {
                    state.finished = true;
                    return Some((Err(error.into()), state));
                }
                None => {
                    state.finished = true;
                    let trailing = state.parser.finish();
                    state.pending.extend(trailing);
                }
            }
        }
    })
    .boxed()
}
