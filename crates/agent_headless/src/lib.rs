//! Headless host for the turn engine.
//!
//! Reads user messages from a prompt flag or stdin, runs them through
//! [`turn_engine`] one turn at a time, executes approved tool calls in a
//! local workspace, and writes events to stdout.
//!
//! ## Backend selection
//!
//! - `--backend http` (default) talks to the agent service; `--agent-id`
//!   (or `AGENT_ID`) is required.
//! - `--backend mock` uses the in-process echo agent from `agent_api_mock`.
//!
//! ## Input and output
//!
//! - `--input-format text`: each non-empty stdin line is a user message.
//! - `--input-format stream-json`: stdin lines are `user` messages,
//!   `control_request`s (`initialize`, `interrupt`) and `control_response`s
//!   answering the runtime's `can_use_tool` requests. Requires
//!   `--output-format stream-json`.
//! - Logs go to stderr, filtered by `AGENT_HEADLESS_LOG` (default `warn`).
//!
//! Exit code is 1 when any turn ended in a terminal error, 0 otherwise.

pub mod args;
pub mod config;
pub mod control;
pub mod logging;
pub mod output;
pub mod permissions;
pub mod session;
pub mod tools;

use std::sync::{Arc, Mutex, MutexGuard};

use agent_api::{AgentApiClient, AgentApiConfig, AgentApiError, AgentTransport};
use agent_api_mock::EchoAgent;

use crate::config::{Backend, HeadlessConfig};

/// Builds the transport selected by `config.backend`.
pub fn build_transport(config: &HeadlessConfig) -> Result<Arc<dyn AgentTransport>, AgentApiError> {
    match config.backend {
        Backend::Mock => Ok(Arc::new(EchoAgent::new())),
        Backend::Http => {
            let mut api = AgentApiConfig::new(config.agent_id.clone().unwrap_or_default());
            if let Some(base_url) = &config.base_url {
                api = api.with_base_url(base_url.clone());
            }
            if let Some(api_key) = &config.api_key {
                api = api.with_api_key(api_key.clone());
            }
            if let Some(timeout) = config.timeout {
                api = api.with_timeout(timeout);
            }
            Ok(Arc::new(AgentApiClient::new(api)?))
        }
    }
}

pub(crate) fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
