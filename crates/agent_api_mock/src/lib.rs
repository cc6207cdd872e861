//! Deterministic implementations of the `agent_api` transport contract.
//!
//! [`ScriptedTransport`] replays one scripted response per request and
//! records what it was sent; the turn engine's tests drive every scenario
//! through it. [`EchoAgent`] is a tiny stand-in agent for local runs
//! without a server. This crate contains no HTTP or SSE logic.

pub mod chunks;
mod echo;
mod scripted;

use std::sync::{Mutex, MutexGuard};

pub use echo::{EchoAgent, ECHO_BASH_PREFIX};
pub use scripted::{ScriptedResponse, ScriptedTransport};

fn lock_unpoisoned<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
