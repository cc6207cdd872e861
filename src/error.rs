use thiserror::Error;

/// Misuse of the engine API. Expected runtime failures (denials, provider
/// errors, exhausted retries) are reported through `TurnOutcome` instead.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("a turn is already in progress")]
    TurnInProgress,

    #[error("cannot start a turn from an empty batch")]
    EmptyBatch,
}
