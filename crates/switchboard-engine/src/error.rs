use switchboard_core::errors::GenerationError;
use switchboard_core::ids::SessionId;
use switchboard_store::StoreError;

/// Infrastructure failures that escape the dispatch loop.
///
/// Capability failures never show up here; they are answered with error
/// envelopes and written to the conversation like any other result.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("generation error: {0}")]
    Generation(#[from] GenerationError),

    #[error("no active assistant")]
    NoActiveAssistant,

    #[error("session {0} already has a run in flight")]
    SessionBusy(SessionId),

    #[error("an orchestration controller is already registered")]
    ControllerAlreadyActive,

    #[error("{0}")]
    Internal(String),
}
