use thiserror::Error;

use super::SessionState;
use crate::tokenizer::{DecodeError, EncodeError};

/// Errors raised by a generation session. None of them affect the shared
/// vocabulary; the session is reset and reused.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid generation config: {0}")]
    InvalidConfig(String),

    /// The prompt encoded to zero tokens.
    #[error("prompt produced no tokens")]
    EmptyPrompt,

    /// `start` was called without a `reset` after the previous run.
    #[error("session already started (state {0:?}); reset it first")]
    AlreadyStarted(SessionState),

    /// `step` was called outside the generating state.
    #[error("session is not generating (state {0:?})")]
    Inactive(SessionState),

    #[error("failed to encode prompt: {0}")]
    Encode(#[from] EncodeError),

    #[error("failed to decode predicted token: {0}")]
    Decode(#[from] DecodeError),

    #[error("next-token predictor failed: {0}")]
    Predictor(#[source] anyhow::Error),
}
