//! Error types for the conversation engine.

use parley_core::error::ParleyError;

use crate::state::TurnState;

/// Errors from the memory manager and turn controller.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("session not found: {0}")]
    SessionNotFound(String),
    #[error("conversation has ended")]
    ConversationEnded,
    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: TurnState, to: TurnState },
    #[error("storage error: {0}")]
    StorageError(String),
}

impl From<ParleyError> for ChatError {
    fn from(err: ParleyError) -> Self {
        ChatError::StorageError(err.to_string())
    }
}
