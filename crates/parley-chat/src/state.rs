//! Turn state machine with thread-safe transitions.
//!
//! Valid transitions:
//! - Idle -> Listening (caller asks for a turn)
//! - Listening -> Idle (nothing heard)
//! - Listening -> Thinking (speech recognized)
//! - Thinking -> Speaking (reply ready)
//! - Speaking -> Idle (reply spoken)
//! - Listening -> Speaking (exit keyword, farewell skips the model)
//! - Speaking -> Ended (farewell spoken)
//!
//! Stop and reset bypass these rules through `force`.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::ChatError;

/// Where the conversation loop currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TurnState {
    Idle,
    Listening,
    Thinking,
    Speaking,
    /// Terminal; only a forced reset leaves it.
    Ended,
}

impl fmt::Display for TurnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TurnState::Idle => write!(f, "Idle"),
            TurnState::Listening => write!(f, "Listening"),
            TurnState::Thinking => write!(f, "Thinking"),
            TurnState::Speaking => write!(f, "Speaking"),
            TurnState::Ended => write!(f, "Ended"),
        }
    }
}

impl TurnState {
    pub fn can_transition_to(&self, target: &TurnState) -> bool {
        matches!(
            (self, target),
            (TurnState::Idle, TurnState::Listening)
                | (TurnState::Listening, TurnState::Idle)
                | (TurnState::Listening, TurnState::Thinking)
                | (TurnState::Thinking, TurnState::Speaking)
                | (TurnState::Speaking, TurnState::Idle)
                | (TurnState::Listening, TurnState::Speaking)
                | (TurnState::Speaking, TurnState::Ended)
        )
    }

    /// Status line shown to the user.
    pub fn label(&self) -> &'static str {
        match self {
            TurnState::Idle => "Idle",
            TurnState::Listening => "Listening...",
            TurnState::Thinking => "Thinking...",
            TurnState::Speaking => "Speaking...",
            TurnState::Ended => "Ended",
        }
    }
}

/// Shared handle to the turn state. Clones observe the same state.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: Arc<Mutex<TurnState>>,
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl StateMachine {
    /// Create a new state machine initialized to `Idle`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(TurnState::Idle)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TurnState> {
        // A poisoned lock still holds a valid state.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn current(&self) -> TurnState {
        *self.lock()
    }

    /// Attempt a validated transition.
    pub fn transition(&self, target: TurnState) -> Result<(), ChatError> {
        let mut state = self.lock();
        if state.can_transition_to(&target) {
            tracing::debug!("Turn state: {} -> {}", *state, target);
            *state = target;
            Ok(())
        } else {
            Err(ChatError::InvalidTransition {
                from: *state,
                to: target,
            })
        }
    }

    /// Move to `target` regardless of the current state (stop, reset, recovery).
    pub fn force(&self, target: TurnState) {
        let mut state = self.lock();
        if *state != target {
            tracing::info!("Turn state forced: {} -> {}", *state, target);
        }
        *state = target;
    }
}

// =============================================================================
// Tests
// =============================================================================
