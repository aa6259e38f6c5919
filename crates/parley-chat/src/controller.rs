//! Conversation turn controller: one listen -> think -> speak cycle per call.
//!
//! The controller holds the session memory, the three collaborators and the
//! turn state machine. Collaborator failures are absorbed here: an empty
//! transcript for the listener, a fixed apology for the model, and a logged
//! no-op for speech output, so every turn ends back in `Idle` (or `Ended`).

use std::time::Duration;

use parley_core::config::ParleyConfig;
use parley_core::types::{ContextMessage, Role};
use parley_storage::SessionStore;

use crate::error::ChatError;
use crate::memory::{MemoryManager, SaveOutcome};
use crate::state::{StateMachine, TurnState};
use crate::voice::{Listener, ModelClient, SpeechOutput};

/// Behaviour knobs of the turn loop.
#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub listen_timeout: Duration,
    pub phrase_limit: Duration,
    /// Save after every assistant turn while memory is enabled.
    pub auto_save: bool,
    pub exit_keywords: Vec<String>,
    pub greeting: String,
    pub farewell: String,
    pub fallback_reply: String,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self::from_config(&ParleyConfig::default())
    }
}

impl ControllerSettings {
    pub fn from_config(config: &ParleyConfig) -> Self {
        Self {
            listen_timeout: Duration::from_secs(u64::from(config.voice.listen_timeout_secs)),
            phrase_limit: Duration::from_secs(u64::from(config.voice.phrase_time_limit_secs)),
            auto_save: config.memory.auto_save,
            exit_keywords: config
                .conversation
                .exit_keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .collect(),
            greeting: config.conversation.greeting.clone(),
            farewell: config.conversation.farewell.clone(),
            fallback_reply: config.conversation.fallback_reply.clone(),
        }
    }

    /// Whether `text` is an exit keyword, ignoring case and surrounding space.
    pub fn is_exit(&self, text: &str) -> bool {
        let normalized = text.trim().to_lowercase();
        self.exit_keywords.iter().any(|k| *k == normalized)
    }
}

/// What a single turn did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// Nothing was heard; no state changed.
    NoInput,
    /// A normal exchange. `fallback` is set when the model call failed.
    Replied {
        user: String,
        reply: String,
        fallback: bool,
    },
    /// An exit keyword ended the conversation.
    Ended { farewell: String },
}

/// Outcome of a turn plus any messages the user should see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnReport {
    pub outcome: TurnOutcome,
    pub notices: Vec<String>,
}

/// Drives the conversation loop against a session store and three
/// collaborators.
pub struct TurnController<L, M, V, S>
where
    L: Listener,
    M: ModelClient,
    V: SpeechOutput,
    S: SessionStore,
{
    memory: MemoryManager<S>,
    listener: L,
    model: M,
    speech: V,
    state: StateMachine,
    settings: ControllerSettings,
}

impl<L, M, V, S> TurnController<L, M, V, S>
where
    L: Listener,
    M: ModelClient,
    V: SpeechOutput,
    S: SessionStore,
{
    pub fn new(
        memory: MemoryManager<S>,
        listener: L,
        model: M,
        speech: V,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            memory,
            listener,
            model,
            speech,
            state: StateMachine::new(),
            settings,
        }
    }

    pub fn state(&self) -> TurnState {
        self.state.current()
    }

    /// Shared handle for observers such as a status display.
    pub fn state_handle(&self) -> StateMachine {
        self.state.clone()
    }

    pub fn memory(&self) -> &MemoryManager<S> {
        &self.memory
    }

    pub fn memory_mut(&mut self) -> &mut MemoryManager<S> {
        &mut self.memory
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Speak the configured greeting.
    pub async fn greet(&mut self) {
        let greeting = self.settings.greeting.clone();
        self.say(&greeting).await;
    }

    /// Run one listen -> think -> speak cycle.
    ///
    /// Fails only when the conversation has already ended. Any internal
    /// error returns the state machine to `Idle` before it is reported.
    pub async fn run_turn(&mut self) -> Result<TurnReport, ChatError> {
        if self.state.current() == TurnState::Ended {
            return Err(ChatError::ConversationEnded);
        }
        let result = self.cycle().await;
        if result.is_err() && self.state.current() != TurnState::Ended {
            self.state.force(TurnState::Idle);
        }
        result
    }

    async fn cycle(&mut self) -> Result<TurnReport, ChatError> {
        let mut notices = Vec::new();

        self.state.transition(TurnState::Listening)?;
        let heard = match self
            .listener
            .capture(self.settings.listen_timeout, self.settings.phrase_limit)
            .await
        {
            Ok(text) => text,
            Err(e) if e.is_transient() => {
                tracing::debug!(reason = %e, "No usable speech");
                String::new()
            }
            Err(e) => {
                tracing::warn!(error = %e, "Listener failed");
                notices.push(e.to_string());
                String::new()
            }
        };

        let text = heard.trim();
        if text.is_empty() {
            self.state.transition(TurnState::Idle)?;
            return Ok(TurnReport {
                outcome: TurnOutcome::NoInput,
                notices,
            });
        }
        let text = text.to_string();
        tracing::info!(chars = text.len(), "User speech recognized");

        if self.settings.is_exit(&text) {
            return self.finish(text, notices).await;
        }

        self.memory.append_turn(Role::User, text.clone());
        self.state.transition(TurnState::Thinking)?;

        let messages = self.prompt_for(&text);
        let (reply, fallback) = match self.model.complete(&messages).await {
            Ok(reply) if !reply.trim().is_empty() => (reply, false),
            Ok(_) => {
                tracing::warn!("Model returned an empty reply");
                (self.settings.fallback_reply.clone(), true)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Model call failed");
                notices.push(e.to_string());
                (self.settings.fallback_reply.clone(), true)
            }
        };

        self.state.transition(TurnState::Speaking)?;
        self.say(&reply).await;
        self.memory.append_turn(Role::Assistant, reply.clone());
        self.auto_save(&mut notices);
        self.state.transition(TurnState::Idle)?;

        Ok(TurnReport {
            outcome: TurnOutcome::Replied {
                user: text,
                reply,
                fallback,
            },
            notices,
        })
    }

    /// Exit keyword path: record it, say goodbye, and end.
    async fn finish(
        &mut self,
        text: String,
        mut notices: Vec<String>,
    ) -> Result<TurnReport, ChatError> {
        self.memory.append_turn(Role::User, text);
        self.state.transition(TurnState::Speaking)?;

        let farewell = self.settings.farewell.clone();
        self.say(&farewell).await;
        self.memory.append_turn(Role::Assistant, farewell.clone());
        self.auto_save(&mut notices);
        self.state.transition(TurnState::Ended)?;
        tracing::info!("Conversation ended by exit keyword");

        Ok(TurnReport {
            outcome: TurnOutcome::Ended { farewell },
            notices,
        })
    }

    /// Context window for the model, ending with the new input.
    fn prompt_for(&self, text: &str) -> Vec<ContextMessage> {
        let mut messages = self.memory.active_context();
        let already_last = messages
            .last()
            .is_some_and(|m| m.role == Role::User && m.content == text);
        if !already_last {
            messages.push(ContextMessage {
                role: Role::User,
                content: text.to_string(),
            });
        }
        messages
    }

    async fn say(&mut self, text: &str) {
        if let Err(e) = self.speech.speak(text).await {
            tracing::warn!(error = %e, "Speech output failed");
        }
    }

    fn auto_save(&mut self, notices: &mut Vec<String>) {
        if !(self.settings.auto_save && self.memory.is_enabled()) {
            return;
        }
        if let Err(e) = self.memory.save_active() {
            notices.push(format!("Error saving memory: {}", e));
        }
    }

    /// Save the active session on demand.
    pub fn save(&mut self) -> Result<SaveOutcome, ChatError> {
        self.memory.save_active()
    }

    /// Stop the conversation from any state, optionally saving first.
    ///
    /// The controller is `Ended` afterwards even if the save fails.
    pub fn stop(&mut self, save_first: bool) -> Result<SaveOutcome, ChatError> {
        self.state.force(TurnState::Ended);
        if save_first {
            self.memory.save_active()
        } else {
            Ok(SaveOutcome::SkippedEmpty)
        }
    }

    /// Save (when memory is enabled) and start over with a fresh session.
    pub fn reset(&mut self) -> Result<SaveOutcome, ChatError> {
        self.state.force(TurnState::Idle);
        let save_first = self.memory.is_enabled();
        self.memory.reset(save_first)
    }

    /// Discard the active session without saving and start over.
    pub fn new_session(&mut self) {
        self.state.force(TurnState::Idle);
        self.memory.discard();
    }

    /// Make a stored session active; the turn state is left alone.
    pub fn load_session(&mut self, id: &str) -> Result<(), ChatError> {
        self.memory.load_session(id)?;
        if self.state.current() == TurnState::Ended {
            self.state.force(TurnState::Idle);
        }
        Ok(())
    }

    /// Delete every stored session and the active one.
    pub fn clear_all(&mut self) -> Result<(), ChatError> {
        self.memory.clear_all()?;
        self.state.force(TurnState::Idle);
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
