//! Session memory: the active conversation and its durable history.
//!
//! `MemoryManager` owns the active session and a `SessionStore`. Saving is
//! an upsert by session id followed by oldest-first eviction down to
//! `MAX_SESSIONS`, so repeated saves of one conversation update a single
//! record and the store stays bounded.

use std::collections::HashSet;

use chrono::Local;

use parley_core::config::MemoryConfig;
use parley_core::types::{format_duration, ContextMessage, Role, Session, SessionSummary, Turn};
use parley_storage::{SessionStore, MAX_SESSIONS};

use crate::error::ChatError;

/// Result of a save request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The session was written; `stored` is the collection size afterwards.
    Saved { id: String, stored: usize },
    /// Nothing to write: no active session or no turns yet.
    SkippedEmpty,
}

/// Counters for the active conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub session_id: Option<String>,
    pub user_turns: usize,
    pub assistant_turns: usize,
    pub interactions: u32,
    pub saved_sessions: usize,
    /// Live seconds of the active session, `None` before it starts.
    pub duration_secs: Option<f64>,
}

impl SessionStats {
    pub fn duration_label(&self) -> String {
        match self.duration_secs {
            Some(secs) => format_duration(secs),
            None => "Not started".to_string(),
        }
    }
}

/// Creates, updates, windows, loads, deletes and retention-caps sessions.
pub struct MemoryManager<S: SessionStore> {
    store: S,
    active: Option<Session>,
    /// Id of the session most recently replaced or discarded.
    retired_id: Option<String>,
    enabled: bool,
    context_window: usize,
}

impl<S: SessionStore> MemoryManager<S> {
    pub fn new(store: S, config: &MemoryConfig) -> Self {
        Self {
            store,
            active: None,
            retired_id: None,
            enabled: config.enabled,
            context_window: config.context_window,
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Turn context building on or off. Persistence through explicit saves
    /// is unaffected.
    pub fn set_enabled(&mut self, enabled: bool) {
        tracing::info!(enabled, "Conversation memory toggled");
        self.enabled = enabled;
    }

    pub fn context_window(&self) -> usize {
        self.context_window
    }

    pub fn active(&self) -> Option<&Session> {
        self.active.as_ref()
    }

    /// Return the active session, starting a fresh one if none is active.
    pub fn start_or_resume_session(&mut self) -> &mut Session {
        let session = match self.active.take() {
            Some(session) => session,
            None => {
                let now = Local::now();
                let id = self.fresh_id(&Session::id_for(now));
                tracing::info!(session_id = %id, "Session started");
                Session::new(id, now)
            }
        };
        self.active.insert(session)
    }

    /// Append a turn stamped with the current time to the active session.
    pub fn append_turn(&mut self, role: Role, content: impl Into<String>) -> &Turn {
        let session = self.start_or_resume_session();
        session.push_turn(role, content, Local::now())
    }

    /// Upsert `session` into the store. Sessions without turns are skipped.
    pub fn save_session(&self, session: &mut Session) -> Result<SaveOutcome, ChatError> {
        Self::persist(&self.store, session)
    }

    /// Save the active session, if any.
    pub fn save_active(&mut self) -> Result<SaveOutcome, ChatError> {
        match self.active.as_mut() {
            Some(session) => Self::persist(&self.store, session),
            None => Ok(SaveOutcome::SkippedEmpty),
        }
    }

    fn persist(store: &S, session: &mut Session) -> Result<SaveOutcome, ChatError> {
        if session.is_empty() {
            tracing::debug!(session_id = %session.id, "Skipping save of empty session");
            return Ok(SaveOutcome::SkippedEmpty);
        }
        session.refresh_duration(Local::now());

        let mut sessions = store.load();
        match sessions.iter().position(|s| s.id == session.id) {
            Some(index) => sessions[index] = session.clone(),
            None => sessions.push(session.clone()),
        }

        let overflow = sessions.len().saturating_sub(MAX_SESSIONS);
        if overflow > 0 {
            let evicted: Vec<String> = sessions.drain(..overflow).map(|s| s.id).collect();
            tracing::info!(evicted = ?evicted, "Evicted oldest sessions");
        }

        store.save(&sessions).map_err(|e| {
            tracing::warn!(session_id = %session.id, error = %e, "Failed to save session");
            ChatError::from(e)
        })?;

        tracing::debug!(
            session_id = %session.id,
            turns = session.turns.len(),
            stored = sessions.len(),
            "Session saved"
        );
        Ok(SaveOutcome::Saved {
            id: session.id.clone(),
            stored: sessions.len(),
        })
    }

    /// Make the stored session `id` the active one.
    ///
    /// The current active session is left untouched when `id` is unknown.
    pub fn load_session(&mut self, id: &str) -> Result<&Session, ChatError> {
        let mut session = self
            .store
            .load()
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| ChatError::SessionNotFound(id.to_string()))?;

        session.resume(Local::now());
        tracing::info!(session_id = %id, turns = session.turns.len(), "Session loaded");
        self.retire_active();
        Ok(self.active.insert(session))
    }

    /// Remove `id` from the store and persist the remainder.
    ///
    /// Returns whether anything was removed. The store is rewritten even
    /// when `id` is absent.
    pub fn delete_session(&mut self, id: &str) -> Result<bool, ChatError> {
        let mut sessions = self.store.load();
        let before = sessions.len();
        sessions.retain(|s| s.id != id);
        let removed = sessions.len() != before;

        self.store.save(&sessions)?;
        if removed {
            tracing::info!(session_id = %id, "Session deleted");
        } else {
            tracing::debug!(session_id = %id, "Delete requested for unknown session");
        }
        Ok(removed)
    }

    /// The last `window_size` turns of `session` for the model, or nothing
    /// when memory is disabled.
    pub fn build_context(&self, session: &Session, window_size: usize) -> Vec<ContextMessage> {
        if !self.enabled {
            return Vec::new();
        }
        session.context_window(window_size)
    }

    /// `build_context` over the active session with the configured window.
    pub fn active_context(&self) -> Vec<ContextMessage> {
        match self.active.as_ref() {
            Some(session) => self.build_context(session, self.context_window),
            None => Vec::new(),
        }
    }

    /// Delete every stored session and forget the active one.
    pub fn clear_all(&mut self) -> Result<(), ChatError> {
        self.store.clear()?;
        self.retire_active();
        tracing::info!("All conversation history cleared");
        Ok(())
    }

    /// End the active session, optionally saving it first.
    ///
    /// A failed save keeps the session active so nothing is lost.
    pub fn reset(&mut self, save_first: bool) -> Result<SaveOutcome, ChatError> {
        let outcome = if save_first {
            self.save_active()?
        } else {
            SaveOutcome::SkippedEmpty
        };
        if let Some(session) = self.retire_active() {
            tracing::info!(session_id = %session.id, saved = save_first, "Session reset");
        }
        Ok(outcome)
    }

    /// Drop the active session without saving it.
    pub fn discard(&mut self) {
        if let Some(session) = self.retire_active() {
            tracing::info!(session_id = %session.id, turns = session.turns.len(), "Session discarded");
        }
    }

    fn retire_active(&mut self) -> Option<Session> {
        let session = self.active.take()?;
        self.retired_id = Some(session.id.clone());
        Some(session)
    }

    /// Stored sessions, newest first, at most `limit`.
    pub fn list_sessions(&self, limit: usize) -> Vec<SessionSummary> {
        self.store
            .load()
            .iter()
            .rev()
            .take(limit)
            .map(Session::summary)
            .collect()
    }

    /// A stored session by id, without making it active.
    pub fn find_session(&self, id: &str) -> Option<Session> {
        self.store.load().into_iter().find(|s| s.id == id)
    }

    pub fn saved_count(&self) -> usize {
        self.store.load().len()
    }

    pub fn stats(&self) -> SessionStats {
        let saved_sessions = self.saved_count();
        match self.active.as_ref() {
            Some(session) => SessionStats {
                session_id: Some(session.id.clone()),
                user_turns: session.count_role(Role::User),
                assistant_turns: session.count_role(Role::Assistant),
                interactions: session.interaction_count,
                saved_sessions,
                duration_secs: Some(session.elapsed_secs(Local::now())),
            },
            None => SessionStats {
                session_id: None,
                user_turns: 0,
                assistant_turns: 0,
                interactions: 0,
                saved_sessions,
                duration_secs: None,
            },
        }
    }

    /// An id based on `base` not used by any stored session or by the
    /// previously active one.
    fn fresh_id(&self, base: &str) -> String {
        let mut taken: HashSet<String> = self.store.load().into_iter().map(|s| s.id).collect();
        taken.extend(self.retired_id.iter().cloned());
        if !taken.contains(base) {
            return base.to_string();
        }
        let mut n = 2;
        loop {
            let candidate = format!("{}_{}", base, n);
            if !taken.contains(&candidate) {
                return candidate;
            }
            n += 1;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
