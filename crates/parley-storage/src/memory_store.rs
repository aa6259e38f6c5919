//! Volatile session store.
//!
//! Used by tests and by `--no-persist` runs. Writes can be made to fail so
//! callers can exercise their persistence error paths.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use parley_core::error::ParleyError;
use parley_core::types::Session;

use crate::store::{retain_recent, SessionStore};

/// In-process session store. Clones share the same contents.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    sessions: Arc<Mutex<Vec<Session>>>,
    fail_writes: Arc<AtomicBool>,
    writes: Arc<AtomicUsize>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with existing sessions.
    pub fn with_sessions(sessions: Vec<Session>) -> Self {
        let store = Self::default();
        if let Ok(mut guard) = store.sessions.lock() {
            *guard = sessions;
        }
        store
    }

    /// Make subsequent `save` and `clear` calls fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Number of successful `save` calls so far.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    fn check_writable(&self) -> Result<(), ParleyError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(ParleyError::Storage("store is read-only".to_string()));
        }
        Ok(())
    }
}

impl SessionStore for InMemoryStore {
    fn load(&self) -> Vec<Session> {
        match self.sessions.lock() {
            Ok(guard) => guard.clone(),
            Err(e) => {
                tracing::warn!(error = %e, "In-memory store lock poisoned; treating as empty");
                Vec::new()
            }
        }
    }

    fn save(&self, sessions: &[Session]) -> Result<(), ParleyError> {
        self.check_writable()?;
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| ParleyError::Storage(format!("store lock poisoned: {}", e)))?;
        *guard = retain_recent(sessions).to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn clear(&self) -> Result<(), ParleyError> {
        self.check_writable()?;
        let mut guard = self
            .sessions
            .lock()
            .map_err(|e| ParleyError::Storage(format!("store lock poisoned: {}", e)))?;
        guard.clear();
        Ok(())
    }
}
