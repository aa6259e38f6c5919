//! Session store contract and the JSON file implementation.
//!
//! The store only reads and writes the whole collection; upsert and
//! eviction decisions belong to the memory manager.

use std::fs;
use std::path::{Path, PathBuf};

use parley_core::error::ParleyError;
use parley_core::types::Session;

/// Maximum number of sessions kept in a store.
pub const MAX_SESSIONS: usize = 50;

/// Durable collection of session records, oldest first.
pub trait SessionStore: Send {
    /// Read every stored session. Missing or unreadable storage yields an
    /// empty collection; unreadable records are skipped.
    fn load(&self) -> Vec<Session>;

    /// Replace the stored collection with the most recent `MAX_SESSIONS`
    /// entries of `sessions`.
    fn save(&self, sessions: &[Session]) -> Result<(), ParleyError>;

    /// Remove all stored sessions.
    fn clear(&self) -> Result<(), ParleyError>;
}

impl<S: SessionStore + ?Sized> SessionStore for Box<S> {
    fn load(&self) -> Vec<Session> {
        (**self).load()
    }

    fn save(&self, sessions: &[Session]) -> Result<(), ParleyError> {
        (**self).save(sessions)
    }

    fn clear(&self) -> Result<(), ParleyError> {
        (**self).clear()
    }
}

/// The most recent `MAX_SESSIONS` entries, relative order preserved.
pub fn retain_recent(sessions: &[Session]) -> &[Session] {
    let start = sessions.len().saturating_sub(MAX_SESSIONS);
    &sessions[start..]
}

/// Session store backed by a single pretty-printed JSON array.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for JsonFileStore {
    fn load(&self) -> Vec<Session> {
        if !self.path.exists() {
            return Vec::new();
        }

        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Session store unreadable; treating as empty");
                return Vec::new();
            }
        };

        if content.trim().is_empty() {
            return Vec::new();
        }

        let records = match serde_json::from_str::<Vec<serde_json::Value>>(&content) {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(path = %self.path.display(), error = %e, "Session store corrupt; treating as empty");
                return Vec::new();
            }
        };

        let total = records.len();
        let sessions: Vec<Session> = records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value::<Session>(record) {
                Ok(session) => Some(session),
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping unreadable session record");
                    None
                }
            })
            .collect();
        tracing::debug!(count = sessions.len(), skipped = total - sessions.len(), "Session store loaded");
        sessions
    }

    fn save(&self, sessions: &[Session]) -> Result<(), ParleyError> {
        let kept = retain_recent(sessions);
        let content = serde_json::to_string_pretty(kept)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        // Write beside the target, then rename over it.
        let tmp = self.temp_path();
        fs::write(&tmp, content).map_err(|e| {
            ParleyError::Storage(format!("failed to write {}: {}", tmp.display(), e))
        })?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(ParleyError::Storage(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e
            )));
        }

        tracing::debug!(path = %self.path.display(), count = kept.len(), "Session store written");
        Ok(())
    }

    fn clear(&self) -> Result<(), ParleyError> {
        match fs::remove_file(&self.path) {
            Ok(()) => {
                tracing::info!(path = %self.path.display(), "Session store cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(ParleyError::Storage(format!(
                "failed to remove {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Local;
    use parley_core::types::Role;

    fn session(id: &str) -> Session {
        let mut s = Session::new(id, Local::now());
        s.push_turn(Role::User, format!("hello from {}", id), Local::now());
        s
    }

    #[test]
    fn test_load_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("memory.json"));
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_corrupt_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(&path, "{ this is not a session list").unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_load_skips_unreadable_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let good = serde_json::to_value(session("a")).unwrap();
        let raw = serde_json::json!([
            good,
            {"id": "broken", "timestamp": "sometime", "messages": []},
            42
        ]);
        fs::write(&path, raw.to_string()).unwrap();

        let loaded = JsonFileStore::new(&path).load();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, "a");
    }

    #[test]
    fn test_load_blank_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        fs::write(&path, "   \n").unwrap();
        assert!(JsonFileStore::new(&path).load().is_empty());
    }

    #[test]
    fn test_save_then_load_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("memory.json"));
        store
            .save(&[session("a"), session("b"), session("c")])
            .unwrap();

        let ids: Vec<String> = store.load().into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_save_truncates_to_most_recent() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path().join("memory.json"));
        let sessions: Vec<Session> = (0..60).map(|i| session(&format!("s{:02}", i))).collect();
        store.save(&sessions).unwrap();

        let loaded = store.load();
        assert_eq!(loaded.len(), MAX_SESSIONS);
        assert_eq!(loaded[0].id, "s10");
        assert_eq!(loaded[MAX_SESSIONS - 1].id, "s59");
    }

    #[test]
    fn test_save_creates_parent_dirs_and_leaves_no_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("memory.json");
        let store = JsonFileStore::new(&path);
        store.save(&[session("a")]).unwrap();

        assert!(path.exists());
        assert!(!store.temp_path().exists());
    }

    #[test]
    fn test_written_file_is_pretty_json_array() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        JsonFileStore::new(&path).save(&[session("a")]).unwrap();

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with('['));
        assert!(raw.contains("\n  {"));
        assert!(raw.contains("\"total_interactions\""));
        assert!(raw.contains("\"messages\""));
    }

    #[test]
    fn test_save_to_unwritable_location_fails() {
        let dir = tempfile::tempdir().unwrap();
        // A directory at the target path makes the rename fail.
        let path = dir.path().join("memory.json");
        fs::create_dir_all(path.join("occupied")).unwrap();
        let store = JsonFileStore::new(&path);
        assert!(store.save(&[session("a")]).is_err());
    }

    #[test]
    fn test_clear_removes_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memory.json");
        let store = JsonFileStore::new(&path);
        store.save(&[session("a")]).unwrap();

        store.clear().unwrap();
        assert!(!path.exists());
        store.clear().unwrap();
        assert!(store.load().is_empty());
    }

    #[test]
    fn test_retain_recent_short_input_untouched() {
        let sessions = vec![session("a"), session("b")];
        assert_eq!(retain_recent(&sessions).len(), 2);
    }
}
