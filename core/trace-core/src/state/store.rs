//! File-backed persistence for session records and the shared index.
//!
//! # Defensive Design
//!
//! Every hook process reads files that a sibling may be writing, or that a crashed
//! sibling left behind. Reads therefore never fail:
//! - Missing file → absent record / empty index
//! - Empty file → absent record / empty index
//! - Corrupt JSON → absent record / empty index (logged at debug)
//!
//! # Atomic Writes
//!
//! Uses temp file + rename in the same directory, so readers observe either the old
//! or the new content and never a partial file.
//!
//! The store does no locking. Callers hold the matching [`super::lock`] guard for the
//! whole read-modify-write cycle.

use std::io::Write;
use std::path::Path;

use fs_err as fs;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tempfile::NamedTempFile;

use crate::error::{Result, TraceError};
use crate::storage::{validate_session_id, StorageConfig, INDEX_NAME};

use super::types::{IndexRecord, SessionRecord};

#[derive(Debug, Clone)]
pub struct SessionStore {
    storage: StorageConfig,
}

impl SessionStore {
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    pub fn storage(&self) -> &StorageConfig {
        &self.storage
    }

    pub fn load(&self, session_id: &str) -> Option<SessionRecord> {
        validate_session_id(session_id).ok()?;
        read_json(&self.storage.session_file(session_id))
    }

    pub fn save(&self, session_id: &str, record: &SessionRecord) -> Result<()> {
        validate_session_id(session_id)?;
        write_json_atomic(&self.storage.session_file(session_id), record)
    }

    /// Removes a record file. Deleting a record that does not exist is not an error.
    pub fn delete_record(&self, session_id: &str) -> Result<()> {
        validate_session_id(session_id)?;
        let path = self.storage.session_file(session_id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(TraceError::io("Failed to delete session record", &path, e)),
        }
    }

    pub fn load_index(&self) -> IndexRecord {
        read_json(&self.storage.index_file()).unwrap_or_default()
    }

    pub fn save_index(&self, index: &IndexRecord) -> Result<()> {
        write_json_atomic(&self.storage.index_file(), index)
    }

    /// Ids of every record file currently on disk (the index file excluded).
    pub fn list_session_ids(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(self.storage.sessions_dir()) else {
            return Vec::new();
        };

        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension().is_some_and(|e| e == "json") {
                    path.file_stem()
                        .and_then(|s| s.to_str())
                        .map(str::to_string)
                } else {
                    None
                }
            })
            .filter(|id| id != INDEX_NAME && validate_session_id(id).is_ok())
            .collect();
        ids.sort();
        ids
    }
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Option<T> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::debug!(path = %path.display(), error = %e, "Failed to read state file");
            }
            return None;
        }
    };

    if content.trim().is_empty() {
        return None;
    }

    match serde_json::from_str(&content) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "Ignoring corrupt state file");
            None
        }
    }
}

fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let content = serde_json::to_string_pretty(value)
        .map_err(|e| TraceError::json("Failed to serialize state", e))?;

    let parent_dir = path.parent().ok_or_else(|| {
        TraceError::io(
            "State file has no parent",
            path,
            std::io::ErrorKind::NotFound.into(),
        )
    })?;
    fs::create_dir_all(parent_dir)
        .map_err(|e| TraceError::io("Failed to create state directory", parent_dir, e))?;

    let mut temp_file = NamedTempFile::new_in(parent_dir)
        .map_err(|e| TraceError::io("Failed to create temp file", parent_dir, e))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| TraceError::io("Failed to write temp file", temp_file.path(), e))?;
    temp_file
        .flush()
        .map_err(|e| TraceError::io("Failed to flush temp file", temp_file.path(), e))?;
    temp_file
        .persist(path)
        .map_err(|e| TraceError::io("Failed to persist state file", path, e.error))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::types::{PendingSpan, SessionStatus};
    use chrono::Utc;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    fn make_record(session_id: &str) -> SessionRecord {
        let now = Utc::now();
        SessionRecord {
            session_id: session_id.to_string(),
            trace_id: "trace-1".to_string(),
            created_at: now,
            last_activity: now,
            cwd: "/project".to_string(),
            cwd_hash: "deadbeef".to_string(),
            ppid: 4242,
            git_branch: Some("main".to_string()),
            status: SessionStatus::Active,
            pending_spans: vec![PendingSpan {
                span_id: "span-1".to_string(),
                tool_name: "Bash".to_string(),
                started_at: now,
            }],
            metadata: BTreeMap::new(),
        }
    }

    fn store() -> (tempfile::TempDir, SessionStore) {
        let temp = tempdir().unwrap();
        let store = SessionStore::new(StorageConfig::with_root(temp.path().to_path_buf()));
        (temp, store)
    }

    #[test]
    fn test_load_missing_record_is_absent() {
        let (_temp, store) = store();
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn test_save_then_load_record() {
        let (_temp, store) = store();
        let record = make_record("s1");
        store.save("s1", &record).unwrap();
        assert_eq!(store.load("s1"), Some(record));
    }

    #[test]
    fn test_corrupt_record_is_absent() {
        let (_temp, store) = store();
        let path = store.storage().session_file("s1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{\"session_id\": \"s1\", \"trace").unwrap();
        assert!(store.load("s1").is_none());
    }

    #[test]
    fn test_empty_record_is_absent() {
        let (_temp, store) = store();
        let path = store.storage().session_file("s1");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "").unwrap();
        assert!(store.load("s1").is_none());
    }

    #[test]
    fn test_corrupt_index_is_empty() {
        let (_temp, store) = store();
        let path = store.storage().index_file();
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "{invalid json}").unwrap();
        assert_eq!(store.load_index(), IndexRecord::default());
    }

    #[test]
    fn test_save_index_round_trips() {
        let (_temp, store) = store();
        let mut index = IndexRecord::default();
        index.link("s1", "deadbeef", 4242);
        store.save_index(&index).unwrap();
        assert_eq!(store.load_index(), index);
    }

    #[test]
    fn test_delete_record_is_idempotent() {
        let (_temp, store) = store();
        store.save("s1", &make_record("s1")).unwrap();
        store.delete_record("s1").unwrap();
        assert!(store.load("s1").is_none());
        store.delete_record("s1").unwrap();
    }

    #[test]
    fn test_invalid_id_is_rejected_on_write() {
        let (_temp, store) = store();
        let record = make_record("index");
        assert!(matches!(
            store.save("index", &record),
            Err(TraceError::InvalidSessionId(_))
        ));
        assert!(store.load("../escape").is_none());
    }

    #[test]
    fn test_list_session_ids_skips_index_and_temp_files() {
        let (_temp, store) = store();
        store.save("s2", &make_record("s2")).unwrap();
        store.save("s1", &make_record("s1")).unwrap();
        store.save_index(&IndexRecord::default()).unwrap();
        fs::write(store.storage().sessions_dir().join(".tmpXYZ"), "partial").unwrap();

        assert_eq!(store.list_session_ids(), vec!["s1".to_string(), "s2".to_string()]);
    }

    #[test]
    fn test_save_leaves_no_temp_files_behind() {
        let (_temp, store) = store();
        store.save("s1", &make_record("s1")).unwrap();
        store.save("s1", &make_record("s1")).unwrap();
        let entries: Vec<_> = fs::read_dir(store.storage().sessions_dir())
            .unwrap()
            .flatten()
            .map(|e| e.file_name())
            .collect();
        assert_eq!(entries.len(), 1);
    }
}
