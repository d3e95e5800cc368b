//! Storage configuration and path management for the session registry.
//!
//! Every on-disk path is decided here:
//!
//! ```text
//! <root>/
//! ├── sessions/
//! │   ├── <session_id>.json   # one SessionRecord
//! │   └── index.json          # cwd-hash and ppid lookup tables
//! ├── locks/
//! │   ├── <session_id>.lock   # per-session advisory lock
//! │   └── index.lock          # index advisory lock
//! └── logs/                   # hook logs (written by trace-hook)
//! ```
//!
//! Production code uses `StorageConfig::from_home()` (or the configured state dir), which
//! defaults to `~/.claude/langfuse/`.
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

use fs_err as fs;

use crate::error::{Result, TraceError};

/// Lock name and file stem reserved for the shared index.
pub const INDEX_NAME: &str = "index";

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl StorageConfig {
    /// Default layout under `~/.claude/langfuse`.
    pub fn from_home() -> Result<Self> {
        let home = dirs::home_dir().ok_or(TraceError::HomeDirNotFound)?;
        Ok(Self::with_root(home.join(".claude").join("langfuse")))
    }

    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Directories
    // ─────────────────────────────────────────────────────────────────────────────

    pub fn sessions_dir(&self) -> PathBuf {
        self.root.join("sessions")
    }

    pub fn locks_dir(&self) -> PathBuf {
        self.root.join("locks")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    /// Creates `sessions/` and `locks/` if missing.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.sessions_dir(), self.locks_dir()] {
            fs::create_dir_all(&dir)
                .map_err(|e| TraceError::io("Failed to create directory", &dir, e))?;
        }
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Files
    // ─────────────────────────────────────────────────────────────────────────────

    /// Path to a session record. Callers must validate `session_id` first.
    pub fn session_file(&self, session_id: &str) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", session_id))
    }

    pub fn index_file(&self) -> PathBuf {
        self.sessions_dir().join(format!("{}.json", INDEX_NAME))
    }

    pub fn lock_file(&self, name: &str) -> PathBuf {
        self.locks_dir().join(format!("{}.lock", name))
    }
}

/// Rejects session ids that cannot safely become a file name.
///
/// Ids come from the host tool's hook payloads, so they are treated as untrusted:
/// no separators, no parent references, no NUL, and never the reserved index name.
pub fn validate_session_id(session_id: &str) -> Result<()> {
    let invalid = session_id.is_empty()
        || session_id == INDEX_NAME
        || session_id == "."
        || session_id.contains("..")
        || session_id.contains(['/', '\\', '\0']);
    if invalid {
        return Err(TraceError::InvalidSessionId(session_id.to_string()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_layout_under_root() {
        let storage = StorageConfig::with_root(PathBuf::from("/tmp/trace-test"));
        assert_eq!(
            storage.session_file("abc"),
            PathBuf::from("/tmp/trace-test/sessions/abc.json")
        );
        assert_eq!(
            storage.index_file(),
            PathBuf::from("/tmp/trace-test/sessions/index.json")
        );
        assert_eq!(
            storage.lock_file("index"),
            PathBuf::from("/tmp/trace-test/locks/index.lock")
        );
        assert_eq!(storage.logs_dir(), PathBuf::from("/tmp/trace-test/logs"));
    }

    #[test]
    fn test_ensure_dirs_creates_sessions_and_locks() {
        let temp = tempdir().unwrap();
        let storage = StorageConfig::with_root(temp.path().join("base"));
        storage.ensure_dirs().unwrap();
        assert!(storage.sessions_dir().is_dir());
        assert!(storage.locks_dir().is_dir());
    }

    #[test]
    fn test_validate_session_id_accepts_uuid() {
        assert!(validate_session_id("3f2a9c1e-8b7d-4e6f-a5c4-1b2d3e4f5a6b").is_ok());
    }

    #[test]
    fn test_validate_session_id_rejects_unsafe_names() {
        for bad in ["", "index", ".", "..", "../etc", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(
                    validate_session_id(bad),
                    Err(TraceError::InvalidSessionId(_))
                ),
                "expected {:?} to be rejected",
                bad
            );
        }
    }
}
