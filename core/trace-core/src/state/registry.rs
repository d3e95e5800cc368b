//! Session registry: maps "a hook process that just ran" to the session it belongs to.
//!
//! Session-level hooks (start, prompt, stop) carry a session id. Tool hooks do not; they
//! only know their working directory and parent pid. The registry bridges the two:
//!
//! ```text
//! SessionStart ──register──▶ sessions/{id}.json + index.json (cwd_hash → ids, ppid → id)
//! PreToolUse ──find_session_for_tool──▶ index lookup ──▶ add_pending_span
//! PostToolUse ──find_session_for_tool──▶ index lookup ──▶ pop_pending_span (FIFO per tool)
//! SessionEnd ──mark_session_stopped──▶ status = stopped (record kept for resume)
//! ```
//!
//! # Locking discipline
//!
//! Every record mutation holds that session's lock for the full read-modify-write.
//! Every index mutation holds the `index` lock. The two are never held at the same time.
//!
//! # Known limitation
//!
//! Re-registration and reactivation add new cwd/ppid mappings without removing the old
//! ones. A session that moved directories keeps answering for its previous directory until
//! the stale sweep deletes it, and the "most recently active" fallback in
//! [`SessionRegistry::find_session_for_tool`] can then pick it over a sibling.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::debug;

use crate::error::Result;
use crate::storage::{validate_session_id, StorageConfig, INDEX_NAME};

use super::context::{hash_cwd, ProcessContext};
use super::lock::LockManager;
use super::store::SessionStore;
use super::types::{IndexRecord, PendingSpan, SessionRecord, SessionStatus};

/// Upper bound on sweep ages (about 100 years); keeps `2 * max_age` in chrono's range.
const MAX_SWEEP_AGE_HOURS: u64 = 24 * 365 * 100;

/// Inputs for [`SessionRegistry::register`].
#[derive(Debug, Clone, Default)]
pub struct NewSession {
    pub session_id: String,
    pub trace_id: String,
    /// Defaults to the registry's process cwd.
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub metadata: BTreeMap<String, Value>,
}

impl NewSession {
    pub fn new(session_id: impl Into<String>, trace_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            trace_id: trace_id.into(),
            ..Default::default()
        }
    }

    pub fn with_cwd(mut self, cwd: impl Into<String>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn with_git_branch(mut self, branch: Option<String>) -> Self {
        self.git_branch = branch;
        self
    }

    pub fn with_metadata(mut self, metadata: BTreeMap<String, Value>) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Results from a stale sweep.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepStats {
    /// Active records moved to `stale`.
    pub marked_stale: u32,
    /// Stopped or stale records deleted (file + index entries).
    pub removed: u32,
    /// Errors encountered; the sweep continues past them.
    pub errors: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SessionRegistry {
    store: SessionStore,
    locks: LockManager,
    context: ProcessContext,
}

impl SessionRegistry {
    /// Registry bound to the calling process's cwd and parent pid.
    pub fn new(storage: StorageConfig, lock_timeout: Duration) -> Self {
        Self::with_context(storage, lock_timeout, ProcessContext::current())
    }

    pub fn with_context(
        storage: StorageConfig,
        lock_timeout: Duration,
        context: ProcessContext,
    ) -> Self {
        Self {
            store: SessionStore::new(storage.clone()),
            locks: LockManager::new(storage, lock_timeout),
            context,
        }
    }

    pub fn context(&self) -> &ProcessContext {
        &self.context
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Registration
    // ─────────────────────────────────────────────────────────────────────────────

    /// Writes a fresh `active` record, then links it in the index.
    ///
    /// An existing record with the same id is replaced, pending spans included.
    pub fn register(&self, new: NewSession) -> Result<SessionRecord> {
        validate_session_id(&new.session_id)?;
        self.store.storage().ensure_dirs()?;

        let now = Utc::now();
        let cwd = new.cwd.unwrap_or_else(|| self.context.cwd.clone());
        let record = SessionRecord {
            session_id: new.session_id.clone(),
            trace_id: new.trace_id,
            created_at: now,
            last_activity: now,
            cwd_hash: hash_cwd(&cwd),
            cwd,
            ppid: self.context.ppid,
            git_branch: new.git_branch,
            status: SessionStatus::Active,
            pending_spans: Vec::new(),
            metadata: new.metadata,
        };

        {
            let _guard = self.locks.acquire(&record.session_id)?;
            self.store.save(&record.session_id, &record)?;
        }

        self.with_index(|index| {
            index.link(&record.session_id, &record.cwd_hash, record.ppid);
            true
        })?;

        debug!(
            session_id = %record.session_id,
            cwd_hash = %record.cwd_hash,
            ppid = record.ppid,
            "Registered session"
        );
        Ok(record)
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionRecord> {
        self.store.load(session_id)
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Correlation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Finds the active session this process belongs to, using only cwd and parent pid.
    ///
    /// 1. Sessions indexed under this cwd hash; if there are none, the session last
    ///    registered from this parent pid (if active).
    /// 2. Of the indexed sessions, only active ones count.
    /// 3. One active session → it. Several → the one whose ppid matches ours.
    /// 4. No ppid match → the most recently active. This last step is a heuristic and
    ///    can pick the wrong sibling when several sessions share a directory and parent.
    pub fn find_session_for_tool(&self) -> Option<SessionRecord> {
        let cwd_hash = self.context.cwd_hash();
        let ppid = self.context.ppid;
        let index = self.store.load_index();

        let session_ids: Vec<&str> = index.sessions_for_cwd(&cwd_hash).collect();
        if session_ids.is_empty() {
            let found = index
                .ppid_to_session
                .get(&ppid)
                .and_then(|sid| self.store.load(sid))
                .filter(SessionRecord::is_active);
            if found.is_none() {
                debug!(cwd_hash = %cwd_hash, ppid, "No session found for cwd or ppid");
            }
            return found;
        }

        let mut active: Vec<SessionRecord> = session_ids
            .into_iter()
            .filter_map(|sid| self.store.load(sid))
            .filter(SessionRecord::is_active)
            .collect();

        match active.len() {
            0 => {
                debug!(cwd_hash = %cwd_hash, "No active sessions in cwd");
                None
            }
            1 => active.pop(),
            _ => {
                if let Some(pos) = active.iter().position(|s| s.ppid == ppid) {
                    return Some(active.swap_remove(pos));
                }
                debug!(
                    cwd_hash = %cwd_hash,
                    ppid,
                    candidates = active.len(),
                    "No ppid match among sessions in cwd; using most recently active"
                );
                active.into_iter().max_by_key(|s| s.last_activity)
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Record mutation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Read-modify-write of one record under its lock; always bumps `last_activity`.
    ///
    /// Returns the updated record, or `None` if no record exists.
    pub fn update_session<F>(&self, session_id: &str, update: F) -> Result<Option<SessionRecord>>
    where
        F: FnOnce(&mut SessionRecord),
    {
        validate_session_id(session_id)?;
        let _guard = self.locks.acquire(session_id)?;
        let Some(mut record) = self.store.load(session_id) else {
            return Ok(None);
        };
        update(&mut record);
        record.last_activity = Utc::now();
        self.store.save(session_id, &record)?;
        Ok(Some(record))
    }

    /// Bumps `last_activity` only.
    pub fn touch(&self, session_id: &str) -> Result<Option<SessionRecord>> {
        self.update_session(session_id, |_| {})
    }

    /// Appends a pending span. Returns false if the session has no record.
    pub fn add_pending_span(
        &self,
        session_id: &str,
        span_id: &str,
        tool_name: &str,
    ) -> Result<bool> {
        let updated = self.update_session(session_id, |record| {
            record.pending_spans.push(PendingSpan {
                span_id: span_id.to_string(),
                tool_name: tool_name.to_string(),
                started_at: Utc::now(),
            });
        })?;
        Ok(updated.is_some())
    }

    /// Removes and returns the oldest pending span for `tool_name`.
    ///
    /// `None` means an end event arrived with no matching start; the record is left untouched.
    pub fn pop_pending_span(
        &self,
        session_id: &str,
        tool_name: &str,
    ) -> Result<Option<PendingSpan>> {
        validate_session_id(session_id)?;
        let _guard = self.locks.acquire(session_id)?;
        let Some(mut record) = self.store.load(session_id) else {
            return Ok(None);
        };

        let Some(pos) = record
            .pending_spans
            .iter()
            .position(|span| span.tool_name == tool_name)
        else {
            debug!(session_id = %session_id, tool = %tool_name, "No pending span for tool");
            return Ok(None);
        };

        let span = record.pending_spans.remove(pos);
        record.last_activity = Utc::now();
        self.store.save(session_id, &record)?;
        Ok(Some(span))
    }

    /// Returns false if the session has no record.
    pub fn mark_session_stopped(&self, session_id: &str) -> Result<bool> {
        let updated = self.update_session(session_id, |record| {
            record.status = SessionStatus::Stopped;
        })?;
        if updated.is_some() {
            debug!(session_id = %session_id, "Marked session stopped");
        }
        Ok(updated.is_some())
    }

    /// Makes an existing session active again from this process's cwd and parent pid.
    ///
    /// Returns the record's trace id, or `None` if no record exists. Old index mappings are
    /// left in place (see the module docs).
    pub fn reactivate_session(&self, session_id: &str) -> Result<Option<String>> {
        let cwd = self.context.cwd.clone();
        let cwd_hash = hash_cwd(&cwd);
        let ppid = self.context.ppid;

        let updated = self.update_session(session_id, |record| {
            record.status = SessionStatus::Active;
            record.ppid = ppid;
            record.cwd = cwd;
            record.cwd_hash = cwd_hash.clone();
        })?;
        let Some(record) = updated else {
            return Ok(None);
        };

        if let Err(e) = self.with_index(|index| {
            index.link(session_id, &cwd_hash, ppid);
            true
        }) {
            debug!(session_id = %session_id, error = %e, "Failed to update index on reactivate");
        }

        debug!(session_id = %session_id, ppid, cwd_hash = %cwd_hash, "Reactivated session");
        Ok(Some(record.trace_id))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Stale sweep
    // ─────────────────────────────────────────────────────────────────────────────

    /// Active records idle longer than `max_age_hours` become stale; stopped or stale
    /// records idle longer than twice that are deleted.
    pub fn cleanup_stale_sessions(&self, max_age_hours: u64) -> SweepStats {
        let hours = max_age_hours.min(MAX_SWEEP_AGE_HOURS) as i64;
        self.cleanup_stale_sessions_at(Utc::now(), chrono::Duration::hours(hours))
    }

    /// The sweep evaluated at `now`.
    ///
    /// The directory scan takes no lock. Each candidate is re-read under its own lock
    /// before it transitions, so a concurrent reactivation or new activity wins.
    pub fn cleanup_stale_sessions_at(
        &self,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> SweepStats {
        let mut stats = SweepStats::default();
        let delete_after = max_age * 2;

        for session_id in self.store.list_session_ids() {
            let Some(record) = self.store.load(&session_id) else {
                continue;
            };
            let idle = record.idle_for(now);

            match record.status {
                SessionStatus::Active if idle > max_age => {
                    match self.mark_stale_if_idle(&session_id, now, max_age) {
                        Ok(true) => {
                            stats.marked_stale += 1;
                            debug!(
                                session_id = %session_id,
                                idle_hours = idle.num_hours(),
                                "Marked session stale"
                            );
                        }
                        Ok(false) => {}
                        Err(e) => stats.errors.push(format!("{}: {}", session_id, e)),
                    }
                }
                SessionStatus::Stopped | SessionStatus::Stale if idle > delete_after => {
                    match self.remove_if_idle(&session_id, now, delete_after) {
                        Ok(true) => {
                            stats.removed += 1;
                            debug!(session_id = %session_id, "Removed old session");
                        }
                        Ok(false) => {}
                        Err(e) => stats.errors.push(format!("{}: {}", session_id, e)),
                    }
                }
                _ => {}
            }
        }

        stats
    }

    fn mark_stale_if_idle(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        max_age: chrono::Duration,
    ) -> Result<bool> {
        let _guard = self.locks.acquire(session_id)?;
        let Some(mut record) = self.store.load(session_id) else {
            return Ok(false);
        };
        if !record.is_active() || record.idle_for(now) <= max_age {
            return Ok(false);
        }
        record.status = SessionStatus::Stale;
        record.last_activity = Utc::now();
        self.store.save(session_id, &record)?;
        Ok(true)
    }

    fn remove_if_idle(
        &self,
        session_id: &str,
        now: DateTime<Utc>,
        delete_after: chrono::Duration,
    ) -> Result<bool> {
        {
            let guard = self.locks.acquire(session_id)?;
            let Some(record) = self.store.load(session_id) else {
                return Ok(false);
            };
            if record.is_active() || record.idle_for(now) <= delete_after {
                return Ok(false);
            }
            self.store.delete_record(session_id)?;
            guard.release_and_remove();
        }

        self.with_index(|index| index.purge(session_id))?;
        Ok(true)
    }

    /// Read-modify-write of the index under the index lock. The closure returns whether
    /// it changed anything; unchanged indexes are not rewritten.
    fn with_index<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(&mut IndexRecord) -> bool,
    {
        let _guard = self.locks.acquire(INDEX_NAME)?;
        let mut index = self.store.load_index();
        if update(&mut index) {
            self.store.save_index(&index)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::{tempdir, TempDir};

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn registry_at(temp: &TempDir, cwd: &str, ppid: u32) -> SessionRegistry {
        SessionRegistry::with_context(
            StorageConfig::with_root(temp.path().to_path_buf()),
            TIMEOUT,
            ProcessContext::new(cwd, ppid),
        )
    }

    #[test]
    fn test_register_writes_record_and_index() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);

        let record = registry
            .register(NewSession::new("s1", "t1").with_git_branch(Some("main".to_string())))
            .unwrap();

        assert_eq!(record.cwd, "/a");
        assert_eq!(record.ppid, 100);
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(registry.get_session("s1"), Some(record.clone()));

        let index = registry.store().load_index();
        assert_eq!(index.sessions_for_cwd(&hash_cwd("/a")).collect::<Vec<_>>(), vec!["s1"]);
        assert_eq!(index.ppid_to_session.get(&100).map(String::as_str), Some("s1"));
    }

    #[test]
    fn test_register_uses_explicit_cwd() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/elsewhere", 100);
        let record = registry.register(NewSession::new("s1", "t1").with_cwd("/a")).unwrap();
        assert_eq!(record.cwd_hash, hash_cwd("/a"));
        assert_eq!(registry_at(&temp, "/a", 999).find_session_for_tool().unwrap().session_id, "s1");
    }

    #[test]
    fn test_register_rejects_invalid_id() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        assert!(registry.register(NewSession::new("../x", "t1")).is_err());
        assert!(registry.store().load_index().cwd_to_sessions.is_empty());
    }

    #[test]
    fn test_find_falls_back_to_ppid_when_cwd_unknown() {
        let temp = tempdir().unwrap();
        registry_at(&temp, "/a", 100).register(NewSession::new("s1", "t1")).unwrap();

        let found = registry_at(&temp, "/a/subdir", 100).find_session_for_tool();
        assert_eq!(found.map(|s| s.session_id), Some("s1".to_string()));

        assert!(registry_at(&temp, "/a/subdir", 101).find_session_for_tool().is_none());
    }

    #[test]
    fn test_ppid_fallback_ignores_stopped_sessions() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("s1", "t1")).unwrap();
        registry.mark_session_stopped("s1").unwrap();

        assert!(registry_at(&temp, "/b", 100).find_session_for_tool().is_none());
    }

    #[test]
    fn test_known_cwd_without_active_sessions_skips_ppid_fallback() {
        let temp = tempdir().unwrap();
        let a = registry_at(&temp, "/a", 100);
        a.register(NewSession::new("s1", "t1")).unwrap();
        a.mark_session_stopped("s1").unwrap();
        registry_at(&temp, "/b", 200).register(NewSession::new("s2", "t2")).unwrap();

        // cwd /a has index entries, none active: ppid 200 → s2 is not consulted
        assert!(registry_at(&temp, "/a", 200).find_session_for_tool().is_none());
    }

    #[test]
    fn test_most_recent_wins_without_ppid_match() {
        let temp = tempdir().unwrap();
        registry_at(&temp, "/a", 100).register(NewSession::new("old", "t1")).unwrap();
        thread::sleep(Duration::from_millis(10));
        registry_at(&temp, "/a", 200).register(NewSession::new("new", "t2")).unwrap();

        let found = registry_at(&temp, "/a", 300).find_session_for_tool().unwrap();
        assert_eq!(found.session_id, "new");

        thread::sleep(Duration::from_millis(10));
        registry_at(&temp, "/a", 100).touch("old").unwrap();
        let found = registry_at(&temp, "/a", 300).find_session_for_tool().unwrap();
        assert_eq!(found.session_id, "old");
    }

    #[test]
    fn test_update_session_bumps_activity() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        let before = registry.register(NewSession::new("s1", "t1")).unwrap();
        thread::sleep(Duration::from_millis(5));

        let after = registry
            .update_session("s1", |r| r.git_branch = Some("feature".to_string()))
            .unwrap()
            .unwrap();
        assert!(after.last_activity > before.last_activity);
        assert_eq!(after.git_branch.as_deref(), Some("feature"));
    }

    #[test]
    fn test_update_missing_session_is_none() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        assert!(registry.update_session("missing", |_| {}).unwrap().is_none());
        assert!(!registry.add_pending_span("missing", "span", "Bash").unwrap());
        assert!(!registry.mark_session_stopped("missing").unwrap());
        assert!(registry.reactivate_session("missing").unwrap().is_none());
    }

    #[test]
    fn test_pop_pending_span_matches_tool_name() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("s1", "t1")).unwrap();
        registry.add_pending_span("s1", "read-1", "Read").unwrap();
        registry.add_pending_span("s1", "bash-1", "Bash").unwrap();

        let popped = registry.pop_pending_span("s1", "Bash").unwrap().unwrap();
        assert_eq!(popped.span_id, "bash-1");
        assert!(registry.pop_pending_span("s1", "Bash").unwrap().is_none());

        let remaining = registry.get_session("s1").unwrap().pending_spans;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].span_id, "read-1");
    }

    #[test]
    fn test_orphan_pop_leaves_record_untouched() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        let before = registry.register(NewSession::new("s1", "t1")).unwrap();
        assert!(registry.pop_pending_span("s1", "Write").unwrap().is_none());
        assert_eq!(registry.get_session("s1"), Some(before));
    }

    #[test]
    fn test_reactivate_refreshes_context() {
        let temp = tempdir().unwrap();
        registry_at(&temp, "/a", 100).register(NewSession::new("s1", "t1")).unwrap();
        registry_at(&temp, "/a", 100).mark_session_stopped("s1").unwrap();

        let resumed = registry_at(&temp, "/b", 200);
        assert_eq!(resumed.reactivate_session("s1").unwrap().as_deref(), Some("t1"));

        let record = resumed.get_session("s1").unwrap();
        assert_eq!(record.status, SessionStatus::Active);
        assert_eq!(record.ppid, 200);
        assert_eq!(record.cwd, "/b");
        assert_eq!(record.cwd_hash, hash_cwd("/b"));

        let index = resumed.store().load_index();
        assert_eq!(index.ppid_to_session.get(&200).map(String::as_str), Some("s1"));
        assert!(index.sessions_for_cwd(&hash_cwd("/b")).any(|s| s == "s1"));
    }

    #[test]
    fn test_reactivate_keeps_old_mappings() {
        let temp = tempdir().unwrap();
        registry_at(&temp, "/a", 100).register(NewSession::new("s1", "t1")).unwrap();
        registry_at(&temp, "/b", 200).reactivate_session("s1").unwrap();

        let index = registry_at(&temp, "/b", 200).store().load_index();
        assert!(index.sessions_for_cwd(&hash_cwd("/a")).any(|s| s == "s1"));
        assert_eq!(index.ppid_to_session.get(&100).map(String::as_str), Some("s1"));

        // The stale /a mapping still resolves to the (now /b) session.
        let found = registry_at(&temp, "/a", 100).find_session_for_tool().unwrap();
        assert_eq!(found.session_id, "s1");
    }

    #[test]
    fn test_sweep_marks_idle_active_sessions_stale() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("s1", "t1")).unwrap();

        let stats = registry.cleanup_stale_sessions_at(
            Utc::now() + chrono::Duration::hours(25),
            chrono::Duration::hours(24),
        );
        assert_eq!(stats.marked_stale, 1);
        assert_eq!(stats.removed, 0);
        assert_eq!(registry.get_session("s1").unwrap().status, SessionStatus::Stale);
    }

    #[test]
    fn test_sweep_leaves_recent_sessions_alone() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("active", "t1")).unwrap();
        registry.register(NewSession::new("stopped", "t2")).unwrap();
        registry.mark_session_stopped("stopped").unwrap();

        let stats = registry.cleanup_stale_sessions_at(
            Utc::now() + chrono::Duration::hours(23),
            chrono::Duration::hours(24),
        );
        assert_eq!(stats, SweepStats::default());
        assert_eq!(registry.get_session("active").unwrap().status, SessionStatus::Active);
        assert_eq!(registry.get_session("stopped").unwrap().status, SessionStatus::Stopped);
    }

    #[test]
    fn test_sweep_deletes_old_stopped_sessions_and_index_entries() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("s1", "t1")).unwrap();
        registry.register(NewSession::new("s2", "t2")).unwrap();
        registry.mark_session_stopped("s1").unwrap();

        let stats = registry.cleanup_stale_sessions_at(
            Utc::now() + chrono::Duration::hours(49),
            chrono::Duration::hours(24),
        );
        assert_eq!(stats.removed, 1);
        assert_eq!(stats.marked_stale, 1);
        assert!(registry.get_session("s1").is_none());
        assert!(!registry.store().storage().lock_file("s1").exists());

        let index = registry.store().load_index();
        assert!(index.sessions_for_cwd(&hash_cwd("/a")).all(|s| s != "s1"));
        assert!(index.ppid_to_session.values().all(|s| s != "s1"));
    }

    #[test]
    fn test_sweep_at_fixed_instant_is_idempotent() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.register(NewSession::new("s1", "t1")).unwrap();
        let at = Utc::now() + chrono::Duration::hours(30);
        let max_age = chrono::Duration::hours(24);

        assert_eq!(registry.cleanup_stale_sessions_at(at, max_age).marked_stale, 1);
        let snapshot = registry.get_session("s1");
        assert_eq!(registry.cleanup_stale_sessions_at(at, max_age), SweepStats::default());
        assert_eq!(registry.get_session("s1"), snapshot);
    }

    #[test]
    fn test_sweep_skips_corrupt_files() {
        let temp = tempdir().unwrap();
        let registry = registry_at(&temp, "/a", 100);
        registry.store().storage().ensure_dirs().unwrap();
        fs_err::write(registry.store().storage().session_file("broken"), "{nope").unwrap();

        let stats = registry.cleanup_stale_sessions(0);
        assert!(stats.errors.is_empty());
        assert!(registry.store().storage().session_file("broken").exists());
    }

    #[test]
    fn test_concurrent_pending_spans_are_not_lost() {
        let temp = tempdir().unwrap();
        registry_at(&temp, "/a", 100).register(NewSession::new("s1", "t1")).unwrap();

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let registry = registry_at(&temp, "/a", 100);
                thread::spawn(move || {
                    for n in 0..10 {
                        let span_id = format!("span-{}-{}", worker, n);
                        assert!(registry.add_pending_span("s1", &span_id, "Bash").unwrap());
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let record = registry_at(&temp, "/a", 100).get_session("s1").unwrap();
        assert_eq!(record.pending_spans.len(), 40);
    }

    #[test]
    fn test_concurrent_registrations_all_reach_index() {
        let temp = tempdir().unwrap();
        let handles: Vec<_> = (0..6u32)
            .map(|n| {
                let registry = registry_at(&temp, "/shared", 1000 + n);
                thread::spawn(move || {
                    registry
                        .register(NewSession::new(format!("s{}", n), format!("t{}", n)))
                        .unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let index = registry_at(&temp, "/shared", 1).store().load_index();
        assert_eq!(index.sessions_for_cwd(&hash_cwd("/shared")).count(), 6);
        assert_eq!(index.ppid_to_session.len(), 6);
    }
}
