//! Serialized registry types.
//!
//! One [`SessionRecord`] per file in `sessions/`, one [`IndexRecord`] in `sessions/index.json`.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Trace id used when tracing is disabled or the backend refused to create a trace.
pub const NOOP_ID: &str = "noop";

// -----------------------------------------------------------------------------
// Record lifecycle
//
// register              -> active
// stop event            active -> stopped
// reactivate            stopped|stale|active -> active
// sweep (> max age)     active -> stale
// sweep (> 2x max age)  stopped|stale -> deleted
// -----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Stopped,
    Stale,
}

impl SessionStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Active => "active",
            SessionStatus::Stopped => "stopped",
            SessionStatus::Stale => "stale",
        }
    }
}

/// A tool span whose start was recorded and whose end has not arrived yet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingSpan {
    pub span_id: String,
    pub tool_name: String,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionRecord {
    pub session_id: String,
    pub trace_id: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    pub cwd: String,
    pub cwd_hash: String,
    pub ppid: u32,
    #[serde(default)]
    pub git_branch: Option<String>,
    pub status: SessionStatus,
    /// Oldest first.
    #[serde(default)]
    pub pending_spans: Vec<PendingSpan>,
    /// Extra descriptive fields supplied at registration.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub metadata: BTreeMap<String, Value>,
}

impl SessionRecord {
    pub fn is_active(&self) -> bool {
        self.status == SessionStatus::Active
    }

    pub fn has_trace(&self) -> bool {
        !self.trace_id.is_empty() && self.trace_id != NOOP_ID
    }

    /// Time since the last mutation, clamped at zero for records written by a skewed clock.
    pub fn idle_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        now.signed_duration_since(self.last_activity)
            .max(chrono::Duration::zero())
    }
}

/// Shared lookup tables for correlating tool hooks with sessions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// cwd hash → session ids whose record currently carries that hash.
    #[serde(default)]
    pub cwd_to_sessions: BTreeMap<String, BTreeSet<String>>,
    /// Parent pid → most recently registered or reactivated session.
    #[serde(default)]
    pub ppid_to_session: BTreeMap<u32, String>,
}

impl IndexRecord {
    pub fn sessions_for_cwd(&self, cwd_hash: &str) -> impl Iterator<Item = &str> {
        self.cwd_to_sessions
            .get(cwd_hash)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Installs both mappings for `session_id`. The ppid mapping is last-write-wins.
    pub fn link(&mut self, session_id: &str, cwd_hash: &str, ppid: u32) {
        self.cwd_to_sessions
            .entry(cwd_hash.to_string())
            .or_default()
            .insert(session_id.to_string());
        self.ppid_to_session.insert(ppid, session_id.to_string());
    }

    /// Removes every mapping that points at `session_id`. Returns true if anything changed.
    pub fn purge(&mut self, session_id: &str) -> bool {
        let mut changed = false;
        self.cwd_to_sessions.retain(|_, ids| {
            changed |= ids.remove(session_id);
            !ids.is_empty()
        });
        let before = self.ppid_to_session.len();
        self.ppid_to_session.retain(|_, sid| sid != session_id);
        changed || self.ppid_to_session.len() != before
    }
}
