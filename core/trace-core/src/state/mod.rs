//! Session correlation state.
//!
//! Claude Code runs every hook as a fresh, short-lived process. Session-level hooks know
//! the session id; tool hooks only know where they run and who their parent is. This module
//! keeps the on-disk state that lets a tool hook find its session.
//!
//! # Layout
//!
//! ```text
//! {base}/sessions/{session_id}.json   one record per session
//! {base}/sessions/index.json          cwd hash → ids, parent pid → id
//! {base}/locks/{name}.lock            flock targets (session ids and "index")
//! ```
//!
//! # Module Structure
//!
//! - [`context`]: The calling process's cwd and parent pid
//! - [`lock`]: Named cross-process locks with bounded wait
//! - [`store`]: Defensive reads and atomic writes of records and the index
//! - [`registry`]: Registration, correlation, pending spans, and the stale sweep
//! - [`types`]: Serialized record and index types

pub mod context;
pub mod lock;
pub mod registry;
pub mod store;
pub mod types;

pub use context::{hash_cwd, ProcessContext};
pub use lock::{LockGuard, LockManager, DEFAULT_LOCK_TIMEOUT};
pub use registry::{NewSession, SessionRegistry, SweepStats};
pub use store::SessionStore;
pub use types::{IndexRecord, PendingSpan, SessionRecord, SessionStatus, NOOP_ID};
