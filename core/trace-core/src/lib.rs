//! # trace-core
//!
//! Session correlation and trace lifecycle for Claude Code hooks, reporting to Langfuse.
//!
//! Every hook runs as a separate short-lived process. Tool hooks are not told which session
//! they belong to, so this crate keeps a small file-backed registry that maps a working
//! directory and parent pid back to a session and its trace.
//!
//! ## Design Principles
//!
//! - **Synchronous**: No async runtime. A hook process does one thing and exits.
//! - **Files are the shared state**: Every process is a peer; correctness comes from
//!   per-session and index locks, never from an in-memory cache.
//! - **Graceful degradation**: Missing or corrupt files read as absent. The [`Tracer`]
//!   surface never returns an error, so a broken backend cannot break a hook.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use trace_core::{init, SessionSource, TraceConfig};
//!
//! let tracer = init(&TraceConfig::from_env());
//! let source = SessionSource::Startup;
//! let trace_id = tracer.start_session_trace("abc123", &source, Default::default());
//! tracer.flush();
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod sanitize;
pub mod state;
pub mod storage;
pub mod tracer;

pub use backend::{LangfuseBackend, SpanCreate, SpanUpdate, TraceBackend, TraceCreate};
pub use config::TraceConfig;
pub use error::{Result, TraceError};
pub use state::{
    hash_cwd, NewSession, PendingSpan, ProcessContext, SessionRecord, SessionRegistry,
    SessionStatus, SweepStats, NOOP_ID,
};
pub use storage::StorageConfig;
pub use tracer::{init, NoopTracer, SessionSource, SessionTracer, Tracer};
