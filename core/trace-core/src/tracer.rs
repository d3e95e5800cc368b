//! Trace lifecycle for Claude Code hook events.
//!
//! Each hook process builds one [`Tracer`] via [`init`] and calls exactly one operation on
//! it. Nothing here returns an error: a failing backend, a corrupt state file, or a lock
//! timeout is logged at `warn` and turned into the `"noop"` sentinel. Hooks must behave
//! the same whether tracing works or not.
//!
//! ```text
//! SessionStart      ─▶ start_session_trace  ─▶ backend trace + registry.register
//! UserPromptSubmit  ─▶ log_user_prompt      ─▶ closed span on the session's trace
//! PreToolUse        ─▶ start_tool_span      ─▶ open span + pending span entry
//! PostToolUse       ─▶ end_tool_span        ─▶ pop pending entry + close span
//! SessionEnd        ─▶ end_session_trace    ─▶ trace metadata + flush + mark stopped
//! ```

use std::path::Path;

use chrono::Utc;
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::backend::{LangfuseBackend, SpanCreate, SpanUpdate, TraceBackend, TraceCreate};
use crate::config::{TraceConfig, DEFAULT_STALE_HOURS};
use crate::error::Result;
use crate::sanitize::{sanitize_input, sanitize_output, truncate_chars, PROMPT_LIMIT};
use crate::state::{NewSession, SessionRegistry, NOOP_ID};

pub const TRACE_NAME: &str = "claude-code-session";
pub const TRACE_TAG: &str = "claude-code";
pub const PROMPT_SPAN_NAME: &str = "user-prompt";

/// Why a session started, as reported by the SessionStart hook.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionSource {
    Startup,
    Resume,
    Clear,
    Compact,
    Other(String),
}

impl SessionSource {
    pub fn parse(source: &str) -> Self {
        match source {
            "startup" => SessionSource::Startup,
            "resume" => SessionSource::Resume,
            "clear" => SessionSource::Clear,
            "compact" => SessionSource::Compact,
            other => SessionSource::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SessionSource::Startup => "startup",
            SessionSource::Resume => "resume",
            SessionSource::Clear => "clear",
            SessionSource::Compact => "compact",
            SessionSource::Other(other) => other,
        }
    }

    /// Continues an existing session: anything except a fresh startup or a cleared context.
    pub fn is_resume_like(&self) -> bool {
        !matches!(self, SessionSource::Startup | SessionSource::Clear)
    }
}

impl From<&str> for SessionSource {
    fn from(source: &str) -> Self {
        SessionSource::parse(source)
    }
}

/// The operations hooks call. Implementations never fail; ids are `"noop"` when nothing
/// was recorded.
pub trait Tracer: Send + Sync {
    /// False for the inert implementation.
    fn is_enabled(&self) -> bool;

    /// Returns the trace id, reusing the existing one for resume-like sources.
    fn start_session_trace(
        &self,
        session_id: &str,
        source: &SessionSource,
        metadata: Map<String, Value>,
    ) -> String;

    /// Returns the prompt span id.
    fn log_user_prompt(
        &self,
        session_id: &str,
        prompt: &str,
        metadata: Map<String, Value>,
    ) -> String;

    /// Returns the tool span id.
    fn start_tool_span(&self, tool_name: &str, input: &Value) -> String;

    fn end_tool_span(&self, tool_name: &str, result: &Value);

    fn end_session_trace(&self, session_id: &str, metadata: Map<String, Value>);

    fn flush(&self);
}

/// Builds the tracer for this process: [`SessionTracer`] over Langfuse when configured,
/// otherwise [`NoopTracer`].
pub fn init(config: &TraceConfig) -> Box<dyn Tracer> {
    if !config.is_available() {
        debug!("Langfuse not configured; tracing disabled");
        return Box::new(NoopTracer);
    }

    let storage = match config.storage() {
        Ok(storage) => storage,
        Err(e) => {
            warn!(error = %e, "Failed to resolve state directory; tracing disabled");
            return Box::new(NoopTracer);
        }
    };

    let backend = match LangfuseBackend::new(config) {
        Ok(backend) => backend,
        Err(e) => {
            warn!(error = %e, "Failed to initialize Langfuse client; tracing disabled");
            return Box::new(NoopTracer);
        }
    };

    let registry = SessionRegistry::new(storage, config.lock_timeout);
    debug!(host = %config.host, "Langfuse client initialized");
    Box::new(
        SessionTracer::new(backend, registry)
            .with_user_id(config.user_id.clone())
            .with_stale_hours(config.stale_hours),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Inert implementation
// ─────────────────────────────────────────────────────────────────────────────

/// Does nothing and touches nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTracer;

impl Tracer for NoopTracer {
    fn is_enabled(&self) -> bool {
        false
    }

    fn start_session_trace(&self, _: &str, _: &SessionSource, _: Map<String, Value>) -> String {
        NOOP_ID.to_string()
    }

    fn log_user_prompt(&self, _: &str, _: &str, _: Map<String, Value>) -> String {
        NOOP_ID.to_string()
    }

    fn start_tool_span(&self, _: &str, _: &Value) -> String {
        NOOP_ID.to_string()
    }

    fn end_tool_span(&self, _: &str, _: &Value) {}

    fn end_session_trace(&self, _: &str, _: Map<String, Value>) {}

    fn flush(&self) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Registry-backed implementation
// ─────────────────────────────────────────────────────────────────────────────

pub struct SessionTracer<B> {
    backend: B,
    registry: SessionRegistry,
    user_id: String,
    stale_hours: u64,
}

impl<B: TraceBackend> SessionTracer<B> {
    pub fn new(backend: B, registry: SessionRegistry) -> Self {
        Self {
            backend,
            registry,
            user_id: "unknown".to_string(),
            stale_hours: DEFAULT_STALE_HOURS,
        }
    }

    pub fn with_user_id(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }

    pub fn with_stale_hours(mut self, hours: u64) -> Self {
        self.stale_hours = hours;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    fn try_start_session(
        &self,
        session_id: &str,
        source: &SessionSource,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        if source.is_resume_like() {
            let existing = self.registry.get_session(session_id);
            if existing.is_some_and(|record| record.has_trace()) {
                if let Some(trace_id) = self.registry.reactivate_session(session_id)? {
                    debug!(
                        session_id = %session_id,
                        source = source.as_str(),
                        trace_id = %trace_id,
                        "Resumed session trace"
                    );
                    return Ok(trace_id);
                }
            }
        }

        let cwd = self.registry.context().cwd.clone();
        let project = Path::new(&cwd)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let git_branch = metadata
            .get("git_branch")
            .and_then(Value::as_str)
            .map(str::to_string);

        let mut trace_metadata = Map::new();
        trace_metadata.insert("source".to_string(), json!(source.as_str()));
        trace_metadata.insert("cwd".to_string(), json!(cwd));
        trace_metadata.insert("project".to_string(), json!(project));
        trace_metadata.insert("started_at".to_string(), json!(Utc::now().to_rfc3339()));
        trace_metadata.extend(metadata);

        let trace_id = self.backend.create_trace(TraceCreate {
            name: TRACE_NAME.to_string(),
            session_id: session_id.to_string(),
            user_id: self.user_id.clone(),
            metadata: trace_metadata,
            tags: vec![TRACE_TAG.to_string(), source.as_str().to_string()],
        })?;

        let session = NewSession::new(session_id, trace_id.as_str())
            .with_git_branch(git_branch)
            .with_metadata([("source".to_string(), json!(source.as_str()))].into_iter().collect());
        self.registry.register(session)?;

        let stats = self.registry.cleanup_stale_sessions(self.stale_hours);
        if stats.marked_stale > 0 || stats.removed > 0 || !stats.errors.is_empty() {
            debug!(
                marked_stale = stats.marked_stale,
                removed = stats.removed,
                errors = stats.errors.len(),
                "Swept stale sessions"
            );
        }

        debug!(session_id = %session_id, trace_id = %trace_id, "Started session trace");
        Ok(trace_id)
    }

    fn try_log_prompt(
        &self,
        session_id: &str,
        prompt: &str,
        metadata: Map<String, Value>,
    ) -> Result<String> {
        let Some(record) = self.registry.get_session(session_id) else {
            debug!(session_id = %session_id, "No session record for prompt");
            return Ok(NOOP_ID.to_string());
        };
        if !record.has_trace() {
            return Ok(NOOP_ID.to_string());
        }

        let mut span_metadata = Map::new();
        span_metadata.insert("prompt_length".to_string(), json!(prompt.chars().count()));
        span_metadata.insert("timestamp".to_string(), json!(Utc::now().to_rfc3339()));
        span_metadata.extend(metadata);

        let span_id = self.backend.create_span(SpanCreate {
            trace_id: record.trace_id,
            name: PROMPT_SPAN_NAME.to_string(),
            input: json!({ "prompt": truncate_chars(prompt, PROMPT_LIMIT) }),
            metadata: span_metadata,
            end_time: Some(Utc::now()),
        })?;

        self.registry.touch(session_id)?;
        debug!(session_id = %session_id, span_id = %span_id, "Logged user prompt");
        Ok(span_id)
    }

    fn try_start_tool(&self, tool_name: &str, input: &Value) -> Result<String> {
        let Some(record) = self.registry.find_session_for_tool() else {
            debug!(tool = %tool_name, "No session found for tool");
            return Ok(NOOP_ID.to_string());
        };
        if !record.has_trace() {
            return Ok(NOOP_ID.to_string());
        }

        let mut metadata = Map::new();
        metadata.insert("tool_name".to_string(), json!(tool_name));
        metadata.insert("started_at".to_string(), json!(Utc::now().to_rfc3339()));

        let span_id = self.backend.create_span(SpanCreate {
            trace_id: record.trace_id,
            name: format!("tool:{}", tool_name),
            input: sanitize_input(input),
            metadata,
            end_time: None,
        })?;

        let added = self
            .registry
            .add_pending_span(&record.session_id, &span_id, tool_name)?;
        if !added {
            // Record swept between lookup and add; nothing could ever close this span.
            debug!(
                session_id = %record.session_id,
                tool = %tool_name,
                "Session vanished before span was recorded"
            );
            return Ok(NOOP_ID.to_string());
        }
        debug!(
            session_id = %record.session_id,
            tool = %tool_name,
            span_id = %span_id,
            "Started tool span"
        );
        Ok(span_id)
    }

    fn try_end_tool(&self, tool_name: &str, result: &Value) -> Result<()> {
        let Some(record) = self.registry.find_session_for_tool() else {
            debug!(tool = %tool_name, "No session found for tool result");
            return Ok(());
        };
        if !record.has_trace() {
            return Ok(());
        }

        let Some(pending) = self.registry.pop_pending_span(&record.session_id, tool_name)? else {
            return Ok(());
        };

        self.backend.update_span(SpanUpdate {
            span_id: pending.span_id.clone(),
            trace_id: record.trace_id,
            output: sanitize_output(result),
            end_time: Utc::now(),
        })?;
        debug!(
            session_id = %record.session_id,
            tool = %tool_name,
            span_id = %pending.span_id,
            "Ended tool span"
        );
        Ok(())
    }

    fn try_end_session(&self, session_id: &str, metadata: Map<String, Value>) -> Result<()> {
        let Some(record) = self.registry.get_session(session_id) else {
            debug!(session_id = %session_id, "No session record to end");
            return Ok(());
        };

        if record.has_trace() {
            let mut closing = Map::new();
            closing.insert("ended_at".to_string(), json!(Utc::now().to_rfc3339()));
            closing.extend(metadata);
            self.backend.update_trace(&record.trace_id, closing)?;
        }

        if let Err(e) = self.backend.flush() {
            warn!(session_id = %session_id, error = %e, "Failed to flush trace events");
        }

        self.registry.mark_session_stopped(session_id)?;
        debug!(session_id = %session_id, trace_id = %record.trace_id, "Ended session trace");
        Ok(())
    }
}

impl<B: TraceBackend> Tracer for SessionTracer<B> {
    fn is_enabled(&self) -> bool {
        true
    }

    fn start_session_trace(
        &self,
        session_id: &str,
        source: &SessionSource,
        metadata: Map<String, Value>,
    ) -> String {
        self.try_start_session(session_id, source, metadata)
            .unwrap_or_else(|e| {
                warn!(session_id = %session_id, error = %e, "Failed to start session trace");
                NOOP_ID.to_string()
            })
    }

    fn log_user_prompt(
        &self,
        session_id: &str,
        prompt: &str,
        metadata: Map<String, Value>,
    ) -> String {
        self.try_log_prompt(session_id, prompt, metadata)
            .unwrap_or_else(|e| {
                warn!(session_id = %session_id, error = %e, "Failed to log user prompt");
                NOOP_ID.to_string()
            })
    }

    fn start_tool_span(&self, tool_name: &str, input: &Value) -> String {
        self.try_start_tool(tool_name, input).unwrap_or_else(|e| {
            warn!(tool = %tool_name, error = %e, "Failed to start tool span");
            NOOP_ID.to_string()
        })
    }

    fn end_tool_span(&self, tool_name: &str, result: &Value) {
        if let Err(e) = self.try_end_tool(tool_name, result) {
            warn!(tool = %tool_name, error = %e, "Failed to end tool span");
        }
    }

    fn end_session_trace(&self, session_id: &str, metadata: Map<String, Value>) {
        if let Err(e) = self.try_end_session(session_id, metadata) {
            warn!(session_id = %session_id, error = %e, "Failed to end session trace");
        }
    }

    fn flush(&self) {
        match self.backend.flush() {
            Ok(()) => debug!("Flushed trace events"),
            Err(e) => warn!(error = %e, "Failed to flush trace events"),
        }
    }
}
