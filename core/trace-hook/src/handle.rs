//! Event handler for Claude Code hooks.
//!
//! Reads one JSON event from stdin and forwards it to the tracer.
//!
//! ## Event mapping
//!
//! ```text
//! SessionStart      → start_session_trace (resume/compact reuse the existing trace)
//! UserPromptSubmit  → log_user_prompt
//! PreToolUse        → start_tool_span   (no session id; correlated by cwd + ppid)
//! PostToolUse       → end_tool_span
//! SessionEnd        → end_session_trace
//! Stop              → flush only (fires after every turn)
//! ```

use std::io::{self, Read};
use std::path::Path;
use std::process::Command;

use serde::Deserialize;
use serde_json::{json, Map, Value};
use trace_core::{SessionSource, Tracer};

#[derive(Debug, thiserror::Error)]
pub enum HandleError {
    #[error("Failed to read stdin: {0}")]
    Stdin(#[from] io::Error),

    #[error("Failed to parse hook input: {0}")]
    Parse(#[from] serde_json::Error),
}

/// The fields of a hook payload that tracing uses. Everything else is ignored.
#[derive(Debug, Default, Deserialize)]
pub struct HookInput {
    #[serde(default)]
    pub hook_event_name: String,
    pub session_id: Option<String>,
    pub source: Option<String>,
    pub cwd: Option<String>,
    pub git_branch: Option<String>,
    pub prompt: Option<String>,
    pub tool_name: Option<String>,
    #[serde(default = "empty_object")]
    pub tool_input: Value,
    #[serde(default, alias = "tool_result")]
    pub tool_response: Value,
}

fn empty_object() -> Value {
    Value::Object(Map::new())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    SessionStart,
    UserPromptSubmit,
    PreToolUse,
    PostToolUse,
    SessionEnd,
    Stop,
    Unknown(String),
}

impl HookEvent {
    pub fn from_name(name: &str) -> Self {
        match name {
            "SessionStart" => HookEvent::SessionStart,
            "UserPromptSubmit" => HookEvent::UserPromptSubmit,
            "PreToolUse" => HookEvent::PreToolUse,
            "PostToolUse" => HookEvent::PostToolUse,
            "SessionEnd" => HookEvent::SessionEnd,
            "Stop" => HookEvent::Stop,
            other => HookEvent::Unknown(other.to_string()),
        }
    }
}

pub fn run(tracer: &dyn Tracer) -> Result<(), HandleError> {
    let mut input = String::new();
    io::stdin().read_to_string(&mut input)?;
    handle_str(tracer, &input)
}

/// Parses and dispatches one payload. Empty input is a no-op.
pub fn handle_str(tracer: &dyn Tracer, input: &str) -> Result<(), HandleError> {
    if input.trim().is_empty() {
        return Ok(());
    }
    let hook_input: HookInput = serde_json::from_str(input)?;
    dispatch(tracer, &hook_input);
    Ok(())
}

pub fn dispatch(tracer: &dyn Tracer, input: &HookInput) {
    let event = HookEvent::from_name(&input.hook_event_name);

    match event {
        HookEvent::SessionStart => {
            let Some(session_id) = session_id(input) else {
                return;
            };
            let source = SessionSource::parse(input.source.as_deref().unwrap_or("startup"));
            let mut metadata = Map::new();
            let branch = input
                .git_branch
                .clone()
                .or_else(|| detect_git_branch(input.cwd.as_deref()));
            if let Some(branch) = branch {
                metadata.insert("git_branch".to_string(), json!(branch));
            }
            tracer.start_session_trace(session_id, &source, metadata);
        }

        HookEvent::UserPromptSubmit => {
            let Some(session_id) = session_id(input) else {
                return;
            };
            let prompt = input.prompt.as_deref().unwrap_or_default();
            tracer.log_user_prompt(session_id, prompt, Map::new());
        }

        HookEvent::PreToolUse => {
            if let Some(tool_name) = tool_name(input) {
                tracer.start_tool_span(tool_name, &input.tool_input);
            }
        }

        HookEvent::PostToolUse => {
            if let Some(tool_name) = tool_name(input) {
                tracer.end_tool_span(tool_name, &input.tool_response);
            }
        }

        HookEvent::SessionEnd => {
            if let Some(session_id) = session_id(input) {
                tracer.end_session_trace(session_id, Map::new());
            }
        }

        HookEvent::Stop => {}

        HookEvent::Unknown(event_name) => {
            tracing::debug!(event_name = %event_name, "Unhandled event");
            return;
        }
    }

    tracer.flush();
}

fn session_id(input: &HookInput) -> Option<&str> {
    let id = input.session_id.as_deref().filter(|id| !id.is_empty());
    if id.is_none() {
        tracing::debug!(event = %input.hook_event_name, "Skipping event (missing session_id)");
    }
    id
}

fn tool_name(input: &HookInput) -> Option<&str> {
    let name = input.tool_name.as_deref().filter(|name| !name.is_empty());
    if name.is_none() {
        tracing::debug!(event = %input.hook_event_name, "Skipping event (missing tool_name)");
    }
    name
}

/// Current branch of the repository at `cwd` (or the process cwd). `None` outside a repo
/// or on a detached HEAD.
fn detect_git_branch(cwd: Option<&str>) -> Option<String> {
    let mut command = Command::new("git");
    command.args(["rev-parse", "--abbrev-ref", "HEAD"]);
    if let Some(dir) = cwd.filter(|dir| Path::new(dir).is_dir()) {
        command.current_dir(dir);
    }

    let output = command.output().ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    (!branch.is_empty() && branch != "HEAD").then_some(branch)
}
