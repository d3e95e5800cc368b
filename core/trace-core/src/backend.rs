//! Where traces and spans go.
//!
//! [`TraceBackend`] is the seam between the coordinator and the outside world.
//! [`LangfuseBackend`] speaks the Langfuse ingestion API: ids are minted locally, events
//! are buffered in memory, and `flush` delivers them as one batch. Hook processes live for
//! a few milliseconds, so nothing is sent in the background.

use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::config::TraceConfig;
use crate::error::{Result, TraceError};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// A new trace (one per Claude Code session).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceCreate {
    pub name: String,
    pub session_id: String,
    pub user_id: String,
    pub metadata: Map<String, Value>,
    pub tags: Vec<String>,
}

/// A new span on an existing trace. `end_time` closes it in the same event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpanCreate {
    pub trace_id: String,
    pub name: String,
    pub input: Value,
    pub metadata: Map<String, Value>,
    pub end_time: Option<DateTime<Utc>>,
}

/// Closes a span opened earlier, possibly by another process.
#[derive(Debug, Clone, PartialEq)]
pub struct SpanUpdate {
    pub span_id: String,
    pub trace_id: String,
    pub output: Value,
    pub end_time: DateTime<Utc>,
}

pub trait TraceBackend: Send + Sync {
    /// Returns the new trace id.
    fn create_trace(&self, trace: TraceCreate) -> Result<String>;

    /// Returns the new span id.
    fn create_span(&self, span: SpanCreate) -> Result<String>;

    fn update_span(&self, update: SpanUpdate) -> Result<()>;

    /// Merges `metadata` into an existing trace.
    fn update_trace(&self, trace_id: &str, metadata: Map<String, Value>) -> Result<()>;

    /// Delivers anything buffered.
    fn flush(&self) -> Result<()>;
}

// ─────────────────────────────────────────────────────────────────────────────
// Langfuse
// ─────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
struct IngestionEvent {
    id: String,
    #[serde(rename = "type")]
    kind: &'static str,
    timestamp: String,
    body: Value,
}

#[derive(Debug, Serialize)]
struct IngestionBatch<'a> {
    batch: &'a [IngestionEvent],
    metadata: Value,
}

/// Body of a 207 Multi-Status response.
#[derive(Debug, Default, Deserialize)]
struct IngestionResponse {
    #[serde(default)]
    errors: Vec<IngestionFailure>,
}

#[derive(Debug, Deserialize)]
struct IngestionFailure {
    id: String,
    status: u16,
    #[serde(default)]
    message: Option<String>,
}

pub struct LangfuseBackend {
    client: reqwest::blocking::Client,
    endpoint: String,
    public_key: String,
    secret_key: String,
    environment: String,
    release: String,
    pending: Mutex<Vec<IngestionEvent>>,
}

impl std::fmt::Debug for LangfuseBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LangfuseBackend")
            .field("endpoint", &self.endpoint)
            .field("environment", &self.environment)
            .field("release", &self.release)
            .finish_non_exhaustive()
    }
}

impl LangfuseBackend {
    /// Fails when the config lacks keys or the HTTP client cannot be built.
    pub fn new(config: &TraceConfig) -> Result<Self> {
        let (Some(public_key), Some(secret_key)) = (&config.public_key, &config.secret_key) else {
            return Err(TraceError::Backend("Langfuse keys are not configured".to_string()));
        };

        let client = reqwest::blocking::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(REQUEST_TIMEOUT)
            .user_agent(concat!("trace-core/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: format!("{}/api/public/ingestion", config.host.trim_end_matches('/')),
            public_key: public_key.clone(),
            secret_key: secret_key.clone(),
            environment: config.environment.clone(),
            release: config.release.clone(),
            pending: Mutex::new(Vec::new()),
        })
    }

    pub fn pending_events(&self) -> usize {
        self.lock_pending().len()
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<IngestionEvent>> {
        // A panic while pushing cannot leave the Vec half-written.
        self.pending.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, kind: &'static str, body: Value) {
        self.lock_pending().push(IngestionEvent {
            id: new_id(),
            kind,
            timestamp: timestamp(Utc::now()),
            body,
        });
    }

    fn send(&self, events: &[IngestionEvent]) -> Result<()> {
        let payload = IngestionBatch {
            batch: events,
            metadata: json!({
                "sdk_name": env!("CARGO_PKG_NAME"),
                "sdk_version": env!("CARGO_PKG_VERSION"),
            }),
        };

        let response = self
            .client
            .post(&self.endpoint)
            .basic_auth(&self.public_key, Some(&self.secret_key))
            .json(&payload)
            .send()?;

        let status = response.status();
        if !status.is_success() {
            let message = response
                .text()
                .unwrap_or_else(|_| "unable to read ingestion response body".to_string());
            return Err(TraceError::Backend(format!(
                "ingestion returned {}: {}",
                status.as_u16(),
                message
            )));
        }

        // 207: some events may have been rejected individually.
        let body: IngestionResponse = response.json().unwrap_or_default();
        if let Some(first) = body.errors.first() {
            return Err(TraceError::Backend(format!(
                "{} of {} events rejected (first: {} status {} {})",
                body.errors.len(),
                events.len(),
                first.id,
                first.status,
                first.message.as_deref().unwrap_or("")
            )));
        }

        debug!(events = events.len(), "Delivered ingestion batch");
        Ok(())
    }
}

impl TraceBackend for LangfuseBackend {
    fn create_trace(&self, trace: TraceCreate) -> Result<String> {
        let id = new_id();
        self.enqueue(
            "trace-create",
            json!({
                "id": id,
                "timestamp": timestamp(Utc::now()),
                "name": trace.name,
                "sessionId": trace.session_id,
                "userId": trace.user_id,
                "metadata": trace.metadata,
                "tags": trace.tags,
                "release": self.release,
                "environment": self.environment,
            }),
        );
        Ok(id)
    }

    fn create_span(&self, span: SpanCreate) -> Result<String> {
        let id = new_id();
        let mut body = json!({
            "id": id,
            "traceId": span.trace_id,
            "name": span.name,
            "startTime": timestamp(Utc::now()),
            "input": span.input,
            "metadata": span.metadata,
            "environment": self.environment,
        });
        if let Some(end) = span.end_time {
            body["endTime"] = Value::String(timestamp(end));
        }
        self.enqueue("span-create", body);
        Ok(id)
    }

    fn update_span(&self, update: SpanUpdate) -> Result<()> {
        self.enqueue(
            "span-update",
            json!({
                "id": update.span_id,
                "traceId": update.trace_id,
                "output": update.output,
                "endTime": timestamp(update.end_time),
            }),
        );
        Ok(())
    }

    fn update_trace(&self, trace_id: &str, metadata: Map<String, Value>) -> Result<()> {
        // trace-create upserts on an existing id.
        self.enqueue(
            "trace-create",
            json!({
                "id": trace_id,
                "metadata": metadata,
            }),
        );
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        let events = std::mem::take(&mut *self.lock_pending());
        if events.is_empty() {
            return Ok(());
        }
        self.send(&events)
    }
}

impl Drop for LangfuseBackend {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(error = %e, "Failed to flush buffered trace events on shutdown");
        }
    }
}

fn new_id() -> String {
    ulid::Ulid::new().to_string().to_lowercase()
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}
