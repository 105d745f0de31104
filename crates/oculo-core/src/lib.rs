//! Core types, traits, and errors for Oculo
//!
//! This crate contains the foundational types shared across all Oculo
//! components: the domain model for traces, spans, memory events, and tool
//! calls, the [`Store`] trait implemented by the storage layer, and the
//! categorized [`OculoError`] type.
//!
//! All timestamps are signed 64-bit nanoseconds since the Unix epoch.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

pub mod config;

pub use config::{DaemonConfig, LoggingConfig};

// ---------------------------------------------------------------------------
// Enums (closed sets — unknown values are rejected at decode time)
// ---------------------------------------------------------------------------

/// The kind of operation a span records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum OperationType {
    Llm,
    Tool,
    Memory,
    Planning,
    Retrieval,
}

impl OperationType {
    /// Stable string form used for storage and display.
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Llm => "LLM",
            OperationType::Tool => "TOOL",
            OperationType::Memory => "MEMORY",
            OperationType::Planning => "PLANNING",
            OperationType::Retrieval => "RETRIEVAL",
        }
    }
}

impl std::str::FromStr for OperationType {
    type Err = OculoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "LLM" => Ok(OperationType::Llm),
            "TOOL" => Ok(OperationType::Tool),
            "MEMORY" => Ok(OperationType::Memory),
            "PLANNING" => Ok(OperationType::Planning),
            "RETRIEVAL" => Ok(OperationType::Retrieval),
            other => Err(OculoError::Storage(format!(
                "unknown operation type '{other}'"
            ))),
        }
    }
}

/// The kind of mutation a memory event records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MemoryOp {
    Add,
    Update,
    Delete,
}

impl MemoryOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemoryOp::Add => "ADD",
            MemoryOp::Update => "UPDATE",
            MemoryOp::Delete => "DELETE",
        }
    }
}

impl std::str::FromStr for MemoryOp {
    type Err = OculoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ADD" => Ok(MemoryOp::Add),
            "UPDATE" => Ok(MemoryOp::Update),
            "DELETE" => Ok(MemoryOp::Delete),
            other => Err(OculoError::Storage(format!(
                "unknown memory operation '{other}'"
            ))),
        }
    }
}

/// Lifecycle state of a trace.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceStatus {
    Running,
    Completed,
    Failed,
}

impl TraceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TraceStatus::Running => "running",
            TraceStatus::Completed => "completed",
            TraceStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for TraceStatus {
    type Err = OculoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "running" => Ok(TraceStatus::Running),
            "completed" => Ok(TraceStatus::Completed),
            "failed" => Ok(TraceStatus::Failed),
            other => Err(OculoError::Storage(format!(
                "unknown trace status '{other}'"
            ))),
        }
    }
}

/// Outcome of a span.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SpanStatus {
    Ok,
    Error,
}

impl SpanStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SpanStatus::Ok => "ok",
            SpanStatus::Error => "error",
        }
    }
}

impl std::str::FromStr for SpanStatus {
    type Err = OculoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ok" => Ok(SpanStatus::Ok),
            "error" => Ok(SpanStatus::Error),
            other => Err(OculoError::Storage(format!(
                "unknown span status '{other}'"
            ))),
        }
    }
}

/// Lifecycle state of a pending write. `Committed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    Pending,
    Committed,
    Failed,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PendingStatus::Pending => "pending",
            PendingStatus::Committed => "committed",
            PendingStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for PendingStatus {
    type Err = OculoError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(PendingStatus::Pending),
            "committed" => Ok(PendingStatus::Committed),
            "failed" => Ok(PendingStatus::Failed),
            other => Err(OculoError::Storage(format!(
                "unknown pending status '{other}'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Domain model
// ---------------------------------------------------------------------------

/// A complete execution trace of an AI agent.
///
/// Created by the first trace message a producer sends; later messages update
/// the end time, status, and metadata via upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trace {
    /// Opaque producer-supplied identifier.
    pub trace_id: String,
    /// Name of the agent that produced this trace.
    pub agent_name: String,
    /// Start of the trace, nanoseconds since the Unix epoch.
    pub start_time: i64,
    /// End of the trace, set once the agent finishes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    pub status: TraceStatus,
    /// Schema-less key/value metadata; stored opaquely.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<HashMap<String, String>>,
}

/// A single operation inside a trace: an LLM call, tool invocation, memory
/// write, planning step, or retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub span_id: String,
    pub trace_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_span_id: Option<String>,
    pub operation_type: OperationType,
    pub operation_name: String,
    /// Start of the span, nanoseconds since the Unix epoch.
    pub start_time: i64,
    #[serde(default)]
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completion: Option<String>,
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    /// Opaque JSON text; never inspected by the store.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,
    pub status: SpanStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl Span {
    /// Combined prompt and completion token count.
    pub fn total_tokens(&self) -> u32 {
        self.prompt_tokens + self.completion_tokens
    }
}

fn default_namespace() -> String {
    "default".to_string()
}

/// A typed mutation to a key in the agent's keyed state. Append-only.
///
/// For `ADD` the old value is absent, for `DELETE` the new value is absent,
/// and for `UPDATE` both are present.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryEvent {
    pub event_id: String,
    pub span_id: String,
    /// Nanoseconds since the Unix epoch.
    pub timestamp: i64,
    pub operation: MemoryOp,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<String>,
    #[serde(default = "default_namespace")]
    pub namespace: String,
}

/// An external-function invocation recorded as a child of a span. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Assigned by the store on insert; producers leave this zero.
    #[serde(default)]
    pub call_id: i64,
    pub span_id: String,
    pub tool_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_json: Option<String>,
    pub success: bool,
    #[serde(default)]
    pub latency_ms: u64,
}

/// A batch payload journaled before commit so it survives crashes.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingWrite {
    pub write_id: i64,
    pub payload: Vec<u8>,
    pub status: PendingStatus,
    /// Nanoseconds since the Unix epoch.
    pub created_at: i64,
    pub committed_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// Query types
// ---------------------------------------------------------------------------

/// Filter parameters for listing traces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TraceFilter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<TraceStatus>,
    /// Inclusive lower bound on `start_time`, nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<i64>,
    /// Inclusive upper bound on `start_time`, nanoseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u32>,
}

impl TraceFilter {
    pub fn with_agent(mut self, agent_name: impl Into<String>) -> Self {
        self.agent_name = Some(agent_name.into());
        self
    }

    pub fn with_status(mut self, status: TraceStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_time_range(mut self, since: i64, until: i64) -> Self {
        self.since = Some(since);
        self.until = Some(until);
        self
    }

    pub fn with_limit(mut self, limit: u32) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Aggregated statistics for a single trace.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TraceStats {
    pub trace_id: String,
    pub total_spans: u64,
    pub llm_calls: u64,
    pub tool_calls: u64,
    pub memory_ops: u64,
    pub total_prompt_tokens: u64,
    pub total_completion_tokens: u64,
    pub total_duration_ms: u64,
    pub memory_event_count: u64,
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Core error type. Every fallible public operation returns one of these.
#[derive(thiserror::Error, Debug)]
pub enum OculoError {
    #[error("storage error: {0}")]
    Storage(String),

    #[error("wire protocol error: {0}")]
    Wire(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("analysis error: {0}")]
    Analysis(String),
}

pub type Result<T> = std::result::Result<T, OculoError>;

// ---------------------------------------------------------------------------
// Store trait
// ---------------------------------------------------------------------------

/// Trait for trace persistence backends.
///
/// Single-writer, many-reader: implementations serialize writes internally.
/// Callers receive values by copy; the backend exclusively owns its
/// connection.
#[async_trait::async_trait]
pub trait Store: Send + Sync {
    /// Persist a trace. An existing `trace_id` updates `end_time` (non-null
    /// wins), `status`, and `metadata` (non-null wins).
    async fn insert_trace(&self, trace: &Trace) -> Result<()>;

    /// Persist a span. An existing `span_id` updates `duration_ms`,
    /// `completion` (non-null wins), `completion_tokens`, `status`, and
    /// `error_message`.
    async fn insert_span(&self, span: &Span) -> Result<()>;

    /// Persist a memory event. Duplicate IDs are an error.
    async fn insert_memory_event(&self, event: &MemoryEvent) -> Result<()>;

    /// Persist a tool call. The returned id is assigned by the store.
    async fn insert_tool_call(&self, call: &ToolCall) -> Result<i64>;

    /// Insert spans in a single transaction: all commit or none do.
    async fn batch_insert_spans(&self, spans: &[Span]) -> Result<()>;

    /// Insert memory events in a single transaction: all commit or none do.
    async fn batch_insert_memory_events(&self, events: &[MemoryEvent]) -> Result<()>;

    /// List traces matching `filter`, ordered by `start_time` descending.
    /// The limit defaults to 100 when unspecified.
    async fn query_traces(&self, filter: &TraceFilter) -> Result<Vec<Trace>>;

    /// All spans of a trace, ordered by `start_time` ascending.
    async fn query_timeline(&self, trace_id: &str) -> Result<Vec<Span>>;

    /// All memory events of a span, ordered by `timestamp` ascending.
    async fn memory_diffs(&self, span_id: &str) -> Result<Vec<MemoryEvent>>;

    /// Full mutation history of a key within a namespace, across all spans.
    async fn memory_timeline(&self, key: &str, namespace: &str) -> Result<Vec<MemoryEvent>>;

    /// Full-text search over prompt, completion, and operation name, ranked
    /// by relevance. The limit defaults to 20 when non-positive.
    async fn search_content(&self, query: &str, limit: i64) -> Result<Vec<Span>>;

    /// Aggregate statistics for a trace.
    async fn trace_stats(&self, trace_id: &str) -> Result<TraceStats>;

    /// Journal a raw batch payload for crash recovery; returns its id.
    async fn write_pending_payload(&self, payload: &[u8]) -> Result<i64>;

    /// Mark a journaled payload as committed.
    async fn commit_pending_payload(&self, write_id: i64) -> Result<()>;

    /// All payloads still in `pending` state, ordered by id ascending.
    async fn pending_payloads(&self) -> Result<Vec<PendingWrite>>;
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
