//! The SQLite-backed [`Store`] implementation.
//!
//! Physical design: WAL journal with `synchronous = NORMAL` (survives process
//! kills without losing committed transactions), a 64 MiB page cache, foreign
//! keys enforced, temp storage in RAM. Every hot query has a covering index,
//! and an FTS5 virtual table over prompt/completion/operation-name is kept in
//! sync by triggers on the spans table.

use async_trait::async_trait;
use chrono::Utc;
use oculo_core::{
    MemoryEvent, OculoError, PendingWrite, Result, Span, Store, ToolCall, Trace, TraceFilter,
    TraceStats,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqliteRow, SqliteSynchronous};
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Schema
// ---------------------------------------------------------------------------

const MIGRATIONS: &[&str] = &[
    // Trace-level metadata
    "CREATE TABLE IF NOT EXISTS traces (
        trace_id TEXT NOT NULL PRIMARY KEY,
        agent_name TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        end_time INTEGER,
        status TEXT NOT NULL,
        metadata TEXT
    )",
    // Trace list is filtered by agent and status, newest first
    "CREATE INDEX IF NOT EXISTS idx_traces_agent_time ON traces(agent_name, start_time DESC)",
    "CREATE INDEX IF NOT EXISTS idx_traces_status ON traces(status)",
    // One row per operation inside a trace
    "CREATE TABLE IF NOT EXISTS spans (
        span_id TEXT NOT NULL PRIMARY KEY,
        trace_id TEXT NOT NULL REFERENCES traces(trace_id) ON DELETE CASCADE,
        parent_span_id TEXT,
        operation_type TEXT NOT NULL,
        operation_name TEXT NOT NULL,
        start_time INTEGER NOT NULL,
        duration_ms INTEGER NOT NULL DEFAULT 0,
        prompt TEXT,
        completion TEXT,
        prompt_tokens INTEGER NOT NULL DEFAULT 0,
        completion_tokens INTEGER NOT NULL DEFAULT 0,
        model TEXT,
        temperature REAL,
        metadata TEXT,
        status TEXT NOT NULL DEFAULT 'ok',
        error_message TEXT
    )",
    // Timeline reconstruction
    "CREATE INDEX IF NOT EXISTS idx_spans_trace_time ON spans(trace_id, start_time)",
    // Type filtering
    "CREATE INDEX IF NOT EXISTS idx_spans_operation_type ON spans(operation_type)",
    // Append-only memory mutation log
    "CREATE TABLE IF NOT EXISTS memory_events (
        event_id TEXT NOT NULL PRIMARY KEY,
        span_id TEXT NOT NULL REFERENCES spans(span_id) ON DELETE CASCADE,
        timestamp INTEGER NOT NULL,
        operation TEXT NOT NULL,
        key TEXT NOT NULL,
        old_value TEXT,
        new_value TEXT,
        namespace TEXT NOT NULL DEFAULT 'default'
    )",
    // Per-span diff
    "CREATE INDEX IF NOT EXISTS idx_memory_events_span_time ON memory_events(span_id, timestamp)",
    // Key-history and namespace-scoped views
    "CREATE INDEX IF NOT EXISTS idx_memory_events_key_time ON memory_events(key, timestamp)",
    "CREATE INDEX IF NOT EXISTS idx_memory_events_ns_time ON memory_events(namespace, timestamp)",
    // Append-only tool invocation log
    "CREATE TABLE IF NOT EXISTS tool_calls (
        call_id INTEGER PRIMARY KEY AUTOINCREMENT,
        span_id TEXT NOT NULL REFERENCES spans(span_id) ON DELETE CASCADE,
        tool_name TEXT NOT NULL,
        arguments_json TEXT,
        result_json TEXT,
        success INTEGER NOT NULL,
        latency_ms INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_tool_calls_span ON tool_calls(span_id)",
    // Crash-recovery journal for batch payloads
    "CREATE TABLE IF NOT EXISTS pending_writes (
        write_id INTEGER PRIMARY KEY AUTOINCREMENT,
        payload BLOB NOT NULL,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at INTEGER NOT NULL,
        committed_at INTEGER
    )",
    "CREATE INDEX IF NOT EXISTS idx_pending_writes_status ON pending_writes(status)",
    // Full-text index over span content; span_id is stored but not indexed
    "CREATE VIRTUAL TABLE IF NOT EXISTS spans_fts USING fts5(
        span_id UNINDEXED,
        operation_name,
        prompt,
        completion,
        tokenize = 'porter unicode61'
    )",
    "CREATE TRIGGER IF NOT EXISTS spans_fts_insert AFTER INSERT ON spans BEGIN
        INSERT INTO spans_fts(span_id, operation_name, prompt, completion)
        VALUES (new.span_id, new.operation_name,
                COALESCE(new.prompt, ''), COALESCE(new.completion, ''));
    END",
    "CREATE TRIGGER IF NOT EXISTS spans_fts_update AFTER UPDATE ON spans BEGIN
        DELETE FROM spans_fts WHERE span_id = old.span_id;
        INSERT INTO spans_fts(span_id, operation_name, prompt, completion)
        VALUES (new.span_id, new.operation_name,
                COALESCE(new.prompt, ''), COALESCE(new.completion, ''));
    END",
    "CREATE TRIGGER IF NOT EXISTS spans_fts_delete AFTER DELETE ON spans BEGIN
        DELETE FROM spans_fts WHERE span_id = old.span_id;
    END",
];

// ---------------------------------------------------------------------------
// Upsert statements (the hot path; prepared once and cached by the pool)
// ---------------------------------------------------------------------------

const INSERT_TRACE: &str = "INSERT INTO traces \
     (trace_id, agent_name, start_time, end_time, status, metadata) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6) \
     ON CONFLICT(trace_id) DO UPDATE SET \
         end_time = COALESCE(excluded.end_time, traces.end_time), \
         status = excluded.status, \
         metadata = COALESCE(excluded.metadata, traces.metadata)";

const INSERT_SPAN: &str = "INSERT INTO spans \
     (span_id, trace_id, parent_span_id, operation_type, operation_name, \
      start_time, duration_ms, prompt, completion, prompt_tokens, \
      completion_tokens, model, temperature, metadata, status, error_message) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16) \
     ON CONFLICT(span_id) DO UPDATE SET \
         duration_ms = excluded.duration_ms, \
         completion = COALESCE(excluded.completion, spans.completion), \
         completion_tokens = excluded.completion_tokens, \
         status = excluded.status, \
         error_message = excluded.error_message";

const INSERT_MEMORY_EVENT: &str = "INSERT INTO memory_events \
     (event_id, span_id, timestamp, operation, key, old_value, new_value, namespace) \
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)";

const SELECT_TIMELINE: &str = "SELECT span_id, trace_id, parent_span_id, operation_type, \
     operation_name, start_time, duration_ms, prompt, completion, prompt_tokens, \
     completion_tokens, model, temperature, metadata, status, error_message \
     FROM spans WHERE trace_id = ?1 ORDER BY start_time ASC";

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// SQLite-backed trace store.
///
/// The store exclusively owns its connection pool. Writers take the exclusive
/// side of `gate`, readers the shared side, so exactly one write transaction
/// is in flight at any time while reads proceed concurrently under WAL.
pub struct SqliteStore {
    pool: SqlitePool,
    gate: RwLock<()>,
}

impl SqliteStore {
    /// Open (or create) the database at `path` and run schema migrations.
    /// The parent directory is created if missing.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                OculoError::Storage(format!("creating {}: {e}", parent.display()))
            })?;
        }

        let opts = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        Self::connect(opts, 10).await
    }

    /// Open a private in-memory database (used by tests).
    ///
    /// In-memory databases exist per connection, so the pool is restricted to
    /// a single connection to keep a consistent view.
    pub async fn open_in_memory() -> Result<Self> {
        let opts = SqliteConnectOptions::new().in_memory(true);
        Self::connect(opts, 1).await
    }

    async fn connect(opts: SqliteConnectOptions, max_connections: u32) -> Result<Self> {
        let opts = opts
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .foreign_keys(true)
            .pragma("cache_size", "-65536")
            .pragma("temp_store", "MEMORY");

        let pool = sqlx::pool::PoolOptions::<Sqlite>::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await
            .map_err(|e| OculoError::Storage(format!("opening database: {e}")))?;

        for statement in MIGRATIONS {
            sqlx::query(statement)
                .execute(&pool)
                .await
                .map_err(|e| OculoError::Storage(format!("migration failed: {e}")))?;
        }
        tracing::debug!(statements = MIGRATIONS.len(), "schema ready");

        Ok(Self {
            pool,
            gate: RwLock::new(()),
        })
    }

    /// Bind and execute the span upsert against a pool or open transaction.
    async fn exec_insert_span<'e, E>(executor: E, span: &Span) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(INSERT_SPAN)
            .bind(&span.span_id)
            .bind(&span.trace_id)
            .bind(span.parent_span_id.as_deref())
            .bind(span.operation_type.as_str())
            .bind(&span.operation_name)
            .bind(span.start_time)
            .bind(span.duration_ms as i64)
            .bind(span.prompt.as_deref())
            .bind(span.completion.as_deref())
            .bind(i64::from(span.prompt_tokens))
            .bind(i64::from(span.completion_tokens))
            .bind(span.model.as_deref())
            .bind(span.temperature)
            .bind(span.metadata.as_deref())
            .bind(span.status.as_str())
            .bind(span.error_message.as_deref())
            .execute(executor)
            .await
            .map_err(|e| OculoError::Storage(format!("inserting span {}: {e}", span.span_id)))?;
        Ok(())
    }

    async fn exec_insert_memory_event<'e, E>(executor: E, event: &MemoryEvent) -> Result<()>
    where
        E: sqlx::Executor<'e, Database = Sqlite>,
    {
        sqlx::query(INSERT_MEMORY_EVENT)
            .bind(&event.event_id)
            .bind(&event.span_id)
            .bind(event.timestamp)
            .bind(event.operation.as_str())
            .bind(&event.key)
            .bind(event.old_value.as_deref())
            .bind(event.new_value.as_deref())
            .bind(&event.namespace)
            .execute(executor)
            .await
            .map_err(|e| {
                OculoError::Storage(format!("inserting memory event {}: {e}", event.event_id))
            })?;
        Ok(())
    }

    #[cfg(test)]
    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

#[async_trait]
impl Store for SqliteStore {
    async fn insert_trace(&self, trace: &Trace) -> Result<()> {
        let metadata_json = trace
            .metadata
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        let _guard = self.gate.write().await;
        sqlx::query(INSERT_TRACE)
            .bind(&trace.trace_id)
            .bind(&trace.agent_name)
            .bind(trace.start_time)
            .bind(trace.end_time)
            .bind(trace.status.as_str())
            .bind(metadata_json)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                OculoError::Storage(format!("inserting trace {}: {e}", trace.trace_id))
            })?;
        Ok(())
    }

    async fn insert_span(&self, span: &Span) -> Result<()> {
        let _guard = self.gate.write().await;
        Self::exec_insert_span(&self.pool, span).await
    }

    async fn insert_memory_event(&self, event: &MemoryEvent) -> Result<()> {
        let _guard = self.gate.write().await;
        Self::exec_insert_memory_event(&self.pool, event).await
    }

    async fn insert_tool_call(&self, call: &ToolCall) -> Result<i64> {
        let _guard = self.gate.write().await;
        let result = sqlx::query(
            "INSERT INTO tool_calls \
             (span_id, tool_name, arguments_json, result_json, success, latency_ms) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        )
        .bind(&call.span_id)
        .bind(&call.tool_name)
        .bind(call.arguments_json.as_deref())
        .bind(call.result_json.as_deref())
        .bind(call.success)
        .bind(call.latency_ms as i64)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            OculoError::Storage(format!("inserting tool call for span {}: {e}", call.span_id))
        })?;
        Ok(result.last_insert_rowid())
    }

    async fn batch_insert_spans(&self, spans: &[Span]) -> Result<()> {
        if spans.is_empty() {
            return Ok(());
        }

        let _guard = self.gate.write().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OculoError::Storage(format!("beginning span batch: {e}")))?;

        for span in spans {
            Self::exec_insert_span(&mut *tx, span).await?;
        }

        tx.commit()
            .await
            .map_err(|e| OculoError::Storage(format!("committing span batch: {e}")))?;
        Ok(())
    }

    async fn batch_insert_memory_events(&self, events: &[MemoryEvent]) -> Result<()> {
        if events.is_empty() {
            return Ok(());
        }

        let _guard = self.gate.write().await;
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| OculoError::Storage(format!("beginning memory event batch: {e}")))?;

        for event in events {
            Self::exec_insert_memory_event(&mut *tx, event).await?;
        }

        tx.commit()
            .await
            .map_err(|e| OculoError::Storage(format!("committing memory event batch: {e}")))?;
        Ok(())
    }

    async fn query_traces(&self, filter: &TraceFilter) -> Result<Vec<Trace>> {
        let mut qb = QueryBuilder::<Sqlite>::new(
            "SELECT trace_id, agent_name, start_time, end_time, status, metadata \
             FROM traces WHERE 1=1",
        );
        if let Some(ref agent) = filter.agent_name {
            qb.push(" AND agent_name = ");
            qb.push_bind(agent.clone());
        }
        if let Some(status) = filter.status {
            qb.push(" AND status = ");
            qb.push_bind(status.as_str());
        }
        if let Some(since) = filter.since {
            qb.push(" AND start_time >= ");
            qb.push_bind(since);
        }
        if let Some(until) = filter.until {
            qb.push(" AND start_time <= ");
            qb.push_bind(until);
        }
        qb.push(" ORDER BY start_time DESC LIMIT ");
        qb.push_bind(i64::from(filter.limit.unwrap_or(100)));
        if let Some(offset) = filter.offset {
            qb.push(" OFFSET ");
            qb.push_bind(i64::from(offset));
        }

        let _guard = self.gate.read().await;
        let rows = qb
            .build()
            .fetch_all(&self.pool)
            .await
            .map_err(|e| OculoError::Storage(format!("querying traces: {e}")))?;

        rows.iter().map(trace_from_row).collect()
    }

    async fn query_timeline(&self, trace_id: &str) -> Result<Vec<Span>> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query(SELECT_TIMELINE)
            .bind(trace_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                OculoError::Storage(format!("querying timeline for {trace_id}: {e}"))
            })?;

        rows.iter().map(span_from_row).collect()
    }

    async fn memory_diffs(&self, span_id: &str) -> Result<Vec<MemoryEvent>> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query(
            "SELECT event_id, span_id, timestamp, operation, key, old_value, new_value, namespace \
             FROM memory_events WHERE span_id = ?1 ORDER BY timestamp ASC",
        )
        .bind(span_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("querying memory diffs for {span_id}: {e}")))?;

        rows.iter().map(memory_event_from_row).collect()
    }

    async fn memory_timeline(&self, key: &str, namespace: &str) -> Result<Vec<MemoryEvent>> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query(
            "SELECT event_id, span_id, timestamp, operation, key, old_value, new_value, namespace \
             FROM memory_events WHERE key = ?1 AND namespace = ?2 ORDER BY timestamp ASC",
        )
        .bind(key)
        .bind(namespace)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("querying memory timeline for {key}: {e}")))?;

        rows.iter().map(memory_event_from_row).collect()
    }

    async fn search_content(&self, query: &str, limit: i64) -> Result<Vec<Span>> {
        let limit = if limit <= 0 { 20 } else { limit };

        let _guard = self.gate.read().await;
        let rows = sqlx::query(
            "SELECT s.span_id, s.trace_id, s.parent_span_id, s.operation_type, \
                    s.operation_name, s.start_time, s.duration_ms, s.prompt, s.completion, \
                    s.prompt_tokens, s.completion_tokens, s.model, s.temperature, s.metadata, \
                    s.status, s.error_message \
             FROM spans s \
             INNER JOIN spans_fts f ON s.span_id = f.span_id \
             WHERE spans_fts MATCH ?1 \
             ORDER BY rank \
             LIMIT ?2",
        )
        .bind(query)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("searching content for {query:?}: {e}")))?;

        rows.iter().map(span_from_row).collect()
    }

    async fn trace_stats(&self, trace_id: &str) -> Result<TraceStats> {
        let _guard = self.gate.read().await;

        let row = sqlx::query(
            "SELECT \
                COUNT(*) AS total_spans, \
                COALESCE(SUM(CASE WHEN operation_type = 'LLM' THEN 1 ELSE 0 END), 0) AS llm_calls, \
                COALESCE(SUM(CASE WHEN operation_type = 'TOOL' THEN 1 ELSE 0 END), 0) AS tool_calls, \
                COALESCE(SUM(CASE WHEN operation_type = 'MEMORY' THEN 1 ELSE 0 END), 0) AS memory_ops, \
                COALESCE(SUM(prompt_tokens), 0) AS total_prompt_tokens, \
                COALESCE(SUM(completion_tokens), 0) AS total_completion_tokens, \
                COALESCE(SUM(duration_ms), 0) AS total_duration_ms \
             FROM spans WHERE trace_id = ?1",
        )
        .bind(trace_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("querying trace stats for {trace_id}: {e}")))?;

        let memory_event_count: i64 = sqlx::query(
            "SELECT COUNT(*) AS cnt FROM memory_events me \
             INNER JOIN spans s ON me.span_id = s.span_id \
             WHERE s.trace_id = ?1",
        )
        .bind(trace_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("counting memory events for {trace_id}: {e}")))?
        .get("cnt");

        Ok(TraceStats {
            trace_id: trace_id.to_string(),
            total_spans: row.get::<i64, _>("total_spans") as u64,
            llm_calls: row.get::<i64, _>("llm_calls") as u64,
            tool_calls: row.get::<i64, _>("tool_calls") as u64,
            memory_ops: row.get::<i64, _>("memory_ops") as u64,
            total_prompt_tokens: row.get::<i64, _>("total_prompt_tokens") as u64,
            total_completion_tokens: row.get::<i64, _>("total_completion_tokens") as u64,
            total_duration_ms: row.get::<i64, _>("total_duration_ms") as u64,
            memory_event_count: memory_event_count as u64,
        })
    }

    async fn write_pending_payload(&self, payload: &[u8]) -> Result<i64> {
        let _guard = self.gate.write().await;
        let result = sqlx::query(
            "INSERT INTO pending_writes (payload, status, created_at) VALUES (?1, 'pending', ?2)",
        )
        .bind(payload)
        .bind(now_nanos())
        .execute(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("writing pending payload: {e}")))?;
        Ok(result.last_insert_rowid())
    }

    async fn commit_pending_payload(&self, write_id: i64) -> Result<()> {
        let _guard = self.gate.write().await;
        sqlx::query(
            "UPDATE pending_writes SET status = 'committed', committed_at = ?1 WHERE write_id = ?2",
        )
        .bind(now_nanos())
        .bind(write_id)
        .execute(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("committing pending payload {write_id}: {e}")))?;
        Ok(())
    }

    async fn pending_payloads(&self) -> Result<Vec<PendingWrite>> {
        let _guard = self.gate.read().await;
        let rows = sqlx::query(
            "SELECT write_id, payload, status, created_at, committed_at \
             FROM pending_writes WHERE status = 'pending' ORDER BY write_id ASC",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| OculoError::Storage(format!("querying pending payloads: {e}")))?;

        rows.iter()
            .map(|row| {
                Ok(PendingWrite {
                    write_id: row.get("write_id"),
                    payload: row.get("payload"),
                    status: row.get::<String, _>("status").parse()?,
                    created_at: row.get("created_at"),
                    committed_at: row.get("committed_at"),
                })
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Row conversion
// ---------------------------------------------------------------------------

fn now_nanos() -> i64 {
    Utc::now().timestamp_nanos_opt().unwrap_or(i64::MAX)
}

fn trace_from_row(row: &SqliteRow) -> Result<Trace> {
    let metadata = row
        .get::<Option<String>, _>("metadata")
        .map(parse_trace_metadata);

    Ok(Trace {
        trace_id: row.get("trace_id"),
        agent_name: row.get("agent_name"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        status: row.get::<String, _>("status").parse()?,
        metadata,
    })
}

/// Parse the stored metadata text. Malformed metadata is never fatal on read;
/// it degrades to the raw text under the `_raw` key.
fn parse_trace_metadata(text: String) -> HashMap<String, String> {
    serde_json::from_str(&text)
        .unwrap_or_else(|_| HashMap::from([("_raw".to_string(), text)]))
}

fn span_from_row(row: &SqliteRow) -> Result<Span> {
    Ok(Span {
        span_id: row.get("span_id"),
        trace_id: row.get("trace_id"),
        parent_span_id: row.get("parent_span_id"),
        operation_type: row.get::<String, _>("operation_type").parse()?,
        operation_name: row.get("operation_name"),
        start_time: row.get("start_time"),
        duration_ms: row.get::<i64, _>("duration_ms") as u64,
        prompt: row.get("prompt"),
        completion: row.get("completion"),
        prompt_tokens: row.get::<i64, _>("prompt_tokens") as u32,
        completion_tokens: row.get::<i64, _>("completion_tokens") as u32,
        model: row.get("model"),
        temperature: row.get("temperature"),
        metadata: row.get("metadata"),
        status: row.get::<String, _>("status").parse()?,
        error_message: row.get("error_message"),
    })
}

fn memory_event_from_row(row: &SqliteRow) -> Result<MemoryEvent> {
    Ok(MemoryEvent {
        event_id: row.get("event_id"),
        span_id: row.get("span_id"),
        timestamp: row.get("timestamp"),
        operation: row.get::<String, _>("operation").parse()?,
        key: row.get("key"),
        old_value: row.get("old_value"),
        new_value: row.get("new_value"),
        namespace: row.get("namespace"),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
