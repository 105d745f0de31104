//! End-to-end tests: a real daemon on a real socket, driven by a client
//! speaking the wire protocol, asserting on observable store state and
//! counters.

use oculo_core::{DaemonConfig, Store, TraceFilter};
use oculo_daemon::ingest::{Ingester, IngesterHandle};
use oculo_daemon::metrics::{self, IngestMetrics};
use oculo_daemon::wire::{self, MessageType};
use oculo_storage::SqliteStore;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

struct TestDaemon {
    store: Arc<SqliteStore>,
    metrics: Arc<IngestMetrics>,
    handle: IngesterHandle,
    token: CancellationToken,
}

impl TestDaemon {
    async fn start() -> Self {
        let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
        Self::start_with_store(store).await
    }

    async fn start_with_store(store: Arc<SqliteStore>) -> Self {
        let config = DaemonConfig {
            listen_addr: "127.0.0.1:0".to_string(),
            metrics_addr: String::new(),
            batch_size: 1000,
            flush_interval_ms: 100,
            ..DaemonConfig::default()
        };
        let metrics = Arc::new(IngestMetrics::new());
        let token = CancellationToken::new();
        let handle = Ingester::new(
            config,
            Arc::clone(&store) as Arc<dyn Store>,
            Arc::clone(&metrics),
        )
        .start(token.clone())
        .await
        .unwrap();

        Self {
            store,
            metrics,
            handle,
            token,
        }
    }

    async fn connect(&self) -> TcpStream {
        TcpStream::connect(self.handle.local_addr().unwrap())
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.token.cancel();
        self.handle.stopped().await;
    }
}

/// Send one framed message and wait for the ACK byte.
async fn send_message(stream: &mut TcpStream, msg_type: MessageType, payload: serde_json::Value) {
    let bytes = serde_json::to_vec(&payload).unwrap();
    wire::write_frame(stream, msg_type, &bytes).await.unwrap();

    let mut ack = [0u8; 1];
    stream.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], wire::ACK_OK);
}

/// One flush interval plus margin.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

#[tokio::test]
async fn test_ingest_one_trace_one_span() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    send_message(
        &mut conn,
        MessageType::Span,
        json!({
            "span_id": "s1", "trace_id": "t1", "operation_type": "LLM",
            "operation_name": "chat", "start_time": 2, "duration_ms": 10,
            "prompt_tokens": 3, "completion_tokens": 5, "status": "ok"
        }),
    )
    .await;
    settle().await;

    let traces = daemon
        .store
        .query_traces(&TraceFilter::default().with_limit(10))
        .await
        .unwrap();
    assert_eq!(traces.len(), 1);
    assert_eq!(traces[0].trace_id, "t1");

    let timeline = daemon.store.query_timeline("t1").await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].span_id, "s1");

    let stats = daemon.store.trace_stats("t1").await.unwrap();
    assert_eq!(stats.total_spans, 1);
    assert_eq!(stats.llm_calls, 1);
    assert_eq!(stats.total_prompt_tokens, 3);
    assert_eq!(stats.total_completion_tokens, 5);
    assert_eq!(stats.total_duration_ms, 10);

    let snapshot = daemon.metrics.snapshot();
    assert_eq!(snapshot.traces_ingested, 1);
    assert_eq!(snapshot.spans_ingested, 1);
    assert_eq!(snapshot.error_count, 0);

    daemon.stop().await;
}

#[tokio::test]
async fn test_memory_diff_capture() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    send_message(
        &mut conn,
        MessageType::Span,
        json!({
            "span_id": "s1", "trace_id": "t1", "operation_type": "MEMORY",
            "operation_name": "update_goal", "start_time": 2, "status": "ok"
        }),
    )
    .await;
    settle().await;

    send_message(
        &mut conn,
        MessageType::MemoryEvent,
        json!({
            "event_id": "e1", "span_id": "s1", "timestamp": 10,
            "operation": "ADD", "key": "goal", "new_value": "x"
        }),
    )
    .await;
    send_message(
        &mut conn,
        MessageType::MemoryEvent,
        json!({
            "event_id": "e2", "span_id": "s1", "timestamp": 20,
            "operation": "UPDATE", "key": "goal", "old_value": "x", "new_value": "y"
        }),
    )
    .await;
    settle().await;

    let diffs = daemon.store.memory_diffs("s1").await.unwrap();
    assert_eq!(diffs.len(), 2);
    assert_eq!(diffs[0].event_id, "e1");
    assert_eq!(diffs[1].event_id, "e2");

    let history = daemon.store.memory_timeline("goal", "default").await.unwrap();
    assert_eq!(history.len(), 2);

    assert_eq!(daemon.metrics.snapshot().memory_events, 2);
    daemon.stop().await;
}

#[tokio::test]
async fn test_full_text_search_after_ingest() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    send_message(
        &mut conn,
        MessageType::Span,
        json!({
            "span_id": "s1", "trace_id": "t1", "operation_type": "LLM",
            "operation_name": "chat", "start_time": 2, "status": "ok",
            "prompt": "transformer architecture"
        }),
    )
    .await;
    send_message(
        &mut conn,
        MessageType::Span,
        json!({
            "span_id": "s2", "trace_id": "t1", "operation_type": "LLM",
            "operation_name": "chat", "start_time": 3, "status": "ok",
            "prompt": "weather tomorrow"
        }),
    )
    .await;
    settle().await;

    let hits = daemon.store.search_content("transformer", 10).await.unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].span_id, "s1");

    daemon.stop().await;
}

#[tokio::test]
async fn test_batch_round_trip_counts() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    send_message(
        &mut conn,
        MessageType::Batch,
        json!({
            "traces": [
                {"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}
            ],
            "spans": [
                {"span_id": "s1", "trace_id": "t1", "operation_type": "MEMORY",
                 "operation_name": "m", "start_time": 2, "status": "ok"},
                {"span_id": "s2", "trace_id": "t1", "operation_type": "TOOL",
                 "operation_name": "t", "start_time": 3, "status": "ok"},
                {"span_id": "s3", "trace_id": "t1", "operation_type": "LLM",
                 "operation_name": "l", "start_time": 4, "status": "ok"}
            ],
            "memory_events": [
                {"event_id": "e1", "span_id": "s1", "timestamp": 5,
                 "operation": "ADD", "key": "k1", "new_value": "v"},
                {"event_id": "e2", "span_id": "s1", "timestamp": 6,
                 "operation": "ADD", "key": "k2", "new_value": "v"}
            ],
            "tool_calls": [
                {"span_id": "s2", "tool_name": "search", "success": true, "latency_ms": 4}
            ]
        }),
    )
    .await;

    // Batches commit synchronously before the ACK; no settling needed.
    assert_eq!(daemon.store.query_timeline("t1").await.unwrap().len(), 3);
    assert_eq!(daemon.store.memory_diffs("s1").await.unwrap().len(), 2);

    let stats = daemon.store.trace_stats("t1").await.unwrap();
    assert_eq!(stats.tool_calls, 1);
    assert_eq!(stats.memory_event_count, 2);

    let snapshot = daemon.metrics.snapshot();
    assert_eq!(snapshot.spans_ingested, 3);
    assert_eq!(snapshot.memory_events, 2);
    assert_eq!(snapshot.batches_committed, 1);

    // The journaled payload was marked committed.
    assert!(daemon.store.pending_payloads().await.unwrap().is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn test_crash_recovery_replays_pending_batch() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("oculo.db");

    // A daemon journaled a batch but died before committing it.
    {
        let store = SqliteStore::open(&db_path).await.unwrap();
        let payload = json!({
            "traces": [
                {"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}
            ],
            "spans": [
                {"span_id": "s1", "trace_id": "t1", "operation_type": "LLM",
                 "operation_name": "chat", "start_time": 2, "status": "ok"}
            ]
        });
        store
            .write_pending_payload(&serde_json::to_vec(&payload).unwrap())
            .await
            .unwrap();
    }

    // A fresh daemon replays it at startup.
    let store = Arc::new(SqliteStore::open(&db_path).await.unwrap());
    let daemon = TestDaemon::start_with_store(Arc::clone(&store)).await;

    let timeline = store.query_timeline("t1").await.unwrap();
    assert_eq!(timeline.len(), 1);
    assert_eq!(timeline[0].span_id, "s1");
    assert!(store.pending_payloads().await.unwrap().is_empty());

    daemon.stop().await;
}

#[tokio::test]
async fn test_unknown_message_type_keeps_connection_open() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    // Unknown type byte with an empty payload: rejected but ACKed.
    conn.write_all(&[0x7f]).await.unwrap();
    conn.write_all(&0u32.to_be_bytes()).await.unwrap();
    let mut ack = [0u8; 1];
    conn.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], wire::ACK_OK);

    // The same connection still accepts valid messages.
    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;
    settle().await;

    assert_eq!(
        daemon
            .store
            .query_traces(&TraceFilter::default())
            .await
            .unwrap()
            .len(),
        1
    );
    assert_eq!(daemon.metrics.snapshot().error_count, 1);

    daemon.stop().await;
}

#[tokio::test]
async fn test_malformed_payload_keeps_connection_open() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    wire::write_frame(&mut conn, MessageType::Span, b"definitely not json")
        .await
        .unwrap();
    let mut ack = [0u8; 1];
    conn.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], wire::ACK_OK);

    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;

    assert_eq!(daemon.metrics.snapshot().error_count, 1);
    daemon.stop().await;
}

#[tokio::test]
async fn test_oversize_frame_closes_connection() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    conn.write_all(&[MessageType::Span.as_byte()]).await.unwrap();
    conn.write_all(&(wire::MAX_PAYLOAD_BYTES + 1).to_be_bytes())
        .await
        .unwrap();

    // The server terminates the connection instead of ACKing.
    let mut buf = [0u8; 1];
    let read = conn.read(&mut buf).await.unwrap();
    assert_eq!(read, 0);

    settle().await;
    assert_eq!(daemon.metrics.snapshot().error_count, 1);
    daemon.stop().await;
}

#[tokio::test]
async fn test_shutdown_flushes_buffered_spans() {
    let daemon = TestDaemon::start().await;
    let mut conn = daemon.connect().await;

    send_message(
        &mut conn,
        MessageType::Trace,
        json!({"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}),
    )
    .await;
    tokio::time::sleep(Duration::from_millis(150)).await;
    send_message(
        &mut conn,
        MessageType::Span,
        json!({
            "span_id": "s1", "trace_id": "t1", "operation_type": "LLM",
            "operation_name": "chat", "start_time": 2, "status": "ok"
        }),
    )
    .await;

    // Shut down right away: the span may still be buffered, and the final
    // flush must not lose it.
    let store = Arc::clone(&daemon.store);
    daemon.stop().await;

    assert_eq!(store.query_timeline("t1").await.unwrap().len(), 1);
}

#[cfg(unix)]
#[tokio::test]
async fn test_unix_socket_ingest() {
    let dir = tempfile::tempdir().unwrap();
    let socket_path = dir.path().join("oculo.sock");

    let store = Arc::new(SqliteStore::open_in_memory().await.unwrap());
    let config = DaemonConfig {
        listen_addr: socket_path.to_string_lossy().into_owned(),
        metrics_addr: String::new(),
        batch_size: 1000,
        flush_interval_ms: 100,
        ..DaemonConfig::default()
    };
    let metrics = Arc::new(IngestMetrics::new());
    let token = CancellationToken::new();
    let handle = Ingester::new(
        config,
        Arc::clone(&store) as Arc<dyn Store>,
        Arc::clone(&metrics),
    )
    .start(token.clone())
    .await
    .unwrap();

    let mut conn = tokio::net::UnixStream::connect(&socket_path).await.unwrap();
    let payload = serde_json::to_vec(&json!(
        {"trace_id": "t1", "agent_name": "a", "start_time": 1, "status": "running"}
    ))
    .unwrap();
    wire::write_frame(&mut conn, MessageType::Trace, &payload)
        .await
        .unwrap();
    let mut ack = [0u8; 1];
    conn.read_exact(&mut ack).await.unwrap();
    assert_eq!(ack[0], wire::ACK_OK);

    settle().await;
    assert_eq!(
        store.query_traces(&TraceFilter::default()).await.unwrap().len(),
        1
    );

    token.cancel();
    handle.stopped().await;
}

#[tokio::test]
async fn test_metrics_endpoint_serves_all_routes() {
    let ingest_metrics = Arc::new(IngestMetrics::new());
    ingest_metrics.traces_ingested.inc_by(2);

    let token = CancellationToken::new();
    let (addr, task) = metrics::serve("127.0.0.1:0", Arc::clone(&ingest_metrics), token.clone())
        .await
        .unwrap();

    let health: serde_json::Value = reqwest::get(format!("http://{addr}/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(health["status"], "ok");

    let text = reqwest::get(format!("http://{addr}/metrics"))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(text.contains("# TYPE oculo_traces_ingested_total counter"));
    assert!(text.contains("oculo_traces_ingested_total 2"));
    assert!(text.contains("# TYPE oculo_uptime_seconds gauge"));

    let snapshot: metrics::MetricsSnapshot = reqwest::get(format!("http://{addr}/api/metrics"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(snapshot.traces_ingested, 2);

    token.cancel();
    let _ = task.await;
}
