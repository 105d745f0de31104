//! The ingestion daemon: accepts producer connections, decodes framed
//! messages, and batches writes to the store.
//!
//! Architecture:
//!
//! ```text
//! client → framed message → decode → per-type queue → flush loop → store
//! ```
//!
//! Each accepted connection gets its own task that blocks on socket reads
//! and performs non-blocking enqueues; if a queue is full the item is
//! inserted directly so backpressure becomes a latency penalty on the
//! offending connection, never dropped data. Exactly one flush loop drains
//! the queues and performs all batched writes — the store supports a single
//! writer, so the loop is the only sustained write path.
//!
//! `BATCH` payloads are journaled to the pending-write log before commit and
//! marked committed afterwards; at startup any rows still pending from a
//! previous crash are replayed through the same commit path.

use crate::metrics::IngestMetrics;
use crate::wire::{self, FrameError, MessageType, WireBatch};
use oculo_core::{DaemonConfig, MemoryEvent, OculoError, Result, Span, Store, Trace};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// Listener (TCP or Unix-domain)
// ---------------------------------------------------------------------------

trait Connection: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Connection for T {}

enum IngestListener {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

impl IngestListener {
    /// Bind the listen address. Addresses beginning with `/` are
    /// Unix-domain socket paths; a stale socket file is unlinked first.
    async fn bind(addr: &str) -> Result<Self> {
        #[cfg(unix)]
        if addr.starts_with('/') {
            let _ = std::fs::remove_file(addr);
            let listener = UnixListener::bind(addr)
                .map_err(|e| OculoError::Config(format!("listening on {addr}: {e}")))?;
            return Ok(IngestListener::Unix(listener));
        }

        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| OculoError::Config(format!("listening on {addr}: {e}")))?;
        Ok(IngestListener::Tcp(listener))
    }

    fn local_addr(&self) -> Option<SocketAddr> {
        match self {
            IngestListener::Tcp(listener) => listener.local_addr().ok(),
            #[cfg(unix)]
            IngestListener::Unix(_) => None,
        }
    }

    async fn accept(&self) -> std::io::Result<Box<dyn Connection>> {
        match self {
            IngestListener::Tcp(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            IngestListener::Unix(listener) => {
                let (stream, _) = listener.accept().await?;
                Ok(Box::new(stream))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Shared connection context
// ---------------------------------------------------------------------------

/// Everything a connection task needs: the store for direct-insert
/// fallbacks and batches, the counters, and the queue senders.
#[derive(Clone)]
struct Shared {
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
    trace_tx: mpsc::Sender<Trace>,
    span_tx: mpsc::Sender<Span>,
    memory_event_tx: mpsc::Sender<MemoryEvent>,
}

// ---------------------------------------------------------------------------
// Ingester
// ---------------------------------------------------------------------------

/// The ingestion daemon. Construct with [`Ingester::new`], then call
/// [`Ingester::start`] to replay pending writes, bind the listener, and
/// spawn the accept and flush tasks.
pub struct Ingester {
    config: DaemonConfig,
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
}

/// Handle to a running ingester. Cancel the token passed to
/// [`Ingester::start`], then await [`IngesterHandle::stopped`] to drain.
pub struct IngesterHandle {
    local_addr: Option<SocketAddr>,
    accept_task: JoinHandle<()>,
    flush_task: JoinHandle<()>,
}

impl IngesterHandle {
    /// The bound TCP address, when listening on TCP. Useful with port 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    /// Wait for the accept loop, all connection tasks, and the final flush.
    pub async fn stopped(self) {
        let _ = self.accept_task.await;
        let _ = self.flush_task.await;
    }
}

impl Ingester {
    pub fn new(config: DaemonConfig, store: Arc<dyn Store>, metrics: Arc<IngestMetrics>) -> Self {
        Self {
            config,
            store,
            metrics,
        }
    }

    /// Replay crash-recovery state, bind the listener, and start serving.
    pub async fn start(self, shutdown: CancellationToken) -> Result<IngesterHandle> {
        replay_pending(&self.store, &self.metrics).await?;

        let listener = IngestListener::bind(&self.config.listen_addr).await?;
        let local_addr = listener.local_addr();
        info!(addr = %self.config.listen_addr, "ingestion daemon listening");

        // Trace queue is smaller: low volume, inserted immediately on drain.
        let (trace_tx, trace_rx) = mpsc::channel(self.config.batch_size);
        let (span_tx, span_rx) = mpsc::channel(self.config.batch_size * 2);
        let (memory_event_tx, memory_event_rx) = mpsc::channel(self.config.batch_size * 2);

        let shared = Shared {
            store: Arc::clone(&self.store),
            metrics: Arc::clone(&self.metrics),
            trace_tx,
            span_tx,
            memory_event_tx,
        };

        let flush_task = tokio::spawn(flush_loop(
            Arc::clone(&self.store),
            Arc::clone(&self.metrics),
            self.config.batch_size,
            self.config.flush_interval(),
            trace_rx,
            span_rx,
            memory_event_rx,
        ));

        let accept_task = tokio::spawn(accept_loop(listener, shared, shutdown));

        Ok(IngesterHandle {
            local_addr,
            accept_task,
            flush_task,
        })
    }
}

// ---------------------------------------------------------------------------
// Accept loop and connection handling
// ---------------------------------------------------------------------------

/// Accept connections until cancelled, then wait for every connection task.
/// Dropping `shared` on exit closes the queues, which lets the flush loop
/// drain and finish.
async fn accept_loop(listener: IngestListener, shared: Shared, shutdown: CancellationToken) {
    let mut connections = JoinSet::new();

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => match accepted {
                Ok(stream) => {
                    debug!("new producer connection");
                    connections.spawn(handle_connection(
                        stream,
                        shared.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => {
                    error!(error = %e, "accept failed");
                }
            }
        }
    }

    drop(listener);
    while connections.join_next().await.is_some() {}
}

/// Read framed messages off one connection until it closes, the framing
/// breaks, or shutdown is signalled. Decode and store failures are counted
/// and logged but keep the connection alive; framing failures close it.
async fn handle_connection(
    stream: Box<dyn Connection>,
    shared: Shared,
    shutdown: CancellationToken,
) {
    let (mut reader, mut writer) = tokio::io::split(stream);

    loop {
        let frame = tokio::select! {
            _ = shutdown.cancelled() => return,
            frame = wire::read_frame(&mut reader) => frame,
        };

        match frame {
            Ok((msg_type, payload)) => {
                if let Err(e) = process_message(&shared, msg_type, &payload).await {
                    warn!(error = %e, "processing message");
                    shared.metrics.error_count.inc();
                }
                // Success-only ACK; the error byte stays reserved.
                if writer.write_all(&[wire::ACK_OK]).await.is_err() {
                    return;
                }
            }
            Err(FrameError::Eof) => return,
            Err(e) => {
                warn!(error = %e, "closing connection");
                shared.metrics.error_count.inc();
                return;
            }
        }
    }
}

/// Decode a message and route it: individual records go to their queue (or
/// straight to the store when the queue is full), batches commit through the
/// pending-write journal.
async fn process_message(shared: &Shared, msg_type: u8, payload: &[u8]) -> Result<()> {
    let Some(msg_type) = MessageType::from_byte(msg_type) else {
        return Err(OculoError::Wire(format!(
            "unknown message type: 0x{msg_type:02x}"
        )));
    };

    match msg_type {
        MessageType::Trace => {
            let trace: Trace = serde_json::from_slice(payload)?;
            if let Err(returned) = shared.trace_tx.try_send(trace) {
                shared.store.insert_trace(&returned.into_inner()).await?;
            }
            shared.metrics.traces_ingested.inc();
        }
        MessageType::Span => {
            let span: Span = serde_json::from_slice(payload)?;
            if let Err(returned) = shared.span_tx.try_send(span) {
                shared.store.insert_span(&returned.into_inner()).await?;
            }
            shared.metrics.spans_ingested.inc();
        }
        MessageType::MemoryEvent => {
            let event: MemoryEvent = serde_json::from_slice(payload)?;
            if let Err(returned) = shared.memory_event_tx.try_send(event) {
                shared
                    .store
                    .insert_memory_event(&returned.into_inner())
                    .await?;
            }
            shared.metrics.memory_events.inc();
        }
        MessageType::Batch => {
            let batch: WireBatch = serde_json::from_slice(payload)?;
            let write_id = shared.store.write_pending_payload(payload).await?;
            commit_batch(&shared.store, &shared.metrics, &batch).await?;
            shared.store.commit_pending_payload(write_id).await?;
        }
    }

    Ok(())
}

/// Commit a batch: traces one by one (upsert), spans as one transaction,
/// memory events as one transaction, tool calls one by one. Sub-batches are
/// independent transactions; the first failure aborts the rest but already
/// committed sub-batches stay.
async fn commit_batch(
    store: &Arc<dyn Store>,
    metrics: &IngestMetrics,
    batch: &WireBatch,
) -> Result<()> {
    for trace in &batch.traces {
        store.insert_trace(trace).await?;
        metrics.traces_ingested.inc();
    }

    if !batch.spans.is_empty() {
        store.batch_insert_spans(&batch.spans).await?;
        metrics.spans_ingested.inc_by(batch.spans.len() as u64);
    }

    if !batch.memory_events.is_empty() {
        store
            .batch_insert_memory_events(&batch.memory_events)
            .await?;
        metrics.memory_events.inc_by(batch.memory_events.len() as u64);
    }

    for call in &batch.tool_calls {
        store.insert_tool_call(call).await?;
    }

    metrics.batches_committed.inc();
    Ok(())
}

// ---------------------------------------------------------------------------
// Flush loop
// ---------------------------------------------------------------------------

/// The single consumer of all three queues. Commits a buffer when it reaches
/// `batch_size` or when the flush interval elapses; traces are inserted
/// immediately on drain. Exits after all senders are gone (connection tasks
/// finished), performing a final flush.
async fn flush_loop(
    store: Arc<dyn Store>,
    metrics: Arc<IngestMetrics>,
    batch_size: usize,
    flush_interval: std::time::Duration,
    mut trace_rx: mpsc::Receiver<Trace>,
    mut span_rx: mpsc::Receiver<Span>,
    mut memory_event_rx: mpsc::Receiver<MemoryEvent>,
) {
    let mut span_buf: Vec<Span> = Vec::with_capacity(batch_size);
    let mut memory_event_buf: Vec<MemoryEvent> = Vec::with_capacity(batch_size);

    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut trace_open = true;
    let mut span_open = true;
    let mut memory_event_open = true;

    loop {
        tokio::select! {
            item = trace_rx.recv(), if trace_open => match item {
                Some(trace) => {
                    // Low volume, high ordering value: never buffered.
                    if let Err(e) = store.insert_trace(&trace).await {
                        error!(error = %e, trace_id = %trace.trace_id, "inserting trace");
                        metrics.error_count.inc();
                    }
                }
                None => trace_open = false,
            },
            item = span_rx.recv(), if span_open => match item {
                Some(span) => {
                    span_buf.push(span);
                    if span_buf.len() >= batch_size {
                        flush(&store, &metrics, &mut span_buf, &mut memory_event_buf).await;
                    }
                }
                None => span_open = false,
            },
            item = memory_event_rx.recv(), if memory_event_open => match item {
                Some(event) => {
                    memory_event_buf.push(event);
                    if memory_event_buf.len() >= batch_size {
                        flush(&store, &metrics, &mut span_buf, &mut memory_event_buf).await;
                    }
                }
                None => memory_event_open = false,
            },
            _ = ticker.tick() => {
                flush(&store, &metrics, &mut span_buf, &mut memory_event_buf).await;
            }
        }

        if !trace_open && !span_open && !memory_event_open {
            flush(&store, &metrics, &mut span_buf, &mut memory_event_buf).await;
            debug!("flush loop drained");
            return;
        }
    }
}

async fn flush(
    store: &Arc<dyn Store>,
    metrics: &IngestMetrics,
    span_buf: &mut Vec<Span>,
    memory_event_buf: &mut Vec<MemoryEvent>,
) {
    if !span_buf.is_empty() {
        match store.batch_insert_spans(span_buf).await {
            Ok(()) => metrics.batches_committed.inc(),
            Err(e) => {
                error!(error = %e, count = span_buf.len(), "flushing span batch");
                metrics.error_count.inc();
            }
        }
        span_buf.clear();
    }

    if !memory_event_buf.is_empty() {
        match store.batch_insert_memory_events(memory_event_buf).await {
            Ok(()) => metrics.batches_committed.inc(),
            Err(e) => {
                error!(error = %e, count = memory_event_buf.len(), "flushing memory event batch");
                metrics.error_count.inc();
            }
        }
        memory_event_buf.clear();
    }
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Replay payloads journaled before a crash: decode each as a batch, commit
/// through the normal batch path, and mark it committed. Rows that fail to
/// decode or commit are logged and left pending for inspection.
async fn replay_pending(store: &Arc<dyn Store>, metrics: &Arc<IngestMetrics>) -> Result<()> {
    let pending = store.pending_payloads().await?;
    if pending.is_empty() {
        return Ok(());
    }

    info!(count = pending.len(), "replaying pending writes from crash recovery");

    for write in pending {
        let batch: WireBatch = match serde_json::from_slice(&write.payload) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(write_id = write.write_id, error = %e, "skipping corrupt pending write");
                metrics.error_count.inc();
                continue;
            }
        };

        if let Err(e) = commit_batch(store, metrics, &batch).await {
            error!(write_id = write.write_id, error = %e, "replaying pending write");
            metrics.error_count.inc();
            continue;
        }

        if let Err(e) = store.commit_pending_payload(write.write_id).await {
            error!(write_id = write.write_id, error = %e, "marking pending write committed");
            metrics.error_count.inc();
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
