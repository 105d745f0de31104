//! Oculo — local observability for AI agents.
//!
//! One binary, five subcommands: `daemon` runs the ingestion service,
//! `analyze` produces a statistical report for a trace, `query` lists traces
//! and spans or runs a full-text search, `status` summarizes daemon metrics,
//! and `version` prints build information.

use clap::{Parser, Subcommand, ValueEnum};
use oculo_analysis::Analyzer;
use oculo_core::{DaemonConfig, Store, TraceFilter};
use oculo_daemon::{config, ingest::Ingester, metrics, metrics::IngestMetrics, shutdown};
use oculo_storage::SqliteStore;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

// ---------------------------------------------------------------------------
// CLI definition
// ---------------------------------------------------------------------------

/// The glass box for AI agents.
#[derive(Parser)]
#[command(name = "oculo", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the ingestion daemon.
    Daemon {
        /// Path to a YAML configuration file.
        #[arg(long, env = "OCULO_CONFIG")]
        config: Option<PathBuf>,
        /// TCP address or Unix-domain socket path to listen on.
        #[arg(long)]
        listen: Option<String>,
        /// Path to the SQLite database file.
        #[arg(long)]
        db: Option<PathBuf>,
        /// HTTP address for the metrics endpoint.
        #[arg(long)]
        metrics: Option<String>,
        /// Batch size before a flush is forced.
        #[arg(long)]
        batch: Option<usize>,
        /// Flush interval in milliseconds.
        #[arg(long, value_name = "MS")]
        flush: Option<u64>,
    },
    /// Run statistical analysis on a trace.
    Analyze {
        /// Trace ID to analyze.
        #[arg(long)]
        trace: String,
        /// Path to the SQLite database file.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Output format.
        #[arg(long, value_enum, default_value = "markdown")]
        format: ReportFormat,
    },
    /// Query traces and spans.
    Query {
        /// Path to the SQLite database file.
        #[arg(long)]
        db: Option<PathBuf>,
        /// Filter by agent name.
        #[arg(long)]
        agent: Option<String>,
        /// Show the span timeline of a specific trace.
        #[arg(long)]
        trace: Option<String>,
        /// Full-text search over prompts and completions.
        #[arg(long)]
        search: Option<String>,
        /// Maximum results.
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
    /// Show daemon status and metrics.
    Status {
        /// Metrics endpoint address of the daemon.
        #[arg(long)]
        metrics: Option<String>,
    },
    /// Print version information.
    Version,
}

#[derive(Clone, Copy, ValueEnum)]
enum ReportFormat {
    Markdown,
    Json,
}

// ---------------------------------------------------------------------------
// Entrypoint
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Daemon {
            config,
            listen,
            db,
            metrics,
            batch,
            flush,
        } => run_daemon(config, listen, db, metrics, batch, flush).await,
        Commands::Analyze { trace, db, format } => run_analyze(&trace, db, format).await,
        Commands::Query {
            db,
            agent,
            trace,
            search,
            limit,
        } => run_query(db, agent, trace, search, limit).await,
        Commands::Status { metrics } => run_status(metrics).await,
        Commands::Version => {
            println!(
                "oculo v{} (commit: {}, built: {})",
                env!("CARGO_PKG_VERSION"),
                option_env!("OCULO_GIT_COMMIT").unwrap_or("unknown"),
                option_env!("OCULO_BUILD_TIME").unwrap_or("unknown"),
            );
            Ok(())
        }
    }
}

// ---------------------------------------------------------------------------
// daemon
// ---------------------------------------------------------------------------

/// Resolve configuration (flags > env > file > defaults) and run the daemon
/// until a termination signal arrives.
async fn run_daemon(
    config_path: Option<PathBuf>,
    listen: Option<String>,
    db: Option<PathBuf>,
    metrics_addr: Option<String>,
    batch: Option<usize>,
    flush: Option<u64>,
) -> anyhow::Result<()> {
    let mut cfg = match config_path {
        Some(path) => config::load_config(&path)?,
        None => DaemonConfig::default(),
    };
    config::apply_env_overrides(&mut cfg);

    if let Some(listen) = listen {
        cfg.listen_addr = listen;
    }
    if let Some(db) = db {
        cfg.db_path = db;
    }
    if let Some(addr) = metrics_addr {
        cfg.metrics_addr = addr;
    }
    if let Some(batch) = batch {
        cfg.batch_size = batch;
    }
    if let Some(flush) = flush {
        cfg.flush_interval_ms = flush;
    }
    config::validate_config(&cfg)?;

    init_logging(&cfg);

    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(&cfg.db_path).await?);
    let ingest_metrics = Arc::new(IngestMetrics::new());
    let token = CancellationToken::new();

    let handle = Ingester::new(cfg.clone(), Arc::clone(&store), Arc::clone(&ingest_metrics))
        .start(token.clone())
        .await?;

    let metrics_task = if cfg.metrics_addr.is_empty() {
        None
    } else {
        let (_, task) =
            metrics::serve(&cfg.metrics_addr, Arc::clone(&ingest_metrics), token.clone()).await?;
        Some(task)
    };

    println!();
    println!("  OCULO DAEMON");
    println!("  The glass box for AI agents");
    println!();
    println!("  Listen:  {}", cfg.listen_addr);
    println!("  DB:      {}", cfg.db_path.display());
    if !cfg.metrics_addr.is_empty() {
        println!("  Metrics: http://{}/metrics", cfg.metrics_addr);
    }
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    shutdown::shutdown_signal(token.clone()).await;

    info!("shutting down");
    handle.stopped().await;
    if let Some(task) = metrics_task {
        let _ = task.await;
    }
    info!("daemon stopped");

    Ok(())
}

/// Initialize structured logging. `RUST_LOG` wins over the configured level.
fn init_logging(cfg: &DaemonConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&cfg.logging.level));

    match cfg.logging.format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .json()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_target(true)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// analyze
// ---------------------------------------------------------------------------

async fn run_analyze(
    trace_id: &str,
    db: Option<PathBuf>,
    format: ReportFormat,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(resolve_db_path(db)).await?);
    let analyzer = Analyzer::new(store);
    let report = analyzer.full_analysis(trace_id).await;

    match format {
        ReportFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
        ReportFormat::Markdown => print!("{}", oculo_analysis::format_report(&report)),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// query
// ---------------------------------------------------------------------------

/// Exclusive query modes: `--search` wins, then `--trace`, then the filtered
/// trace listing. Output is JSON.
async fn run_query(
    db: Option<PathBuf>,
    agent: Option<String>,
    trace: Option<String>,
    search: Option<String>,
    limit: u32,
) -> anyhow::Result<()> {
    let store: Arc<dyn Store> = Arc::new(SqliteStore::open(resolve_db_path(db)).await?);

    if let Some(query) = search {
        let spans = store.search_content(&query, i64::from(limit)).await?;
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(());
    }

    if let Some(trace_id) = trace {
        let spans = store.query_timeline(&trace_id).await?;
        println!("{}", serde_json::to_string_pretty(&spans)?);
        return Ok(());
    }

    let mut filter = TraceFilter::default().with_limit(limit);
    if let Some(agent) = agent {
        filter = filter.with_agent(agent);
    }
    let traces = store.query_traces(&filter).await?;
    println!("{}", serde_json::to_string_pretty(&traces)?);
    Ok(())
}

// ---------------------------------------------------------------------------
// status
// ---------------------------------------------------------------------------

async fn run_status(metrics_addr: Option<String>) -> anyhow::Result<()> {
    let addr = metrics_addr.unwrap_or_else(|| DaemonConfig::default().metrics_addr);
    let url = format!("http://{addr}/api/metrics");

    let response = match reqwest::get(&url).await {
        Ok(response) => response,
        Err(_) => {
            eprintln!("⚠ Oculo daemon is not running.");
            eprintln!("  Start it with: oculo daemon");
            eprintln!("  (tried: {url})");
            std::process::exit(1);
        }
    };

    let snapshot: metrics::MetricsSnapshot = response.json().await?;

    println!("✅ Oculo daemon is running.");
    println!();
    println!("  Traces ingested:     {}", snapshot.traces_ingested);
    println!("  Spans ingested:      {}", snapshot.spans_ingested);
    println!("  Memory events:       {}", snapshot.memory_events);
    println!("  Batches committed:   {}", snapshot.batches_committed);
    println!("  Errors:              {}", snapshot.error_count);
    println!("  Uptime:              {}s", snapshot.uptime_seconds);
    Ok(())
}

fn resolve_db_path(db: Option<PathBuf>) -> PathBuf {
    db.unwrap_or_else(|| DaemonConfig::default().db_path)
}
