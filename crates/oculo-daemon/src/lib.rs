//! Oculo ingestion daemon
//!
//! The daemon accepts producer connections over a framed socket protocol,
//! buffers records into per-type queues, and commits batches to the SQLite
//! store from a single flush loop. A small HTTP server exposes ingestion
//! counters for the status tool.

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod shutdown;
pub mod wire;
