//! SQLite storage engine for Oculo
//!
//! Implements the [`oculo_core::Store`] trait on top of a WAL-mode SQLite
//! database with an FTS5 full-text index over span content. Single-writer,
//! many-reader: all writes are serialized behind an exclusive lock held by
//! the store.

mod sqlite;

pub use sqlite::SqliteStore;
