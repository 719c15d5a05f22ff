//! Burrow: an embedded, WAL-backed key-value engine.
//!
//! The engine keeps a sorted in-memory table for hot data while an
//! append-only log provides a durable history that is replayed on open.
//! On top of the basic get/put/delete surface it offers explicit
//! transactions with abort, ordered cursors, prefix scans, a periodic
//! flush-and-compact entry point, and file-level salvage and verification
//! for recovery tooling.

pub mod kv;
pub mod wal;

pub use kv::{BurrowKv, Hash, KvError};
pub use wal::{FileWal, WalError, WAL_FILE_NAME};
