//! Reporting sinks for harvested run records.
//!
//! A harvest produces one [`RunBatch`]: the run records plus the declared
//! table schema they are written with. Sinks handle:
//! - Cursor lookup (max `update_time` already recorded for a scope)
//! - All-or-nothing batch append
//! - Debug snapshots of the batch (CSV or Parquet)

use modelstore_protocol::{Cursor, Scope};
use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

mod batch;
#[cfg(feature = "sink-duckdb")]
mod relational;
mod snapshot;

pub use batch::{arrow_schema, RunBatch};
#[cfg(feature = "sink-duckdb")]
pub use relational::duckdb::DuckDbSink;
#[cfg(feature = "sink-duckdb")]
pub use relational::lock::{lock_path_for, LockError};
pub use snapshot::{write_snapshot, SnapshotFormat};

/// Errors returned by batch assembly, snapshots and sinks.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{message}")]
    Message { message: String },
    #[error("{message}")]
    Source {
        message: String,
        #[source]
        source: anyhow::Error,
    },
}

pub type SinkResult<T> = std::result::Result<T, SinkError>;

impl SinkError {
    pub fn message(message: impl Into<String>) -> Self {
        SinkError::Message {
            message: message.into(),
        }
    }
}

impl From<anyhow::Error> for SinkError {
    fn from(err: anyhow::Error) -> Self {
        SinkError::Source {
            message: format!("{:#}", err),
            source: err,
        }
    }
}

/// Read side of a reporting sink: where the last harvest left off.
pub trait CursorStore: Send {
    /// Maximum recorded `update_time` for exactly this scope, `None` when the
    /// scope has no rows. Query failures are errors, never `None`.
    fn resolve_cursor(&self, scope: &Scope) -> SinkResult<Option<Cursor>>;
}

/// Write side of a reporting sink.
pub trait RecordSink: Send {
    /// Human-readable destination, for logs.
    fn describe(&self) -> String;

    /// Append every row of `batch` or none of them. Returns rows written.
    fn append(&mut self, batch: &RunBatch) -> SinkResult<u64>;
}

/// A sink that can both resolve cursors and take appends.
pub trait ReportingSink: CursorStore + RecordSink {}

impl<T: CursorStore + RecordSink> ReportingSink for T {}

/// One sink shared by concurrent harvests of different scopes.
///
/// Every call locks the inner sink for its duration, so cursor queries and
/// appends queue instead of contending for the underlying store.
pub struct SharedSink<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> SharedSink<S> {
    pub fn new(sink: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(sink)),
        }
    }

    fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl<S> Clone for SharedSink<S> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<S: CursorStore> CursorStore for SharedSink<S> {
    fn resolve_cursor(&self, scope: &Scope) -> SinkResult<Option<Cursor>> {
        self.lock().resolve_cursor(scope)
    }
}

impl<S: RecordSink> RecordSink for SharedSink<S> {
    fn describe(&self) -> String {
        self.lock().describe()
    }

    fn append(&mut self, batch: &RunBatch) -> SinkResult<u64> {
        self.lock().append(batch)
    }
}
