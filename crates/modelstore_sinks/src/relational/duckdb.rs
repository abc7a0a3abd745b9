use anyhow::{Context, Result};
use modelstore_protocol::{ColumnSpec, ColumnType, Cursor, OutputConfig, Scope, TableSchema};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use super::lock::{try_lock_exclusive, LockError, LockGuard};
use super::quote_ident;
use crate::batch::RunBatch;
use crate::{CursorStore, RecordSink, SinkError, SinkResult};

/// Local reporting table in a DuckDB file.
///
/// Addressing: catalog → `<dir>/<catalog>.duckdb`, dataset → schema,
/// table → table. The table is created from the declared schema on open.
pub struct DuckDbSink {
    db_path: PathBuf,
    dataset: String,
    table: String,
    schema: TableSchema,
    conn: duckdb::Connection,
    _lock_guard: LockGuard,
}

impl DuckDbSink {
    pub fn open(dir: &Path, output: &OutputConfig, schema: TableSchema) -> SinkResult<Self> {
        output
            .validate()
            .map_err(|e| SinkError::message(e.to_string()))?;
        let db_path = dir.join(format!("{}.duckdb", output.output_catalog));
        Self::open_path(db_path, &output.output_dataset, &output.output_table, schema)
    }

    pub fn open_path(
        db_path: PathBuf,
        dataset: &str,
        table: &str,
        schema: TableSchema,
    ) -> SinkResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create database directory: {}", parent.display())
            })?;
        }

        let lock_guard = try_lock_exclusive(&db_path).map_err(|err| match err {
            LockError::Locked(path) => SinkError::message(format!(
                "DuckDB sink is locked by another writer: {}",
                path.display()
            )),
            other => SinkError::from(anyhow::Error::new(other)),
        })?;

        let conn = duckdb::Connection::open(&db_path)
            .with_context(|| format!("Failed to open DuckDB database: {}", db_path.display()))?;

        let sink = Self {
            db_path,
            dataset: dataset.to_string(),
            table: table.to_string(),
            schema,
            conn,
            _lock_guard: lock_guard,
        };
        sink.ensure_table()?;
        Ok(sink)
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn target(&self) -> String {
        format!("{}.{}", quote_ident(&self.dataset), quote_ident(&self.table))
    }

    fn column_sql_type(column: &ColumnSpec) -> &'static str {
        match (column.column_type, column.is_repeated()) {
            (ColumnType::String, false) => "VARCHAR",
            (ColumnType::String, true) => "VARCHAR[]",
            (ColumnType::Timestamp, false) => "TIMESTAMP",
            (ColumnType::Timestamp, true) => "TIMESTAMP[]",
        }
    }

    fn column_definitions(&self) -> String {
        self.schema
            .columns()
            .iter()
            .map(|c| {
                let nullable = if c.is_required() { " NOT NULL" } else { "" };
                format!(
                    "{} {}{}",
                    quote_ident(&c.name),
                    Self::column_sql_type(c),
                    nullable
                )
            })
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn ensure_table(&self) -> Result<()> {
        let create_schema = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.dataset));
        let create_table = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            self.target(),
            self.column_definitions()
        );
        debug!("CREATE TABLE: {}", create_table);
        self.conn
            .execute_batch(&format!("{};\n{};", create_schema, create_table))
            .with_context(|| format!("Failed to create reporting table {}", self.target()))?;
        Ok(())
    }

    fn stage_table_name() -> String {
        format!("__ms_stage_{}", uuid::Uuid::new_v4().simple())
    }

    fn append_staged(&mut self, batch: &RunBatch, stage: &str) -> Result<u64> {
        let stage_ident = quote_ident(stage);
        self.conn
            .execute(
                &format!("CREATE TABLE {} ({})", stage_ident, self.column_definitions()),
                [],
            )
            .context("Failed to create DuckDB stage table")?;

        {
            let mut appender = self
                .conn
                .appender(stage)
                .context("Failed to create DuckDB appender")?;
            appender
                .append_record_batch(batch.record_batch().clone())
                .context("Failed to append DuckDB record batch")?;
            appender.flush().context("Failed to flush DuckDB appender")?;
        }

        let column_list = self
            .schema
            .columns()
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ");
        let target = self.target();

        let tx = self
            .conn
            .transaction()
            .context("Failed to begin DuckDB transaction")?;
        let inserted = tx
            .execute(
                &format!(
                    "INSERT INTO {} ({}) SELECT {} FROM {}",
                    target, column_list, column_list, stage_ident
                ),
                [],
            )
            .context("Failed to append DuckDB stage data")?;
        tx.execute(&format!("DROP TABLE {}", stage_ident), [])
            .context("Failed to drop DuckDB stage table")?;
        tx.commit().context("Failed to commit DuckDB transaction")?;

        self.conn
            .execute_batch("CHECKPOINT")
            .context("Failed to checkpoint DuckDB database")?;
        Ok(inserted as u64)
    }
}

impl CursorStore for DuckDbSink {
    fn resolve_cursor(&self, scope: &Scope) -> SinkResult<Option<Cursor>> {
        let sql = format!(
            "SELECT epoch_us(max(update_time)) FROM {} WHERE project = ? AND region = ?",
            self.target()
        );
        debug!("Querying for last update: {} [{}]", sql, scope);

        let micros: Option<i64> = self
            .conn
            .query_row(&sql, duckdb::params![scope.project, scope.region], |row| {
                row.get(0)
            })
            .with_context(|| format!("Failed to query last update for {}", scope))?;

        match micros {
            None => Ok(None),
            Some(us) => Cursor::from_micros(us).map(Some).ok_or_else(|| {
                SinkError::message(format!("Stored update_time out of range: {}", us))
            }),
        }
    }
}

impl RecordSink for DuckDbSink {
    fn describe(&self) -> String {
        format!("duckdb://{}?table={}", self.db_path.display(), self.target())
    }

    fn append(&mut self, batch: &RunBatch) -> SinkResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        if batch.schema() != &self.schema {
            return Err(SinkError::message(format!(
                "Batch schema does not match reporting table {}",
                self.target()
            )));
        }

        let stage = Self::stage_table_name();
        match self.append_staged(batch, &stage) {
            Ok(rows) => {
                info!("Appended {} rows to {}", rows, self.describe());
                Ok(rows)
            }
            Err(err) => {
                warn!("DuckDB append failed, dropping stage table: {:#}", err);
                let _ = self
                    .conn
                    .execute(&format!("DROP TABLE IF EXISTS {}", quote_ident(&stage)), []);
                Err(err.into())
            }
        }
    }
}
