//! Assembly of run records into the declared table shape.

use arrow::array::{
    ArrayRef, ListBuilder, RecordBatch, StringBuilder, TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, SecondsFormat, Utc};
use modelstore_protocol::{ColumnSpec, ColumnType, ColumnValue, RunRecord, TableSchema};
use std::sync::Arc;

use crate::{SinkError, SinkResult};

/// Records of one harvest, validated against the declared schema.
#[derive(Debug, Clone)]
pub struct RunBatch {
    schema: TableSchema,
    records: Vec<RunRecord>,
    batch: Arc<RecordBatch>,
}

impl RunBatch {
    pub fn new(schema: TableSchema, records: Vec<RunRecord>) -> SinkResult<Self> {
        let batch = build_record_batch(&schema, &records)?;
        Ok(Self {
            schema,
            records,
            batch: Arc::new(batch),
        })
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn records(&self) -> &[RunRecord] {
        &self.records
    }

    pub fn num_rows(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn record_batch(&self) -> &RecordBatch {
        &self.batch
    }

    /// One JSON object per record, keyed by declared column name.
    ///
    /// Null columns are omitted; timestamps are RFC 3339 with microseconds.
    pub fn json_rows(&self) -> SinkResult<Vec<serde_json::Map<String, serde_json::Value>>> {
        self.records
            .iter()
            .map(|record| {
                let mut row = serde_json::Map::new();
                for column in self.schema.columns() {
                    if let Some(cell) = cell(column, record)? {
                        row.insert(column.name.clone(), cell.to_json());
                    }
                }
                Ok(row)
            })
            .collect()
    }

    /// Text rendering of every cell, in declared column order, for flat files.
    pub(crate) fn text_rows(&self) -> SinkResult<Vec<Vec<String>>> {
        self.records
            .iter()
            .map(|record| {
                self.schema
                    .columns()
                    .iter()
                    .map(|column| Ok(cell(column, record)?.map(|c| c.to_text()).unwrap_or_default()))
                    .collect::<SinkResult<Vec<String>>>()
            })
            .collect()
    }
}

/// A resolved cell value, already checked against its column declaration.
enum Cell<'a> {
    Text(&'a str),
    Timestamp(DateTime<Utc>),
    List(&'a [String]),
}

impl Cell<'_> {
    fn to_json(&self) -> serde_json::Value {
        match self {
            Cell::Text(s) => serde_json::Value::String((*s).to_string()),
            Cell::Timestamp(ts) => serde_json::Value::String(format_timestamp(ts)),
            Cell::List(items) => serde_json::Value::Array(
                items
                    .iter()
                    .map(|s| serde_json::Value::String(s.clone()))
                    .collect(),
            ),
        }
    }

    fn to_text(&self) -> String {
        match self {
            Cell::Text(s) => (*s).to_string(),
            Cell::Timestamp(ts) => format_timestamp(ts),
            Cell::List(items) => serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string()),
        }
    }
}

fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn cell<'a>(column: &ColumnSpec, record: &'a RunRecord) -> SinkResult<Option<Cell<'a>>> {
    let value = match record.column(&column.name) {
        Some(value) => value,
        None if column.is_required() => {
            return Err(SinkError::message(format!(
                "Required column '{}' has no value for run '{}'",
                column.name,
                record.run()
            )))
        }
        None => return Ok(None),
    };

    let cell = match (column.column_type, column.is_repeated(), value) {
        (ColumnType::String, false, ColumnValue::Text(s)) => Cell::Text(s),
        (ColumnType::String, false, ColumnValue::Timestamp(ts)) => Cell::Timestamp(ts),
        (ColumnType::Timestamp, false, ColumnValue::Timestamp(ts)) => Cell::Timestamp(ts),
        (ColumnType::String, true, ColumnValue::TextList(items)) => Cell::List(items),
        (column_type, repeated, value) => {
            return Err(SinkError::message(format!(
                "Column '{}' declared as {}{} cannot hold {:?}",
                column.name,
                if repeated { "REPEATED " } else { "" },
                column_type,
                value
            )))
        }
    };
    Ok(Some(cell))
}

fn arrow_field(column: &ColumnSpec) -> Field {
    let scalar = match column.column_type {
        ColumnType::String => DataType::Utf8,
        ColumnType::Timestamp => DataType::Timestamp(TimeUnit::Microsecond, None),
    };
    if column.is_repeated() {
        let item = Field::new("item", scalar, true);
        Field::new(&column.name, DataType::List(Arc::new(item)), false)
    } else {
        Field::new(&column.name, scalar, !column.is_required())
    }
}

/// Arrow schema for a declared table schema. Timestamps are UTC micros.
pub fn arrow_schema(schema: &TableSchema) -> Schema {
    Schema::new(schema.columns().iter().map(arrow_field).collect::<Vec<_>>())
}

fn build_column(column: &ColumnSpec, records: &[RunRecord]) -> SinkResult<ArrayRef> {
    if column.is_repeated() {
        if column.column_type != ColumnType::String {
            return Err(SinkError::message(format!(
                "Column '{}': only REPEATED STRING is supported",
                column.name
            )));
        }
        let mut builder = ListBuilder::new(StringBuilder::new());
        for record in records {
            if let Some(Cell::List(items)) = cell(column, record)? {
                for item in items {
                    builder.values().append_value(item);
                }
            }
            // Absent repeated values are empty lists, never null.
            builder.append(true);
        }
        return Ok(Arc::new(builder.finish()));
    }

    match column.column_type {
        ColumnType::String => {
            let mut builder = StringBuilder::new();
            for record in records {
                match cell(column, record)? {
                    Some(c) => builder.append_value(c.to_text()),
                    None => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
        ColumnType::Timestamp => {
            let mut builder = TimestampMicrosecondBuilder::new();
            for record in records {
                match cell(column, record)? {
                    Some(Cell::Timestamp(ts)) => builder.append_value(ts.timestamp_micros()),
                    _ => builder.append_null(),
                }
            }
            Ok(Arc::new(builder.finish()))
        }
    }
}

fn build_record_batch(schema: &TableSchema, records: &[RunRecord]) -> SinkResult<RecordBatch> {
    let columns = schema
        .columns()
        .iter()
        .map(|column| build_column(column, records))
        .collect::<SinkResult<Vec<_>>>()?;

    RecordBatch::try_new(Arc::new(arrow_schema(schema)), columns)
        .map_err(|e| SinkError::message(format!("Failed to assemble record batch: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, ListArray, StringArray, TimestampMicrosecondArray};
    use modelstore_protocol::{
        ColumnMode, MetricArtifact, PipelineRun, PipelineState, Scope, TerminalState,
    };
    use std::collections::BTreeMap;

    fn record(run_id: &str, metrics: &[serde_json::Value]) -> RunRecord {
        let ts = DateTime::parse_from_rfc3339("2023-05-02T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        let run = PipelineRun {
            run_id: run_id.to_string(),
            display_name: "forecast".to_string(),
            resource_name: format!("projects/1/locations/r1/pipelineJobs/{}", run_id),
            create_time: ts,
            update_time: ts,
            labels: BTreeMap::new(),
            state: PipelineState::Succeeded,
        };
        let artifacts: Vec<MetricArtifact> = metrics
            .iter()
            .map(|m| MetricArtifact::new("a", m.as_object().unwrap().clone()))
            .collect();
        RunRecord::build(
            &Scope::new("p1", "r1"),
            &run,
            TerminalState::Succeeded,
            &artifacts,
        )
        .unwrap()
    }

    #[test]
    fn test_batch_follows_declared_schema() {
        let records = vec![
            record("run-1", &[serde_json::json!({"framework": "arima"})]),
            record("run-2", &[]),
        ];
        let batch = RunBatch::new(TableSchema::pipelines().unwrap(), records).unwrap();
        let rb = batch.record_batch();

        assert_eq!(rb.num_rows(), 2);
        assert_eq!(rb.num_columns(), 12);

        let state = rb
            .column_by_name("state")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(state.value(0), "SUCCEEDED");

        let update = rb
            .column_by_name("update_time")
            .unwrap()
            .as_any()
            .downcast_ref::<TimestampMicrosecondArray>()
            .unwrap();
        assert_eq!(update.value(0), 1_682_985_600_000_000);

        let framework = rb
            .column_by_name("framework")
            .unwrap()
            .as_any()
            .downcast_ref::<ListArray>()
            .unwrap();
        assert_eq!(framework.value_length(0), 1);
        assert_eq!(framework.value_length(1), 0);
        assert!(!framework.is_null(1));
    }

    #[test]
    fn test_unknown_nullable_column_is_null() {
        let schema = TableSchema::new(vec![
            ColumnSpec::new("run", ColumnType::String, ColumnMode::Required),
            ColumnSpec::new("owner", ColumnType::String, ColumnMode::Nullable),
        ])
        .unwrap();
        let batch = RunBatch::new(schema, vec![record("run-1", &[])]).unwrap();
        assert!(batch.record_batch().column(1).is_null(0));
        let rows = batch.json_rows().unwrap();
        assert_eq!(rows[0].get("run").unwrap(), "run-1");
        assert!(!rows[0].contains_key("owner"));
    }

    #[test]
    fn test_unknown_required_column_fails() {
        let schema = TableSchema::new(vec![ColumnSpec::new(
            "owner",
            ColumnType::String,
            ColumnMode::Required,
        )])
        .unwrap();
        let err = RunBatch::new(schema, vec![record("run-1", &[])]).unwrap_err();
        assert!(err.to_string().contains("Required column 'owner'"));
    }

    #[test]
    fn test_type_mismatch_fails() {
        let schema = TableSchema::new(vec![ColumnSpec::new(
            "labels",
            ColumnType::Timestamp,
            ColumnMode::Nullable,
        )])
        .unwrap();
        let err = RunBatch::new(schema, vec![record("run-1", &[])]).unwrap_err();
        assert!(err.to_string().contains("Column 'labels'"));
    }

    #[test]
    fn test_json_rows_render_lists_and_timestamps() {
        let batch = RunBatch::new(
            TableSchema::pipelines().unwrap(),
            vec![record(
                "run-1",
                &[serde_json::json!({"framework": "arima", "rmse": 1.0})],
            )],
        )
        .unwrap();
        let rows = batch.json_rows().unwrap();
        assert_eq!(rows[0]["update_time"], "2023-05-02T00:00:00.000000Z");
        assert_eq!(rows[0]["framework"], serde_json::json!(["arima"]));
        assert_eq!(rows[0]["labels"], "{}");
    }

    #[test]
    fn test_empty_batch_is_valid() {
        let batch = RunBatch::new(TableSchema::pipelines().unwrap(), Vec::new()).unwrap();
        assert!(batch.is_empty());
        assert_eq!(batch.record_batch().num_columns(), 12);
    }
}
