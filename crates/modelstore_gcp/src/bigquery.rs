//! BigQuery reporting sink.
//!
//! The cursor is a parameterised `jobs.query`; appends are a single load
//! job, which BigQuery commits all-or-nothing.

use modelstore_protocol::{Cursor, OutputConfig, Scope, TableSchema};
use modelstore_sinks::{CursorStore, RecordSink, RunBatch, SinkError, SinkResult};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{GcpError, Result};
use crate::rest::{trim_base, RestClient};

pub const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";

const QUERY_TIMEOUT_MS: u64 = 10_000;
const MULTIPART_BOUNDARY: &str = "modelstore_load_boundary";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    project_id: String,
    job_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryResponse {
    #[serde(default)]
    job_complete: bool,
    job_reference: Option<JobReference>,
    #[serde(default)]
    rows: Vec<TableRow>,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    v: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Job {
    job_reference: JobReference,
    status: JobStatus,
    statistics: Option<JobStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobStatus {
    state: String,
    error_result: Option<ErrorProto>,
    #[serde(default)]
    errors: Vec<ErrorProto>,
}

#[derive(Debug, Deserialize)]
struct ErrorProto {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

impl std::fmt::Display for ErrorProto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.reason, self.message)
    }
}

#[derive(Debug, Deserialize)]
struct JobStatistics {
    load: Option<LoadStatistics>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoadStatistics {
    output_rows: Option<String>,
}

/// `project.dataset.table` in BigQuery, addressed by an [`OutputConfig`].
pub struct BigQuerySink {
    rest: RestClient,
    endpoint: String,
    output: OutputConfig,
    poll_interval: Duration,
    max_wait: Duration,
}

impl BigQuerySink {
    pub fn new(rest: RestClient, output: OutputConfig, endpoint: Option<String>) -> Self {
        let endpoint = trim_base(endpoint.as_deref().unwrap_or(BIGQUERY_ENDPOINT)).to_string();
        Self {
            rest,
            endpoint,
            output,
            poll_interval: Duration::from_secs(1),
            max_wait: Duration::from_secs(600),
        }
    }

    pub fn with_polling(mut self, poll_interval: Duration, max_wait: Duration) -> Self {
        self.poll_interval = poll_interval;
        self.max_wait = max_wait;
        self
    }

    fn project(&self) -> &str {
        &self.output.output_catalog
    }

    pub fn last_update(&self, scope: &Scope) -> Result<Option<Cursor>> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries",
            self.endpoint,
            self.project()
        );
        let sql = format!(
            "SELECT max(update_time) AS last_update FROM `{}` WHERE project = @project AND region = @region",
            self.output.qualified_table()
        );
        debug!("Querying for last update: {} [{}]", sql, scope);

        let body = json!({
            "query": sql,
            "useLegacySql": false,
            "parameterMode": "NAMED",
            "queryParameters": [
                string_parameter("project", &scope.project),
                string_parameter("region", &scope.region),
            ],
            "formatOptions": {"useInt64Timestamp": true},
            "timeoutMs": QUERY_TIMEOUT_MS,
        });

        let mut response: QueryResponse = self.rest.post_json(&url, &[], &body)?;
        let started = Instant::now();
        while !response.job_complete {
            let job = response.job_reference.as_ref().ok_or_else(|| {
                GcpError::InvalidResponse("incomplete query without jobReference".to_string())
            })?;
            self.check_deadline(started, &job.job_id)?;
            response = self.query_results(job)?;
        }

        let value = response
            .rows
            .first()
            .and_then(|row| row.f.first())
            .and_then(|cell| cell.v.as_ref());
        parse_cursor_cell(value)
    }

    fn query_results(&self, job: &JobReference) -> Result<QueryResponse> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/queries/{}",
            self.endpoint, job.project_id, job.job_id
        );
        let mut query = vec![
            ("timeoutMs", QUERY_TIMEOUT_MS.to_string()),
            ("formatOptions.useInt64Timestamp", "true".to_string()),
        ];
        if let Some(location) = &job.location {
            query.push(("location", location.clone()));
        }
        self.rest.get_json(&url, &query)
    }

    pub fn load(&self, batch: &RunBatch) -> Result<u64> {
        let job_id = format!("modelstore_{}", uuid::Uuid::new_v4().simple());
        let configuration = load_configuration(&self.output, batch.schema(), &job_id);

        let mut ndjson = Vec::new();
        let rows = batch
            .json_rows()
            .map_err(|e| GcpError::InvalidResponse(format!("cannot encode rows: {}", e)))?;
        for row in &rows {
            serde_json::to_writer(&mut ndjson, row).map_err(|source| GcpError::Decode {
                url: "ndjson".to_string(),
                source,
            })?;
            ndjson.push(b'\n');
        }

        let url = format!(
            "{}/upload/bigquery/v2/projects/{}/jobs",
            self.endpoint,
            self.project()
        );
        let body = multipart_related(&configuration, &ndjson);
        info!(
            "Submitting load job {} ({} rows) into {}",
            job_id,
            rows.len(),
            self.output
        );
        let mut job: Job = self.rest.post_bytes(
            &url,
            &[("uploadType", "multipart".to_string())],
            &format!("multipart/related; boundary={}", MULTIPART_BOUNDARY),
            body,
        )?;

        let started = Instant::now();
        while job.status.state != "DONE" {
            self.check_deadline(started, &job.job_reference.job_id)?;
            std::thread::sleep(self.poll_interval);
            job = self.get_job(&job.job_reference)?;
        }

        if let Some(error) = &job.status.error_result {
            let details: Vec<String> = job.status.errors.iter().map(|e| e.to_string()).collect();
            return Err(GcpError::Job {
                job_id: job.job_reference.job_id.clone(),
                message: if details.is_empty() {
                    error.to_string()
                } else {
                    format!("{} ({})", error, details.join("; "))
                },
            });
        }

        let written = job
            .statistics
            .and_then(|s| s.load)
            .and_then(|l| l.output_rows)
            .and_then(|n| n.parse::<u64>().ok())
            .unwrap_or(rows.len() as u64);
        Ok(written)
    }

    fn get_job(&self, job: &JobReference) -> Result<Job> {
        let url = format!(
            "{}/bigquery/v2/projects/{}/jobs/{}",
            self.endpoint, job.project_id, job.job_id
        );
        let query: Vec<(&str, String)> = job
            .location
            .iter()
            .map(|l| ("location", l.clone()))
            .collect();
        self.rest.get_json(&url, &query)
    }

    fn check_deadline(&self, started: Instant, job_id: &str) -> Result<()> {
        if started.elapsed() > self.max_wait {
            return Err(GcpError::Job {
                job_id: job_id.to_string(),
                message: format!("not done after {:?}", self.max_wait),
            });
        }
        Ok(())
    }
}

impl CursorStore for BigQuerySink {
    fn resolve_cursor(&self, scope: &Scope) -> SinkResult<Option<Cursor>> {
        self.last_update(scope).map_err(sink_error)
    }
}

impl RecordSink for BigQuerySink {
    fn describe(&self) -> String {
        format!("bigquery://{}", self.output.qualified_table())
    }

    fn append(&mut self, batch: &RunBatch) -> SinkResult<u64> {
        if batch.is_empty() {
            return Ok(0);
        }
        let written = self.load(batch).map_err(sink_error)?;
        info!("Appended {} rows to {}", written, self.describe());
        Ok(written)
    }
}

fn sink_error(err: GcpError) -> SinkError {
    SinkError::from(anyhow::Error::new(err))
}

fn string_parameter(name: &str, value: &str) -> serde_json::Value {
    json!({
        "name": name,
        "parameterType": {"type": "STRING"},
        "parameterValue": {"value": value},
    })
}

/// `max(update_time)` cell with `useInt64Timestamp`: microseconds as a string.
fn parse_cursor_cell(value: Option<&serde_json::Value>) -> Result<Option<Cursor>> {
    let micros = match value {
        None | Some(serde_json::Value::Null) => return Ok(None),
        Some(serde_json::Value::String(s)) => s.parse::<i64>().ok(),
        Some(serde_json::Value::Number(n)) => n.as_i64(),
        Some(_) => None,
    };
    micros
        .and_then(Cursor::from_micros)
        .map(Some)
        .ok_or_else(|| GcpError::InvalidResponse(format!("bad last_update value: {:?}", value)))
}

fn load_configuration(
    output: &OutputConfig,
    schema: &TableSchema,
    job_id: &str,
) -> serde_json::Value {
    json!({
        "jobReference": {
            "projectId": output.output_catalog,
            "jobId": job_id,
        },
        "configuration": {
            "load": {
                "destinationTable": {
                    "projectId": output.output_catalog,
                    "datasetId": output.output_dataset,
                    "tableId": output.output_table,
                },
                "schema": {"fields": schema},
                "sourceFormat": "NEWLINE_DELIMITED_JSON",
                "writeDisposition": "WRITE_APPEND",
                "createDisposition": "CREATE_IF_NEEDED",
            }
        }
    })
}

fn multipart_related(metadata: &serde_json::Value, data: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(data.len() + 1024);
    body.extend_from_slice(
        format!(
            "--{b}\r\nContent-Type: application/json; charset=UTF-8\r\n\r\n{meta}\r\n--{b}\r\nContent-Type: application/octet-stream\r\n\r\n",
            b = MULTIPART_BOUNDARY,
            meta = metadata
        )
        .as_bytes(),
    );
    body.extend_from_slice(data);
    body.extend_from_slice(format!("\r\n--{}--\r\n", MULTIPART_BOUNDARY).as_bytes());
    body
}
