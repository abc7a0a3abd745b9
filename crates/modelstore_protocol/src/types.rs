//! Core data model: scope, cursor, platform runs and harvested run records.

use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::defaults::DEFAULT_METADATA_STORE;
use crate::error::{ProtocolError, Result};

/// One independently-cursored harvesting domain.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Scope {
    pub project: String,
    pub region: String,
}

impl Scope {
    pub fn new(project: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            region: region.into(),
        }
    }

    /// `projects/{project}/locations/{region}`
    pub fn location_parent(&self) -> String {
        format!("projects/{}/locations/{}", self.project, self.region)
    }

    /// `projects/{project}/locations/{region}/metadataStores/default`
    pub fn metadata_store_parent(&self) -> String {
        format!(
            "{}/metadataStores/{}",
            self.location_parent(),
            DEFAULT_METADATA_STORE
        )
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.project, self.region)
    }
}

/// Truncate to the reporting sinks' resolution so values survive a round trip.
pub fn truncate_to_micros(at: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_micros(at.timestamp_micros()).unwrap_or(at)
}

/// Watermark separating harvested from not-yet-harvested runs.
///
/// Held at microsecond precision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Cursor(DateTime<Utc>);

impl Cursor {
    pub fn new(at: DateTime<Utc>) -> Self {
        Self(truncate_to_micros(at))
    }

    pub fn from_micros(micros: i64) -> Option<Self> {
        DateTime::from_timestamp_micros(micros).map(Self)
    }

    /// Parse an override such as `2023-05-02T01:02:03`.
    ///
    /// Values without an offset are taken as UTC. Explicit offsets (`Z`,
    /// `+02:00`) are honoured and converted.
    pub fn parse(value: &str) -> Result<Self> {
        let trimmed = value.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
            return Ok(Self::new(dt.with_timezone(&Utc)));
        }
        NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
            .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S%.f"))
            .map(|naive| Self::new(naive.and_utc()))
            .map_err(|_| ProtocolError::InvalidTimestamp {
                value: value.to_string(),
            })
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.0
    }

    pub fn as_micros(&self) -> i64 {
        self.0.timestamp_micros()
    }

    /// True when `update_time`, at stored precision, is strictly newer than
    /// the cursor. A run already written at the cursor is never admitted
    /// again, whatever sub-microsecond digits the platform reports.
    pub fn admits(&self, update_time: &DateTime<Utc>) -> bool {
        truncate_to_micros(*update_time) > self.0
    }

    /// RFC 3339 rendering used in platform list filters.
    pub fn to_filter_value(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::AutoSi, true)
    }
}

impl fmt::Display for Cursor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_filter_value())
    }
}

impl FromStr for Cursor {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

/// Lifecycle state as reported by the orchestration platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PipelineState {
    #[serde(rename = "PIPELINE_STATE_QUEUED")]
    Queued,
    #[serde(rename = "PIPELINE_STATE_PENDING")]
    Pending,
    #[serde(rename = "PIPELINE_STATE_RUNNING")]
    Running,
    #[serde(rename = "PIPELINE_STATE_SUCCEEDED")]
    Succeeded,
    #[serde(rename = "PIPELINE_STATE_FAILED")]
    Failed,
    #[serde(rename = "PIPELINE_STATE_CANCELLING")]
    Cancelling,
    #[serde(rename = "PIPELINE_STATE_CANCELLED")]
    Cancelled,
    #[serde(rename = "PIPELINE_STATE_PAUSED")]
    Paused,
    /// Also the landing spot for states this build does not know.
    #[default]
    #[serde(rename = "PIPELINE_STATE_UNSPECIFIED", other)]
    Unspecified,
}

impl PipelineState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelineState::Unspecified => "PIPELINE_STATE_UNSPECIFIED",
            PipelineState::Queued => "PIPELINE_STATE_QUEUED",
            PipelineState::Pending => "PIPELINE_STATE_PENDING",
            PipelineState::Running => "PIPELINE_STATE_RUNNING",
            PipelineState::Succeeded => "PIPELINE_STATE_SUCCEEDED",
            PipelineState::Failed => "PIPELINE_STATE_FAILED",
            PipelineState::Cancelling => "PIPELINE_STATE_CANCELLING",
            PipelineState::Cancelled => "PIPELINE_STATE_CANCELLED",
            PipelineState::Paused => "PIPELINE_STATE_PAUSED",
        }
    }

    /// The single place platform states are mapped onto the reporting vocabulary.
    pub fn terminal(&self) -> Option<TerminalState> {
        match self {
            PipelineState::Succeeded => Some(TerminalState::Succeeded),
            PipelineState::Failed => Some(TerminalState::Failed),
            PipelineState::Cancelled => Some(TerminalState::Cancelled),
            PipelineState::Unspecified
            | PipelineState::Queued
            | PipelineState::Pending
            | PipelineState::Running
            | PipelineState::Cancelling
            | PipelineState::Paused => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.terminal().is_some()
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineState {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let upper = s.trim().to_ascii_uppercase();
        let bare = upper.strip_prefix("PIPELINE_STATE_").unwrap_or(&upper);
        match bare {
            "UNSPECIFIED" => Ok(PipelineState::Unspecified),
            "QUEUED" => Ok(PipelineState::Queued),
            "PENDING" => Ok(PipelineState::Pending),
            "RUNNING" => Ok(PipelineState::Running),
            "SUCCEEDED" => Ok(PipelineState::Succeeded),
            "FAILED" => Ok(PipelineState::Failed),
            "CANCELLING" => Ok(PipelineState::Cancelling),
            "CANCELLED" => Ok(PipelineState::Cancelled),
            "PAUSED" => Ok(PipelineState::Paused),
            _ => Err(format!("Invalid pipeline state: '{}'", s)),
        }
    }
}

/// Completed lifecycle state, as written to the reporting table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TerminalState {
    Succeeded,
    Failed,
    Cancelled,
}

impl TerminalState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TerminalState::Succeeded => "SUCCEEDED",
            TerminalState::Failed => "FAILED",
            TerminalState::Cancelled => "CANCELLED",
        }
    }
}

impl fmt::Display for TerminalState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pipeline run as listed by the orchestration platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineRun {
    /// Opaque run identifier (last segment of the resource name).
    pub run_id: String,
    pub display_name: String,
    /// `projects/{number}/locations/{region}/pipelineJobs/{run_id}`
    pub resource_name: String,
    pub create_time: DateTime<Utc>,
    pub update_time: DateTime<Utc>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub state: PipelineState,
}

/// A metadata-index entry grouping the artifacts of one run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataContext {
    /// Fully-qualified context resource name.
    pub name: String,
    /// Equal to the run identifier for pipeline-run contexts.
    pub display_name: String,
}

/// A metrics artifact payload from the metadata index.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricArtifact {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl MetricArtifact {
    pub fn new(name: impl Into<String>, metadata: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            name: name.into(),
            metadata,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.metadata.is_empty()
    }

    /// `framework` field of the payload. Absent and `null` both give `""`:
    /// the framework column is a repeated string and holds no nulls.
    pub fn framework(&self) -> String {
        match self.metadata.get("framework") {
            None | Some(serde_json::Value::Null) => String::new(),
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
        }
    }

    pub fn to_json_text(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.metadata)?)
    }
}

/// Console link for a run.
pub fn console_url(scope: &Scope, run_id: &str) -> String {
    format!(
        "https://console.cloud.google.com/vertex-ai/locations/{}/pipelines/runs/{}?project={}",
        scope.region, run_id, scope.project
    )
}

/// Borrowed value of one reporting column for one record.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue<'a> {
    Text(&'a str),
    Timestamp(DateTime<Utc>),
    TextList(&'a [String]),
}

/// One row of the reporting table.
///
/// Built once per harvested run and never mutated; `metrics` and
/// `framework` are positionally parallel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    name: String,
    run: String,
    resource_name: String,
    url: String,
    project: String,
    region: String,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
    labels: String,
    state: TerminalState,
    metrics: Vec<String>,
    framework: Vec<String>,
}

impl RunRecord {
    /// Build a record from a terminal run and its (already listed) metric artifacts.
    ///
    /// Empty artifacts are dropped here so that both sequences stay aligned.
    pub fn build(
        scope: &Scope,
        run: &PipelineRun,
        state: TerminalState,
        artifacts: &[MetricArtifact],
    ) -> Result<Self> {
        let mut metrics = Vec::with_capacity(artifacts.len());
        let mut framework = Vec::with_capacity(artifacts.len());
        for artifact in artifacts.iter().filter(|a| !a.is_empty()) {
            metrics.push(artifact.to_json_text()?);
            framework.push(artifact.framework());
        }

        Ok(Self {
            name: run.display_name.clone(),
            run: run.run_id.clone(),
            resource_name: run.resource_name.clone(),
            url: console_url(scope, &run.run_id),
            project: scope.project.clone(),
            region: scope.region.clone(),
            create_time: truncate_to_micros(run.create_time),
            update_time: truncate_to_micros(run.update_time),
            labels: serde_json::to_string(&run.labels)?,
            state,
            metrics,
            framework,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn run(&self) -> &str {
        &self.run
    }

    pub fn resource_name(&self) -> &str {
        &self.resource_name
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    pub fn create_time(&self) -> DateTime<Utc> {
        self.create_time
    }

    pub fn update_time(&self) -> DateTime<Utc> {
        self.update_time
    }

    pub fn labels(&self) -> &str {
        &self.labels
    }

    pub fn state(&self) -> TerminalState {
        self.state
    }

    pub fn metrics(&self) -> &[String] {
        &self.metrics
    }

    pub fn framework(&self) -> &[String] {
        &self.framework
    }

    /// Look up a reporting column by name.
    pub fn column(&self, name: &str) -> Option<ColumnValue<'_>> {
        let value = match name {
            "name" => ColumnValue::Text(&self.name),
            "run" => ColumnValue::Text(&self.run),
            "resource_name" => ColumnValue::Text(&self.resource_name),
            "url" => ColumnValue::Text(&self.url),
            "project" => ColumnValue::Text(&self.project),
            "region" => ColumnValue::Text(&self.region),
            "create_time" => ColumnValue::Timestamp(self.create_time),
            "update_time" => ColumnValue::Timestamp(self.update_time),
            "labels" => ColumnValue::Text(&self.labels),
            "state" => ColumnValue::Text(self.state.as_str()),
            "metrics" => ColumnValue::TextList(&self.metrics),
            "framework" => ColumnValue::TextList(&self.framework),
            _ => return None,
        };
        Some(value)
    }
}
