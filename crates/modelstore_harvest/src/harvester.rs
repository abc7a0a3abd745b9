//! The harvest pipeline.
//!
//! One invocation is a straight line of blocking calls:
//! cursor → runs after the cursor → terminal filter → context index →
//! per-run metric artifacts → record batch → snapshot → append.

use modelstore_protocol::{
    Cursor, MetricArtifact, OutputConfig, PipelineRun, RunRecord, Scope, TableSchema,
    TerminalState,
};
use modelstore_sinks::{write_snapshot, ReportingSink, RunBatch, SnapshotFormat};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::error::{HarvestError, Result};
use crate::source::{MetadataIndex, RunSource};

/// Where the declared table schema comes from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SchemaSource {
    /// The schema compiled into the binary.
    #[default]
    Bundled,
    /// A schema description file, re-read on every harvest.
    File(PathBuf),
}

impl SchemaSource {
    pub fn load(&self) -> Result<TableSchema> {
        let schema = match self {
            SchemaSource::Bundled => TableSchema::pipelines(),
            SchemaSource::File(path) => TableSchema::load(path),
        };
        schema.map_err(HarvestError::Schema)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotSettings {
    pub path: PathBuf,
    pub format: SnapshotFormat,
}

impl SnapshotSettings {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let format = SnapshotFormat::from_path(&path);
        Self { path, format }
    }

    pub fn with_format(mut self, format: SnapshotFormat) -> Self {
        self.format = format;
        self
    }
}

/// Per-invocation switches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HarvestOptions {
    /// When false the batch is assembled and snapshotted but not appended.
    pub output_to_sink: bool,
    /// Use this cursor instead of querying the sink.
    pub last_update_override: Option<Cursor>,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            output_to_sink: true,
            last_update_override: None,
        }
    }
}

/// Outcome of one successful harvest.
#[derive(Debug, Clone, PartialEq)]
pub struct HarvestReport {
    pub scope: Scope,
    /// Cursor the run listing was bounded by.
    pub cursor: Option<Cursor>,
    /// Terminal runs found after the cursor.
    pub harvested: usize,
    pub rows_written: u64,
    pub snapshot: Option<PathBuf>,
}

impl HarvestReport {
    fn empty(scope: &Scope, cursor: Option<Cursor>) -> Self {
        Self {
            scope: scope.clone(),
            cursor,
            harvested: 0,
            rows_written: 0,
            snapshot: None,
        }
    }
}

pub struct Harvester {
    runs: Box<dyn RunSource>,
    metadata: Box<dyn MetadataIndex>,
    sink: Box<dyn ReportingSink>,
    output: OutputConfig,
    schema: SchemaSource,
    snapshot: Option<SnapshotSettings>,
}

impl Harvester {
    pub fn new(
        runs: Box<dyn RunSource>,
        metadata: Box<dyn MetadataIndex>,
        sink: Box<dyn ReportingSink>,
        output: OutputConfig,
    ) -> Self {
        Self {
            runs,
            metadata,
            sink,
            output,
            schema: SchemaSource::default(),
            snapshot: None,
        }
    }

    pub fn with_schema(mut self, schema: SchemaSource) -> Self {
        self.schema = schema;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SnapshotSettings) -> Self {
        self.snapshot = Some(snapshot);
        self
    }

    pub fn output(&self) -> &OutputConfig {
        &self.output
    }

    /// Harvest every terminal run of `scope` updated after the cursor.
    pub fn harvest(&mut self, scope: &Scope, options: &HarvestOptions) -> Result<HarvestReport> {
        let schema = self.schema.load()?;
        let cursor = self.resolve_cursor(scope, options)?;
        match &cursor {
            Some(c) => info!("[{}] Harvesting runs updated after {}", scope, c),
            None => info!("[{}] No previous harvest, listing all runs", scope),
        }

        let runs = self.terminal_runs_after(scope, cursor.as_ref())?;
        if runs.is_empty() {
            info!("[{}] No new completed runs since last harvest", scope);
            return Ok(HarvestReport::empty(scope, cursor));
        }
        info!("[{}] Found {} new completed runs", scope, runs.len());

        let contexts = self.context_index(scope)?;
        let mut records = Vec::with_capacity(runs.len());
        for (run, state) in &runs {
            let artifacts = self.metric_artifacts(scope, run, &contexts)?;
            let record = RunRecord::build(scope, run, *state, &artifacts).map_err(|e| {
                HarvestError::Assembly {
                    message: format!("run '{}': {}", run.run_id, e),
                }
            })?;
            records.push(record);
        }

        let batch = RunBatch::new(schema, records).map_err(|e| HarvestError::Assembly {
            message: e.to_string(),
        })?;

        let snapshot = self.write_snapshot(&batch);

        let rows_written = if options.output_to_sink {
            let target = self.sink.describe();
            info!(
                "[{}] Appending {} rows to {} ({})",
                scope,
                batch.num_rows(),
                self.output,
                target
            );
            self.sink
                .append(&batch)
                .map_err(|source| HarvestError::Sink { target, source })?
        } else {
            info!("[{}] Sink output disabled, skipping append", scope);
            0
        };

        Ok(HarvestReport {
            scope: scope.clone(),
            cursor,
            harvested: batch.num_rows(),
            rows_written,
            snapshot,
        })
    }

    fn resolve_cursor(&self, scope: &Scope, options: &HarvestOptions) -> Result<Option<Cursor>> {
        if let Some(cursor) = options.last_update_override {
            debug!("[{}] Using cursor override {}", scope, cursor);
            return Ok(Some(cursor));
        }
        self.sink
            .resolve_cursor(scope)
            .map_err(|source| HarvestError::Cursor {
                scope: scope.clone(),
                source,
            })
    }

    fn terminal_runs_after(
        &self,
        scope: &Scope,
        cursor: Option<&Cursor>,
    ) -> Result<Vec<(PipelineRun, TerminalState)>> {
        let listed = self
            .runs
            .list_runs(scope, cursor)
            .map_err(|source| HarvestError::Runs {
                scope: scope.clone(),
                source,
            })?;
        let listed_count = listed.len();

        let runs: Vec<_> = listed
            .into_iter()
            .filter(|run| cursor.map_or(true, |c| c.admits(&run.update_time)))
            .filter_map(|run| run.state.terminal().map(|state| (run, state)))
            .collect();

        debug!(
            "[{}] {} runs listed, {} terminal after cursor",
            scope,
            listed_count,
            runs.len()
        );
        Ok(runs)
    }

    /// Run identifier (context display name) → context resource name.
    fn context_index(&self, scope: &Scope) -> Result<HashMap<String, String>> {
        let contexts = self
            .metadata
            .list_pipeline_contexts(scope)
            .map_err(|source| HarvestError::Contexts {
                scope: scope.clone(),
                source,
            })?;
        debug!("[{}] {} pipeline contexts", scope, contexts.len());
        Ok(contexts
            .into_iter()
            .map(|c| (c.display_name, c.name))
            .collect())
    }

    fn metric_artifacts(
        &self,
        scope: &Scope,
        run: &PipelineRun,
        contexts: &HashMap<String, String>,
    ) -> Result<Vec<MetricArtifact>> {
        let Some(context) = contexts.get(&run.run_id) else {
            info!("[{}] No metadata context for run '{}'", scope, run.run_id);
            return Ok(Vec::new());
        };
        self.metadata
            .list_metric_artifacts(scope, context)
            .map_err(|source| HarvestError::Artifacts {
                run_id: run.run_id.clone(),
                context: context.clone(),
                source,
            })
    }

    fn write_snapshot(&self, batch: &RunBatch) -> Option<PathBuf> {
        let settings = self.snapshot.as_ref()?;
        match write_snapshot(&settings.path, settings.format, batch) {
            Ok(path) => Some(path),
            Err(err) => {
                warn!(
                    "Failed to write snapshot {}: {}",
                    settings.path.display(),
                    err
                );
                None
            }
        }
    }
}
