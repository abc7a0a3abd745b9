//! Harvester behaviour against in-memory collaborators.

use chrono::{DateTime, Duration, Utc};
use modelstore_harvest::{
    HarvestError, HarvestOptions, Harvester, MetadataIndex, RunSource, SnapshotSettings,
};
use modelstore_protocol::{
    Cursor, MetadataContext, MetricArtifact, OutputConfig, PipelineRun, PipelineState, RunRecord,
    Scope,
};
use modelstore_sinks::{CursorStore, RecordSink, RunBatch, SinkError, SinkResult};
use proptest::prelude::*;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

// ============================================================================
// Fakes
// ============================================================================

#[derive(Default)]
struct SinkState {
    rows: Vec<RunRecord>,
    appends: usize,
    cursor_queries: usize,
    fail_cursor: bool,
    fail_append: bool,
}

#[derive(Clone, Default)]
struct MemorySink {
    state: Arc<Mutex<SinkState>>,
}

impl MemorySink {
    fn rows(&self) -> Vec<RunRecord> {
        self.state.lock().unwrap().rows.clone()
    }

    fn appends(&self) -> usize {
        self.state.lock().unwrap().appends
    }

    fn cursor_queries(&self) -> usize {
        self.state.lock().unwrap().cursor_queries
    }
}

impl CursorStore for MemorySink {
    fn resolve_cursor(&self, scope: &Scope) -> SinkResult<Option<Cursor>> {
        let mut state = self.state.lock().unwrap();
        state.cursor_queries += 1;
        if state.fail_cursor {
            return Err(SinkError::message("cursor query failed"));
        }
        Ok(state
            .rows
            .iter()
            .filter(|r| r.project() == scope.project && r.region() == scope.region)
            .map(|r| Cursor::new(r.update_time()))
            .max())
    }
}

impl RecordSink for MemorySink {
    fn describe(&self) -> String {
        "memory://modelstore.pipelines".to_string()
    }

    fn append(&mut self, batch: &RunBatch) -> SinkResult<u64> {
        let mut state = self.state.lock().unwrap();
        state.appends += 1;
        if state.fail_append {
            return Err(SinkError::message("append rejected"));
        }
        state.rows.extend(batch.records().iter().cloned());
        Ok(batch.num_rows() as u64)
    }
}

/// Returns runs at or after the cursor, so the harvester has to apply the
/// strict bound itself.
#[derive(Clone, Default)]
struct FakeRuns {
    runs: Arc<Mutex<Vec<PipelineRun>>>,
    calls: Arc<Mutex<Vec<Option<Cursor>>>>,
    fail: bool,
}

impl FakeRuns {
    fn new(runs: Vec<PipelineRun>) -> Self {
        Self {
            runs: Arc::new(Mutex::new(runs)),
            ..Default::default()
        }
    }

    fn push(&self, run: PipelineRun) {
        self.runs.lock().unwrap().push(run);
    }

    fn calls(&self) -> Vec<Option<Cursor>> {
        self.calls.lock().unwrap().clone()
    }
}

impl RunSource for FakeRuns {
    fn list_runs(&self, _scope: &Scope, since: Option<&Cursor>) -> anyhow::Result<Vec<PipelineRun>> {
        self.calls.lock().unwrap().push(since.copied());
        if self.fail {
            anyhow::bail!("pipeline job listing unavailable");
        }
        Ok(self
            .runs
            .lock()
            .unwrap()
            .iter()
            .filter(|r| since.map_or(true, |c| r.update_time >= c.timestamp()))
            .cloned()
            .collect())
    }
}

#[derive(Clone, Default)]
struct FakeMetadata {
    contexts: Vec<MetadataContext>,
    artifacts: HashMap<String, Vec<MetricArtifact>>,
    fail_contexts: bool,
    fail_artifacts: bool,
    artifact_calls: Arc<Mutex<Vec<String>>>,
}

impl FakeMetadata {
    fn with_run(mut self, run_id: &str, payloads: Vec<serde_json::Value>) -> Self {
        let name = context_name(run_id);
        self.contexts.push(MetadataContext {
            name: name.clone(),
            display_name: run_id.to_string(),
        });
        self.artifacts.insert(
            name,
            payloads
                .into_iter()
                .enumerate()
                .map(|(i, p)| {
                    MetricArtifact::new(format!("metrics-{}", i), p.as_object().unwrap().clone())
                })
                .collect(),
        );
        self
    }
}

impl MetadataIndex for FakeMetadata {
    fn list_pipeline_contexts(&self, _scope: &Scope) -> anyhow::Result<Vec<MetadataContext>> {
        if self.fail_contexts {
            anyhow::bail!("metadata store unavailable");
        }
        Ok(self.contexts.clone())
    }

    fn list_metric_artifacts(
        &self,
        _scope: &Scope,
        context_name: &str,
    ) -> anyhow::Result<Vec<MetricArtifact>> {
        self.artifact_calls
            .lock()
            .unwrap()
            .push(context_name.to_string());
        if self.fail_artifacts {
            anyhow::bail!("artifact listing unavailable");
        }
        Ok(self.artifacts.get(context_name).cloned().unwrap_or_default())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).unwrap().with_timezone(&Utc)
}

fn scope() -> Scope {
    Scope::new("my-project", "europe-west1")
}

fn context_name(run_id: &str) -> String {
    format!(
        "projects/my-project/locations/europe-west1/metadataStores/default/contexts/{}",
        run_id
    )
}

fn run(run_id: &str, update_time: &str, state: PipelineState) -> PipelineRun {
    PipelineRun {
        run_id: run_id.to_string(),
        display_name: format!("pipeline-{}", run_id),
        resource_name: format!(
            "projects/123/locations/europe-west1/pipelineJobs/{}",
            run_id
        ),
        create_time: ts(update_time) - Duration::hours(1),
        update_time: ts(update_time),
        labels: BTreeMap::from([("team".to_string(), "forecast".to_string())]),
        state,
    }
}

fn harvester(runs: &FakeRuns, metadata: FakeMetadata, sink: &MemorySink) -> Harvester {
    Harvester::new(
        Box::new(runs.clone()),
        Box::new(metadata),
        Box::new(sink.clone()),
        OutputConfig::default(),
    )
}

fn seed(sink: &MemorySink, scope: &Scope, update_time: &str) {
    let seeded = run("seed", update_time, PipelineState::Succeeded);
    let record = RunRecord::build(
        scope,
        &seeded,
        modelstore_protocol::TerminalState::Succeeded,
        &[],
    )
    .unwrap();
    sink.state.lock().unwrap().rows.push(record);
}

fn harvested_ids(sink: &MemorySink) -> Vec<String> {
    let mut ids: Vec<String> = sink
        .rows()
        .iter()
        .filter(|r| r.run() != "seed")
        .map(|r| r.run().to_string())
        .collect();
    ids.sort();
    ids
}

// ============================================================================
// Cursor and filtering
// ============================================================================

#[test]
fn test_only_runs_after_cursor_are_harvested() {
    let sink = MemorySink::default();
    seed(&sink, &scope(), "2023-05-01T00:00:00Z");
    let runs = FakeRuns::new(vec![
        run("new", "2023-05-02T00:00:00Z", PipelineState::Succeeded),
        run("old", "2023-04-30T00:00:00Z", PipelineState::Succeeded),
    ]);

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(report.cursor, Some(Cursor::new(ts("2023-05-01T00:00:00Z"))));
    assert_eq!(report.harvested, 1);
    assert_eq!(report.rows_written, 1);
    assert_eq!(harvested_ids(&sink), vec!["new"]);
    assert_eq!(
        runs.calls(),
        vec![Some(Cursor::new(ts("2023-05-01T00:00:00Z")))]
    );
}

#[test]
fn test_run_at_cursor_is_not_harvested() {
    let sink = MemorySink::default();
    seed(&sink, &scope(), "2023-05-01T00:00:00Z");
    // The listing is inclusive; the harvester must not be.
    let runs = FakeRuns::new(vec![run(
        "same",
        "2023-05-01T00:00:00Z",
        PipelineState::Succeeded,
    )]);

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(report.harvested, 0);
    assert_eq!(sink.appends(), 0);
}

#[test]
fn test_nanosecond_update_time_is_not_reharvested() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "precise",
        "2023-05-02T10:00:00.123456789Z",
        PipelineState::Succeeded,
    )]);
    let mut harvester = harvester(&runs, FakeMetadata::default(), &sink);

    let first = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    let second = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();

    assert_eq!(first.rows_written, 1);
    assert_eq!(second.harvested, 0);
    assert_eq!(sink.rows().len(), 1);
}

#[test]
fn test_no_prior_rows_lists_all_runs() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![
        run("a", "2020-01-01T00:00:00Z", PipelineState::Failed),
        run("b", "2023-05-02T00:00:00Z", PipelineState::Cancelled),
    ]);

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(report.cursor, None);
    assert_eq!(runs.calls(), vec![None]);
    assert_eq!(harvested_ids(&sink), vec!["a", "b"]);
}

#[test]
fn test_cursor_of_other_scope_is_ignored() {
    let sink = MemorySink::default();
    seed(&sink, &Scope::new("my-project", "us-central1"), "2024-01-01T00:00:00Z");
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(report.cursor, None);
    assert_eq!(report.harvested, 1);
}

#[test]
fn test_non_terminal_runs_are_skipped() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![
        run("ok", "2023-05-02T00:00:00Z", PipelineState::Succeeded),
        run("failed", "2023-05-02T00:00:00Z", PipelineState::Failed),
        run("cancelled", "2023-05-02T00:00:00Z", PipelineState::Cancelled),
        run("running", "2023-05-02T00:00:00Z", PipelineState::Running),
        run("cancelling", "2023-05-02T00:00:00Z", PipelineState::Cancelling),
        run("paused", "2023-05-02T00:00:00Z", PipelineState::Paused),
        run("queued", "2023-05-02T00:00:00Z", PipelineState::Queued),
    ]);

    harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(harvested_ids(&sink), vec!["cancelled", "failed", "ok"]);
    let states: Vec<&str> = sink.rows().iter().map(|r| r.state().as_str()).collect();
    assert!(states.iter().all(|s| !s.starts_with("PIPELINE_STATE_")));
}

#[test]
fn test_override_bypasses_cursor_query() {
    let sink = MemorySink::default();
    seed(&sink, &scope(), "2023-06-01T00:00:00Z");
    let runs = FakeRuns::new(vec![run(
        "replayed",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);
    let options = HarvestOptions {
        output_to_sink: true,
        last_update_override: Some(Cursor::parse("2023-05-01T00:00:00").unwrap()),
    };

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &options)
        .unwrap();

    assert_eq!(sink.cursor_queries(), 0);
    assert_eq!(report.cursor, Some(Cursor::new(ts("2023-05-01T00:00:00Z"))));
    assert_eq!(harvested_ids(&sink), vec!["replayed"]);
}

// ============================================================================
// Repeated invocations
// ============================================================================

#[test]
fn test_second_harvest_without_new_runs_writes_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("second.csv");
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);
    let mut harvester = harvester(&runs, FakeMetadata::default(), &sink);

    let first = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    assert_eq!(first.rows_written, 1);

    let mut harvester = harvester.with_snapshot(SnapshotSettings::new(&snapshot));
    let second = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    assert_eq!(second.harvested, 0);
    assert_eq!(second.rows_written, 0);
    assert_eq!(second.snapshot, None);
    assert!(!snapshot.exists());
    assert_eq!(sink.appends(), 1);
    assert_eq!(sink.rows().len(), 1);
}

#[test]
fn test_cursor_advances_to_latest_written_update_time() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![
        run("a", "2023-05-02T00:00:00Z", PipelineState::Succeeded),
        run("b", "2023-05-03T08:15:30.123456Z", PipelineState::Failed),
    ]);
    let mut harvester = harvester(&runs, FakeMetadata::default(), &sink);

    let first = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    assert_eq!(first.cursor, None);

    runs.push(run("c", "2023-05-04T00:00:00Z", PipelineState::Succeeded));
    let second = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    assert_eq!(
        second.cursor,
        Some(Cursor::new(ts("2023-05-03T08:15:30.123456Z")))
    );
    assert_eq!(second.harvested, 1);

    let third = harvester.harvest(&scope(), &HarvestOptions::default()).unwrap();
    assert!(third.cursor >= second.cursor);
    assert_eq!(third.cursor, Some(Cursor::new(ts("2023-05-04T00:00:00Z"))));
    assert_eq!(harvested_ids(&sink), vec!["a", "b", "c"]);
}

// ============================================================================
// Metrics
// ============================================================================

#[test]
fn test_empty_payloads_are_dropped_and_framework_aligned() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);
    let metadata = FakeMetadata::default().with_run(
        "a",
        vec![
            serde_json::json!({"framework": "arima"}),
            serde_json::json!({}),
        ],
    );

    harvester(&runs, metadata, &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    let rows = sink.rows();
    assert_eq!(rows[0].metrics(), &[r#"{"framework":"arima"}"#.to_string()]);
    assert_eq!(rows[0].framework(), &["arima".to_string()]);
}

#[test]
fn test_framework_defaults_to_empty_string() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);
    let metadata = FakeMetadata::default().with_run(
        "a",
        vec![
            serde_json::json!({"rmse": 0.5}),
            serde_json::json!({"framework": "prophet", "mape": 3.1}),
        ],
    );

    harvester(&runs, metadata, &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    let rows = sink.rows();
    assert_eq!(rows[0].metrics().len(), 2);
    assert_eq!(
        rows[0].framework(),
        &["".to_string(), "prophet".to_string()]
    );
}

#[test]
fn test_run_without_context_gets_empty_metrics() {
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![
        run("with", "2023-05-02T00:00:00Z", PipelineState::Succeeded),
        run("without", "2023-05-02T00:00:00Z", PipelineState::Succeeded),
    ]);
    let metadata = FakeMetadata::default().with_run("with", vec![serde_json::json!({"a": 1})]);
    let artifact_calls = metadata.artifact_calls.clone();

    harvester(&runs, metadata, &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    let rows = sink.rows();
    let without = rows.iter().find(|r| r.run() == "without").unwrap();
    assert!(without.metrics().is_empty());
    assert!(without.framework().is_empty());
    assert_eq!(*artifact_calls.lock().unwrap(), vec![context_name("with")]);
}

// ============================================================================
// Output switches
// ============================================================================

#[test]
fn test_disabled_output_still_writes_snapshot() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("modelstore.csv");
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);
    let options = HarvestOptions {
        output_to_sink: false,
        last_update_override: None,
    };

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .with_snapshot(SnapshotSettings::new(&snapshot))
        .harvest(&scope(), &options)
        .unwrap();

    assert_eq!(report.harvested, 1);
    assert_eq!(report.rows_written, 0);
    assert_eq!(report.snapshot.as_deref(), Some(snapshot.as_path()));
    assert_eq!(sink.appends(), 0);
    // The cursor is still read from the sink.
    assert_eq!(sink.cursor_queries(), 1);

    let mut reader = csv::Reader::from_path(&snapshot).unwrap();
    assert_eq!(reader.records().count(), 1);
}

#[test]
fn test_snapshot_failure_is_not_fatal() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, "x").unwrap();
    let sink = MemorySink::default();
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);

    let report = harvester(&runs, FakeMetadata::default(), &sink)
        .with_snapshot(SnapshotSettings::new(blocker.join("snap.csv")))
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap();

    assert_eq!(report.snapshot, None);
    assert_eq!(report.rows_written, 1);
}

// ============================================================================
// Failures
// ============================================================================

#[test]
fn test_cursor_failure_aborts_before_listing() {
    let sink = MemorySink::default();
    sink.state.lock().unwrap().fail_cursor = true;
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);

    let err = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap_err();

    assert!(matches!(err, HarvestError::Cursor { .. }));
    assert!(runs.calls().is_empty());
    assert_eq!(sink.appends(), 0);
}

#[test]
fn test_upstream_failures_abort_without_writes() {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = dir.path().join("modelstore.csv");
    let candidates = vec![run("a", "2023-05-02T00:00:00Z", PipelineState::Succeeded)];

    let failing_runs = FakeRuns {
        fail: true,
        ..FakeRuns::new(candidates.clone())
    };
    let failing_contexts = FakeMetadata {
        fail_contexts: true,
        ..Default::default()
    };
    let failing_artifacts = FakeMetadata {
        fail_artifacts: true,
        ..FakeMetadata::default().with_run("a", vec![serde_json::json!({"a": 1})])
    };

    let cases: Vec<(FakeRuns, FakeMetadata, &str)> = vec![
        (failing_runs, FakeMetadata::default(), "runs"),
        (FakeRuns::new(candidates.clone()), failing_contexts, "contexts"),
        (FakeRuns::new(candidates), failing_artifacts, "artifacts"),
    ];

    for (runs, metadata, stage) in cases {
        let sink = MemorySink::default();
        let err = harvester(&runs, metadata, &sink)
            .with_snapshot(SnapshotSettings::new(&snapshot))
            .harvest(&scope(), &HarvestOptions::default())
            .unwrap_err();
        assert_eq!(err.stage(), stage, "unexpected error: {}", err);
        assert_eq!(sink.appends(), 0);
        assert!(!snapshot.exists(), "snapshot written despite {} failure", stage);
    }
}

#[test]
fn test_sink_failure_propagates() {
    let sink = MemorySink::default();
    sink.state.lock().unwrap().fail_append = true;
    let runs = FakeRuns::new(vec![run(
        "a",
        "2023-05-02T00:00:00Z",
        PipelineState::Succeeded,
    )]);

    let err = harvester(&runs, FakeMetadata::default(), &sink)
        .harvest(&scope(), &HarvestOptions::default())
        .unwrap_err();

    match err {
        HarvestError::Sink { target, .. } => assert_eq!(target, "memory://modelstore.pipelines"),
        other => panic!("expected sink error, got {:?}", other),
    }
    assert!(sink.rows().is_empty());
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn test_harvested_runs_are_strictly_after_cursor(
        cursor_offset in 0i64..100,
        offsets in proptest::collection::vec(0i64..200, 0..20),
    ) {
        let base = ts("2023-05-01T00:00:00Z");
        let cursor = Cursor::new(base + Duration::seconds(cursor_offset));
        let runs = FakeRuns::new(
            offsets
                .iter()
                .enumerate()
                .map(|(i, off)| {
                    let at = (base + Duration::seconds(*off)).to_rfc3339();
                    run(&format!("run-{}", i), &at, PipelineState::Succeeded)
                })
                .collect(),
        );
        let sink = MemorySink::default();
        let options = HarvestOptions {
            output_to_sink: true,
            last_update_override: Some(cursor),
        };

        let report = harvester(&runs, FakeMetadata::default(), &sink)
            .harvest(&scope(), &options)
            .unwrap();

        let expected = offsets.iter().filter(|off| **off > cursor_offset).count();
        prop_assert_eq!(report.harvested, expected);
        for row in sink.rows() {
            prop_assert!(row.update_time() > cursor.timestamp());
        }
    }
}
