//! Read-only platform collaborators.

use modelstore_protocol::{Cursor, MetadataContext, MetricArtifact, PipelineRun, Scope};

/// Lists pipeline runs of a scope.
pub trait RunSource: Send {
    /// Runs whose `update_time` is after `since` (all runs when `None`), in
    /// any order and in any lifecycle state.
    ///
    /// Implementations may filter coarsely; the harvester re-applies the
    /// strict bound.
    fn list_runs(&self, scope: &Scope, since: Option<&Cursor>) -> anyhow::Result<Vec<PipelineRun>>;
}

/// Lists metadata contexts and the metric artifacts attached to them.
pub trait MetadataIndex: Send {
    /// Every pipeline-run context of the scope.
    fn list_pipeline_contexts(&self, scope: &Scope) -> anyhow::Result<Vec<MetadataContext>>;

    /// Metric artifacts inside one context, in platform listing order.
    fn list_metric_artifacts(
        &self,
        scope: &Scope,
        context_name: &str,
    ) -> anyhow::Result<Vec<MetricArtifact>>;
}
