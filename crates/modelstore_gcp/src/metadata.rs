//! Vertex ML Metadata: pipeline-run contexts and their metrics artifacts.

use modelstore_harvest::MetadataIndex;
use modelstore_protocol::defaults::{METRICS_SCHEMA_TITLE, PIPELINE_RUN_SCHEMA_TITLE};
use modelstore_protocol::{MetadataContext, MetricArtifact, Scope};
use serde::Deserialize;
use tracing::debug;

use crate::error::Result;
use crate::rest::{Page, RestClient};
use crate::vertex::vertex_base;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListContextsResponse {
    #[serde(default)]
    contexts: Vec<ContextResource>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ContextResource {
    name: String,
    #[serde(default)]
    display_name: String,
}

impl Page for ListContextsResponse {
    type Item = ContextResource;

    fn into_parts(self) -> (Vec<ContextResource>, Option<String>) {
        (self.contexts, self.next_page_token)
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListArtifactsResponse {
    #[serde(default)]
    artifacts: Vec<MetricArtifact>,
    next_page_token: Option<String>,
}

impl Page for ListArtifactsResponse {
    type Item = MetricArtifact;

    fn into_parts(self) -> (Vec<MetricArtifact>, Option<String>) {
        (self.artifacts, self.next_page_token)
    }
}

/// Reads the `default` metadata store of a project/region.
pub struct VertexMetadataClient {
    rest: RestClient,
    endpoint: Option<String>,
}

impl VertexMetadataClient {
    pub fn new(rest: RestClient, endpoint: Option<String>) -> Self {
        Self { rest, endpoint }
    }

    fn store_url(&self, scope: &Scope, collection: &str) -> String {
        format!(
            "{}/v1/{}/{}",
            vertex_base(self.endpoint.as_deref(), &scope.region),
            scope.metadata_store_parent(),
            collection
        )
    }

    pub fn contexts(&self, scope: &Scope) -> Result<Vec<MetadataContext>> {
        let url = self.store_url(scope, "contexts");
        let filter = format!("schema_title=\"{}\"", PIPELINE_RUN_SCHEMA_TITLE);
        let contexts = self
            .rest
            .list_all::<ListContextsResponse>(&url, &[("filter", filter)])?;
        debug!("[{}] {} pipeline-run contexts", scope, contexts.len());
        Ok(contexts
            .into_iter()
            .map(|c| MetadataContext {
                name: c.name,
                display_name: c.display_name,
            })
            .collect())
    }

    pub fn metric_artifacts(&self, scope: &Scope, context_name: &str) -> Result<Vec<MetricArtifact>> {
        let url = self.store_url(scope, "artifacts");
        self.rest
            .list_all::<ListArtifactsResponse>(&url, &[("filter", metrics_filter(context_name))])
    }
}

impl MetadataIndex for VertexMetadataClient {
    fn list_pipeline_contexts(&self, scope: &Scope) -> anyhow::Result<Vec<MetadataContext>> {
        Ok(self.contexts(scope)?)
    }

    fn list_metric_artifacts(
        &self,
        scope: &Scope,
        context_name: &str,
    ) -> anyhow::Result<Vec<MetricArtifact>> {
        Ok(self.metric_artifacts(scope, context_name)?)
    }
}

fn metrics_filter(context_name: &str) -> String {
    format!(
        "schema_title=\"{}\" AND in_context(\"{}\")",
        METRICS_SCHEMA_TITLE, context_name
    )
}
