//! Vertex AI Pipelines job listing.

use chrono::{DateTime, Utc};
use modelstore_harvest::RunSource;
use modelstore_protocol::{Cursor, PipelineRun, PipelineState, Scope};
use serde::Deserialize;
use std::collections::BTreeMap;
use tracing::debug;

use crate::error::{GcpError, Result};
use crate::rest::{trim_base, Page, RestClient};

/// `https://{region}-aiplatform.googleapis.com`, unless overridden.
pub(crate) fn vertex_base(endpoint: Option<&str>, region: &str) -> String {
    match endpoint {
        Some(base) => trim_base(base).to_string(),
        None => format!("https://{}-aiplatform.googleapis.com", region),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PipelineJob {
    name: String,
    #[serde(default)]
    display_name: String,
    create_time: DateTime<Utc>,
    update_time: DateTime<Utc>,
    #[serde(default)]
    state: PipelineState,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

impl PipelineJob {
    fn into_run(self) -> Result<PipelineRun> {
        let run_id = self
            .name
            .rsplit('/')
            .next()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| {
                GcpError::InvalidResponse(format!("pipeline job without id: '{}'", self.name))
            })?
            .to_string();
        Ok(PipelineRun {
            run_id,
            display_name: self.display_name,
            resource_name: self.name,
            create_time: self.create_time,
            update_time: self.update_time,
            labels: self.labels,
            state: self.state,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ListPipelineJobsResponse {
    #[serde(default)]
    pipeline_jobs: Vec<PipelineJob>,
    next_page_token: Option<String>,
}

impl Page for ListPipelineJobsResponse {
    type Item = PipelineJob;

    fn into_parts(self) -> (Vec<PipelineJob>, Option<String>) {
        (self.pipeline_jobs, self.next_page_token)
    }
}

/// `pipelineJobs.list` for one project/region.
pub struct VertexPipelineClient {
    rest: RestClient,
    endpoint: Option<String>,
}

impl VertexPipelineClient {
    pub fn new(rest: RestClient, endpoint: Option<String>) -> Self {
        Self { rest, endpoint }
    }

    pub fn list_pipeline_jobs(
        &self,
        scope: &Scope,
        since: Option<&Cursor>,
    ) -> Result<Vec<PipelineRun>> {
        let url = format!(
            "{}/v1/{}/pipelineJobs",
            vertex_base(self.endpoint.as_deref(), &scope.region),
            scope.location_parent()
        );
        let mut query = Vec::new();
        if let Some(cursor) = since {
            query.push(("filter", update_time_filter(cursor)));
        }
        debug!("Listing pipeline jobs: {} {:?}", url, query);

        self.rest
            .list_all::<ListPipelineJobsResponse>(&url, &query)?
            .into_iter()
            .map(PipelineJob::into_run)
            .collect()
    }
}

impl RunSource for VertexPipelineClient {
    fn list_runs(&self, scope: &Scope, since: Option<&Cursor>) -> anyhow::Result<Vec<PipelineRun>> {
        Ok(self.list_pipeline_jobs(scope, since)?)
    }
}

fn update_time_filter(cursor: &Cursor) -> String {
    format!("update_time>\"{}\"", cursor.to_filter_value())
}
