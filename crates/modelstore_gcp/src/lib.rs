//! Google Cloud adapters for the harvester.
//!
//! Raw REST over blocking `reqwest`, no SDK: Vertex AI pipeline jobs
//! ([`VertexPipelineClient`]), Vertex ML Metadata ([`VertexMetadataClient`])
//! and a BigQuery reporting sink ([`BigQuerySink`]). All clients share one
//! [`TokenProvider`].
//!
//! Blocking clients must be created and used off the async runtime
//! (`spawn_blocking` or a plain thread).

pub mod auth;
pub mod bigquery;
pub mod error;
pub mod metadata;
mod rest;
pub mod vertex;

use modelstore_protocol::OutputConfig;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use auth::{TokenProvider, ACCESS_TOKEN_ENV, METADATA_TOKEN_URL};
pub use bigquery::{BigQuerySink, BIGQUERY_ENDPOINT};
pub use error::{GcpError, Result};
pub use metadata::VertexMetadataClient;
pub use rest::RestClient;
pub use vertex::VertexPipelineClient;

/// Credentials and endpoint overrides.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GcpSettings {
    /// Static bearer token; otherwise env or metadata server.
    pub access_token: Option<String>,
    /// Replaces `https://{region}-aiplatform.googleapis.com`.
    pub vertex_endpoint: Option<String>,
    /// Replaces `https://bigquery.googleapis.com`.
    pub bigquery_endpoint: Option<String>,
}

/// All platform clients for one harvest, sharing credentials.
pub struct GcpClients {
    pub pipelines: VertexPipelineClient,
    pub metadata: VertexMetadataClient,
    rest: RestClient,
    settings: GcpSettings,
}

impl GcpClients {
    pub fn connect(settings: &GcpSettings) -> Result<Self> {
        let tokens = Arc::new(TokenProvider::resolve(settings.access_token.clone())?);
        Self::with_tokens(settings, tokens)
    }

    pub fn with_tokens(settings: &GcpSettings, tokens: Arc<TokenProvider>) -> Result<Self> {
        let rest = RestClient::new(tokens)?;
        Ok(Self {
            pipelines: VertexPipelineClient::new(rest.clone(), settings.vertex_endpoint.clone()),
            metadata: VertexMetadataClient::new(rest.clone(), settings.vertex_endpoint.clone()),
            rest,
            settings: settings.clone(),
        })
    }

    pub fn bigquery_sink(&self, output: OutputConfig) -> BigQuerySink {
        BigQuerySink::new(
            self.rest.clone(),
            output,
            self.settings.bigquery_endpoint.clone(),
        )
    }
}
