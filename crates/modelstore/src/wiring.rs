//! Assembles a [`Harvester`] from configuration.

use anyhow::{Context, Result};
use modelstore_gcp::GcpClients;
use modelstore_harvest::{HarvestOptions, HarvestReport, Harvester};
use modelstore_protocol::Scope;
use modelstore_sinks::{DuckDbSink, ReportingSink, SharedSink};
use tracing::info;

use crate::config::{AppConfig, SinkKind};
use crate::http::HarvestBackend;

/// Platform clients plus the configured sink.
///
/// Creates blocking HTTP clients; call from a blocking context only.
pub fn build_harvester(config: &AppConfig) -> Result<Harvester> {
    let clients = connect(config)?;
    let sink: Box<dyn ReportingSink> = match config.sink.kind {
        SinkKind::BigQuery => Box::new(clients.bigquery_sink(config.output.clone())),
        SinkKind::DuckDb => Box::new(open_duckdb(config)?),
    };
    assemble(config, clients, sink)
}

fn connect(config: &AppConfig) -> Result<GcpClients> {
    GcpClients::connect(&config.gcp).context("Failed to set up GCP clients")
}

fn open_duckdb(config: &AppConfig) -> Result<DuckDbSink> {
    let schema = config.schema_source().load()?;
    DuckDbSink::open(&config.sink.duckdb_dir, &config.output, schema)
        .context("Failed to open DuckDB sink")
}

fn assemble(
    config: &AppConfig,
    clients: GcpClients,
    sink: Box<dyn ReportingSink>,
) -> Result<Harvester> {
    info!("Reporting sink: {}", sink.describe());
    let mut harvester = Harvester::new(
        Box::new(clients.pipelines),
        Box::new(clients.metadata),
        sink,
        config.output.clone(),
    )
    .with_schema(config.schema_source());
    if let Some(snapshot) = config.snapshot.settings()? {
        harvester = harvester.with_snapshot(snapshot);
    }
    Ok(harvester)
}

/// Builds a harvester per request from a fixed configuration.
///
/// A DuckDB warehouse is opened once and shared: its file lock admits a
/// single writer, so requests for different scopes queue on it.
pub struct LiveBackend {
    config: AppConfig,
    warehouse: Option<SharedSink<DuckDbSink>>,
}

impl LiveBackend {
    pub fn new(config: AppConfig) -> Result<Self> {
        let warehouse = match config.sink.kind {
            SinkKind::DuckDb => Some(SharedSink::new(open_duckdb(&config)?)),
            SinkKind::BigQuery => None,
        };
        Ok(Self { config, warehouse })
    }

    fn sink(&self, clients: &GcpClients) -> Box<dyn ReportingSink> {
        match &self.warehouse {
            Some(shared) => Box::new(shared.clone()),
            None => Box::new(clients.bigquery_sink(self.config.output.clone())),
        }
    }
}

impl HarvestBackend for LiveBackend {
    fn harvest(&self, scope: &Scope) -> Result<HarvestReport> {
        let clients = connect(&self.config)?;
        let sink = self.sink(&clients);
        let mut harvester = assemble(&self.config, clients, sink)?;
        Ok(harvester.harvest(scope, &HarvestOptions::default())?)
    }
}
