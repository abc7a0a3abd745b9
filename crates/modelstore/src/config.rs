//! `modelstore.toml`: output table, sink backend, snapshot and GCP settings.
//!
//! Every field has a default, so a missing file is the same as an empty one.

use anyhow::{Context, Result};
use modelstore_gcp::GcpSettings;
use modelstore_harvest::{SchemaSource, SnapshotSettings};
use modelstore_protocol::defaults::DEFAULT_SNAPSHOT_PATH;
use modelstore_protocol::OutputConfig;
use modelstore_sinks::SnapshotFormat;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SinkKind {
    #[default]
    #[serde(rename = "bigquery")]
    BigQuery,
    #[serde(rename = "duckdb")]
    DuckDb,
}

impl SinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SinkKind::BigQuery => "bigquery",
            SinkKind::DuckDb => "duckdb",
        }
    }
}

impl FromStr for SinkKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "bigquery" | "bq" => Ok(SinkKind::BigQuery),
            "duckdb" => Ok(SinkKind::DuckDb),
            _ => Err(format!(
                "Invalid sink kind: '{}'. Expected: bigquery or duckdb",
                s
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SinkConfig {
    pub kind: SinkKind,
    /// Directory holding `<output_catalog>.duckdb`.
    pub duckdb_dir: PathBuf,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            duckdb_dir: PathBuf::from("warehouse"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub enabled: bool,
    pub path: PathBuf,
    /// `csv` or `parquet`; inferred from the extension when unset.
    pub format: Option<String>,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from(DEFAULT_SNAPSHOT_PATH),
            format: None,
        }
    }
}

impl SnapshotConfig {
    pub fn settings(&self) -> Result<Option<SnapshotSettings>> {
        if !self.enabled {
            return Ok(None);
        }
        let mut settings = SnapshotSettings::new(&self.path);
        if let Some(format) = &self.format {
            let format = SnapshotFormat::from_str(format).map_err(anyhow::Error::msg)?;
            settings = settings.with_format(format);
        }
        Ok(Some(settings))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub output: OutputConfig,
    pub sink: SinkConfig,
    pub snapshot: SnapshotConfig,
    /// Schema description file; the bundled schema when unset.
    pub schema_path: Option<PathBuf>,
    pub gcp: GcpSettings,
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(text).context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Read `path`. A missing file yields defaults unless `required`.
    pub fn load(path: &Path, required: bool) -> Result<Self> {
        if !path.exists() {
            if required {
                anyhow::bail!("Configuration file not found: {}", path.display());
            }
            tracing::debug!("No configuration at {}, using defaults", path.display());
            let config = AppConfig::default();
            config.validate()?;
            return Ok(config);
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("Invalid configuration in {}", path.display()))
    }

    pub fn validate(&self) -> Result<()> {
        self.output
            .validate()
            .context("Invalid [output] configuration")?;
        self.snapshot.settings()?;
        Ok(())
    }

    pub fn schema_source(&self) -> SchemaSource {
        match &self.schema_path {
            Some(path) => SchemaSource::File(path.clone()),
            None => SchemaSource::Bundled,
        }
    }
}
