//! Canonical default values shared across the harvester, sinks and adapters.

pub const PIPELINE_RUN_SCHEMA_TITLE: &str = "system.PipelineRun";
pub const METRICS_SCHEMA_TITLE: &str = "system.Metrics";
pub const DEFAULT_METADATA_STORE: &str = "default";

pub const DEFAULT_OUTPUT_CATALOG: &str = "modelstore";
pub const DEFAULT_OUTPUT_DATASET: &str = "modelstore";
pub const DEFAULT_OUTPUT_TABLE: &str = "pipelines";

pub const DEFAULT_SNAPSHOT_PATH: &str = "modelstore.csv";
pub const DEFAULT_CONFIG_PATH: &str = "modelstore.toml";
pub const DEFAULT_HTTP_ADDR: &str = "0.0.0.0:8080";

pub const RESPONSE_OK: &str = "OK";
pub const RESPONSE_NOK: &str = "NOK";
