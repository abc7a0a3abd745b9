//! Shared types for the model store run harvester.
//!
//! Everything that crosses a crate boundary lives here:
//! - **Scope / Cursor**: the (project, region) harvesting domain and its watermark
//! - **Runs**: platform pipeline runs, lifecycle mapping, harvested run records
//! - **Metadata**: contexts and metric artifacts from the metadata index
//! - **Schema**: the declared reporting table schema (BigQuery schema JSON)
//! - **Config**: three-part addressing of the reporting table

pub mod config;
pub mod defaults;
pub mod error;
pub mod schema;
pub mod types;

pub use config::OutputConfig;
pub use error::{ProtocolError, Result};
pub use schema::{ColumnMode, ColumnSpec, ColumnType, TableSchema};
pub use types::{
    console_url, truncate_to_micros, ColumnValue, Cursor, MetadataContext, MetricArtifact,
    PipelineRun, PipelineState, RunRecord, Scope, TerminalState,
};
