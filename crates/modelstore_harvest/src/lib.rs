//! Incremental harvesting of completed pipeline runs.
//!
//! A [`Harvester`] wires three collaborators together: a [`RunSource`]
//! (pipeline job listing), a [`MetadataIndex`] (contexts and metric
//! artifacts) and a [`ReportingSink`](modelstore_sinks::ReportingSink)
//! that both stores the harvested rows and answers where the last harvest
//! left off. Every call to [`Harvester::harvest`] appends only runs that
//! reached a terminal state after the stored cursor.

pub mod error;
pub mod harvester;
pub mod source;

pub use error::{HarvestError, Result};
pub use harvester::{HarvestOptions, HarvestReport, Harvester, SchemaSource, SnapshotSettings};
pub use source::{MetadataIndex, RunSource};
