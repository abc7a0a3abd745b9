//! Addressing of the reporting table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::defaults::{DEFAULT_OUTPUT_CATALOG, DEFAULT_OUTPUT_DATASET, DEFAULT_OUTPUT_TABLE};
use crate::error::{ProtocolError, Result};

/// Three-part `catalog.dataset.table` address of the reporting sink.
///
/// Independent of the scanned scope: the table may live in a different
/// project than the pipelines being harvested.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_catalog")]
    pub output_catalog: String,
    #[serde(default = "default_dataset")]
    pub output_dataset: String,
    #[serde(default = "default_table")]
    pub output_table: String,
}

fn default_catalog() -> String {
    DEFAULT_OUTPUT_CATALOG.to_string()
}

fn default_dataset() -> String {
    DEFAULT_OUTPUT_DATASET.to_string()
}

fn default_table() -> String {
    DEFAULT_OUTPUT_TABLE.to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            output_catalog: default_catalog(),
            output_dataset: default_dataset(),
            output_table: default_table(),
        }
    }
}

impl OutputConfig {
    pub fn new(
        catalog: impl Into<String>,
        dataset: impl Into<String>,
        table: impl Into<String>,
    ) -> Result<Self> {
        let config = Self {
            output_catalog: catalog.into(),
            output_dataset: dataset.into(),
            output_table: table.into(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (label, part) in [
            ("catalog", &self.output_catalog),
            ("dataset", &self.output_dataset),
            ("table", &self.output_table),
        ] {
            if part.trim().is_empty() {
                return Err(ProtocolError::InvalidAddress(format!("empty {}", label)));
            }
            if part.contains('.') || part.contains('`') {
                return Err(ProtocolError::InvalidAddress(format!(
                    "{} '{}' must not contain '.' or '`'",
                    label, part
                )));
            }
        }
        Ok(())
    }

    /// `catalog.dataset.table`
    pub fn qualified_table(&self) -> String {
        format!(
            "{}.{}.{}",
            self.output_catalog, self.output_dataset, self.output_table
        )
    }
}

impl fmt::Display for OutputConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.qualified_table())
    }
}

impl FromStr for OutputConfig {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.trim().split('.').collect();
        match parts.as_slice() {
            [catalog, dataset, table] => Self::new(*catalog, *dataset, *table),
            _ => Err(ProtocolError::InvalidAddress(format!(
                "'{}': expected catalog.dataset.table",
                s
            ))),
        }
    }
}
