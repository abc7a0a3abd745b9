//! Declared reporting table schema.
//!
//! The schema is loaded from a BigQuery-style JSON description and used
//! explicitly for every append, so the table shape never depends on the
//! contents of a particular batch.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::error::{ProtocolError, Result};

/// Schema bundled with the crate, identical to `schema/pipelines.json`.
const BUNDLED_PIPELINES_SCHEMA: &str = include_str!("../../../schema/pipelines.json");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnType {
    String,
    Timestamp,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnType::String => "STRING",
            ColumnType::Timestamp => "TIMESTAMP",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "UPPERCASE")]
pub enum ColumnMode {
    #[default]
    Nullable,
    Required,
    Repeated,
}

impl ColumnMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ColumnMode::Nullable => "NULLABLE",
            ColumnMode::Required => "REQUIRED",
            ColumnMode::Repeated => "REPEATED",
        }
    }
}

impl fmt::Display for ColumnMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub column_type: ColumnType,
    #[serde(default)]
    pub mode: ColumnMode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, column_type: ColumnType, mode: ColumnMode) -> Self {
        Self {
            name: name.into(),
            column_type,
            mode,
            description: None,
        }
    }

    pub fn is_repeated(&self) -> bool {
        self.mode == ColumnMode::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.mode == ColumnMode::Required
    }
}

/// Ordered column list of the reporting table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct TableSchema {
    columns: Vec<ColumnSpec>,
}

impl TableSchema {
    pub fn new(columns: Vec<ColumnSpec>) -> Result<Self> {
        let schema = Self { columns };
        schema.validate()?;
        Ok(schema)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let columns: Vec<ColumnSpec> = serde_json::from_str(json)?;
        Self::new(columns)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content).map_err(|err| match err {
            ProtocolError::InvalidSchema(msg) => {
                ProtocolError::InvalidSchema(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })
    }

    /// The reporting schema shipped with the repository.
    pub fn pipelines() -> Result<Self> {
        Self::from_json_str(BUNDLED_PIPELINES_SCHEMA)
    }

    pub fn columns(&self) -> &[ColumnSpec] {
        &self.columns
    }

    pub fn column(&self, name: &str) -> Option<&ColumnSpec> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    fn validate(&self) -> Result<()> {
        if self.columns.is_empty() {
            return Err(ProtocolError::invalid_schema("schema declares no columns"));
        }
        let mut seen = HashSet::new();
        for column in &self.columns {
            if column.name.trim().is_empty() {
                return Err(ProtocolError::invalid_schema("column with empty name"));
            }
            if !seen.insert(column.name.as_str()) {
                return Err(ProtocolError::invalid_schema(format!(
                    "duplicate column '{}'",
                    column.name
                )));
            }
        }
        Ok(())
    }
}
