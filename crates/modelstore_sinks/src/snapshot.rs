//! Flat-file snapshots of a harvest batch, for inspection and debugging.
//!
//! Files are staged as `.<name>.<uuid>.tmp` next to the target and renamed
//! into place once fully written, so a crash never leaves a truncated
//! snapshot and concurrent writers of one path never share a temp file.

use anyhow::{Context, Result};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::{debug, info, warn};

use crate::batch::RunBatch;
use crate::SinkResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SnapshotFormat {
    /// Repeated columns rendered as JSON arrays.
    #[default]
    Csv,
    Parquet,
}

impl SnapshotFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotFormat::Csv => "csv",
            SnapshotFormat::Parquet => "parquet",
        }
    }

    /// Guess from a file extension, defaulting to CSV.
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("parquet") => SnapshotFormat::Parquet,
            _ => SnapshotFormat::Csv,
        }
    }
}

impl fmt::Display for SnapshotFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SnapshotFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(SnapshotFormat::Csv),
            "parquet" => Ok(SnapshotFormat::Parquet),
            _ => Err(format!(
                "Invalid snapshot format: '{}'. Expected: csv or parquet",
                s
            )),
        }
    }
}

/// Temp file that is removed unless committed.
struct StagedFile {
    temp_path: PathBuf,
    final_path: PathBuf,
    committed: bool,
}

impl StagedFile {
    fn new(final_path: &Path) -> Result<Self> {
        let parent = final_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create snapshot directory: {}", parent.display()))?;
        let file_name = final_path
            .file_name()
            .and_then(|n| n.to_str())
            .context("Snapshot path has no file name")?;
        Ok(Self {
            temp_path: parent.join(format!(
                ".{}.{}.tmp",
                file_name,
                uuid::Uuid::new_v4().simple()
            )),
            final_path: final_path.to_path_buf(),
            committed: false,
        })
    }

    fn create(&self) -> Result<File> {
        File::create(&self.temp_path).with_context(|| {
            format!(
                "Failed to create temp snapshot file: {}",
                self.temp_path.display()
            )
        })
    }

    fn commit(mut self) -> Result<PathBuf> {
        std::fs::rename(&self.temp_path, &self.final_path).with_context(|| {
            format!(
                "Failed to rename {} -> {}",
                self.temp_path.display(),
                self.final_path.display()
            )
        })?;
        self.committed = true;
        Ok(self.final_path.clone())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed && self.temp_path.exists() {
            let _ = std::fs::remove_file(&self.temp_path);
            warn!("Cleaned up orphaned temp file: {}", self.temp_path.display());
        }
    }
}

/// Write `batch` to `path` in `format`. Returns the final path.
pub fn write_snapshot(path: &Path, format: SnapshotFormat, batch: &RunBatch) -> SinkResult<PathBuf> {
    let staged = StagedFile::new(path)?;
    debug!(
        "Writing {} snapshot via {}",
        format,
        staged.temp_path.display()
    );

    match format {
        SnapshotFormat::Csv => write_csv(&staged, batch)?,
        SnapshotFormat::Parquet => write_parquet(&staged, batch)?,
    }

    let final_path = staged.commit()?;
    info!(
        "Wrote {} snapshot: {} ({} rows)",
        format,
        final_path.display(),
        batch.num_rows()
    );
    Ok(final_path)
}

fn write_csv(staged: &StagedFile, batch: &RunBatch) -> SinkResult<()> {
    let file = staged.create()?;
    let mut writer = csv::Writer::from_writer(file);

    let header: Vec<&str> = batch
        .schema()
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    writer
        .write_record(&header)
        .context("Failed to write CSV header")?;

    for row in batch.text_rows()? {
        writer
            .write_record(&row)
            .context("Failed to write CSV row")?;
    }
    writer.flush().context("Failed to flush CSV snapshot")?;
    Ok(())
}

fn write_parquet(staged: &StagedFile, batch: &RunBatch) -> SinkResult<()> {
    let file = staged.create()?;
    let props = parquet::file::properties::WriterProperties::builder()
        .set_compression(parquet::basic::Compression::SNAPPY)
        .build();

    let record_batch = batch.record_batch();
    let mut writer =
        parquet::arrow::arrow_writer::ArrowWriter::try_new(file, record_batch.schema(), Some(props))
            .context("Failed to create Parquet writer")?;
    writer
        .write(record_batch)
        .context("Failed to write batch to Parquet")?;
    writer.close().context("Failed to close Parquet writer")?;
    Ok(())
}
