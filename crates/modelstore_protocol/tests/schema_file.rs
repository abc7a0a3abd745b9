//! Schema description loading from disk.

use modelstore_protocol::{ColumnMode, ColumnType, ProtocolError, TableSchema};
use std::fs;

#[test]
fn test_load_schema_from_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("schema.json");
    fs::write(
        &path,
        r#"[
            {"name": "run", "type": "STRING", "mode": "REQUIRED"},
            {"name": "update_time", "type": "TIMESTAMP"},
            {"name": "metrics", "type": "STRING", "mode": "REPEATED"}
        ]"#,
    )?;

    let schema = TableSchema::load(&path)?;
    assert_eq!(schema.len(), 3);
    assert_eq!(schema.columns()[0].mode, ColumnMode::Required);
    assert_eq!(schema.columns()[1].column_type, ColumnType::Timestamp);
    assert!(schema.columns()[2].is_repeated());
    Ok(())
}

#[test]
fn test_invalid_schema_error_names_the_file() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("broken.json");
    fs::write(
        &path,
        r#"[{"name": "run", "type": "STRING"}, {"name": "run", "type": "TIMESTAMP"}]"#,
    )?;

    match TableSchema::load(&path) {
        Err(ProtocolError::InvalidSchema(msg)) => {
            assert!(msg.contains("broken.json"), "unexpected message: {}", msg);
        }
        other => panic!("expected InvalidSchema, got {:?}", other),
    }
    Ok(())
}

#[test]
fn test_missing_schema_file_is_io_error() {
    let result = TableSchema::load(std::path::Path::new("/nonexistent/schema.json"));
    assert!(matches!(result, Err(ProtocolError::Io(_))));
}

#[test]
fn test_repository_schema_file_is_valid() -> anyhow::Result<()> {
    let path = std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("../../schema/pipelines.json");
    let from_disk = TableSchema::load(&path)?;
    assert_eq!(from_disk, TableSchema::pipelines()?);
    Ok(())
}
