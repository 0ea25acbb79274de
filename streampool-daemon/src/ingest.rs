//! Loading ingestion batches from disk.

use std::fs;
use std::path::Path;

use log::info;
use streampool_protocol::IngestRecord;
use thiserror::Error;

/// Ingest file error types.
#[derive(Error, Debug)]
pub enum IngestError {
    #[error("Failed to read ingest file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse ingest file: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Parse a JSON array of ingest records.
pub fn parse_records(data: &str) -> Result<Vec<IngestRecord>, IngestError> {
    Ok(serde_json::from_str(data)?)
}

/// Load a JSON array of ingest records from a file.
pub fn load_records_file(path: &Path) -> Result<Vec<IngestRecord>, IngestError> {
    let data = fs::read_to_string(path)?;
    let records = parse_records(&data)?;
    info!("Loaded {} ingest records from {}", records.len(), path.display());
    Ok(records)
}
