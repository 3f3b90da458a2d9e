//! JSON backup encoding.

use semem_types::error::MemoryError;

use super::{BACKUP_FORMAT, BackupDocument};

pub fn encode(document: &BackupDocument) -> Result<Vec<u8>, MemoryError> {
    Ok(serde_json::to_vec_pretty(document)?)
}

/// Parse a JSON backup without verifying its checksum.
///
/// The format tag is checked before the body so that a foreign JSON file
/// fails with a clear message rather than a missing-field error.
pub fn decode(bytes: &[u8]) -> Result<BackupDocument, MemoryError> {
    let value: serde_json::Value = serde_json::from_slice(bytes)?;
    match value.get("format").and_then(|f| f.as_str()) {
        Some(BACKUP_FORMAT) => Ok(serde_json::from_value(value)?),
        Some(other) => Err(MemoryError::Validation(format!(
            "unsupported backup format '{other}'"
        ))),
        None => Err(MemoryError::Validation(
            "not a semem backup: missing format tag".to_string(),
        )),
    }
}
