// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Write-then-rename helper so a reader never observes a half-written state
//! file (spec §5 "SyncResourcesToDisk updates the on-disk state file only
//! after all resources are successfully written").

use crate::StorageError;
use std::path::Path;

pub fn write_json_atomic<T: serde::Serialize>(path: &Path, value: &T) -> Result<(), StorageError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)
        .map_err(|source| StorageError::Io { path: parent.display().to_string(), source })?;

    let tmp_path = path.with_extension("json.tmp");
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|source| StorageError::Corrupt { path: path.display().to_string(), source })?;
    std::fs::write(&tmp_path, bytes)
        .map_err(|source| StorageError::Io { path: tmp_path.display().to_string(), source })?;
    std::fs::rename(&tmp_path, path)
        .map_err(|source| StorageError::Io { path: path.display().to_string(), source })?;
    Ok(())
}

/// Reads a JSON file, returning `Ok(None)` when it doesn't exist (meaning
/// "cleared"/"no cache").
pub fn read_json_opt<T: serde::de::DeserializeOwned>(
    path: &Path,
) -> Result<Option<T>, StorageError> {
    match std::fs::read(path) {
        Ok(bytes) => {
            let value = serde_json::from_slice(&bytes)
                .map_err(|source| StorageError::Corrupt { path: path.display().to_string(), source })?;
            Ok(Some(value))
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(source) => Err(StorageError::Io { path: path.display().to_string(), source }),
    }
}

/// Remove a file, tolerating "not found" (spec §4.4 Clear, §7).
pub fn remove_file_tolerant(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io { path: path.display().to_string(), source }),
    }
}

/// Remove a directory tree, tolerating "not found".
pub fn remove_dir_all_tolerant(path: &Path) -> Result<(), StorageError> {
    match std::fs::remove_dir_all(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StorageError::Io { path: path.display().to_string(), source }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::{Deserialize, Serialize};
    use tempfile::tempdir;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Sample {
        value: u32,
    }

    #[test]
    fn write_then_read_roundtrips() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &Sample { value: 42 }).unwrap();
        let read: Option<Sample> = read_json_opt(&path).unwrap();
        assert_eq!(read, Some(Sample { value: 42 }));
    }

    #[test]
    fn missing_file_reads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let read: Option<Sample> = read_json_opt(&path).unwrap();
        assert_eq!(read, None);
    }

    #[test]
    fn remove_file_tolerant_ignores_missing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("absent.json");
        assert!(remove_file_tolerant(&path).is_ok());
    }

    #[test]
    fn no_tmp_file_survives_a_successful_write() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        write_json_atomic(&path, &Sample { value: 1 }).unwrap();
        assert!(!path.with_extension("json.tmp").exists());
    }
}
