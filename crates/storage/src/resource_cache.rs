// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-namespace resource cache file: `{resourceCache: {path -> version},
//! syncState: token}` (spec §3, §4.4, §6).

use crate::atomic::{read_json_opt, remove_file_tolerant, write_json_atomic};
use crate::StorageError;
use clsi_core::SyncState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StoredCache {
    #[serde(rename = "resourceCache")]
    pub resource_cache: HashMap<String, u64>,
    #[serde(rename = "syncState")]
    pub sync_state: Option<String>,
}

impl StoredCache {
    pub fn sync_state(&self) -> Option<SyncState> {
        self.sync_state.as_deref().map(SyncState::from)
    }
}

/// Reads/writes `<cache_base_dir>/state/<namespace>.json`.
#[derive(Debug, Clone)]
pub struct ResourceCacheStore {
    cache_base_dir: PathBuf,
}

impl ResourceCacheStore {
    pub fn new(cache_base_dir: impl Into<PathBuf>) -> Self {
        Self { cache_base_dir: cache_base_dir.into() }
    }

    fn state_path(&self, namespace: &str) -> PathBuf {
        self.cache_base_dir.join("state").join(format!("{namespace}.json"))
    }

    /// Absence means "cleared" (spec §4.4).
    pub fn load(&self, namespace: &str) -> Result<Option<StoredCache>, StorageError> {
        read_json_opt(&self.state_path(namespace))
    }

    pub fn save(&self, namespace: &str, cache: &StoredCache) -> Result<(), StorageError> {
        write_json_atomic(&self.state_path(namespace), cache)
    }

    pub fn clear(&self, namespace: &str) -> Result<(), StorageError> {
        remove_file_tolerant(&self.state_path(namespace))
    }

    pub fn path_for(&self, namespace: &str) -> PathBuf {
        self.state_path(namespace)
    }

    pub fn cache_base_dir(&self) -> &Path {
        &self.cache_base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn absent_cache_reads_as_none() {
        let dir = tempdir().unwrap();
        let store = ResourceCacheStore::new(dir.path());
        assert_eq!(store.load("ns-1").unwrap(), None);
    }

    #[test]
    fn save_then_load_roundtrips() {
        let dir = tempdir().unwrap();
        let store = ResourceCacheStore::new(dir.path());
        let mut cache = StoredCache::default();
        cache.resource_cache.insert("main.tex".into(), 1);
        cache.sync_state = Some("v1".into());
        store.save("ns-1", &cache).unwrap();
        assert_eq!(store.load("ns-1").unwrap(), Some(cache));
    }

    #[test]
    fn clear_removes_cache_file_and_is_idempotent() {
        let dir = tempdir().unwrap();
        let store = ResourceCacheStore::new(dir.path());
        store.save("ns-1", &StoredCache::default()).unwrap();
        store.clear("ns-1").unwrap();
        assert_eq!(store.load("ns-1").unwrap(), None);
        // second clear on an already-absent file must not error
        store.clear("ns-1").unwrap();
    }
}
