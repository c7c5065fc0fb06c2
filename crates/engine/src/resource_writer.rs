// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Resource Writer: reconciles the on-disk working tree with a compile
//! request's resources (spec §4.4). Full-incremental writes every resource
//! unconditionally; incremental writes only resources whose version differs
//! from the persisted cache, downloads files through the URL Cache, and
//! deletes stray on-disk files that the preserve list doesn't protect.

use crate::output_file_finder::{self, EntryKind};
use crate::url_cache::UrlCache;
use clsi_core::error::ClsiError;
use clsi_core::resource::{Resource, ResourceKind};
use clsi_core::sync_state::{SyncState, SyncType};
use clsi_storage::{ResourceCacheStore, StorageError, StoredCache};
use futures_util::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Suffixes preserved across an incremental sync regardless of request
/// membership (spec §4.4, §GLOSSARY "Preserve list").
const PRESERVED_SUFFIXES: &[&str] = &[".aux", ".md5", ".dpth"];

/// Directory name fragments whose contents are preserved: knitr's `cache`
/// directories, and the `_minted-*` / `_markdown_*` regions the `minted`
/// and R Markdown toolchains maintain between runs.
fn is_preserved(path: &str) -> bool {
    if PRESERVED_SUFFIXES.iter().any(|suffix| path.ends_with(suffix)) {
        return true;
    }
    let segments: Vec<&str> = path.split('/').collect();
    segments[..segments.len().saturating_sub(1)].iter().any(|segment| {
        *segment == "cache" || segment.starts_with("_minted-") || segment.starts_with("_markdown_")
    })
}

pub struct ResourceWriter {
    compile_base_dir: PathBuf,
    cache_store: ResourceCacheStore,
    url_cache: Arc<UrlCache>,
    max_files_and_dirs: usize,
    parallel_writes: usize,
}

impl ResourceWriter {
    pub fn new(
        compile_base_dir: impl Into<PathBuf>,
        cache_store: ResourceCacheStore,
        url_cache: Arc<UrlCache>,
        max_files_and_dirs: usize,
        parallel_writes: usize,
    ) -> Self {
        Self {
            compile_base_dir: compile_base_dir.into(),
            cache_store,
            url_cache,
            max_files_and_dirs,
            parallel_writes: parallel_writes.max(1),
        }
    }

    pub fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.compile_base_dir.join(namespace)
    }

    /// `SyncResourcesToDisk` (spec §4.4).
    pub async fn sync_resources_to_disk(
        &self,
        namespace: &str,
        resources: &[Resource],
        sync_state: &SyncState,
        sync_type: SyncType,
    ) -> Result<(), ClsiError> {
        for resource in resources {
            resource.validate()?;
        }
        match sync_type {
            SyncType::Incremental => {
                let stored = self.cache_store.load(namespace).map_err(storage_err)?;
                // Empty stored state means "no cache" (spec §9 open question).
                let in_sync = stored
                    .as_ref()
                    .and_then(|c| c.sync_state())
                    .map(|stored_state| !stored_state.is_empty() && &stored_state == sync_state)
                    .unwrap_or(false);
                if !in_sync {
                    return Err(ClsiError::sync_state_mismatch());
                }
                let cache = stored.unwrap_or_default();
                let new_cache = self.sync(namespace, resources, &cache, false).await?;
                self.persist(namespace, new_cache, sync_state)
            }
            SyncType::FullIncremental => match self.sync(namespace, resources, &StoredCache::default(), true).await {
                Ok(new_cache) => self.persist(namespace, new_cache, sync_state),
                Err(e) if e.is_recoverable_invalid_state() => {
                    self.clear(namespace).await?;
                    let new_cache = self.sync(namespace, resources, &StoredCache::default(), true).await?;
                    self.persist(namespace, new_cache, sync_state)
                }
                Err(e) => Err(e),
            },
        }
    }

    fn persist(&self, namespace: &str, cache: HashMap<String, u64>, sync_state: &SyncState) -> Result<(), ClsiError> {
        self.cache_store
            .save(namespace, &StoredCache { resource_cache: cache, sync_state: Some(sync_state.as_str().to_string()) })
            .map_err(storage_err)
    }

    /// Whether the on-disk state already reflects `resources` exactly,
    /// per the Project's compile short-circuit (spec §4.2.1 step 3,
    /// §9 open question — resolved here via cache equality rather than mtime
    /// comparison: deterministic and immune to clock skew).
    pub fn resources_in_sync(&self, namespace: &str, resources: &[Resource]) -> Result<bool, ClsiError> {
        let Some(stored) = self.cache_store.load(namespace).map_err(storage_err)? else { return Ok(false) };
        for resource in resources {
            if let Some((_, version)) = resource.as_doc() {
                if stored.resource_cache.get(&resource.path).copied() != Some(version) {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }

    async fn sync(
        &self,
        namespace: &str,
        resources: &[Resource],
        cache: &StoredCache,
        force_all: bool,
    ) -> Result<HashMap<String, u64>, ClsiError> {
        let ns_dir = self.namespace_dir(namespace);
        tokio::fs::create_dir_all(&ns_dir).await.map_err(io_err)?;

        let walked = {
            let ns_dir = ns_dir.clone();
            let max = self.max_files_and_dirs;
            tokio::task::spawn_blocking(move || output_file_finder::walk(&ns_dir, max))
                .await
                .map_err(|e| ClsiError::Transport(e.to_string()))??
        };

        let to_write: Vec<&Resource> = resources
            .iter()
            .filter(|resource| match resource.as_doc() {
                Some((_, version)) => force_all || cache.resource_cache.get(&resource.path).copied() != Some(version),
                None => true,
            })
            .collect();

        for resource in &to_write {
            output_file_finder::ensure_is_writable(&ns_dir, &walked, &resource.path).map_err(io_err)?;
        }

        let requested: HashSet<&str> = resources.iter().map(|r| r.path.as_str()).collect();
        for (path, kind) in &walked.entries {
            if *kind != EntryKind::File || requested.contains(path.as_str()) || is_preserved(path) {
                continue;
            }
            let _ = tokio::fs::remove_file(ns_dir.join(path)).await;
        }

        let writer_count = self.parallel_writes;
        let url_cache = Arc::clone(&self.url_cache);
        let namespace = namespace.to_string();
        let written: Vec<Result<(String, u64), ClsiError>> = stream::iter(to_write.into_iter())
            .map(|resource| write_resource(&url_cache, &namespace, &ns_dir, resource))
            .buffer_unordered(writer_count)
            .collect()
            .await;
        for result in written {
            result?;
        }

        let mut missing = Vec::new();
        for resource in resources {
            if !tokio::fs::try_exists(ns_dir.join(&resource.path)).await.unwrap_or(false) {
                missing.push(resource.path.clone());
            }
        }
        if !missing.is_empty() {
            return Err(ClsiError::invalid_state(format!("resources missing after sync: {}", missing.join(", "))));
        }

        let mut new_cache = HashMap::new();
        for resource in resources {
            if let Some((_, version)) = resource.as_doc() {
                new_cache.insert(resource.path.clone(), version);
            }
        }
        Ok(new_cache)
    }

    /// `Clear` (spec §4.4): removes the state file, working directory, and
    /// per-project URL cache, all tolerant of "not found".
    pub async fn clear(&self, namespace: &str) -> Result<(), ClsiError> {
        self.cache_store.clear(namespace).map_err(storage_err)?;
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(io_err(e)),
        }
        self.url_cache.clear(namespace).await
    }
}

async fn write_resource(
    url_cache: &UrlCache,
    namespace: &str,
    ns_dir: &Path,
    resource: &Resource,
) -> Result<(String, u64), ClsiError> {
    let dest = ns_dir.join(&resource.path);
    match &resource.kind {
        ResourceKind::Doc { content, version } => {
            if let Some(parent) = dest.parent() {
                tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
            }
            tokio::fs::write(&dest, content.as_bytes()).await.map_err(io_err)?;
            set_private_mode(&dest).await?;
            Ok((resource.path.clone(), *version))
        }
        ResourceKind::File { url } => {
            url_cache.download(namespace, url, &dest).await?;
            Ok((resource.path.clone(), 0))
        }
    }
}

#[cfg(unix)]
async fn set_private_mode(path: &Path) -> Result<(), ClsiError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)).await.map_err(io_err)
}

#[cfg(not(unix))]
async fn set_private_mode(_path: &Path) -> Result<(), ClsiError> {
    Ok(())
}

fn io_err(e: std::io::Error) -> ClsiError {
    ClsiError::Transport(e.to_string())
}

fn storage_err(e: StorageError) -> ClsiError {
    ClsiError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::tempdir;

    fn writer(base: &Path) -> ResourceWriter {
        let cache_store = ResourceCacheStore::new(base.join("cache"));
        let url_cache = Arc::new(UrlCache::new(base.join("urlcache"), 0, Duration::from_secs(5)));
        ResourceWriter::new(base.join("compile"), cache_store, url_cache, 1_000, 4)
    }

    #[tokio::test]
    async fn full_incremental_writes_doc_and_persists_cache() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "\\documentclass{article}", 1)];

        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        let on_disk = tokio::fs::read_to_string(writer.namespace_dir("ns-1").join("main.tex")).await.unwrap();
        assert_eq!(on_disk, "\\documentclass{article}");

        let stored = writer.cache_store.load("ns-1").unwrap().unwrap();
        assert_eq!(stored.resource_cache.get("main.tex"), Some(&1));
        assert_eq!(stored.sync_state.as_deref(), Some("v1"));
    }

    #[tokio::test]
    async fn incremental_with_mismatched_sync_state_is_rejected() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "x", 1)];
        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        let err = writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v2"), SyncType::Incremental)
            .await
            .unwrap_err();
        assert!(matches!(err, ClsiError::InvalidState { recoverable: true, .. }));
    }

    #[tokio::test]
    async fn incremental_skips_rewriting_unchanged_doc() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "first", 1)];
        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        // Mutate on disk directly; an incremental sync with the same version
        // must not rewrite it.
        let path = writer.namespace_dir("ns-1").join("main.tex");
        tokio::fs::write(&path, "tampered").await.unwrap();

        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::Incremental)
            .await
            .unwrap();
        assert_eq!(tokio::fs::read_to_string(&path).await.unwrap(), "tampered");
    }

    #[tokio::test]
    async fn deletes_stray_file_not_in_request_and_preserves_aux() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "x", 1)];
        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        let ns_dir = writer.namespace_dir("ns-1");
        tokio::fs::write(ns_dir.join("stray.txt"), b"x").await.unwrap();
        tokio::fs::write(ns_dir.join("main.aux"), b"x").await.unwrap();

        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        assert!(!ns_dir.join("stray.txt").exists());
        assert!(ns_dir.join("main.aux").exists());
    }

    #[tokio::test]
    async fn resources_in_sync_detects_version_drift() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "x", 1)];
        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        assert!(writer.resources_in_sync("ns-1", &resources).unwrap());
        let bumped = vec![Resource::doc("main.tex", "x", 2)];
        assert!(!writer.resources_in_sync("ns-1", &bumped).unwrap());
    }

    #[tokio::test]
    async fn clear_removes_state_and_working_tree() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("main.tex", "x", 1)];
        writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap();

        writer.clear("ns-1").await.unwrap();
        assert!(!writer.namespace_dir("ns-1").exists());
        assert_eq!(writer.cache_store.load("ns-1").unwrap(), None);
    }

    #[tokio::test]
    async fn rejects_a_resource_path_that_escapes_the_namespace_dir() {
        let base = tempdir().unwrap();
        let writer = writer(base.path());
        let resources = vec![Resource::doc("../../etc/passwd", "x", 1)];

        let err = writer
            .sync_resources_to_disk("ns-1", &resources, &SyncState::from("v1"), SyncType::FullIncremental)
            .await
            .unwrap_err();
        assert!(matches!(err, ClsiError::Validation(_)));
        assert!(!writer.namespace_dir("ns-1").join("../../etc/passwd").exists());
    }
}
