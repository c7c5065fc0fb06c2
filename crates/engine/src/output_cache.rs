// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Output Cache: snapshots a compile's outputs into a build-ID-scoped
//! directory and enforces per-namespace retention (spec §4.7).

use crate::output_file_finder::{self, EntryKind};
use clsi_core::build_id::BuildId;
use clsi_core::error::ClsiError;
use clsi_core::namespace::Namespace;
use clsi_core::output::OutputFile;
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Files moved rather than copied into the build directory: they're
/// per-compile scratch the compile directory no longer needs, including the
/// RootDocAlias clone (spec §4.2 step 2, §4.7 step 2).
const DISPOSABLE_FILENAMES: &[&str] = &["output.log", "output.pdf", "output.xdv", "output.tex"];

const RETENTION_WINDOW: Duration = Duration::from_secs(3600);

pub struct SaveResult {
    pub output_files: Vec<OutputFile>,
    pub has_output_pdf: bool,
    /// Path to the snapshotted `output.pdf`, when produced — handed to the
    /// PDF caching engine by the caller (spec §3 `PDFCachingRange`).
    pub output_pdf_path: Option<PathBuf>,
}

pub struct OutputCache {
    output_base_dir: PathBuf,
    max_files_and_dirs: usize,
    parallel_writes: usize,
}

impl OutputCache {
    pub fn new(output_base_dir: impl Into<PathBuf>, max_files_and_dirs: usize, parallel_writes: usize) -> Self {
        Self { output_base_dir: output_base_dir.into(), max_files_and_dirs, parallel_writes: parallel_writes.max(1) }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.output_base_dir.join(namespace)
    }

    fn compile_output_dir(&self, namespace: &str) -> PathBuf {
        self.namespace_dir(namespace).join("compile-output")
    }

    fn build_dir(&self, namespace: &str, build: &BuildId) -> PathBuf {
        self.compile_output_dir(namespace).join(build.to_string())
    }

    /// `SaveOutputFiles` (spec §4.7). `resource_paths` are the request's
    /// resources — anything else regular-file shaped in `compile_dir` is a
    /// compiler-produced artifact eligible for snapshotting.
    pub async fn save_output_files(
        &self,
        namespace: &Namespace,
        compile_dir: &Path,
        build: BuildId,
        resource_paths: &HashSet<String>,
    ) -> Result<SaveResult, ClsiError> {
        rename_scratch_file(compile_dir, "output.stdout.tmp", "output.stdout").await;
        rename_scratch_file(compile_dir, "output.stderr.tmp", "output.stderr").await;

        let build_dir = self.build_dir(namespace.as_str(), &build);
        tokio::fs::create_dir_all(&build_dir).await.map_err(io_err)?;

        let walked = {
            let compile_dir = compile_dir.to_path_buf();
            let max = self.max_files_and_dirs;
            tokio::task::spawn_blocking(move || output_file_finder::walk(&compile_dir, max))
                .await
                .map_err(|e| ClsiError::Transport(e.to_string()))??
        };

        let eligible: Vec<String> = walked
            .entries
            .iter()
            .filter(|(path, kind)| **kind == EntryKind::File && !resource_paths.contains(path.as_str()))
            .map(|(path, _)| path.clone())
            .collect();

        let writer_count = self.parallel_writes;
        let compile_dir = compile_dir.to_path_buf();
        let results: Vec<(String, Result<u64, ClsiError>)> = stream::iter(eligible.clone())
            .map(|path| {
                let compile_dir = compile_dir.clone();
                let build_dir = build_dir.clone();
                async move {
                    let result = snapshot_one(&compile_dir, &build_dir, &path).await;
                    (path, result)
                }
            })
            .buffer_unordered(writer_count)
            .collect()
            .await;

        let mut has_output_pdf = false;
        let mut output_pdf_path = None;
        let mut output_files = Vec::with_capacity(results.len());
        for (path, result) in results {
            let size = result?;
            if path == "output.pdf" {
                has_output_pdf = true;
                output_pdf_path = Some(build_dir.join(&path));
            }
            output_files.push(OutputFile::new(namespace, build, path, Some(size)));
        }

        self.enforce_retention(namespace).await?;
        Ok(SaveResult { output_files, has_output_pdf, output_pdf_path })
    }

    /// `ListOutputFiles` (spec §4.2.1 step 3 short-circuit).
    pub async fn list_output_files(
        &self,
        namespace: &Namespace,
        build: BuildId,
    ) -> Result<Vec<OutputFile>, ClsiError> {
        let build_dir = self.build_dir(namespace.as_str(), &build);
        let walked = {
            let build_dir = build_dir.clone();
            let max = self.max_files_and_dirs;
            tokio::task::spawn_blocking(move || output_file_finder::walk(&build_dir, max))
                .await
                .map_err(|e| ClsiError::Transport(e.to_string()))??
        };
        Ok(walked
            .entries
            .iter()
            .filter(|(_, kind)| **kind == EntryKind::File)
            .map(|(path, _)| {
                let size = walked.file_stats.get(path).map(|s| s.size);
                OutputFile::new(namespace, build, path.clone(), size)
            })
            .collect())
    }

    /// `Clear` (spec §4.7).
    pub async fn clear(&self, namespace: &str) -> Result<(), ClsiError> {
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }

    /// Keep the current build plus the last K from the past hour (K=2 named
    /// users, K=3 anonymous); delete everything else (spec §4.7 step 4).
    async fn enforce_retention(&self, namespace: &Namespace) -> Result<(), ClsiError> {
        let compile_output_dir = self.compile_output_dir(namespace.as_str());
        let mut build_dirs = match tokio::fs::read_dir(&compile_output_dir).await {
            Ok(mut rd) => {
                let mut names = Vec::new();
                while let Some(entry) = rd.next_entry().await.map_err(io_err)? {
                    if entry.file_type().await.map(|t| t.is_dir()).unwrap_or(false) {
                        if let Some(name) = entry.file_name().to_str() {
                            names.push(name.to_string());
                        }
                    }
                }
                names
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(io_err(e)),
        };
        // Ascending string order equals ascending creation-time order.
        build_dirs.sort();

        let now_nanos = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64;
        let window_nanos = RETENTION_WINDOW.as_nanos() as u64;
        let keep_count = if namespace.is_anonymous() { 3 } else { 2 };

        let mut within_window: Vec<&String> = build_dirs
            .iter()
            .filter(|name| {
                BuildId::parse(name)
                    .map(|id| now_nanos.saturating_sub(id.timestamp_nanos()) <= window_nanos)
                    .unwrap_or(false)
            })
            .collect();
        within_window.sort();
        let keep: HashSet<&str> =
            within_window.iter().rev().take(keep_count).map(|name| name.as_str()).collect();

        for name in &build_dirs {
            if keep.contains(name.as_str()) {
                continue;
            }
            let _ = tokio::fs::remove_dir_all(compile_output_dir.join(name)).await;
        }
        Ok(())
    }
}

async fn rename_scratch_file(compile_dir: &Path, tmp_name: &str, final_name: &str) {
    let tmp_path = compile_dir.join(tmp_name);
    if tokio::fs::try_exists(&tmp_path).await.unwrap_or(false) {
        let _ = tokio::fs::rename(&tmp_path, compile_dir.join(final_name)).await;
    }
}

async fn snapshot_one(compile_dir: &Path, build_dir: &Path, rel_path: &str) -> Result<u64, ClsiError> {
    let src = compile_dir.join(rel_path);
    let dest = build_dir.join(rel_path);
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
    }
    let filename = Path::new(rel_path).file_name().and_then(|f| f.to_str()).unwrap_or(rel_path);
    if DISPOSABLE_FILENAMES.contains(&filename) {
        tokio::fs::rename(&src, &dest).await.map_err(io_err)?;
    } else {
        tokio::fs::copy(&src, &dest).await.map_err(io_err)?;
    }
    let size = tokio::fs::metadata(&dest).await.map(|m| m.len()).unwrap_or(0);
    Ok(size)
}

fn io_err(e: std::io::Error) -> ClsiError {
    ClsiError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn ns() -> Namespace {
        Namespace::new("11111111-1111-1111-1111-111111111111", "22222222-2222-2222-2222-222222222222")
    }

    #[tokio::test]
    async fn saves_non_resource_files_and_detects_pdf() {
        let base = tempdir().unwrap();
        let compile_dir = base.path().join("compile");
        tokio::fs::create_dir_all(&compile_dir).await.unwrap();
        tokio::fs::write(compile_dir.join("main.tex"), b"src").await.unwrap();
        tokio::fs::write(compile_dir.join("output.pdf"), b"%PDF-1.5").await.unwrap();
        tokio::fs::write(compile_dir.join("output.log"), b"log").await.unwrap();

        let cache = OutputCache::new(base.path().join("output"), 1_000, 4);
        let build = BuildId::from_parts(1, 2);
        let resource_paths: HashSet<String> = ["main.tex".to_string()].into_iter().collect();

        let result = cache.save_output_files(&ns(), &compile_dir, build, &resource_paths).await.unwrap();
        assert!(result.has_output_pdf);
        assert!(result.output_files.iter().any(|f| f.path == "output.pdf"));
        assert!(!result.output_files.iter().any(|f| f.path == "main.tex"));

        // output.pdf was moved (disposable), not left behind in compile_dir.
        assert!(!compile_dir.join("output.pdf").exists());
    }

    #[tokio::test]
    async fn missing_pdf_reports_has_output_pdf_false() {
        let base = tempdir().unwrap();
        let compile_dir = base.path().join("compile");
        tokio::fs::create_dir_all(&compile_dir).await.unwrap();
        tokio::fs::write(compile_dir.join("main.tex"), b"src").await.unwrap();
        tokio::fs::write(compile_dir.join("output.log"), b"log").await.unwrap();

        let cache = OutputCache::new(base.path().join("output"), 1_000, 4);
        let build = BuildId::from_parts(1, 2);
        let resource_paths: HashSet<String> = ["main.tex".to_string()].into_iter().collect();
        let result = cache.save_output_files(&ns(), &compile_dir, build, &resource_paths).await.unwrap();
        assert!(!result.has_output_pdf);
    }

    #[tokio::test]
    async fn clear_removes_namespace_output_tree() {
        let base = tempdir().unwrap();
        let cache = OutputCache::new(base.path().join("output"), 1_000, 4);
        let ns = ns();
        let namespace_dir = cache.namespace_dir(ns.as_str());
        tokio::fs::create_dir_all(&namespace_dir).await.unwrap();
        cache.clear(ns.as_str()).await.unwrap();
        assert!(!namespace_dir.exists());
        cache.clear(ns.as_str()).await.unwrap();
    }

    #[tokio::test]
    async fn retention_keeps_current_plus_k_recent() {
        let base = tempdir().unwrap();
        let cache = OutputCache::new(base.path().join("output"), 1_000, 4);
        let ns = ns();
        let compile_output_dir = cache.compile_output_dir(ns.as_str());
        tokio::fs::create_dir_all(&compile_output_dir).await.unwrap();

        let now = SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_nanos() as u64;
        // Five builds all within the retention window, ascending by time.
        let mut ids = Vec::new();
        for i in 0..5u64 {
            let id = BuildId::from_parts(now - (4 - i) * 1000, i);
            tokio::fs::create_dir_all(compile_output_dir.join(id.to_string())).await.unwrap();
            ids.push(id);
        }

        cache.enforce_retention(&ns).await.unwrap();

        let mut remaining = Vec::new();
        let mut rd = tokio::fs::read_dir(&compile_output_dir).await.unwrap();
        while let Some(entry) = rd.next_entry().await.unwrap() {
            remaining.push(entry.file_name().to_string_lossy().to_string());
        }
        // named-user namespace: K=2, so 2 remain.
        assert_eq!(remaining.len(), 2);
        assert!(remaining.contains(&ids[4].to_string()));
        assert!(remaining.contains(&ids[3].to_string()));
    }
}
