// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! URL Cache: per-project cache of downloaded external file resources
//! (spec §4.5). Entries are keyed by a flattened URL (slashes replaced by
//! hyphens) so concurrent downloaders racing the same key is safe — the
//! atomic rename means last write wins and callers always re-copy from the
//! cache afterward.

use clsi_core::error::ClsiError;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub struct UrlCache {
    cache_base_dir: PathBuf,
    client: reqwest::Client,
    retries: u32,
    download_timeout: Duration,
}

impl UrlCache {
    pub fn new(cache_base_dir: impl Into<PathBuf>, retries: u32, download_timeout: Duration) -> Self {
        Self { cache_base_dir: cache_base_dir.into(), client: reqwest::Client::new(), retries, download_timeout }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.cache_base_dir.join(namespace)
    }

    /// Flatten a URL into a filesystem-safe cache key.
    pub fn flatten(url: &str) -> String {
        url.replace('/', "-")
    }

    fn entry_path(&self, namespace: &str, url: &str) -> PathBuf {
        self.namespace_dir(namespace).join(Self::flatten(url))
    }

    /// Download `url` into the project's URL cache if not already present,
    /// then copy the cached entry into `dest` inside the working tree.
    pub async fn download(&self, namespace: &str, url: &str, dest: &Path) -> Result<(), ClsiError> {
        let entry = self.entry_path(namespace, url);
        if !tokio::fs::try_exists(&entry).await.unwrap_or(false) {
            self.fetch_with_retry(url, &entry).await?;
        }
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        tokio::fs::copy(&entry, dest).await.map_err(io_err)?;
        Ok(())
    }

    async fn fetch_with_retry(&self, url: &str, entry: &Path) -> Result<(), ClsiError> {
        let attempts = 1 + self.retries;
        let mut last_err = None;
        for attempt in 0..attempts {
            match self.fetch_once(url, entry).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(url, attempt, error = %e, "url cache download attempt failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ClsiError::Transport(format!("download failed: {url}"))))
    }

    async fn fetch_once(&self, url: &str, entry: &Path) -> Result<(), ClsiError> {
        let response = tokio::time::timeout(self.download_timeout, self.client.get(url).send())
            .await
            .map_err(|_| ClsiError::DeadlineExceeded)?
            .map_err(|e| ClsiError::Transport(e.to_string()))?;
        if !response.status().is_success() {
            return Err(ClsiError::Transport(format!("non-200 response: {}", response.status())));
        }
        let bytes = response.bytes().await.map_err(|e| ClsiError::Transport(e.to_string()))?;

        let parent = entry.parent().unwrap_or_else(|| Path::new("."));
        tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        let tmp = PathBuf::from(format!("{}.tmp", entry.display()));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, entry).await.map_err(io_err)?;
        Ok(())
    }

    /// Remove the whole per-project cache directory (spec §4.4 Clear).
    pub async fn clear(&self, namespace: &str) -> Result<(), ClsiError> {
        match tokio::fs::remove_dir_all(self.namespace_dir(namespace)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(e)),
        }
    }
}

fn io_err(e: std::io::Error) -> ClsiError {
    ClsiError::Transport(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn flattens_slashes_to_hyphens() {
        assert_eq!(UrlCache::flatten("https://example.com/a/b.png"), "https:--example.com-a-b.png");
    }

    #[tokio::test]
    async fn cache_hit_copies_without_network() {
        let cache_dir = tempdir().unwrap();
        let dest_dir = tempdir().unwrap();
        let cache = UrlCache::new(cache_dir.path(), 0, Duration::from_secs(5));

        let url = "https://example.com/logo.png";
        let entry = cache.entry_path("ns-1", url);
        tokio::fs::create_dir_all(entry.parent().unwrap()).await.unwrap();
        tokio::fs::write(&entry, b"cached-bytes").await.unwrap();

        let dest = dest_dir.path().join("logo.png");
        cache.download("ns-1", url, &dest).await.unwrap();
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), b"cached-bytes");
    }

    #[tokio::test]
    async fn clear_tolerates_missing_directory() {
        let cache_dir = tempdir().unwrap();
        let cache = UrlCache::new(cache_dir.path(), 0, Duration::from_secs(5));
        cache.clear("never-existed").await.unwrap();
    }
}
