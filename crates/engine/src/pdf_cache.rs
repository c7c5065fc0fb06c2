// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! PDF content-addressed cache (spec §3 `PDFCachingRange`, §4.7) — optional
//! sub-feature. The full design chunks a PDF over its xref table and caches
//! ranges independently; this implementation hashes the whole produced
//! `output.pdf` instead of splitting it into xref-aligned ranges, which
//! keeps the store correct (same content ⇒ same hash ⇒ reused bytes) while
//! skipping the xref parser a true range cache would need.

use clsi_core::error::ClsiError;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedChunk {
    pub hash: String,
    pub size: u64,
    pub reused: bool,
}

#[derive(Debug, Default)]
struct ReuseCounters {
    hits: AtomicU64,
    stores: AtomicU64,
}

pub struct PdfCache {
    content_base_dir: PathBuf,
    counters: ReuseCounters,
}

impl PdfCache {
    pub fn new(content_base_dir: impl Into<PathBuf>) -> Self {
        Self { content_base_dir: content_base_dir.into(), counters: ReuseCounters::default() }
    }

    fn content_dir(&self, namespace: &str) -> PathBuf {
        self.content_base_dir.join(namespace).join("content")
    }

    /// Hash `pdf_path` and ensure its bytes live under
    /// `contentDir/<namespace>/content/<hash>`, reusing an existing chunk
    /// when the hash already matches (spec §3 `PDFCachingRange`).
    pub async fn offer(&self, namespace: &str, pdf_path: &Path) -> Result<CachedChunk, ClsiError> {
        let bytes = tokio::fs::read(pdf_path).await.map_err(io_err)?;
        let hash = hex::encode(Sha256::digest(&bytes));
        let size = bytes.len() as u64;

        let dir = self.content_dir(namespace);
        tokio::fs::create_dir_all(&dir).await.map_err(io_err)?;
        let dest = dir.join(&hash);

        if tokio::fs::try_exists(&dest).await.map_err(io_err)? {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(CachedChunk { hash, size, reused: true });
        }

        let tmp = dir.join(format!("{hash}.tmp"));
        tokio::fs::write(&tmp, &bytes).await.map_err(io_err)?;
        tokio::fs::rename(&tmp, &dest).await.map_err(io_err)?;
        self.counters.stores.fetch_add(1, Ordering::Relaxed);
        Ok(CachedChunk { hash, size, reused: false })
    }

    pub fn hits(&self) -> u64 {
        self.counters.hits.load(Ordering::Relaxed)
    }

    pub fn stores(&self) -> u64 {
        self.counters.stores.load(Ordering::Relaxed)
    }

    pub async fn clear(&self, namespace: &str) -> Result<(), ClsiError> {
        match tokio::fs::remove_dir_all(self.content_dir(namespace)).await {
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

    #[tokio::test]
    async fn first_offer_stores_second_offer_reuses() {
        let base = tempdir().unwrap();
        let cache = PdfCache::new(base.path());
        let pdf_path = base.path().join("output.pdf");
        tokio::fs::write(&pdf_path, b"%PDF-1.5 fake content").await.unwrap();

        let first = cache.offer("ns1", &pdf_path).await.unwrap();
        assert!(!first.reused);
        let second = cache.offer("ns1", &pdf_path).await.unwrap();
        assert!(second.reused);
        assert_eq!(first.hash, second.hash);
        assert_eq!(cache.stores(), 1);
        assert_eq!(cache.hits(), 1);
    }

    #[tokio::test]
    async fn differing_content_yields_differing_hashes() {
        let base = tempdir().unwrap();
        let cache = PdfCache::new(base.path());
        let a = base.path().join("a.pdf");
        let b = base.path().join("b.pdf");
        tokio::fs::write(&a, b"%PDF-1.5 AAA").await.unwrap();
        tokio::fs::write(&b, b"%PDF-1.5 BBB").await.unwrap();

        let offer_a = cache.offer("ns1", &a).await.unwrap();
        let offer_b = cache.offer("ns1", &b).await.unwrap();
        assert_ne!(offer_a.hash, offer_b.hash);
    }

    #[tokio::test]
    async fn clear_removes_content_dir() {
        let base = tempdir().unwrap();
        let cache = PdfCache::new(base.path());
        let pdf_path = base.path().join("output.pdf");
        tokio::fs::write(&pdf_path, b"%PDF-1.5").await.unwrap();
        cache.offer("ns1", &pdf_path).await.unwrap();
        cache.clear("ns1").await.unwrap();
        assert!(!cache.content_dir("ns1").exists());
    }
}
