// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! clsi-storage: on-disk persistence for the per-namespace resource cache
//! (spec §3 ResourceCache, §6 on-disk layout).

pub mod atomic;
pub mod resource_cache;

pub use resource_cache::{ResourceCacheStore, StoredCache};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("io error at {path}: {source}")]
    Io { path: String, #[source] source: std::io::Error },
    #[error("corrupt state file at {path}: {source}")]
    Corrupt { path: String, #[source] source: serde_json::Error },
}
