// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! clsi-runner: the sandboxed Command Runner (spec §4.3).
//!
//! Two implementations share the [`CommandRunner`] trait: [`sandbox::SandboxRunner`]
//! (one Docker container per namespace, the production path) and
//! [`local::LocalRunner`] (direct host execution, used when sandboxing is
//! disabled in tests).

pub mod error;
pub mod local;
pub mod protocol;
pub mod sandbox;

#[cfg(any(test, feature = "test-support"))]
pub mod fake;

pub use error::RunnerError;

use async_trait::async_trait;
use clsi_core::command::{CommandOptions, CommandResult};
use std::path::PathBuf;
use std::time::Instant;

/// What `setup` actually did to the underlying container, so callers can
/// feed accurate counters into `clsi-engine::Metrics` without this crate
/// depending on it (spec §9 "Container lifecycle vs. process lifecycle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerEvent {
    /// Reused an already-running container; nothing created or restarted.
    Unchanged,
    /// A new container was created (first use, or after a foreign/stale one
    /// was force-removed).
    Created,
    /// An existing, same-process-epoch container was restarted.
    Restarted,
}

/// Lease metadata returned by `setup`: how long the container may be used
/// before another setup is required (spec §3 `runnerValidUntil`).
#[derive(Debug, Clone, Copy)]
pub struct RunnerLease {
    pub valid_until: Instant,
    pub container_event: ContainerEvent,
}

/// Shared interface for the sandboxed and local Command Runner variants
/// (spec §4.3).
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Ensure a usable container (or, for the local variant, a no-op) exists
    /// for `namespace`, provisioned from `image_name`. Idempotent; safe to
    /// call repeatedly.
    async fn setup(&self, namespace: &str, image_name: &str) -> Result<RunnerLease, RunnerError>;

    /// Execute one command inside the namespace's sandbox.
    async fn run(&self, namespace: &str, options: &CommandOptions) -> Result<CommandResult, RunnerError>;

    /// Force-remove the namespace's container. "Not found" is success.
    async fn stop(&self, namespace: &str) -> Result<(), RunnerError>;

    /// Map a container-internal path back to a project-relative path.
    fn resolve(&self, namespace: &str, container_path: &str) -> PathBuf;
}
