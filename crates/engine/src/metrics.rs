// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-process counters (SPEC_FULL §12), queryable by the health check and
//! by tests. No external exporter — metrics export is out of scope per
//! spec §1; this struct only backs in-process observability.

use clsi_core::compile::CompileStatus;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Metrics {
    compiles_started: AtomicU64,
    compiles_succeeded: AtomicU64,
    compiles_failed: AtomicU64,
    compiles_timed_out: AtomicU64,
    containers_created: AtomicU64,
    containers_restarted: AtomicU64,
    containers_removed: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MetricsSnapshot {
    pub compiles_started: u64,
    pub compiles_succeeded: u64,
    pub compiles_failed: u64,
    pub compiles_timed_out: u64,
    pub containers_created: u64,
    pub containers_restarted: u64,
    pub containers_removed: u64,
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_compile_started(&self) {
        self.compiles_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_compile_finished(&self, status: CompileStatus) {
        match status {
            CompileStatus::Success | CompileStatus::ValidationPass => {
                self.compiles_succeeded.fetch_add(1, Ordering::Relaxed);
            }
            CompileStatus::Timedout => {
                self.compiles_timed_out.fetch_add(1, Ordering::Relaxed);
            }
            CompileStatus::Failure | CompileStatus::Terminated | CompileStatus::ValidationFail => {
                self.compiles_failed.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_container_created(&self) {
        self.containers_created.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_container_restarted(&self) {
        self.containers_restarted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_container_removed(&self) {
        self.containers_removed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            compiles_started: self.compiles_started.load(Ordering::Relaxed),
            compiles_succeeded: self.compiles_succeeded.load(Ordering::Relaxed),
            compiles_failed: self.compiles_failed.load(Ordering::Relaxed),
            compiles_timed_out: self.compiles_timed_out.load(Ordering::Relaxed),
            containers_created: self.containers_created.load(Ordering::Relaxed),
            containers_restarted: self.containers_restarted.load(Ordering::Relaxed),
            containers_removed: self.containers_removed.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_compile_outcomes_independently() {
        let metrics = Metrics::new();
        metrics.record_compile_started();
        metrics.record_compile_finished(CompileStatus::Success);
        metrics.record_compile_started();
        metrics.record_compile_finished(CompileStatus::Timedout);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.compiles_started, 2);
        assert_eq!(snapshot.compiles_succeeded, 1);
        assert_eq!(snapshot.compiles_timed_out, 1);
        assert_eq!(snapshot.compiles_failed, 0);
    }
}
