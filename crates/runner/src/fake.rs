// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! In-memory `CommandRunner` used by `clsi-engine`'s Project state-machine
//! tests, grounded in the teacher's `FakeAgentAdapter` pattern.

use crate::error::RunnerError;
use crate::{CommandRunner, ContainerEvent, RunnerLease};
use async_trait::async_trait;
use clsi_core::command::{CommandOptions, CommandResult};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct FakeCall {
    pub namespace: String,
    pub argv: Vec<String>,
}

#[derive(Clone)]
pub struct FakeCommandRunner {
    inner: Arc<Mutex<Inner>>,
}

struct Inner {
    calls: Vec<FakeCall>,
    setup_calls: u32,
    queued_results: VecDeque<Result<CommandResult, RunnerError>>,
    setup_failures: u32,
    lease: Duration,
    stopped: Vec<String>,
}

impl Default for FakeCommandRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeCommandRunner {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                calls: Vec::new(),
                setup_calls: 0,
                queued_results: VecDeque::new(),
                setup_failures: 0,
                lease: Duration::from_secs(300),
                stopped: Vec::new(),
            })),
        }
    }

    pub fn with_lease(self, lease: Duration) -> Self {
        self.inner.lock().lease = lease;
        self
    }

    pub fn queue_result(&self, result: Result<CommandResult, RunnerError>) {
        self.inner.lock().queued_results.push_back(result);
    }

    /// Make the next N setup calls fail (used to test retry/dead semantics).
    pub fn fail_next_setups(&self, n: u32) {
        self.inner.lock().setup_failures = n;
    }

    pub fn calls(&self) -> Vec<FakeCall> {
        self.inner.lock().calls.clone()
    }

    pub fn setup_calls(&self) -> u32 {
        self.inner.lock().setup_calls
    }

    pub fn stopped(&self) -> Vec<String> {
        self.inner.lock().stopped.clone()
    }

    fn default_result() -> CommandResult {
        CommandResult {
            exit_code: 0,
            error_message: None,
            system_time: Duration::from_millis(10),
            user_time: Duration::from_millis(10),
            wall_time: Duration::from_millis(20),
        }
    }
}

#[async_trait]
impl CommandRunner for FakeCommandRunner {
    async fn setup(&self, _namespace: &str, _image_name: &str) -> Result<RunnerLease, RunnerError> {
        let mut inner = self.inner.lock();
        inner.setup_calls += 1;
        if inner.setup_failures > 0 {
            inner.setup_failures -= 1;
            return Err(RunnerError::SetupFailed("fake setup failure".into()));
        }
        Ok(RunnerLease { valid_until: Instant::now() + inner.lease, container_event: ContainerEvent::Created })
    }

    async fn run(&self, namespace: &str, options: &CommandOptions) -> Result<CommandResult, RunnerError> {
        let mut inner = self.inner.lock();
        inner.calls.push(FakeCall { namespace: namespace.to_string(), argv: options.argv.clone() });
        inner.queued_results.pop_front().unwrap_or_else(|| Ok(Self::default_result()))
    }

    async fn stop(&self, namespace: &str) -> Result<(), RunnerError> {
        self.inner.lock().stopped.push(namespace.to_string());
        Ok(())
    }

    fn resolve(&self, _namespace: &str, container_path: &str) -> PathBuf {
        PathBuf::from(container_path.trim_start_matches('/'))
    }
}
