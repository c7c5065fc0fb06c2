// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Local Command Runner variant: executes argv directly on the host under
//! `compile_base_dir/<namespace>` as cwd. No setup or teardown; the lease is
//! reported as 24h out. Intended only for development/test (spec §4.3.2).

use crate::error::RunnerError;
use crate::{CommandRunner, ContainerEvent, RunnerLease};
use async_trait::async_trait;
use clsi_core::command::{CommandOptions, CommandResult};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct LocalRunner {
    compile_base_dir: PathBuf,
}

impl LocalRunner {
    pub fn new(compile_base_dir: impl Into<PathBuf>) -> Self {
        Self { compile_base_dir: compile_base_dir.into() }
    }

    fn namespace_dir(&self, namespace: &str) -> PathBuf {
        self.compile_base_dir.join(namespace)
    }

    fn resolve_token(&self, namespace: &str, arg: &str) -> String {
        let dir = self.namespace_dir(namespace);
        arg.replace("$COMPILE_DIR", &dir.to_string_lossy())
            .replace("$OUTPUT_DIR", &dir.to_string_lossy())
    }
}

#[async_trait]
impl CommandRunner for LocalRunner {
    async fn setup(&self, namespace: &str, _image_name: &str) -> Result<RunnerLease, RunnerError> {
        std::fs::create_dir_all(self.namespace_dir(namespace))
            .map_err(|e| RunnerError::SetupFailed(e.to_string()))?;
        Ok(RunnerLease {
            valid_until: Instant::now() + Duration::from_secs(24 * 60 * 60),
            container_event: ContainerEvent::Unchanged,
        })
    }

    async fn run(&self, namespace: &str, options: &CommandOptions) -> Result<CommandResult, RunnerError> {
        let argv: Vec<String> = options.argv.iter().map(|a| self.resolve_token(namespace, a)).collect();
        let Some((program, args)) = argv.split_first() else {
            return Err(RunnerError::Other("empty argv".into()));
        };

        let mut cmd = tokio::process::Command::new(program);
        cmd.args(args).current_dir(self.namespace_dir(namespace));
        for (k, v) in &options.env {
            cmd.env(k, v);
        }

        let start = Instant::now();
        let output = tokio::time::timeout(options.timeout, cmd.output())
            .await
            .map_err(|_| RunnerError::DeadlineExceeded)?
            .map_err(|e| RunnerError::Transport(e.to_string()))?;
        let wall_time = start.elapsed();

        Ok(CommandResult {
            exit_code: output.status.code().unwrap_or(-1),
            error_message: None,
            system_time: Duration::ZERO,
            user_time: Duration::ZERO,
            wall_time,
        })
    }

    async fn stop(&self, _namespace: &str) -> Result<(), RunnerError> {
        Ok(())
    }

    fn resolve(&self, namespace: &str, container_path: &str) -> PathBuf {
        let dir = self.namespace_dir(namespace);
        let stripped =
            container_path.strip_prefix("/compile/").or_else(|| container_path.strip_prefix("/output/"));
        match stripped {
            Some(rel) => dir.join(rel),
            None => Path::new(container_path).to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn setup_creates_namespace_dir_and_reports_long_lease() {
        let dir = tempdir().unwrap();
        let runner = LocalRunner::new(dir.path());
        let lease = runner.setup("ns-1", "texlive:2024").await.unwrap();
        assert!(dir.path().join("ns-1").exists());
        assert!(lease.valid_until > Instant::now() + Duration::from_secs(60 * 60));
        assert_eq!(lease.container_event, ContainerEvent::Unchanged);
    }

    #[tokio::test]
    async fn run_executes_argv_in_namespace_dir() {
        let dir = tempdir().unwrap();
        let runner = LocalRunner::new(dir.path());
        runner.setup("ns-1", "texlive:2024").await.unwrap();
        let options = CommandOptions::new(
            vec!["sh".into(), "-c".into(), "pwd".into()],
            "local",
            Duration::from_secs(5),
        );
        let result = runner.run("ns-1", &options).await.unwrap();
        assert_eq!(result.exit_code, 0);
    }

    #[test]
    fn resolve_strips_container_prefixes() {
        let runner = LocalRunner::new("/base");
        assert_eq!(runner.resolve("ns-1", "/compile/main.tex"), PathBuf::from("/base/ns-1/main.tex"));
        assert_eq!(runner.resolve("ns-1", "/output/output.pdf"), PathBuf::from("/base/ns-1/output.pdf"));
    }
}
