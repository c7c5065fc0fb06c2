// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Sandboxed Command Runner variant: one Docker container per namespace,
//! named `project-<namespace>` (spec §4.3.1).

use crate::error::RunnerError;
use crate::protocol::{probe, run_over_socket};
use crate::{CommandRunner, ContainerEvent, RunnerLease};
use async_trait::async_trait;
use clsi_core::command::{CommandOptions, CommandResult};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};
use tokio::process::Command;
use tokio::time::sleep;

const CREATE_RETRY_BACKOFFS_MS: [u64; 3] = [100, 200, 300];
const PROBE_BACKOFFS_MS: [u64; 5] = [0, 100, 200, 300, 400];
const LABEL_PROCESS_EPOCH: &str = "clsi.process_epoch";

fn process_epoch() -> u64 {
    static EPOCH: OnceLock<u64> = OnceLock::new();
    *EPOCH.get_or_init(|| {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
    })
}

/// Container resource limits and image allow-list enforced on every setup.
#[derive(Debug, Clone)]
pub struct SandboxConfig {
    pub compile_base_dir: PathBuf,
    pub output_base_dir: PathBuf,
    pub agent_binary: PathBuf,
    pub memory_limit: String,
    pub max_lease: Duration,
    pub seccomp_profile: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct SandboxRunner {
    config: SandboxConfig,
}

impl SandboxRunner {
    pub fn new(config: SandboxConfig) -> Self {
        Self { config }
    }

    fn container_name(namespace: &str) -> String {
        format!("project-{namespace}")
    }

    fn socket_path(&self, namespace: &str) -> PathBuf {
        self.config.compile_base_dir.join(namespace).join(".agent-socket")
    }

    /// Extract the TeX Live year from an image name like `texlive:2024` so
    /// PATH can be constructed to match the installed toolchain.
    fn texlive_year(image_name: &str) -> Option<&str> {
        image_name.rsplit_once(':').map(|(_, tag)| tag)
    }

    async fn docker(args: &[&str]) -> Result<String, RunnerError> {
        let output = Command::new("docker")
            .args(args)
            .output()
            .await
            .map_err(|e| RunnerError::Transport(format!("exec docker: {e}")))?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr);
            Err(RunnerError::Transport(format!(
                "docker {} failed: {}",
                args.first().unwrap_or(&""),
                stderr.trim()
            )))
        }
    }

    async fn inspect_label(name: &str, label: &str) -> Option<String> {
        let format = format!("{{{{ index .Config.Labels \"{label}\" }}}}");
        Self::docker(&["inspect", "--format", &format, name]).await.ok()
    }

    async fn container_running(name: &str) -> bool {
        matches!(
            Self::docker(&["inspect", "--format", "{{.State.Running}}", name]).await.as_deref(),
            Ok("true")
        )
    }

    async fn create_container(&self, namespace: &str, image_name: &str) -> Result<(), RunnerError> {
        let name = Self::container_name(namespace);
        let compile_dir = self.config.compile_base_dir.join(namespace);
        let output_dir = self.config.output_base_dir.join(namespace);
        std::fs::create_dir_all(&compile_dir).map_err(|e| RunnerError::SetupFailed(e.to_string()))?;
        std::fs::create_dir_all(&output_dir).map_err(|e| RunnerError::SetupFailed(e.to_string()))?;

        let compile_mount = format!("{}:/compile:rw", compile_dir.display());
        let output_mount = format!("{}:/output:ro", output_dir.display());
        let agent_mount = format!("{}:/agent:ro", self.config.agent_binary.display());
        let epoch_label = format!("{}={}", LABEL_PROCESS_EPOCH, process_epoch());
        let cpu_ulimit = format!("cpu={}", self.config.max_lease.as_secs());
        let mut path = "/usr/bin:/bin".to_string();
        if let Some(year) = Self::texlive_year(image_name) {
            path = format!("/usr/local/texlive/{year}/bin/x86_64-linux:{path}");
        }
        let path_env = format!("PATH={path}");

        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            name,
            "--network".into(),
            "none".into(),
            "--cap-drop".into(),
            "ALL".into(),
            "--security-opt".into(),
            "no-new-privileges".into(),
            "--memory".into(),
            self.config.memory_limit.clone(),
            "--ulimit".into(),
            cpu_ulimit,
            "--label".into(),
            epoch_label,
            "-v".into(),
            compile_mount,
            "-v".into(),
            output_mount,
            "-v".into(),
            agent_mount,
            "-e".into(),
            path_env,
        ];
        if let Some(profile) = &self.config.seccomp_profile {
            args.push("--security-opt".into());
            args.push(format!("seccomp={}", profile.display()));
        }
        args.push(image_name.to_string());

        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        Self::docker(&arg_refs).await?;
        Ok(())
    }

    async fn remove_container(name: &str) -> Result<(), RunnerError> {
        match Self::docker(&["rm", "-f", name]).await {
            Ok(_) => Ok(()),
            Err(RunnerError::Transport(msg)) if msg.contains("No such container") => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn ensure_container(&self, namespace: &str, image_name: &str) -> Result<ContainerEvent, RunnerError> {
        let name = Self::container_name(namespace);
        let create_result = self.create_container(namespace, image_name).await;

        match create_result {
            Ok(()) => return Ok(ContainerEvent::Created),
            Err(e) => {
                let message = e.to_string();
                if !message.contains("Conflict") && !message.contains("already in use") {
                    return Err(e);
                }
            }
        }

        // Container already exists: decide restart vs. force-remove based on
        // the boot epoch recorded at creation time (spec §4.3.1 step 2, §9).
        let existing_epoch = Self::inspect_label(&name, LABEL_PROCESS_EPOCH).await;
        let our_epoch = process_epoch().to_string();

        if existing_epoch.as_deref() == Some(our_epoch.as_str()) {
            if Self::container_running(&name).await {
                return Ok(ContainerEvent::Unchanged);
            }
            if Self::docker(&["restart", &name]).await.is_ok() {
                return Ok(ContainerEvent::Restarted);
            }
            // Died in the interim: fall through to force-remove + recreate.
        }

        for backoff_ms in CREATE_RETRY_BACKOFFS_MS {
            Self::remove_container(&name).await?;
            match self.create_container(namespace, image_name).await {
                Ok(()) => return Ok(ContainerEvent::Created),
                Err(_) => sleep(Duration::from_millis(backoff_ms)).await,
            }
        }

        Err(RunnerError::SetupFailed(format!("could not create container {name} after retries")))
    }

    async fn probe_with_backoff(&self, namespace: &str) -> Result<(), RunnerError> {
        let socket = self.socket_path(namespace);
        let mut last_err = None;
        for backoff_ms in PROBE_BACKOFFS_MS {
            if backoff_ms > 0 {
                sleep(Duration::from_millis(backoff_ms)).await;
            }
            match probe(&socket).await {
                Ok(()) => return Ok(()),
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or(RunnerError::SetupFailed("probe exhausted retries".into())))
    }
}

#[async_trait]
impl CommandRunner for SandboxRunner {
    async fn setup(&self, namespace: &str, image_name: &str) -> Result<RunnerLease, RunnerError> {
        let container_event = self.ensure_container(namespace, image_name).await?;
        self.probe_with_backoff(namespace).await?;
        Ok(RunnerLease { valid_until: Instant::now() + self.config.max_lease, container_event })
    }

    async fn run(&self, namespace: &str, options: &CommandOptions) -> Result<CommandResult, RunnerError> {
        let socket = self.socket_path(namespace);
        let result = run_over_socket(&socket, options).await;
        if let Err(RunnerError::Transport(_)) = &result {
            // Transport failure: remove the container so the next Run recreates
            // it clean (spec §4.3.1 "Run").
            let _ = Self::remove_container(&Self::container_name(namespace)).await;
        }
        result
    }

    async fn stop(&self, namespace: &str) -> Result<(), RunnerError> {
        Self::remove_container(&Self::container_name(namespace)).await
    }

    fn resolve(&self, namespace: &str, container_path: &str) -> PathBuf {
        let compile_dir = self.config.compile_base_dir.join(namespace);
        let output_dir = self.config.output_base_dir.join(namespace);
        if let Some(rel) = container_path.strip_prefix("/compile/") {
            return compile_dir.join(rel);
        }
        if let Some(rel) = container_path.strip_prefix("/output/") {
            return output_dir.join(rel);
        }
        Path::new(container_path).to_path_buf()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texlive_year_extracted_from_image_tag() {
        assert_eq!(SandboxRunner::texlive_year("texlive:2024"), Some("2024"));
        assert_eq!(SandboxRunner::texlive_year("texlive"), None);
    }

    #[test]
    fn container_name_is_namespaced() {
        assert_eq!(SandboxRunner::container_name("proj-user"), "project-proj-user");
    }

    #[test]
    fn resolve_maps_compile_and_output_prefixes() {
        let runner = SandboxRunner::new(SandboxConfig {
            compile_base_dir: "/compile-base".into(),
            output_base_dir: "/output-base".into(),
            agent_binary: "/agent".into(),
            memory_limit: "1g".into(),
            max_lease: Duration::from_secs(300),
            seccomp_profile: None,
        });
        assert_eq!(
            runner.resolve("ns-1", "/compile/main.tex"),
            PathBuf::from("/compile-base/ns-1/main.tex")
        );
        assert_eq!(
            runner.resolve("ns-1", "/output/output.pdf"),
            PathBuf::from("/output-base/ns-1/output.pdf")
        );
    }
}
