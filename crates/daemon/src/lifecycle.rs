// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Daemon process wiring: constructs the Project Manager and its
//! sub-managers from [`ClsiOptions`], runs the cleanup/health-check
//! tickers, and coordinates graceful shutdown (SPEC_FULL §12).

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clsi_core::compile::CompileRequest;
use clsi_core::compile::CompileResponse;
use clsi_core::error::{ClsiError, Result};
use clsi_core::namespace::Namespace;
use clsi_engine::{Metrics, OutputCache, PdfCache, Project, ProjectManager, ProjectManagerConfig, ResourceWriter, SubManagers, UrlCache};
use clsi_runner::local::LocalRunner;
use clsi_runner::sandbox::{SandboxConfig, SandboxRunner};
use clsi_runner::CommandRunner;
use clsi_storage::ResourceCacheStore;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::ClsiOptions;

/// Live daemon state: the Project Manager plus the gate new work passes
/// through during shutdown.
pub struct Daemon {
    pub project_manager: Arc<ProjectManager>,
    pub subs: Arc<SubManagers>,
    options: ClsiOptions,
    accepting: Arc<AtomicBool>,
    in_flight: Arc<AtomicUsize>,
}

fn build_runner(options: &ClsiOptions) -> Arc<dyn CommandRunner> {
    if options.docker.sandbox_disabled {
        return Arc::new(LocalRunner::new(options.compile_base_dir.clone()));
    }
    Arc::new(SandboxRunner::new(SandboxConfig {
        compile_base_dir: options.compile_base_dir.clone(),
        output_base_dir: options.output_base_dir.clone(),
        agent_binary: options.docker.agent_binary.clone(),
        memory_limit: options.docker.memory_limit.clone(),
        max_lease: options.max_compile_timeout(),
        seccomp_profile: options.docker.seccomp_profile.clone(),
    }))
}

impl Daemon {
    /// Build the full Project Manager + sub-manager graph from validated
    /// configuration. Pure construction: no I/O beyond creating the cache
    /// directories the sub-managers need to exist.
    pub fn bootstrap(options: ClsiOptions) -> Result<Self> {
        std::fs::create_dir_all(&options.cache_base_dir)
            .map_err(|e| ClsiError::Validation(format!("cache_base_dir: {e}")))?;
        std::fs::create_dir_all(&options.compile_base_dir)
            .map_err(|e| ClsiError::Validation(format!("compile_base_dir: {e}")))?;
        std::fs::create_dir_all(&options.output_base_dir)
            .map_err(|e| ClsiError::Validation(format!("output_base_dir: {e}")))?;

        let url_cache = Arc::new(UrlCache::new(
            options.cache_base_dir.join("urls"),
            options.url_download_retries,
            options.url_download_timeout(),
        ));
        let cache_store = ResourceCacheStore::new(options.cache_base_dir.clone());
        let resource_writer = Arc::new(ResourceWriter::new(
            options.compile_base_dir.clone(),
            cache_store,
            Arc::clone(&url_cache),
            options.max_files_and_dirs_per_project,
            options.parallel_resource_write,
        ));
        let output_cache = Arc::new(OutputCache::new(
            options.output_base_dir.clone(),
            options.max_files_and_dirs_per_project,
            options.parallel_output_write,
        ));
        let pdf_cache = Arc::new(PdfCache::new(options.cache_base_dir.join("pdfs")));
        let metrics = Arc::new(Metrics::new());
        let runner = build_runner(&options);
        let allowed_images = options.allowed_images.iter().cloned().collect();

        let subs =
            Arc::new(SubManagers { resource_writer, output_cache, pdf_cache, runner, metrics, allowed_images });

        let manager_config = ProjectManagerConfig {
            project_cache_duration: options.project_cache_duration(),
            project_runner_max_age: options.project_runner_max_age(),
            health_check_refresh_every: options.health_check_refresh_every(),
            health_check_image_name: options.allowed_images[0].clone(),
            health_check_timeout: options.max_compile_timeout(),
        };

        let project_manager = Arc::new(ProjectManager::new(Arc::clone(&subs), manager_config));

        Ok(Self {
            project_manager,
            subs,
            options,
            accepting: Arc::new(AtomicBool::new(true)),
            in_flight: Arc::new(AtomicUsize::new(0)),
        })
    }

    /// `Get` plus the shutdown gate (SPEC_FULL §12): rejected once the
    /// daemon has stopped accepting new work.
    pub async fn get_project(&self, namespace: &Namespace) -> Result<Arc<Project>> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ClsiError::Cancelled);
        }
        self.project_manager.get(namespace).await
    }

    /// Facade used by the (out-of-scope) HTTP controller: looks up the
    /// project, tracks it as in-flight for the drain timeout, and compiles.
    /// Drives the Manager's `operateOnProjectWithRecovery` loop (spec §7/§8)
    /// so a `Dead` project encountered mid-flight is retried against a
    /// freshly-fetched instance rather than surfaced to the caller.
    pub async fn compile(&self, namespace: &Namespace, request: CompileRequest) -> Result<CompileResponse> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(ClsiError::Cancelled);
        }
        self.in_flight.fetch_add(1, Ordering::AcqRel);
        let result = self
            .project_manager
            .operate_with_recovery(namespace, |project| {
                let request = request.clone();
                async move { project.compile(request).await }
            })
            .await;
        self.in_flight.fetch_sub(1, Ordering::AcqRel);
        result
    }

    /// Spawn the periodic cleanup and health-check tickers. Returns their
    /// join handles so the caller can abort them on shutdown.
    pub fn spawn_background_tasks(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        let cleanup_interval = self
            .options
            .project_cache_duration()
            .min(self.options.project_runner_max_age())
            / 10;

        let cleanup_daemon = Arc::clone(self);
        let cleanup_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cleanup_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = cleanup_daemon.project_manager.cleanup_old_projects().await {
                    warn!(error = %e, "cleanup_old_projects tick failed");
                }
                if let Err(e) = cleanup_daemon.project_manager.stop_expired_runners().await {
                    warn!(error = %e, "stop_expired_runners tick failed");
                }
            }
        });

        let health_daemon = Arc::clone(self);
        let health_interval = self.options.health_check_refresh_every();
        let health_task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(health_interval.max(Duration::from_millis(1)));
            loop {
                ticker.tick().await;
                if let Err(e) = health_daemon.project_manager.health_check().await {
                    warn!(error = %e, "periodic health check failed");
                }
            }
        });

        vec![cleanup_task, health_task]
    }

    /// Stop accepting new compiles, wait up to `drain_timeout` for the
    /// in-flight ones to finish, then return. Live containers are left in
    /// place; a future startup reuses them via the process-epoch check
    /// (spec §4.3.1 step 2, §9) rather than force-removing them here.
    pub async fn shutdown(&self, drain_timeout: Duration) {
        info!("daemon shutting down, no longer accepting new compiles");
        self.accepting.store(false, Ordering::Release);

        let deadline = tokio::time::Instant::now() + drain_timeout;
        while self.in_flight.load(Ordering::Acquire) > 0 {
            if tokio::time::Instant::now() >= deadline {
                warn!(
                    remaining = self.in_flight.load(Ordering::Acquire),
                    "drain timeout elapsed with compiles still in flight"
                );
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        info!("daemon shutdown complete");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_options(base: &std::path::Path) -> ClsiOptions {
        let json = serde_json::json!({
            "allowed_images": ["texlive:2024"],
            "cache_base_dir": base.join("cache"),
            "compile_base_dir": base.join("compile"),
            "output_base_dir": base.join("output"),
            "parallel_output_write": 2,
            "parallel_resource_write": 2,
            "max_files_and_dirs_per_project": 100,
            "url_download_retries": 1,
            "url_download_timeout_ns": 1_000_000_000u64,
            "project_cache_duration_ns": 1_000_000_000u64,
            "project_runner_max_age_ns": 1_000_000_000u64,
            "health_check_refresh_every_ns": 1_000_000_000u64,
            "docker": {
                "agent_binary": base.join("agent"),
                "max_compile_timeout_ns": 500_000_000u64,
                "sandbox_disabled": true,
            },
        });
        ClsiOptions::parse(&json.to_string()).unwrap()
    }

    fn ns() -> Namespace {
        Namespace::new("11111111-1111-1111-1111-111111111111", "22222222-2222-2222-2222-222222222222")
    }

    #[tokio::test]
    async fn bootstrap_builds_a_working_project_manager() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::bootstrap(sample_options(dir.path())).unwrap();
        let namespace = ns();
        let project = daemon.get_project(&namespace).await.unwrap();
        assert_eq!(project.namespace(), &namespace);
    }

    #[tokio::test]
    async fn shutdown_stops_accepting_new_work() {
        let dir = tempfile::tempdir().unwrap();
        let daemon = Daemon::bootstrap(sample_options(dir.path())).unwrap();
        daemon.shutdown(Duration::from_millis(10)).await;
        let err = daemon.get_project(&ns()).await.unwrap_err();
        assert!(matches!(err, ClsiError::Cancelled));
    }
}
