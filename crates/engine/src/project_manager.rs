// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Project Manager: the registry owning every tenant's `Project` (spec
//! §4.1). Responsible for get-or-create with dead-project replacement,
//! sampled idle-cleanup and runner-expiry sweeps, and the cached health
//! check — the Project itself knows nothing about the registry around it.

use crate::project::{Project, SubManagers};
use clsi_core::error::{ClsiError, Result};
use clsi_core::namespace::Namespace;
use parking_lot::RwLock;
use rand::seq::SliceRandom;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Minimal compile fixture used by the health check (spec §5): a document
/// with no external dependencies, expected to produce exactly a PDF and a
/// log file on any correctly configured image.
const HEALTH_CHECK_DOC: &str = "\\documentclass{article}\\begin{document}Hello world\\end{document}";
/// A reserved sentinel namespace, never assigned to a real tenant, so the
/// health check's ephemeral project can never collide with one.
const HEALTH_CHECK_NAMESPACE_PROJECT: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";
const HEALTH_CHECK_NAMESPACE_USER: &str = "ffffffff-ffff-ffff-ffff-ffffffffffff";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthCheckResult {
    Healthy,
    Unhealthy,
}

pub struct ProjectManagerConfig {
    /// Idle threshold after which `cleanup_old_projects` tears a Project down.
    pub project_cache_duration: Duration,
    /// Lease age threshold after which `stop_expired_runners` stops the
    /// container but keeps the Project's content.
    pub project_runner_max_age: Duration,
    /// How long a cached health check result is reused before refreshing.
    pub health_check_refresh_every: Duration,
    /// Image used to run the health check's fixed document.
    pub health_check_image_name: String,
    pub health_check_timeout: Duration,
}

struct HealthCheckCache {
    checked_at: Instant,
    result: HealthCheckResult,
}

pub struct ProjectManager {
    projects: RwLock<HashMap<String, Arc<Project>>>,
    subs: Arc<SubManagers>,
    config: ProjectManagerConfig,
    health_cache: parking_lot::Mutex<Option<HealthCheckCache>>,
}

impl ProjectManager {
    pub fn new(subs: Arc<SubManagers>, config: ProjectManagerConfig) -> Self {
        Self { projects: RwLock::new(HashMap::new()), subs, config, health_cache: parking_lot::Mutex::new(None) }
    }

    /// `Get` (spec §4.1): returns the live Project for `namespace`, creating
    /// one if absent and transparently replacing one found dead. Stamps
    /// `lastAccess` on every call.
    pub async fn get(&self, namespace: &Namespace) -> Result<Arc<Project>> {
        loop {
            {
                let projects = self.projects.read();
                if let Some(project) = projects.get(namespace.as_str()) {
                    if !project.is_dead() {
                        project.touch();
                        return Ok(Arc::clone(project));
                    }
                }
            }

            // Either absent or dead: clean up the dead one outside any lock
            // (cleanup awaits), then race other concurrent creators for the
            // write lock.
            let dead = self.projects.read().get(namespace.as_str()).cloned();
            if let Some(dead_project) = &dead {
                dead_project.cleanup().await?;
            }

            {
                let mut projects = self.projects.write();
                match projects.get(namespace.as_str()) {
                    // Another concurrent creator already won the race and
                    // inserted a live replacement.
                    Some(existing) if !existing.is_dead() => {
                        let existing = Arc::clone(existing);
                        drop(projects);
                        existing.touch();
                        return Ok(existing);
                    }
                    // Someone else replaced it with a different dead instance
                    // since we checked; loop and retry against the new one.
                    Some(existing) if dead.as_ref().map(|d| !Arc::ptr_eq(d, existing)).unwrap_or(false) => continue,
                    _ => {
                        let fresh = Arc::new(Project::new(namespace.clone(), Arc::clone(&self.subs)));
                        fresh.touch();
                        projects.insert(namespace.as_str().to_string(), Arc::clone(&fresh));
                        return Ok(fresh);
                    }
                }
            }
        }
    }

    /// `operateOnProjectWithRecovery` (spec §7 "Project: detects dead errors
    /// internally and retries the operation up to three times with a fresh
    /// Project instance"): looks up `namespace`'s Project and runs `op`
    /// against it, retrying against a freshly-fetched Project whenever `op`
    /// reports `ClsiError::Dead` (the Project was marked dead by a
    /// concurrent cleanup between `get` and `op` running). Any other error,
    /// or a `Dead` on the final attempt, is returned to the caller.
    pub async fn operate_with_recovery<T, F, Fut>(&self, namespace: &Namespace, mut op: F) -> Result<T>
    where
        F: FnMut(Arc<Project>) -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        const MAX_ATTEMPTS: u32 = 3;
        let mut last_err = ClsiError::Dead;
        for _ in 0..MAX_ATTEMPTS {
            let project = self.get(namespace).await?;
            match op(project).await {
                Ok(value) => return Ok(value),
                Err(ClsiError::Dead) => {
                    last_err = ClsiError::Dead;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err)
    }

    /// `ClearProjectCache` (spec §4.1): resets a single project's working
    /// tree without marking it dead. A no-op if the project was never seen.
    /// `clear_cache` only marks the project dead when it cannot recreate the
    /// working directory; when that happens, remove it from the map here
    /// rather than waiting for the next cleanup tick to notice.
    pub async fn clear_project_cache(&self, namespace: &Namespace) -> Result<()> {
        let project = self.projects.read().get(namespace.as_str()).cloned();
        match project {
            Some(project) => {
                let result = project.clear_cache().await;
                self.remove_if_dead(namespace.as_str(), &project);
                result
            }
            None => Ok(()),
        }
    }

    /// `CleanupProject` (spec §4.1): tears a single project down and marks
    /// it dead, then removes it from the map so the next `Get` replaces it
    /// immediately instead of waiting for a cleanup tick to sample it.
    pub async fn cleanup_project(&self, namespace: &Namespace) -> Result<()> {
        let project = self.projects.read().get(namespace.as_str()).cloned();
        match project {
            Some(project) => {
                let result = project.cleanup().await;
                self.remove_if_dead(namespace.as_str(), &project);
                result
            }
            None => Ok(()),
        }
    }

    /// Remove `namespace`'s map entry if it is still dead and still the
    /// exact instance the caller just tore down (spec §4.1: "remove from
    /// map only if the Project is still dead and still the same instance
    /// (pointer identity)") — a concurrent `Get` may already have replaced it
    /// with a fresh, live instance, which must be left alone.
    fn remove_if_dead(&self, namespace: &str, project: &Arc<Project>) {
        if !project.is_dead() {
            return;
        }
        let mut projects = self.projects.write();
        if let Some(current) = projects.get(namespace) {
            if Arc::ptr_eq(current, project) {
                projects.remove(namespace);
            }
        }
    }

    /// Drop dead entries from the map itself, separate from tearing down
    /// their on-disk state (which `cleanup` already did). Keeps the map from
    /// growing unbounded with tombstones.
    fn evict_dead(&self) {
        self.projects.write().retain(|_, project| !project.is_dead());
    }

    /// `CleanupOldProjects` (spec §2, §4.1): samples roughly a tenth of the
    /// live projects each tick and cleans up ones idle since before now minus
    /// `project_cache_duration`.
    pub async fn cleanup_old_projects(&self) -> Result<()> {
        let threshold = Instant::now() - self.config.project_cache_duration;
        let sample = self.sample_projects();
        for project in sample {
            project.cleanup_unless_healthy(threshold).await?;
        }
        self.evict_dead();
        Ok(())
    }

    /// `StopExpiredRunners` (spec §2, §4.1): same sampling, but only tears
    /// down the runner container, leaving content and cache intact.
    pub async fn stop_expired_runners(&self) -> Result<()> {
        let threshold = Instant::now() - self.config.project_runner_max_age;
        let sample = self.sample_projects();
        for project in sample {
            project.stop_expired_runner(threshold).await?;
        }
        Ok(())
    }

    /// Snapshot the live projects and shuffle-sample ~10% of them (minimum
    /// one, when any exist), per spec §2's randomized-scan cleanup cadence.
    fn sample_projects(&self) -> Vec<Arc<Project>> {
        let all: Vec<Arc<Project>> = self.projects.read().values().cloned().collect();
        if all.is_empty() {
            return Vec::new();
        }
        let mut indices: Vec<usize> = (0..all.len()).collect();
        indices.shuffle(&mut rand::thread_rng());
        let sample_size = ((all.len() + 9) / 10).max(1);
        indices.truncate(sample_size);
        indices.into_iter().map(|i| Arc::clone(&all[i])).collect()
    }

    /// `HealthCheck` (spec §5): compiles a fixed document on an ephemeral,
    /// never-registered Project and caches the outcome for
    /// `health_check_refresh_every`. A canceled attempt is never cached.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        if let Some(cached) = self.health_cache.lock().as_ref() {
            if cached.checked_at.elapsed() < self.config.health_check_refresh_every {
                return Ok(cached.result);
            }
        }

        let result = self.run_health_check().await;
        match &result {
            Ok(outcome) => {
                *self.health_cache.lock() = Some(HealthCheckCache { checked_at: Instant::now(), result: *outcome });
            }
            Err(ClsiError::Cancelled) => {
                // Transient; leave any existing cache entry untouched.
            }
            Err(e) => {
                warn!(error = %e, "health check attempt failed");
                *self.health_cache.lock() =
                    Some(HealthCheckCache { checked_at: Instant::now(), result: HealthCheckResult::Unhealthy });
            }
        }
        result.or(Ok(HealthCheckResult::Unhealthy))
    }

    async fn run_health_check(&self) -> Result<HealthCheckResult> {
        use clsi_core::compile::{Check, CompileOptions, CompileRequest, Compiler};
        use clsi_core::resource::Resource;
        use clsi_core::sync_state::{SyncState, SyncType};

        let namespace = Namespace::new(HEALTH_CHECK_NAMESPACE_PROJECT, HEALTH_CHECK_NAMESPACE_USER);
        let ephemeral = Project::new(namespace, Arc::clone(&self.subs));

        let request = CompileRequest {
            resources: vec![Resource::doc("main.tex", HEALTH_CHECK_DOC, 1)],
            options: CompileOptions {
                check: Check::Normal,
                compiler: Compiler::Pdflatex,
                compile_group: "health-check".into(),
                draft: false,
                image_name: self.config.health_check_image_name.clone(),
                root_resource_path: "main.tex".into(),
                sync_state: SyncState::from("health-check"),
                sync_type: SyncType::FullIncremental,
                timeout: self.config.health_check_timeout,
            },
        };

        let outcome = ephemeral.compile(request).await;
        // Always tear down the ephemeral working tree and container,
        // regardless of the compile's outcome.
        if let Err(e) = ephemeral.cleanup().await {
            warn!(error = %e, "health check cleanup failed");
        }

        let response = outcome?;
        let has_pdf = response.output_files.iter().any(|f| f.path == "output.pdf");
        let has_log = response.output_files.iter().any(|f| f.path == "output.log");
        let healthy = response.status == clsi_core::compile::CompileStatus::Success
            && response.output_files.len() == 2
            && has_pdf
            && has_log;

        if healthy {
            info!("health check compile succeeded");
            Ok(HealthCheckResult::Healthy)
        } else {
            warn!(?response.status, file_count = response.output_files.len(), "health check compile did not meet expectations");
            Ok(HealthCheckResult::Unhealthy)
        }
    }

    #[cfg(test)]
    fn project_count(&self) -> usize {
        self.projects.read().len()
    }
}
