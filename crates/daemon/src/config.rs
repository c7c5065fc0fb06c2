// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! `CLSI_OPTIONS` parsing and validation (spec §6 "Environment"). Parsed
//! once at startup into a [`ClsiOptions`] struct; a manual validation pass
//! returns `ClsiError::Validation` on the first failing field.

use std::path::PathBuf;
use std::time::Duration;

use clsi_core::error::{ClsiError, Result};
use serde::{Deserialize, Serialize};

/// Raw container resource limits, mirrored from `clsi_runner::sandbox::SandboxConfig`
/// (spec §4.3.1) so they can round-trip through JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DockerOptions {
    pub agent_binary: PathBuf,
    #[serde(default = "default_memory_limit")]
    pub memory_limit: String,
    pub max_compile_timeout_ns: u64,
    #[serde(default)]
    pub seccomp_profile: Option<PathBuf>,
    /// Use the in-process `LocalRunner` instead of Docker. Development/test
    /// only (spec §4.3.2); never set in production deployments.
    #[serde(default)]
    pub sandbox_disabled: bool,
}

fn default_memory_limit() -> String {
    "1g".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClsiOptions {
    pub allowed_images: Vec<String>,
    pub cache_base_dir: PathBuf,
    pub compile_base_dir: PathBuf,
    pub output_base_dir: PathBuf,
    pub parallel_output_write: usize,
    pub parallel_resource_write: usize,
    pub max_files_and_dirs_per_project: usize,
    pub url_download_retries: u32,
    pub url_download_timeout_ns: u64,
    pub project_cache_duration_ns: u64,
    pub project_runner_max_age_ns: u64,
    pub health_check_refresh_every_ns: u64,
    pub docker: DockerOptions,
}

impl ClsiOptions {
    /// Parse and validate the `CLSI_OPTIONS` environment variable.
    pub fn load() -> Result<Self> {
        let raw = crate::env::clsi_options_json()
            .ok_or_else(|| ClsiError::Validation("CLSI_OPTIONS is not set".into()))?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let options: Self = serde_json::from_str(raw)
            .map_err(|e| ClsiError::Validation(format!("CLSI_OPTIONS: {e}")))?;
        options.validate()?;
        Ok(options)
    }

    fn validate(&self) -> Result<()> {
        if self.allowed_images.is_empty() {
            return Err(ClsiError::Validation("allowed_images must not be empty".into()));
        }
        if self.cache_base_dir.as_os_str().is_empty() {
            return Err(ClsiError::Validation("cache_base_dir must not be empty".into()));
        }
        if self.compile_base_dir.as_os_str().is_empty() {
            return Err(ClsiError::Validation("compile_base_dir must not be empty".into()));
        }
        if self.output_base_dir.as_os_str().is_empty() {
            return Err(ClsiError::Validation("output_base_dir must not be empty".into()));
        }
        if self.parallel_output_write == 0 {
            return Err(ClsiError::Validation("parallel_output_write must be > 0".into()));
        }
        if self.parallel_resource_write == 0 {
            return Err(ClsiError::Validation("parallel_resource_write must be > 0".into()));
        }
        if self.max_files_and_dirs_per_project == 0 {
            return Err(ClsiError::Validation("max_files_and_dirs_per_project must be > 0".into()));
        }
        if self.url_download_timeout_ns == 0 {
            return Err(ClsiError::Validation("url_download_timeout_ns must be >= 1".into()));
        }
        if self.health_check_refresh_every_ns == 0 {
            return Err(ClsiError::Validation("health_check_refresh_every_ns must be >= 1".into()));
        }
        if self.docker.max_compile_timeout_ns == 0 {
            return Err(ClsiError::Validation("docker.max_compile_timeout_ns must be >= 1".into()));
        }
        if self.project_cache_duration_ns < self.docker.max_compile_timeout_ns {
            return Err(ClsiError::Validation(
                "project_cache_duration_ns must be >= docker.max_compile_timeout_ns".into(),
            ));
        }
        if self.project_runner_max_age_ns < self.docker.max_compile_timeout_ns {
            return Err(ClsiError::Validation(
                "project_runner_max_age_ns must be >= docker.max_compile_timeout_ns".into(),
            ));
        }
        Ok(())
    }

    pub fn url_download_timeout(&self) -> Duration {
        Duration::from_nanos(self.url_download_timeout_ns)
    }

    pub fn project_cache_duration(&self) -> Duration {
        Duration::from_nanos(self.project_cache_duration_ns)
    }

    pub fn project_runner_max_age(&self) -> Duration {
        Duration::from_nanos(self.project_runner_max_age_ns)
    }

    pub fn health_check_refresh_every(&self) -> Duration {
        Duration::from_nanos(self.health_check_refresh_every_ns)
    }

    pub fn max_compile_timeout(&self) -> Duration {
        Duration::from_nanos(self.docker.max_compile_timeout_ns)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_json() -> serde_json::Value {
        serde_json::json!({
            "allowed_images": ["texlive:2024"],
            "cache_base_dir": "/var/clsi/cache",
            "compile_base_dir": "/var/clsi/compile",
            "output_base_dir": "/var/clsi/output",
            "parallel_output_write": 4,
            "parallel_resource_write": 4,
            "max_files_and_dirs_per_project": 2000,
            "url_download_retries": 3,
            "url_download_timeout_ns": 30_000_000_000u64,
            "project_cache_duration_ns": 3_600_000_000_000u64,
            "project_runner_max_age_ns": 2_700_000_000_000u64,
            "health_check_refresh_every_ns": 30_000_000_000u64,
            "docker": {
                "agent_binary": "/usr/local/bin/clsi-agent",
                "max_compile_timeout_ns": 600_000_000_000u64,
            },
        })
    }

    #[test]
    fn parses_a_well_formed_blob() {
        let options = ClsiOptions::parse(&sample_json().to_string()).unwrap();
        assert_eq!(options.allowed_images, vec!["texlive:2024".to_string()]);
        assert_eq!(options.docker.memory_limit, "1g");
        assert!(!options.docker.sandbox_disabled);
    }

    #[test]
    fn rejects_empty_allowed_images() {
        let mut json = sample_json();
        json["allowed_images"] = serde_json::json!([]);
        let err = ClsiOptions::parse(&json.to_string()).unwrap_err();
        assert!(matches!(err, ClsiError::Validation(_)));
    }

    #[test]
    fn rejects_project_cache_duration_below_max_compile_timeout() {
        let mut json = sample_json();
        json["project_cache_duration_ns"] = serde_json::json!(1);
        let err = ClsiOptions::parse(&json.to_string()).unwrap_err();
        assert!(matches!(err, ClsiError::Validation(_)));
    }

    #[test]
    fn rejects_zero_parallel_writes() {
        let mut json = sample_json();
        json["parallel_output_write"] = serde_json::json!(0);
        let err = ClsiOptions::parse(&json.to_string()).unwrap_err();
        assert!(matches!(err, ClsiError::Validation(_)));
    }
}
