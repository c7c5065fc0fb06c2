// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CommandOptions / CommandResult: the contract between a driver (LaTeX,
//! SyncTeX, WordCount) and the Command Runner (spec §3, §4.3).

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Placeholder tokens the Runner resolves to container-internal paths.
pub const COMPILE_DIR_TOKEN: &str = "$COMPILE_DIR";
pub const OUTPUT_DIR_TOKEN: &str = "$OUTPUT_DIR";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CommandOutputFiles {
    pub std_out: String,
    pub std_err: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOptions {
    pub argv: Vec<String>,
    pub env: Vec<(String, String)>,
    pub timeout: Duration,
    pub image_name: String,
    pub output_files: CommandOutputFiles,
}

impl CommandOptions {
    pub fn new(argv: Vec<String>, image_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            argv,
            env: Vec::new(),
            timeout,
            image_name: image_name.into(),
            output_files: CommandOutputFiles {
                std_out: "output.stdout.tmp".into(),
                std_err: "output.stderr.tmp".into(),
            },
        }
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Override the scratch filenames the agent writes stdout/stderr into.
    /// Non-compile commands (SyncTeX, WordCount) use distinct names from the
    /// compile command's so concurrent commands on the same namespace never
    /// clobber each other's output file.
    pub fn with_output_files(mut self, std_out: impl Into<String>, std_err: impl Into<String>) -> Self {
        self.output_files = CommandOutputFiles { std_out: std_out.into(), std_err: std_err.into() };
        self
    }
}

/// Result of running one command inside the sandbox, as decoded from the
/// agent's JSON response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub exit_code: i32,
    pub error_message: Option<String>,
    pub system_time: Duration,
    pub user_time: Duration,
    pub wall_time: Duration,
}

impl CommandResult {
    pub fn is_timed_out(&self) -> bool {
        self.error_message.as_deref() == Some("timedout")
    }

    pub fn is_cancelled(&self) -> bool {
        self.error_message.as_deref() == Some("cancelled")
    }
}
