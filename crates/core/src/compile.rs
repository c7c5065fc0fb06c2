// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Compile request/response shapes (spec §3, §6). The HTTP JSON codec is out
//! of scope for this crate; these are the Rust-native types the core
//! produces and consumes directly.

use crate::output::OutputFile;
use crate::resource::Resource;
use crate::sync_state::{SyncState, SyncType};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compiler {
    Pdflatex,
    Latex,
    Lualatex,
    Xelatex,
}

impl Compiler {
    /// The `latexmk` flag selecting this engine.
    pub fn flag(&self) -> &'static str {
        match self {
            Self::Pdflatex => "-pdf",
            Self::Latex => "-latex",
            Self::Lualatex => "-lualatex",
            Self::Xelatex => "-xelatex",
        }
    }
}

/// Validation strictness for the compile (spec §4.1 step, §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Check {
    #[default]
    Normal,
    Validate,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileOptions {
    #[serde(default)]
    pub check: Check,
    pub compiler: Compiler,
    pub compile_group: String,
    #[serde(default)]
    pub draft: bool,
    pub image_name: String,
    pub root_resource_path: String,
    pub sync_state: SyncState,
    #[serde(skip)]
    pub sync_type: SyncType,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct CompileRequest {
    pub resources: Vec<Resource>,
    pub options: CompileOptions,
}

impl CompileRequest {
    pub fn root_doc(&self) -> Option<&Resource> {
        self.resources.iter().find(|r| r.path == self.options.root_resource_path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CompileStatus {
    Success,
    Failure,
    Timedout,
    Terminated,
    ValidationPass,
    ValidationFail,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Timings {
    pub fetch_content: Option<Duration>,
    pub sync: Option<Duration>,
    pub compile: Option<Duration>,
    pub output: Option<Duration>,
    pub compile_e2e: Option<Duration>,
    pub pdf_caching: Option<Duration>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompileResponse {
    pub status: CompileStatus,
    pub error: Option<String>,
    pub output_files: Vec<OutputFile>,
    pub timings: Timings,
}

impl CompileResponse {
    pub fn success(output_files: Vec<OutputFile>, timings: Timings) -> Self {
        Self { status: CompileStatus::Success, error: None, output_files, timings }
    }

    pub fn failure(error: impl Into<String>, output_files: Vec<OutputFile>, timings: Timings) -> Self {
        Self { status: CompileStatus::Failure, error: Some(error.into()), output_files, timings }
    }
}
