// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy shared across the compile service (spec §7).

use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClsiError>;

/// Structural error kinds. Each carries an optional message; `InvalidState`
/// additionally carries whether the upper layer may recover by retrying.
#[derive(Debug, Error, Clone)]
pub enum ClsiError {
    #[error("validation: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid state: {message}")]
    InvalidState { message: String, recoverable: bool },

    #[error("already compiling")]
    AlreadyCompiling,

    #[error("compiler unavailable: {0}")]
    CompilerUnavailable(String),

    #[error("missing output file: {0}")]
    MissingOutputFile(String),

    #[error("project is dead")]
    Dead,

    #[error("operation canceled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("transport error: {0}")]
    Transport(String),
}

impl ClsiError {
    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::InvalidState { message: message.into(), recoverable: true }
    }

    pub fn too_many_files() -> Self {
        Self::InvalidState { message: "too many files and directories".into(), recoverable: true }
    }

    pub fn sync_state_mismatch() -> Self {
        Self::InvalidState { message: "sync state mismatch".into(), recoverable: true }
    }

    /// Whether the Project Manager should retry this operation against a
    /// freshly-created Project instance (spec §4.2, §7).
    pub fn is_dead(&self) -> bool {
        matches!(self, Self::Dead)
    }

    pub fn is_recoverable_invalid_state(&self) -> bool {
        matches!(self, Self::InvalidState { recoverable: true, .. })
    }
}
