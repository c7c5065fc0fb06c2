// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use thiserror::Error;

#[derive(Debug, Error, Clone)]
pub enum RunnerError {
    #[error("setup failed: {0}")]
    SetupFailed(String),

    #[error("runner setup expired")]
    LeaseExpired,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation canceled")]
    Cancelled,

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("{0}")]
    Other(String),
}

impl From<RunnerError> for clsi_core::ClsiError {
    fn from(e: RunnerError) -> Self {
        match e {
            RunnerError::SetupFailed(msg) => clsi_core::ClsiError::CompilerUnavailable(msg),
            RunnerError::LeaseExpired => clsi_core::ClsiError::invalid_state("runner setup expired"),
            RunnerError::Transport(msg) => clsi_core::ClsiError::Transport(msg),
            RunnerError::Cancelled => clsi_core::ClsiError::Cancelled,
            RunnerError::DeadlineExceeded => clsi_core::ClsiError::DeadlineExceeded,
            RunnerError::Other(msg) => clsi_core::ClsiError::Transport(msg),
        }
    }
}
