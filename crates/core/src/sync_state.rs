// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SyncState / SyncType (spec §3): the caller's opaque resync token and the
//! reconciliation mode it forces.

use serde::{Deserialize, Serialize};

/// Opaque token supplied by the caller. The core never interprets its
/// contents (spec §9 open question) — it only compares for equality.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState(pub String);

impl SyncState {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// "Empty stored state" is treated as "no cache" per spec §9.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for SyncState {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Requested reconciliation mode. An empty/absent wire value means "full",
/// which is an alias for `FullIncremental`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncType {
    FullIncremental,
    Incremental,
}

impl SyncType {
    pub fn from_wire(value: &str) -> Self {
        match value {
            "incremental" => Self::Incremental,
            _ => Self::FullIncremental,
        }
    }

    pub fn is_incremental(&self) -> bool {
        matches!(self, Self::Incremental)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_and_full_both_mean_full_incremental() {
        assert_eq!(SyncType::from_wire(""), SyncType::FullIncremental);
        assert_eq!(SyncType::from_wire("full"), SyncType::FullIncremental);
    }

    #[test]
    fn incremental_is_recognized() {
        assert_eq!(SyncType::from_wire("incremental"), SyncType::Incremental);
    }
}
