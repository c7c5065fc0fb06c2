// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! BuildId: `"<16-hex-ns-timestamp>-<16-hex-random>"` (spec §3).
//!
//! String ordering of build directory names equals creation-time ordering,
//! because the timestamp component is a fixed-width zero-padded hex
//! nanosecond counter and sorts lexicographically the same as numerically.

use crate::error::ClsiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BuildId {
    ns_timestamp: u64,
    random: u64,
}

impl BuildId {
    /// Generate a fresh BuildId from the current wall-clock time.
    pub fn generate() -> Self {
        let ns_timestamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let random: u64 = rand::random();
        Self { ns_timestamp, random }
    }

    /// Build from explicit components; used by tests that need
    /// deterministic, orderable build IDs.
    pub fn from_parts(ns_timestamp: u64, random: u64) -> Self {
        Self { ns_timestamp, random }
    }

    /// Nanoseconds since the Unix epoch at generation time, used by the
    /// Output Cache to judge retention age (spec §4.7).
    pub fn timestamp_nanos(&self) -> u64 {
        self.ns_timestamp
    }

    pub fn parse(s: &str) -> Result<Self, ClsiError> {
        let (ts_hex, rand_hex) = s
            .split_once('-')
            .ok_or_else(|| ClsiError::Validation(format!("malformed build id: {s}")))?;
        if ts_hex.len() != 16 || rand_hex.len() != 16 {
            return Err(ClsiError::Validation(format!("malformed build id: {s}")));
        }
        let ns_timestamp = u64::from_str_radix(ts_hex, 16)
            .map_err(|_| ClsiError::Validation(format!("malformed build id: {s}")))?;
        let random = u64::from_str_radix(rand_hex, 16)
            .map_err(|_| ClsiError::Validation(format!("malformed build id: {s}")))?;
        Ok(Self { ns_timestamp, random })
    }
}

impl fmt::Display for BuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}-{:016x}", self.ns_timestamp, self.random)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_is_33_chars_with_one_hyphen() {
        let id = BuildId::from_parts(0x1234, 0xabcd);
        let s = id.to_string();
        assert_eq!(s.len(), 33);
        assert_eq!(s.matches('-').count(), 1);
    }

    #[test]
    fn parse_roundtrips_format() {
        for (ts, r) in [(0u64, 0u64), (1, 8), (u64::MAX, u64::MAX), (0xdead_beef, 0xcafe_babe)] {
            let id = BuildId::from_parts(ts, r);
            let parsed = BuildId::parse(&id.to_string()).unwrap();
            assert_eq!(id, parsed);
        }
    }

    #[test]
    fn string_order_matches_timestamp_order() {
        let earlier = BuildId::from_parts(100, 999);
        let later = BuildId::from_parts(200, 0);
        assert!(earlier.to_string() < later.to_string());
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(BuildId::parse("not-a-build-id").is_err());
        assert!(BuildId::parse("deadbeef-deadbeef").is_err());
    }
}
