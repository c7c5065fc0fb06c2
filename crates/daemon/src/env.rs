// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Centralized environment variable access for the daemon crate. One
//! function per variable, with a documented default (spec §6
//! "Environment"), matching the teacher's `daemon::env` module.

use std::time::Duration;

/// TCP port the load listener binds to. Load reporting itself is out of
/// scope for this crate (spec §1); only the port is read so configuration
/// stays centralized here for whichever front controller wires it up.
pub fn load_port() -> Option<u16> {
    std::env::var("LOAD_PORT").ok().and_then(|s| s.parse::<u16>().ok())
}

/// Whether load shedding is enabled. Defaults to `false`.
pub fn load_shedding() -> bool {
    std::env::var("LOAD_SHEDDING").ok().as_deref() == Some("true")
}

/// How often capacity is refreshed for load reporting. Defaults to 3s.
pub fn load_refresh_capacity_every() -> Duration {
    std::env::var("LOAD_REFRESH_CAPACITY_EVERY")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(3))
}

/// The raw `CLSI_OPTIONS` JSON blob, read once at startup.
pub fn clsi_options_json() -> Option<String> {
    std::env::var("CLSI_OPTIONS").ok()
}

/// How long shutdown waits for in-flight compiles to finish before giving
/// up and exiting anyway. Defaults to 5s.
pub fn drain_timeout() -> Duration {
    std::env::var("CLSI_DRAIN_TIMEOUT_MS")
        .ok()
        .and_then(|s| s.parse::<u64>().ok())
        .map(Duration::from_millis)
        .unwrap_or(Duration::from_secs(5))
}
