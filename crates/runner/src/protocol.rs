// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Wire protocol spoken with the in-container agent over its per-tenant Unix
//! domain socket (spec §4.3.1 "Run").

use crate::error::RunnerError;
use clsi_core::command::{CommandOptions, CommandResult};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;

const WRITE_DEADLINE: Duration = Duration::from_secs(3);

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    argv: &'a [String],
    env: &'a [(String, String)],
    #[serde(rename = "outputFiles")]
    output_files: &'a clsi_core::command::CommandOutputFiles,
    #[serde(rename = "timeoutMs")]
    timeout_ms: u64,
    #[serde(rename = "imageName")]
    image_name: &'a str,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(rename = "exitCode")]
    exit_code: i32,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
    #[serde(rename = "systemTimeMs")]
    system_time_ms: u64,
    #[serde(rename = "userTimeMs")]
    user_time_ms: u64,
    #[serde(rename = "wallTimeMs")]
    wall_time_ms: u64,
}

impl From<WireResponse> for CommandResult {
    fn from(r: WireResponse) -> Self {
        CommandResult {
            exit_code: r.exit_code,
            error_message: r.error_message,
            system_time: Duration::from_millis(r.system_time_ms),
            user_time: Duration::from_millis(r.user_time_ms),
            wall_time: Duration::from_millis(r.wall_time_ms),
        }
    }
}

/// JSON-encode `options`, dial the agent socket, write the request with a
/// fixed write deadline, then block on decoding the response. Closes the
/// connection if canceled while reading so the dial doesn't leak.
pub async fn run_over_socket(
    socket_path: &Path,
    options: &CommandOptions,
) -> Result<CommandResult, RunnerError> {
    let mut stream = UnixStream::connect(socket_path)
        .await
        .map_err(|e| RunnerError::Transport(format!("dial {}: {e}", socket_path.display())))?;

    let request = WireRequest {
        argv: &options.argv,
        env: &options.env,
        output_files: &options.output_files,
        timeout_ms: options.timeout.as_millis() as u64,
        image_name: &options.image_name,
    };
    let body = serde_json::to_vec(&request)
        .map_err(|e| RunnerError::Other(format!("encode request: {e}")))?;

    tokio::time::timeout(WRITE_DEADLINE, stream.write_all(&body))
        .await
        .map_err(|_| RunnerError::Transport("write deadline exceeded".into()))?
        .map_err(|e| RunnerError::Transport(format!("write request: {e}")))?;
    stream
        .shutdown()
        .await
        .map_err(|e| RunnerError::Transport(format!("shutdown write half: {e}")))?;

    // The caller wraps this whole call in `tokio::time::timeout`; dropping
    // that future drops `stream`, which closes the socket and unblocks any
    // in-flight read on the agent's side.
    let mut buf = Vec::new();
    stream
        .read_to_end(&mut buf)
        .await
        .map_err(|e| RunnerError::Transport(format!("read response: {e}")))?;

    let response: WireResponse =
        serde_json::from_slice(&buf).map_err(|e| RunnerError::Other(format!("decode response: {e}")))?;

    match response.error_message.as_deref() {
        Some("cancelled") => Err(RunnerError::Cancelled),
        Some("timedout") => Err(RunnerError::DeadlineExceeded),
        _ => Ok(response.into()),
    }
}

/// Probe the agent with a cheap `true` invocation. Used during container
/// setup to confirm the agent is listening before declaring setup complete.
pub async fn probe(socket_path: &Path) -> Result<(), RunnerError> {
    let options = CommandOptions::new(vec!["true".to_string()], "probe", Duration::from_secs(2));
    run_over_socket(socket_path, &options).await.map(|_| ())
}
