// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! clsi-daemon (clsid): loads `CLSI_OPTIONS`, builds the Project Manager
//! and its sub-managers, and runs the cleanup/health-check tickers until
//! asked to shut down (SPEC_FULL §10.3, §12). The HTTP front controller and
//! the load-reporting TCP listener are out of scope (spec §1); this process
//! only owns the ambient wiring around the Project Manager.

use std::sync::Arc;

use tracing::{error, info};

use clsi_daemon::config::ClsiOptions;
use clsi_daemon::env;
use clsi_daemon::lifecycle::Daemon;

fn setup_logging() {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry().with(filter).with(fmt::layer()).init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    setup_logging();

    let options = match ClsiOptions::load() {
        Ok(options) => options,
        Err(e) => {
            error!(error = %e, "invalid CLSI_OPTIONS");
            return Err(e.into());
        }
    };

    info!("starting clsi-daemon");
    let daemon = Arc::new(Daemon::bootstrap(options)?);
    let background_tasks = daemon.spawn_background_tasks();

    tokio::signal::ctrl_c().await?;
    info!("received shutdown signal");

    for task in &background_tasks {
        task.abort();
    }
    daemon.shutdown(env::drain_timeout()).await;

    Ok(())
}
