// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

use std::process::ExitCode;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use logserver::{
    writer::{StdoutSink, TracingSink},
    LogServer, OutputKind, ServerConfig, ShutdownCoordinator,
};

#[tokio::main]
pub async fn main() -> ExitCode {
    let config = ServerConfig::from_env();

    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());

    // Diagnostics go to stderr; stdout belongs to the sink.
    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_level(true)
        .with_thread_names(false)
        .with_thread_ids(false)
        .with_line_number(false)
        .with_file(false)
        .with_target(true)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("setting default subscriber failed: {e}");
        return ExitCode::FAILURE;
    }

    debug!("Logging subsystem enabled");

    let config = match config {
        Ok(c) => c,
        Err(e) => {
            error!("Error loading log server configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    let coordinator = ShutdownCoordinator::new();
    tokio::spawn(coordinator.clone().listen_for_signals());

    let server = match LogServer::bind(config.clone()).await {
        Ok(server) => server,
        Err(e) => {
            error!("Failed to start network listener: {e}");
            return ExitCode::FAILURE;
        }
    };
    if let Ok(addr) = server.local_addr() {
        info!("logserver: starting to listen on {addr}");
    }

    let result = match config.output {
        OutputKind::Stdout => server.run(StdoutSink::stdout(), coordinator.clone()).await,
        OutputKind::Log => server.run(TracingSink, coordinator.clone()).await,
    };

    match result {
        Ok(report) => {
            info!(
                "Shut down cleanly: {} connections, {} lines written",
                report.connections_accepted, report.writer.lines_written
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("Log server stopped with an error: {e}");
            ExitCode::FAILURE
        }
    }
}
