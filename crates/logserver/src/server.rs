// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Server lifecycle: bind, serve, and the ordered shutdown sequence.
//!
//! ```text
//!   Acceptor ──spawns──> ConnectionHandler (x N, on the TaskTracker)
//!                              │
//!                              v
//!                     ┌─────────────────┐
//!                     │   EntryQueue    │ (mpsc, bounded)
//!                     └────────┬────────┘
//!                              v
//!                         SinkWriter ──> LineSink
//! ```
//!
//! Once the coordinator trips, [`LogServer::run`] unwinds in a fixed
//! order: the acceptor returns, every connection task finishes, the queue is
//! closed, and the writer drains what is left.

use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio::task::JoinError;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use crate::config::ServerConfig;
use crate::errors::{AcceptorError, ServerError};
use crate::listener::{Acceptor, AcceptorExit};
use crate::queue::entry_queue;
use crate::shutdown::ShutdownCoordinator;
use crate::writer::{LineSink, SinkWriter, WriterReport};

/// Summary of a completed run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub connections_accepted: u64,
    pub writer: WriterReport,
}

/// A bound, not yet running, log server.
pub struct LogServer {
    config: ServerConfig,
    listener: TcpListener,
}

impl LogServer {
    /// Validates the configuration and binds the listening socket.
    ///
    /// Failing to bind is fatal: nothing has been started yet.
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        config.validate()?;
        let address = config.bind_address();
        let listener = TcpListener::bind(&address)
            .await
            .map_err(|source| ServerError::Bind { address, source })?;
        Ok(Self { config, listener })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serves connections until `coordinator` trips, then shuts down in order.
    ///
    /// Returns only after the sink writer has consumed every accepted entry. An
    /// acceptor fault trips `coordinator` itself, so open connections still
    /// unwind before the error is returned.
    pub async fn run<S: LineSink>(
        self,
        sink: S,
        coordinator: ShutdownCoordinator,
    ) -> Result<ShutdownReport, ServerError> {
        let (queue, rx) = entry_queue(self.config.queue_capacity)?;
        let writer = SinkWriter::new(sink, rx).spawn();

        let tracker = TaskTracker::new();
        let acceptor = Acceptor::new(
            self.listener,
            queue.producer(),
            tracker.clone(),
            coordinator.token(),
            self.config.connection_settings(),
        );

        // 1. the acceptor stops, gracefully or not
        let acceptor_result = match tokio::spawn(acceptor.run()).await {
            Ok(AcceptorExit::GracefulStop { accepted }) => {
                debug!("Acceptor stopped after {} connections", accepted);
                Ok(accepted)
            }
            Err(e) => Err(acceptor_fault(e, &coordinator)),
        };

        // 2. wait for every connection task
        tracker.close();
        debug!("Waiting for {} open connections to close", tracker.len());
        tracker.wait().await;

        // 3. no producer is left, close the queue
        queue.close();

        // 4. the writer drains the remaining entries
        let writer_report = writer
            .await
            .map_err(|e| ServerError::Writer(e.to_string()))?;

        let connections_accepted = acceptor_result?;
        info!(
            connections_accepted,
            lines_written = writer_report.lines_written,
            "Log server stopped"
        );
        Ok(ShutdownReport {
            connections_accepted,
            writer: writer_report,
        })
    }
}

/// Counts an acceptor fault as a shutdown request, so open connections unwind
/// and a later signal escalates as usual.
fn acceptor_fault(e: JoinError, coordinator: &ShutdownCoordinator) -> AcceptorError {
    let e = if e.is_panic() {
        AcceptorError::Panicked(format!("{:?}", e))
    } else {
        AcceptorError::Join(e.to_string())
    };
    error!("Error listening for log messages: {}", e);
    coordinator.trip();
    e
}
