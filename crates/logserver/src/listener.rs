// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! TCP accept loop.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::connection::ConnectionHandler;
use crate::queue::EntrySender;

// Backoff after a failed accept: 10ms * 2^n, capped.
const ACCEPT_BACKOFF_BASE: Duration = Duration::from_millis(10);
const ACCEPT_BACKOFF_MAX: Duration = Duration::from_secs(1);

/// Settings applied to every accepted connection.
#[derive(Debug, Clone, Copy)]
pub struct ConnectionSettings {
    pub keepalive: Duration,
    pub max_line_length: usize,
}

/// Why the accept loop stopped without error. Faults are reported by the
/// task running the loop, see [`crate::server::LogServer::run`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcceptorExit {
    /// Cancellation was requested.
    GracefulStop { accepted: u64 },
}

/// Accepts connections and spawns a [`ConnectionHandler`] for each one on the
/// shutdown barrier.
pub struct Acceptor {
    listener: TcpListener,
    queue: EntrySender,
    tracker: TaskTracker,
    cancel_token: CancellationToken,
    settings: ConnectionSettings,
    accepted: u64,
}

impl Acceptor {
    pub fn new(
        listener: TcpListener,
        queue: EntrySender,
        tracker: TaskTracker,
        cancel_token: CancellationToken,
        settings: ConnectionSettings,
    ) -> Self {
        Self {
            listener,
            queue,
            tracker,
            cancel_token,
            settings,
            accepted: 0,
        }
    }

    /// Accepts until cancelled.
    ///
    /// The listening socket is dropped, and so closed, when this returns.
    pub async fn run(mut self) -> AcceptorExit {
        info!(
            "Listening for log messages on {}",
            self.listener
                .local_addr()
                .map_or_else(|_| "<unknown>".to_string(), |addr| addr.to_string())
        );
        let mut consecutive_errors: u32 = 0;

        loop {
            let accepted = tokio::select! {
                biased;
                () = self.cancel_token.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, peer)) => {
                    consecutive_errors = 0;
                    self.spawn_handler(stream, peer);
                }
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionRefused
                    ) =>
                {
                    debug!("Connection dropped before accept completed: {}", e);
                }
                Err(e) => {
                    consecutive_errors = consecutive_errors.saturating_add(1);
                    let backoff = accept_backoff(consecutive_errors);
                    error!(
                        consecutive_errors,
                        "Failed to accept connection: {}. Retrying in {:?}", e, backoff
                    );
                    tokio::select! {
                        () = sleep(backoff) => {}
                        () = self.cancel_token.cancelled() => break,
                    }
                }
            }
        }

        info!(accepted = self.accepted, "Stopped accepting connections");
        AcceptorExit::GracefulStop {
            accepted: self.accepted,
        }
    }

    fn spawn_handler(&mut self, stream: TcpStream, peer: SocketAddr) {
        self.accepted += 1;
        info!(%peer, "Received connection");

        if let Err(e) = configure_socket(&stream, self.settings.keepalive) {
            warn!(%peer, "Failed to set TCP keepalive: {}", e);
        }

        let handler = ConnectionHandler::new(
            stream,
            peer,
            self.queue.clone(),
            self.cancel_token.clone(),
            self.settings.max_line_length,
        );
        self.tracker.spawn(handler.run());
    }
}

/// Enables TCP keep-alive probes on an accepted stream.
pub fn configure_socket(stream: &TcpStream, period: Duration) -> io::Result<()> {
    let keepalive = TcpKeepalive::new().with_time(period);
    SockRef::from(stream).set_tcp_keepalive(&keepalive)
}

fn accept_backoff(consecutive_errors: u32) -> Duration {
    let exponent = consecutive_errors.saturating_sub(1).min(16);
    ACCEPT_BACKOFF_BASE
        .saturating_mul(1 << exponent)
        .min(ACCEPT_BACKOFF_MAX)
}
